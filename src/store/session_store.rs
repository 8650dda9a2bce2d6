use std::path::{Path, PathBuf};
use std::sync::Arc;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use crate::channel::{ChannelEvent, EventChannel};
use crate::core::{
    FileBlob,
    FilesSnapshot,
    Notification,
    Result,
    SessionContext,
    SessionError,
    StoreEvent,
    UploadId,
    UploadTask,
};
use crate::directory::{ByteStream, DirectoryClient};
use super::store_worker::SessionStoreWorker;
use super::types::StoreCommand;

/// Client side view of the user's files.
///
/// Cheap to clone; every clone talks to the same worker. Reads go through
/// [`SessionStore::snapshot`] and never wait on the worker or the network.
#[derive(Clone)]
pub struct SessionStore {
    command_tx: mpsc::Sender<StoreCommand>,
    event_tx: broadcast::Sender<StoreEvent>,
    snapshot_rx: watch::Receiver<FilesSnapshot>,
    directory: Arc<dyn DirectoryClient>,
    channel: Arc<dyn EventChannel>,
    session: SessionContext,
    shutdown: CancellationToken,
}

/// 存储句柄 - 包含存储和工作线程
pub struct SessionStoreHandle {
    pub store: SessionStore,
    pub worker_handle: JoinHandle<()>,
}

impl SessionStoreHandle {
    pub async fn shutdown(self) -> Result<()> {
        self.store.shutdown();
        self.worker_handle.await
            .map_err(|err| SessionError::internal_error(format!("Worker panic: {}", err)))
    }
}

impl SessionStore {
    /// Start the store worker. Must be called from within a tokio runtime.
    pub fn spawn(
        directory: Arc<dyn DirectoryClient>,
        channel: Arc<dyn EventChannel>,
        session: SessionContext,
    ) -> SessionStoreHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        // 最大缓存 256 个事件
        let (event_tx, _) = broadcast::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(FilesSnapshot::default());
        let shutdown = CancellationToken::new();

        let worker_handle = tokio::spawn(SessionStoreWorker::run(
            directory.clone(),
            channel.clone(),
            session.clone(),
            command_rx,
            snapshot_tx,
            event_tx.clone(),
            shutdown.clone(),
        ));

        let store = Self {
            command_tx,
            event_tx,
            snapshot_rx,
            directory,
            channel,
            session,
            shutdown,
        };

        SessionStoreHandle {
            store,
            worker_handle,
        }
    }

    /// Fetch both collections and move the store to `Ready`.
    pub async fn load_initial_state(&self) -> Result<FilesSnapshot> {
        let token = self.session.require_token().await?;

        self.request(|reply| StoreCommand::LoadInitialState { token, reply }).await?
    }

    /// Register an upload and start it in the background.
    pub async fn request_upload(&self, blob: FileBlob) -> Result<UploadId> {
        let token = self.session.require_token().await?;

        self.request(|reply| StoreCommand::RequestUpload { token, blob, reply }).await?
    }

    /// Ask the service to share one of our files. Local collections are untouched.
    #[instrument(skip(self))]
    pub async fn request_share(&self, file_id: &str, recipient_email: &str) -> Result<()> {
        let payload = self.request(|reply| StoreCommand::RequestShare {
            file_id: file_id.to_string(),
            recipient_email: recipient_email.to_string(),
            reply,
        }).await??;

        let message = format!("{} shared with {}", payload.file_name, payload.shared_with);
        self.channel.emit(ChannelEvent::ShareFile(payload)).await?;

        info!("share requested");
        let _ = self.event_tx.send(StoreEvent::Notification(Notification::info("File shared", message)));

        Ok(())
    }

    /// Remove a file now and confirm with the service in the background.
    /// A failed confirmation puts the record back.
    pub async fn request_delete(&self, file_id: &str) -> Result<()> {
        let token = self.session.require_token().await?;

        self.request(|reply| StoreCommand::RequestDelete {
            token,
            file_id: file_id.to_string(),
            reply,
        }).await?
    }

    /// Apply an inbound channel event. Resolves once the store has applied it.
    pub async fn dispatch_remote_event(&self, event: ChannelEvent) -> Result<()> {
        self.request(|reply| StoreCommand::RemoteEvent { event, reply }).await
    }

    pub fn snapshot(&self) -> FilesSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<FilesSnapshot> {
        self.snapshot_rx.clone()
    }

    /// 订阅事件
    ///
    /// 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }

    pub async fn upload_task(&self, upload_id: UploadId) -> Result<Option<UploadTask>> {
        self.request(|reply| StoreCommand::GetUploadTask { upload_id, reply }).await
    }

    /// Every tracked upload, oldest first. Finished ones stay until
    /// [`SessionStore::clean_uploads`]; past `MAX_FINISHED_TASKS` the oldest
    /// finished tasks are dropped.
    pub async fn upload_tasks(&self) -> Result<Vec<UploadTask>> {
        self.request(|reply| StoreCommand::GetUploadTasks { reply }).await
    }

    pub async fn cancel_upload(&self, upload_id: UploadId) -> Result<()> {
        self.request(|reply| StoreCommand::CancelUpload { upload_id, reply }).await?
    }

    /// Drop finished uploads, returns how many were removed.
    pub async fn clean_uploads(&self) -> Result<usize> {
        self.request(|reply| StoreCommand::CleanUploads { reply }).await
    }

    /// Stream the content of an owned or shared file.
    pub async fn download(&self, file_id: &str) -> Result<ByteStream> {
        self.file_name(file_id)?;
        let token = self.session.require_token().await?;

        self.directory.download(&token, file_id).await
    }

    /// Download a file into `dir`, returns the written path.
    ///
    /// The content lands in `<name>.part` first and replaces `dir/<name>` only
    /// once the whole stream was written.
    #[instrument(skip(self, dir))]
    pub async fn download_to(&self, file_id: &str, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let name = self.file_name(file_id)?;
        let file_name = Path::new(&name)
            .file_name()
            .ok_or_else(|| SessionError::InvalidInput(format!("Invalid file name: {:?}", name)))?;

        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(file_name);
        let partial = dir.join(format!("{}.part", file_name.to_string_lossy()));

        let stream = self.download(file_id).await?;
        let written = match write_stream(stream, &partial).await {
            Ok(written) => written,
            Err(err) => {
                if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), error = %remove_err, "partial download not removed");
                }
                return Err(err);
            }
        };
        tokio::fs::rename(&partial, &path).await?;

        debug!(path = %path.display(), written, "download finished");
        Ok(path)
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub async fn logout(&self) -> Result<()> {
        self.session.clear().await
    }

    /// Stop the worker. In-flight uploads are cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn file_name(&self, file_id: &str) -> Result<String> {
        let snapshot = self.snapshot_rx.borrow();

        snapshot.file(file_id)
            .map(|file| file.name.clone())
            .or_else(|| snapshot.shared_file(file_id).map(|file| file.name.clone()))
            .ok_or_else(|| SessionError::not_found(file_id))
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> StoreCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| SessionError::StoreShutdown)?;

        reply_rx
            .await
            .map_err(|_| SessionError::StoreShutdown)
    }
}

/// 写入临时文件，成功后由调用方重命名
async fn write_stream(mut stream: ByteStream, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(written)
}
