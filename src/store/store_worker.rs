use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::channel::{
    ChannelEvent,
    EventChannel,
    FileSharedWithYouPayload,
    FileUploadedPayload,
    ShareFilePayload,
};
use crate::core::{
    Directory,
    FileBlob,
    FileRecord,
    FilesSnapshot,
    Notification,
    Result,
    SessionContext,
    SessionError,
    SharedFileRecord,
    StoreEvent,
    StoreState,
    UploadId,
    UploadState,
};
use crate::directory::DirectoryClient;
use crate::upload::{UploadCoordinator, UploadWorker};
use crate::utils::{RetryPolicy, RetryStrategy};
use super::types::{StoreCommand, WorkerMessage};

/// 删除确认的尝试次数，间隔固定
pub const DELETE_ATTEMPTS: u32 = 4;
const DELETE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Owns the file collections. Every mutation happens on this task, remote
/// calls run on spawned tasks and report back through `message_tx`.
pub struct SessionStoreWorker {
    directory: Arc<dyn DirectoryClient>,
    channel: Arc<dyn EventChannel>,
    session: SessionContext,

    state: StoreState,
    files: Vec<FileRecord>,
    shared_files: Vec<SharedFileRecord>,
    uploads: UploadCoordinator,

    snapshot_tx: watch::Sender<FilesSnapshot>,
    event_tx: broadcast::Sender<StoreEvent>,
    message_tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl SessionStoreWorker {
    pub(crate) async fn run(
        directory: Arc<dyn DirectoryClient>,
        channel: Arc<dyn EventChannel>,
        session: SessionContext,
        mut command_rx: mpsc::Receiver<StoreCommand>,
        snapshot_tx: watch::Sender<FilesSnapshot>,
        event_tx: broadcast::Sender<StoreEvent>,
        shutdown: CancellationToken,
    ) {
        let (message_tx, mut message_rx) = mpsc::unbounded_channel();
        let mut inbound = channel.subscribe();
        let mut listening = true;

        let mut worker = Self {
            directory,
            channel,
            session,
            state: StoreState::Uninitialized,
            files: Vec::new(),
            shared_files: Vec::new(),
            uploads: UploadCoordinator::new(),
            snapshot_tx,
            event_tx,
            message_tx,
        };

        // 主事件循环
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = command_rx.recv() => match command {
                    Some(command) => worker.handle_command(command).await,
                    None => break,
                },
                Some(message) = message_rx.recv() => {
                    worker.handle_message(message).await;
                }
                received = inbound.recv(), if listening => match received {
                    Ok(event) => worker.handle_remote_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "store fell behind the event channel, events lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("event channel closed");
                        listening = false;
                    }
                },
            }
        }

        worker.uploads.cancel_all();
        debug!("session store worker stopped");
    }

    async fn handle_command(&mut self, command: StoreCommand) {
        match command {
            StoreCommand::LoadInitialState { token, reply } => {
                self.load_initial_state(token, reply);
            }
            StoreCommand::RequestUpload { token, blob, reply } => {
                let result = self.request_upload(token, blob);
                let _ = reply.send(result);
            }
            StoreCommand::RequestShare { file_id, recipient_email, reply } => {
                let result = self.request_share(&file_id, &recipient_email).await;
                let _ = reply.send(result);
            }
            StoreCommand::RequestDelete { token, file_id, reply } => {
                let result = self.request_delete(token, &file_id);
                let _ = reply.send(result);
            }
            StoreCommand::RemoteEvent { event, reply } => {
                self.handle_remote_event(event).await;
                let _ = reply.send(());
            }
            StoreCommand::CancelUpload { upload_id, reply } => {
                let result = self.cancel_upload(upload_id);
                let _ = reply.send(result);
            }
            StoreCommand::GetUploadTask { upload_id, reply } => {
                let _ = reply.send(self.uploads.get(upload_id).cloned());
            }
            StoreCommand::GetUploadTasks { reply } => {
                let _ = reply.send(self.uploads.tasks());
            }
            StoreCommand::CleanUploads { reply } => {
                let _ = reply.send(self.uploads.clean());
            }
        }
    }

    async fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::LoadFinished { result, reply } => {
                let result = self.finish_load(result);
                let _ = reply.send(result);
            }
            WorkerMessage::TransferFinished { upload_id, result } => {
                self.finish_transfer(upload_id, result).await;
            }
            WorkerMessage::DeleteFinished { record, position, result } => {
                self.finish_delete(record, position, result);
            }
        }
    }

    fn load_initial_state(&mut self, token: String, reply: oneshot::Sender<Result<FilesSnapshot>>) {
        if self.state != StoreState::Uninitialized {
            let _ = reply.send(Err(SessionError::InvalidState(format!(
                "Cannot load initial state in state {:?}",
                self.state
            ))));
            return;
        }

        self.set_state(StoreState::Loading);

        let directory = self.directory.clone();
        let message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            let result = RetryPolicy::default().run(|| directory.fetch_directory(&token)).await;
            let _ = message_tx.send(WorkerMessage::LoadFinished { result, reply });
        });
    }

    fn finish_load(&mut self, result: Result<Directory>) -> Result<FilesSnapshot> {
        let directory = match result {
            Ok(directory) => directory,
            Err(err) => {
                warn!(error = %err, "initial load failed");
                self.report_unauthorized(&err);
                self.set_state(StoreState::Uninitialized);
                return Err(err);
            }
        };

        let owned: HashSet<&str> = directory.files.iter().map(|file| file.id.as_str()).collect();
        let mut seen = HashSet::new();
        let received = directory.shared_files.len();
        let shared_files: Vec<_> = directory.shared_files
            .into_iter()
            .filter(|file| !owned.contains(file.id.as_str()) && seen.insert(file.id.clone()))
            .collect();

        if shared_files.len() < received {
            debug!(dropped = received - shared_files.len(), "shared records overlapping owned files dropped");
        }

        self.files = directory.files;
        self.shared_files = shared_files;
        self.set_state(StoreState::Ready);

        info!(files = self.files.len(), shared_files = self.shared_files.len(), "directory loaded");
        Ok(self.snapshot())
    }

    fn request_upload(&mut self, token: String, blob: FileBlob) -> Result<UploadId> {
        let upload_id = self.uploads.select(&blob);
        let (announcement, cancellation_token) = self.uploads.start(upload_id)?;
        self.emit_state_change(upload_id, UploadState::Selected, UploadState::Transferring);
        self.publish(ChannelEvent::StartUpload(announcement));

        info!(%upload_id, file_name = %blob.name, size = blob.size(), "upload started");

        let worker = UploadWorker {
            directory: self.directory.clone(),
            cancellation_token,
        };
        let message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            let result = worker.run(token, blob).await;
            let _ = message_tx.send(WorkerMessage::TransferFinished { upload_id, result });
        });

        Ok(upload_id)
    }

    async fn finish_transfer(&mut self, upload_id: UploadId, result: Result<FileRecord>) {
        match result {
            Ok(remote) => {
                let Some(task) = self.uploads.complete(upload_id) else {
                    return;
                };

                let record = reconcile(FileRecord::new_local(&task.file_name, task.size_bytes), remote);
                self.shared_files.retain(|file| file.id != record.id);
                match self.files.iter_mut().find(|file| file.id == record.id) {
                    Some(existing) => *existing = record.clone(),
                    None => self.files.push(record.clone()),
                }
                self.publish_snapshot();

                info!(%upload_id, file_id = %record.id, "upload complete");
                self.emit_state_change(upload_id, UploadState::Transferring, UploadState::Complete);
                let _ = self.event_tx.send(StoreEvent::UploadCompleted {
                    upload_id,
                    record: record.clone(),
                });
                self.notify(Notification::info(
                    "Upload complete",
                    format!("{} was encrypted and uploaded", record.name),
                ));

                let uploaded_by = self.session.user_name().await.unwrap_or_else(|| "User".to_string());
                self.publish(ChannelEvent::FileUploaded(FileUploadedPayload {
                    file_name: record.name,
                    size: record.size_bytes,
                    uploaded_by,
                }));
            }
            Err(err) => {
                let Some(task) = self.uploads.fail(upload_id, &err) else {
                    return;
                };

                warn!(%upload_id, error = %err, "upload failed");
                self.emit_state_change(upload_id, UploadState::Transferring, UploadState::Failed);
                let _ = self.event_tx.send(StoreEvent::UploadFailed {
                    upload_id,
                    error: err.to_string(),
                });
                self.notify(Notification::error(
                    "Upload failed",
                    format!("{}: {}", task.file_name, err),
                ));
                self.report_unauthorized(&err);
            }
        }
    }

    async fn request_share(&self, file_id: &str, recipient_email: &str) -> Result<ShareFilePayload> {
        let file = self.files
            .iter()
            .find(|file| file.id == file_id)
            .ok_or_else(|| SessionError::not_found(file_id))?;

        let recipient = recipient_email.trim();
        if !is_email(recipient) {
            return Err(SessionError::InvalidInput(format!("Invalid recipient email: {:?}", recipient_email)));
        }

        let shared_by = self.session.user_name().await.unwrap_or_else(|| "User".to_string());

        Ok(ShareFilePayload {
            file_id: file.id.clone(),
            file_name: file.name.clone(),
            shared_with: recipient.to_string(),
            shared_by,
        })
    }

    fn request_delete(&mut self, token: String, file_id: &str) -> Result<()> {
        let position = self.files
            .iter()
            .position(|file| file.id == file_id)
            .ok_or_else(|| SessionError::not_found(file_id))?;

        let record = self.files.remove(position);
        self.publish_snapshot();
        debug!(file_id, "record removed, awaiting remote confirmation");

        let directory = self.directory.clone();
        let message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            let file_id = record.id.clone();
            let confirmation = RetryPolicy::default()
                .attempts(DELETE_ATTEMPTS)
                .strategy(RetryStrategy::Fixed(DELETE_RETRY_DELAY));
            // 远端已不存在也算删除成功
            let result = match confirmation.run(|| directory.delete(&token, &file_id)).await {
                Err(SessionError::NotFound(_)) => Ok(()),
                other => other,
            };
            let _ = message_tx.send(WorkerMessage::DeleteFinished { record, position, result });
        });

        Ok(())
    }

    fn finish_delete(&mut self, record: FileRecord, position: usize, result: Result<()>) {
        let err = match result {
            Ok(()) => {
                info!(file_id = %record.id, "delete confirmed");
                return;
            }
            Err(err) => err,
        };

        warn!(file_id = %record.id, error = %err, "delete failed, restoring record");

        if !self.files.iter().any(|file| file.id == record.id) {
            self.shared_files.retain(|file| file.id != record.id);
            let position = position.min(self.files.len());
            self.files.insert(position, record.clone());
            self.publish_snapshot();
        }

        let _ = self.event_tx.send(StoreEvent::DeleteRolledBack {
            file_id: record.id.clone(),
            error: err.to_string(),
        });
        self.notify(Notification::error(
            "Delete failed",
            format!("{} could not be deleted: {}", record.name, err),
        ));
        self.report_unauthorized(&err);
    }

    fn cancel_upload(&mut self, upload_id: UploadId) -> Result<()> {
        let old_state = self.uploads
            .get(upload_id)
            .map(|task| task.state)
            .ok_or_else(|| SessionError::not_found(upload_id.to_string()))?;

        self.uploads.cancel(upload_id)?;

        // Transfers fail once the worker reports back, selected tasks fail right away.
        if old_state == UploadState::Selected {
            self.emit_state_change(upload_id, old_state, UploadState::Failed);
            let _ = self.event_tx.send(StoreEvent::UploadFailed {
                upload_id,
                error: SessionError::Cancelled.to_string(),
            });
        }

        Ok(())
    }

    async fn handle_remote_event(&mut self, event: ChannelEvent) {
        debug!(event = event.name(), "remote event");

        match event {
            ChannelEvent::FileShared(payload) => {
                self.notify(Notification::info(
                    "File shared",
                    format!("{} shared {}", payload.shared_by, payload.file_name),
                ));
            }
            ChannelEvent::FileSharedWithYou(payload) => {
                self.receive_shared_file(payload).await;
            }
            ChannelEvent::UploadProgress(payload) => {
                if let Some((upload_id, progress_percent)) = self.uploads.apply_progress(&payload) {
                    let _ = self.event_tx.send(StoreEvent::UploadProgress {
                        upload_id,
                        file_name: payload.file_name,
                        progress_percent,
                    });
                }
            }
            ChannelEvent::FileUploaded(payload) => {
                let own_name = self.session.user_name().await;
                if own_name.as_deref() == Some(payload.uploaded_by.as_str()) {
                    return;
                }

                self.notify(Notification::info(
                    "File uploaded",
                    format!("{} uploaded {}", payload.uploaded_by, payload.file_name),
                ));
            }
            ChannelEvent::Authenticate(_) | ChannelEvent::StartUpload(_) | ChannelEvent::ShareFile(_) => {
                debug!("outbound event ignored");
            }
        }
    }

    async fn receive_shared_file(&mut self, payload: FileSharedWithYouPayload) {
        let Some(user_email) = self.session.user_email().await else {
            debug!("shared file received without a session");
            return;
        };

        if !user_email.trim().eq_ignore_ascii_case(payload.recipient.trim()) {
            debug!(recipient = %payload.recipient, "shared file addressed to another user");
            return;
        }

        let file_id = payload.file_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let known = self.files.iter().any(|file| file.id == file_id)
            || self.shared_files.iter().any(|file| file.id == file_id);
        if known {
            debug!(%file_id, "shared file already known");
            return;
        }

        let record = SharedFileRecord {
            id: file_id,
            name: payload.file_name,
            size_bytes: payload.size.unwrap_or(0),
            shared_at: Utc::now(),
            shared_by: payload.shared_by,
            encrypted: true,
        };

        info!(file_id = %record.id, shared_by = %record.shared_by, "file shared with us");
        self.notify(Notification::info(
            "New file shared",
            format!("{} shared {} with you", record.shared_by, record.name),
        ));
        self.shared_files.push(record);
        self.publish_snapshot();
    }

    fn set_state(&mut self, new_state: StoreState) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }

        self.state = new_state;
        self.publish_snapshot();
        let _ = self.event_tx.send(StoreEvent::StateChanged { old_state, new_state });
    }

    fn snapshot(&self) -> FilesSnapshot {
        FilesSnapshot {
            state: self.state,
            files: self.files.clone(),
            shared_files: self.shared_files.clone(),
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    /// Emit on the channel without holding up the worker.
    fn publish(&self, event: ChannelEvent) {
        let channel = self.channel.clone();
        tokio::spawn(async move {
            let name = event.name();
            if let Err(err) = channel.emit(event).await {
                warn!(event = name, error = %err, "channel event not delivered");
            }
        });
    }

    fn notify(&self, notification: Notification) {
        let _ = self.event_tx.send(StoreEvent::Notification(notification));
    }

    fn report_unauthorized(&self, err: &SessionError) {
        if err.is_unauthorized() {
            let _ = self.event_tx.send(StoreEvent::ReauthRequired);
        }
    }

    fn emit_state_change(&self, upload_id: UploadId, old_state: UploadState, new_state: UploadState) {
        let _ = self.event_tx.send(StoreEvent::UploadStateChanged {
            upload_id,
            old_state,
            new_state,
        });
    }
}

/// The service's id and timestamp override the locally minted ones.
fn reconcile(mut local: FileRecord, remote: FileRecord) -> FileRecord {
    if local.id != remote.id {
        debug!(local_id = %local.id, remote_id = %remote.id, "service assigned the file id");
        local.id = remote.id;
    }
    local.uploaded_at = remote.uploaded_at;
    local
}

fn is_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_email() {
        assert!(is_email("b@x.com"));
        assert!(!is_email("bob"));
        assert!(!is_email("@x.com"));
        assert!(!is_email("b@"));
        assert!(!is_email("b@x@y"));
        assert!(!is_email("b c@x.com"));
    }

    #[test]
    fn test_reconcile_prefers_service_id() {
        let local = FileRecord::new_local("r.pdf", 1000);
        let mut remote = FileRecord::new_local("renamed.pdf", 1);
        remote.id = "srv-1".to_string();

        let record = reconcile(local, remote.clone());
        assert_eq!(record.id, "srv-1");
        assert_eq!(record.uploaded_at, remote.uploaded_at);
        assert_eq!(record.name, "r.pdf");
        assert_eq!(record.size_bytes, 1000);
        assert!(record.encrypted);
    }
}
