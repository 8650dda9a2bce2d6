use tokio::sync::oneshot;
use crate::channel::{ChannelEvent, ShareFilePayload};
use crate::core::{Directory, FileBlob, FileRecord, FilesSnapshot, Result, UploadId, UploadTask};

/// Commands sent from [`super::SessionStore`] to its worker.
pub(crate) enum StoreCommand {
    /// 初始加载
    LoadInitialState {
        token: String,
        reply: oneshot::Sender<Result<FilesSnapshot>>,
    },

    /// 注册上传任务
    RequestUpload {
        token: String,
        blob: FileBlob,
        reply: oneshot::Sender<Result<UploadId>>,
    },

    /// Validate a share and build the outbound event.
    RequestShare {
        file_id: String,
        recipient_email: String,
        reply: oneshot::Sender<Result<ShareFilePayload>>,
    },

    /// 乐观删除
    RequestDelete {
        token: String,
        file_id: String,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Inbound channel event injected by the caller.
    RemoteEvent {
        event: ChannelEvent,
        reply: oneshot::Sender<()>,
    },

    CancelUpload {
        upload_id: UploadId,
        reply: oneshot::Sender<Result<()>>,
    },

    GetUploadTask {
        upload_id: UploadId,
        reply: oneshot::Sender<Option<UploadTask>>,
    },

    GetUploadTasks {
        reply: oneshot::Sender<Vec<UploadTask>>,
    },

    /// 清除所有 <Failed/Complete> 状态的任务
    CleanUploads {
        reply: oneshot::Sender<usize>,
    },
}

/// Results of background remote calls, reported back to the worker.
pub(crate) enum WorkerMessage {
    LoadFinished {
        result: Result<Directory>,
        reply: oneshot::Sender<Result<FilesSnapshot>>,
    },

    TransferFinished {
        upload_id: UploadId,
        result: Result<FileRecord>,
    },

    DeleteFinished {
        record: FileRecord,
        position: usize,
        result: Result<()>,
    },
}
