mod errors;
mod session;
mod types;

pub use errors::{Result, SessionError};
pub use session::{SessionContext, SessionIdentity};
pub use types::{
    Directory,
    FileBlob,
    FileRecord,
    FilesSnapshot,
    Notification,
    NotificationLevel,
    SharedFileRecord,
    StoreEvent,
    StoreState,
    UploadId,
    UploadState,
    UploadTask,
};
