pub mod core;
pub mod channel;
pub mod directory;
pub mod store;
pub mod upload;
pub mod utils;
pub mod config;

// 重新导出核心类型
pub use core::{
    FileBlob,
    FileRecord,
    FilesSnapshot,
    Notification,
    NotificationLevel,
    Result,
    SessionContext,
    SessionError,
    SharedFileRecord,
    StoreEvent,
    StoreState,
    UploadId,
    UploadState,
    UploadTask,
};

pub use channel::{ChannelEvent, ChannelEventKind, EventChannel, OfflineChannel, WsEventChannel};
pub use directory::{DirectoryClient, HttpDirectoryClient};
pub use store::{SessionStore, SessionStoreHandle};
