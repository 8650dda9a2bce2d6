mod auth;
mod http;

pub use auth::{LoginResponse, RegisterResponse, UserInfo};
pub use http::HttpDirectoryClient;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use crate::core::{Directory, FileBlob, FileRecord, Result, SharedFileRecord};

/// Streamed body of a downloaded file.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Request/response access to the authoritative file records.
///
/// Implementations hold no session state, the caller passes the bearer token
/// on every call.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Files owned by the token's user.
    async fn list_mine(&self, token: &str) -> Result<Vec<FileRecord>>;

    /// Files other users shared with the token's user.
    async fn list_shared(&self, token: &str) -> Result<Vec<SharedFileRecord>>;

    /// Both collections at once.
    async fn fetch_directory(&self, token: &str) -> Result<Directory> {
        let files = self.list_mine(token).await?;
        let shared_files = self.list_shared(token).await?;

        Ok(Directory { files, shared_files })
    }

    async fn upload(&self, token: &str, blob: &FileBlob) -> Result<FileRecord>;

    async fn delete(&self, token: &str, file_id: &str) -> Result<()>;

    async fn download(&self, token: &str, file_id: &str) -> Result<ByteStream>;
}
