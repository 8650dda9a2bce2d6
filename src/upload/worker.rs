use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::core::{FileBlob, FileRecord, Result, SessionError};
use crate::directory::DirectoryClient;

/// Runs a single transfer off the store worker.
pub struct UploadWorker {
    pub(crate) directory: Arc<dyn DirectoryClient>,
    pub(crate) cancellation_token: CancellationToken,
}

impl UploadWorker {
    pub async fn run(self, token: String, blob: FileBlob) -> Result<FileRecord> {
        debug!(file_name = %blob.name, size = blob.size(), "transfer started");

        let future = self.directory.upload(&token, &blob);

        tokio::select! {
            result = future => result,
            _ = self.cancellation_token.cancelled() => {
                Err(SessionError::Cancelled)
            }
        }
    }
}
