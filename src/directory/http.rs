use std::time::Duration;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, instrument};
use url::Url;
use crate::core::{Directory, FileBlob, FileRecord, Result, SessionError, SharedFileRecord};
use super::{ByteStream, DirectoryClient};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest backed directory client.
#[derive(Debug, Clone)]
pub struct HttpDirectoryClient {
    pub(super) client: Client,
    endpoint: String,
}

impl HttpDirectoryClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self> {
        Url::parse(endpoint)
            .map_err(|_| SessionError::InvalidInput(format!("Invalid url: {:?}", endpoint)))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(super) fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> Result<RequestBuilder> {
        if token.is_empty() {
            return Err(SessionError::unauthorized("Empty auth token"));
        }

        Ok(request.bearer_auth(token))
    }

    pub(super) async fn send(request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|err| {
            if err.is_timeout() {
                SessionError::Timeout
            } else {
                SessionError::Http(err)
            }
        })
    }

    /// Map a non-2xx answer onto the error taxonomy.
    pub(super) async fn check_status(response: Response, subject: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body).unwrap_or_else(|| status.to_string());

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SessionError::unauthorized(message),
            StatusCode::NOT_FOUND => SessionError::not_found(subject),
            StatusCode::BAD_REQUEST => SessionError::InvalidInput(message),
            _ => SessionError::server_error(status.as_u16(), message),
        })
    }

    async fn get_directory(&self, token: &str) -> Result<Directory> {
        let request = self.authorized(self.client.get(self.url("/files")), token)?;
        let response = Self::send(request).await?;
        let response = Self::check_status(response, "/files").await?;

        Ok(response.json().await?)
    }
}

/// `{"error": ..}` from the route handlers, `{"detail": ..}` from the backend.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "detail", "message"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()).map(String::from))
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn list_mine(&self, token: &str) -> Result<Vec<FileRecord>> {
        Ok(self.get_directory(token).await?.files)
    }

    async fn list_shared(&self, token: &str) -> Result<Vec<SharedFileRecord>> {
        Ok(self.get_directory(token).await?.shared_files)
    }

    #[instrument(skip_all)]
    async fn fetch_directory(&self, token: &str) -> Result<Directory> {
        let directory = self.get_directory(token).await?;
        debug!(
            files = directory.files.len(),
            shared_files = directory.shared_files.len(),
            "directory fetched"
        );

        Ok(directory)
    }

    #[instrument(skip(self, token, blob), fields(file_name = %blob.name, size = blob.size()))]
    async fn upload(&self, token: &str, blob: &FileBlob) -> Result<FileRecord> {
        let mut part = Part::stream_with_length(blob.data.clone(), blob.size())
            .file_name(blob.name.clone());
        if let Some(content_type) = &blob.content_type {
            part = part.mime_str(content_type)?;
        }

        let request = self.client
            .post(self.url("/files/upload"))
            .multipart(Form::new().part("file", part));
        let request = self.authorized(request, token)?;

        let response = Self::send(request).await?;
        let response = Self::check_status(response, &blob.name).await?;
        let record: FileRecord = response.json().await?;
        debug!(file_id = %record.id, "upload acknowledged");

        Ok(record)
    }

    #[instrument(skip(self, token))]
    async fn delete(&self, token: &str, file_id: &str) -> Result<()> {
        let request = self.authorized(self.client.delete(self.url(&format!("/files/{}", file_id))), token)?;
        let response = Self::send(request).await?;
        Self::check_status(response, file_id).await?;

        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn download(&self, token: &str, file_id: &str) -> Result<ByteStream> {
        let request = self.authorized(
            self.client.get(self.url(&format!("/files/{}/download", file_id))),
            token,
        )?;
        let response = Self::send(request).await?;
        let response = Self::check_status(response, file_id).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SessionError::from))
            .boxed();

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_keys() {
        assert_eq!(error_message(r#"{"error": "Unauthorized"}"#).as_deref(), Some("Unauthorized"));
        assert_eq!(error_message(r#"{"detail": "File not found"}"#).as_deref(), Some("File not found"));
        assert_eq!(error_message("<html>"), None);
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            HttpDirectoryClient::new("not a url"),
            Err(SessionError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = HttpDirectoryClient::new("http://localhost:8000/").unwrap();
        assert_eq!(client.url("/files"), "http://localhost:8000/files");
    }
}
