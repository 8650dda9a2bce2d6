use std::path::Path;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::errors::{Result, SessionError};

fn default_encrypted() -> bool {
    true
}

/// RFC 3339, or a naive timestamp read as UTC (the backend's SQLite columns carry no offset).
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        parse(&value).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {:?}", value)))
    }

    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Some(parsed.with_timezone(&Utc));
        }

        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
            .map(|naive| naive.and_utc())
    }
}

/// A file owned by the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    /// The upload endpoint reports this as `created_at`.
    #[serde(alias = "uploadedAt", alias = "created_at", deserialize_with = "timestamp::deserialize")]
    pub uploaded_at: DateTime<Utc>,
    #[serde(default = "default_encrypted")]
    pub encrypted: bool,
}

impl FileRecord {
    /// Record minted locally once an upload finishes, before the service's answer is applied.
    pub fn new_local(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            size_bytes,
            uploaded_at: Utc::now(),
            encrypted: true,
        }
    }
}

/// A file another user granted us access to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFileRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "size", default)]
    pub size_bytes: u64,
    #[serde(alias = "sharedAt", deserialize_with = "timestamp::deserialize")]
    pub shared_at: DateTime<Utc>,
    #[serde(alias = "sharedBy")]
    pub shared_by: String,
    #[serde(default = "default_encrypted")]
    pub encrypted: bool,
}

/// Body of `GET /files`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default, alias = "sharedFiles")]
    pub shared_files: Vec<SharedFileRecord>,
}

/// File selected by the user for upload.
#[derive(Debug, Clone)]
pub struct FileBlob {
    pub name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SessionError::InvalidInput(format!("Invalid file name: {}", path.display())))?
            .to_string();
        let data = tokio::fs::read(path).await?;

        Ok(Self::new(name, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Store lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreState {
    Uninitialized,
    Loading,
    Ready,
}

/// Consistent read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilesSnapshot {
    pub state: StoreState,
    pub files: Vec<FileRecord>,
    pub shared_files: Vec<SharedFileRecord>,
}

impl Default for FilesSnapshot {
    fn default() -> Self {
        Self {
            state: StoreState::Uninitialized,
            files: Vec::new(),
            shared_files: Vec::new(),
        }
    }
}

impl FilesSnapshot {
    pub fn file(&self, file_id: &str) -> Option<&FileRecord> {
        self.files.iter().find(|file| file.id == file_id)
    }

    pub fn shared_file(&self, file_id: &str) -> Option<&SharedFileRecord> {
        self.shared_files.iter().find(|file| file.id == file_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadState {
    /// 已选择，尚未开始
    Selected,
    /// 传输中
    Transferring,
    /// 已完成
    Complete,
    /// 失败
    Failed,
}

impl UploadState {
    pub fn is_finished(&self) -> bool {
        matches!(self, UploadState::Complete | UploadState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: UploadId,
    pub file_name: String,
    pub size_bytes: u64,
    pub progress_percent: u8,
    pub state: UploadState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationLevel {
    Info,
    Error,
}

/// User-visible toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// 存储状态变更
    StateChanged {
        old_state: StoreState,
        new_state: StoreState,
    },

    Notification(Notification),

    /// 上传任务状态变更
    UploadStateChanged {
        upload_id: UploadId,
        old_state: UploadState,
        new_state: UploadState,
    },

    UploadProgress {
        upload_id: UploadId,
        file_name: String,
        progress_percent: u8,
    },

    UploadCompleted {
        upload_id: UploadId,
        record: FileRecord,
    },

    UploadFailed {
        upload_id: UploadId,
        error: String,
    },

    /// The remote delete failed and the record went back into "my files".
    DeleteRolledBack {
        file_id: String,
        error: String,
    },

    /// The service rejected the token; the user has to log in again.
    ReauthRequired,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn assert_send<T: Send>() {}

    #[test]
    fn test_shared_types_are_send() {
        assert_send::<StoreEvent>();
        assert_send::<FilesSnapshot>();
        assert_send::<FileBlob>();
    }

    #[test]
    fn test_upload_response_with_naive_created_at() {
        let body = r#"{"id": "9f1c", "name": "r.pdf", "size": 1000, "content_type": "application/pdf",
                       "owner_id": "u1", "created_at": "2025-03-01T10:00:00.123456"}"#;

        let record: FileRecord = serde_json::from_str(body).unwrap();
        assert_eq!(record.uploaded_at.day(), 1);
        assert_eq!(record.uploaded_at.hour(), 10);
        assert_eq!(record.uploaded_at.nanosecond(), 123_456_000);
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = timestamp::parse("2025-03-01T10:00:00Z").unwrap();

        assert_eq!(timestamp::parse("2025-03-01T10:00:00"), Some(expected));
        assert_eq!(timestamp::parse("2025-03-01 10:00:00"), Some(expected));
        assert_eq!(timestamp::parse("2025-03-01T11:00:00+01:00"), Some(expected));
        assert_eq!(timestamp::parse("yesterday"), None);
    }

    #[test]
    fn test_directory_from_service_json() {
        let body = r#"{
            "files": [
                {"id": "1", "name": "confidential-report.pdf", "size": 2540000,
                 "uploaded_at": "2025-03-01T10:00:00Z", "encrypted": true}
            ],
            "shared_files": [
                {"id": "3", "name": "project-proposal.docx", "size": 1800000,
                 "shared_at": "2025-02-27T10:00:00Z", "shared_by": "jane.doe@example.com",
                 "encrypted": true}
            ]
        }"#;

        let directory: Directory = serde_json::from_str(body).unwrap();
        assert_eq!(directory.files.len(), 1);
        assert_eq!(directory.files[0].size_bytes, 2540000);
        assert_eq!(directory.shared_files[0].shared_by, "jane.doe@example.com");
    }

    #[test]
    fn test_upload_response_uses_created_at() {
        let body = r#"{"id": "9f1c", "name": "r.pdf", "size": 1000, "content_type": "application/pdf",
                       "owner_id": "u1", "created_at": "2025-03-01T10:00:00Z"}"#;

        let record: FileRecord = serde_json::from_str(body).unwrap();
        assert_eq!(record.id, "9f1c");
        assert!(record.encrypted);
    }

    #[test]
    fn test_camel_case_shared_files_alias() {
        let body = r#"{"files": [], "sharedFiles": [
            {"id": "7", "name": "a.txt", "size": 3, "sharedAt": "2025-02-27T10:00:00Z", "sharedBy": "b@x.com"}
        ]}"#;

        let directory: Directory = serde_json::from_str(body).unwrap();
        assert_eq!(directory.shared_files.len(), 1);
        assert_eq!(directory.shared_files[0].shared_by, "b@x.com");
    }

    #[test]
    fn test_local_record_is_encrypted() {
        let record = FileRecord::new_local("r.pdf", 1000);
        assert!(record.encrypted);
        assert_eq!(record.size_bytes, 1000);
        assert!(!record.id.is_empty());
    }
}
