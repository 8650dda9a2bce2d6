use serde::{Deserialize, Serialize};
use crate::core::{Result, SessionError, UploadId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatePayload {
    pub token: String,
    pub user_name: String,
    pub user_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadPayload {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<UploadId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgressPayload {
    pub file_name: String,
    /// Percentage, 0 to 100.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<UploadId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadedPayload {
    pub file_name: String,
    pub size: u64,
    pub uploaded_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareFilePayload {
    pub file_id: String,
    pub file_name: String,
    pub shared_with: String,
    pub shared_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSharedPayload {
    pub shared_by: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSharedWithYouPayload {
    pub recipient: String,
    pub shared_by: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Every message carried by the real-time channel, in either direction.
///
/// On the wire a frame is `{"event": "<name>", "data": {..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ChannelEvent {
    Authenticate(AuthenticatePayload),
    StartUpload(StartUploadPayload),
    UploadProgress(UploadProgressPayload),
    FileUploaded(FileUploadedPayload),
    ShareFile(ShareFilePayload),
    FileShared(FileSharedPayload),
    FileSharedWithYou(FileSharedWithYouPayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEventKind {
    Authenticate,
    StartUpload,
    UploadProgress,
    FileUploaded,
    ShareFile,
    FileShared,
    FileSharedWithYou,
}

impl ChannelEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelEventKind::Authenticate => "authenticate",
            ChannelEventKind::StartUpload => "start-upload",
            ChannelEventKind::UploadProgress => "upload-progress",
            ChannelEventKind::FileUploaded => "file-uploaded",
            ChannelEventKind::ShareFile => "share-file",
            ChannelEventKind::FileShared => "file-shared",
            ChannelEventKind::FileSharedWithYou => "file-shared-with-you",
        }
    }
}

impl ChannelEvent {
    pub fn kind(&self) -> ChannelEventKind {
        match self {
            ChannelEvent::Authenticate(_) => ChannelEventKind::Authenticate,
            ChannelEvent::StartUpload(_) => ChannelEventKind::StartUpload,
            ChannelEvent::UploadProgress(_) => ChannelEventKind::UploadProgress,
            ChannelEvent::FileUploaded(_) => ChannelEventKind::FileUploaded,
            ChannelEvent::ShareFile(_) => ChannelEventKind::ShareFile,
            ChannelEvent::FileShared(_) => ChannelEventKind::FileShared,
            ChannelEvent::FileSharedWithYou(_) => ChannelEventKind::FileSharedWithYou,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Decode the `(name, payload)` pair a transport hands over.
    pub fn from_parts(name: &str, payload: serde_json::Value) -> Result<Self> {
        let frame = serde_json::json!({ "event": name, "data": payload });
        serde_json::from_value(frame)
            .map_err(|err| SessionError::Channel(format!("Invalid '{}' event: {}", name, err)))
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_frame(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}
