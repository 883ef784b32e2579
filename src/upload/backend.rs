use super::session::SessionId;
use crate::error::UploadError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    #[serde(deserialize_with = "session_id_from_number_or_string")]
    pub id: SessionId,
    /// Effective part size, when the backend chooses one
    #[serde(default)]
    pub part_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignRequest {
    pub part_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignResponse {
    pub presigned_url: String,
}

/// (part_number, etag) pair, used both to register a part and to finalize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub file_url: String,
}

/// Server-side lifecycle of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Uploading,
    Completed,
    Aborted,
    #[serde(other)]
    Unknown,
}

impl SessionState {
    /// Whether parts can still be added and the session finalized
    pub fn is_open(self) -> bool {
        matches!(self, SessionState::Created | SessionState::Uploading)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Uploading => "uploading",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
            SessionState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side view of a session, used to resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    #[serde(deserialize_with = "session_id_from_number_or_string")]
    pub id: SessionId,
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub part_size: Option<u64>,
    pub status: SessionState,
    #[serde(default)]
    pub parts: Vec<CompletedPart>,
}

fn session_id_from_number_or_string<'de, D>(deserializer: D) -> Result<SessionId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => SessionId(n.to_string()),
        RawId::Text(s) => SessionId(s),
    })
}

/// Backend half of the multipart contract
#[async_trait]
pub trait MultipartBackend: Send + Sync {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, UploadError>;

    /// Obtain a pre-authorized write target for one part
    async fn authorize_part(
        &self,
        session: &SessionId,
        part_number: u32,
    ) -> Result<String, UploadError>;

    async fn register_part(
        &self,
        session: &SessionId,
        part: &CompletedPart,
    ) -> Result<(), UploadError>;

    /// Assemble the registered parts and return the object address
    async fn complete(
        &self,
        session: &SessionId,
        parts: &[CompletedPart],
    ) -> Result<String, UploadError>;

    async fn session_status(&self, session: &SessionId)
        -> Result<SessionStatusResponse, UploadError>;

    async fn abort(&self, session: &SessionId) -> Result<(), UploadError>;

    /// Point the backend at a new base address
    fn set_base_url(&self, _base_url: &str) -> Result<(), UploadError> {
        Ok(())
    }
}

/// Storage half: direct transfer of part bytes to an authorized target
#[async_trait]
pub trait PartStore: Send + Sync {
    /// Transfer the part and return the store's integrity token (ETag)
    async fn put_part(
        &self,
        target: &str,
        part_number: u32,
        content_type: &str,
        body: Bytes,
    ) -> Result<String, UploadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_response_accepts_numeric_id() {
        let response: CreateSessionResponse =
            serde_json::from_str(r#"{"id": 42, "part_size": 5242880, "s3_key": "x"}"#).unwrap();
        assert_eq!(response.id, SessionId("42".to_string()));
        assert_eq!(response.part_size, Some(5_242_880));

        let response: CreateSessionResponse =
            serde_json::from_str(r#"{"id": "abc-1"}"#).unwrap();
        assert_eq!(response.id, SessionId("abc-1".to_string()));
        assert_eq!(response.part_size, None);
    }

    #[test]
    fn test_complete_request_shape() {
        let request = CompleteRequest {
            parts: vec![CompletedPart {
                part_number: 1,
                etag: "\"e1\"".to_string(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"parts": [{"part_number": 1, "etag": "\"e1\""}]})
        );
    }

    #[test]
    fn test_session_state_from_backend_strings() {
        let response: SessionStatusResponse = serde_json::from_str(
            r#"{"id": 3, "filename": "a.webm", "content_type": "video/webm",
                "size": 10, "part_size": 5, "status": "aborted", "parts": []}"#,
        )
        .unwrap();
        assert_eq!(response.status, SessionState::Aborted);
        assert!(!response.status.is_open());

        let state: SessionState = serde_json::from_str(r#""uploading""#).unwrap();
        assert!(state.is_open());
        let state: SessionState = serde_json::from_str(r#""archived""#).unwrap();
        assert_eq!(state, SessionState::Unknown);
    }
}
