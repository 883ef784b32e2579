use super::backend::{
    CompleteRequest, CompleteResponse, CompletedPart, CreateSessionRequest, CreateSessionResponse,
    MultipartBackend, PartStore, PresignRequest, PresignResponse, SessionStatusResponse,
};
use super::session::SessionId;
use crate::error::UploadError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::header::{CONTENT_TYPE, ETAG};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// JSON-over-HTTP multipart backend and presigned-URL part store
pub struct HttpMultipartClient {
    client: Client,
    base_url: RwLock<Url>,
}

impl HttpMultipartClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| UploadError::InvalidAddress {
                address: base_url.to_string(),
                details: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: RwLock::new(parse_base_url(base_url)?),
        })
    }

    pub fn base_url(&self) -> Url {
        self.base_url.read().clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url, String> {
        self.base_url
            .read()
            .join(path)
            .map_err(|e| format!("invalid endpoint {}: {}", path, e))
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, String>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        decode(response).await
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, UploadError> {
    // Url::join drops the last path segment unless it ends with a slash
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };

    Url::parse(&normalized).map_err(|e| UploadError::InvalidAddress {
        address: base_url.to_string(),
        details: e.to_string(),
    })
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, String> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("HTTP {}: {}", status, body.trim()));
    }

    response
        .json::<R>()
        .await
        .map_err(|e| format!("invalid response body: {}", e))
}

#[async_trait]
impl MultipartBackend for HttpMultipartClient {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, UploadError> {
        self.post_json("api/multipart/create/", request)
            .await
            .map_err(|details| UploadError::SessionCreationFailed { details })
    }

    async fn authorize_part(
        &self,
        session: &SessionId,
        part_number: u32,
    ) -> Result<String, UploadError> {
        let path = format!("api/multipart/{}/presign/", session);
        let response: PresignResponse = self
            .post_json(&path, &PresignRequest { part_number })
            .await
            .map_err(|details| UploadError::PartAuthorizationFailed {
                part_number,
                details,
            })?;
        Ok(response.presigned_url)
    }

    async fn register_part(
        &self,
        session: &SessionId,
        part: &CompletedPart,
    ) -> Result<(), UploadError> {
        let path = format!("api/multipart/{}/register-part/", session);
        let _ack: serde_json::Value = self.post_json(&path, part).await.map_err(|details| {
            UploadError::PartRegistrationFailed {
                part_number: part.part_number,
                details,
            }
        })?;
        Ok(())
    }

    async fn complete(
        &self,
        session: &SessionId,
        parts: &[CompletedPart],
    ) -> Result<String, UploadError> {
        let path = format!("api/multipart/{}/complete/", session);
        let request = CompleteRequest {
            parts: parts.to_vec(),
        };
        let response: CompleteResponse = self
            .post_json(&path, &request)
            .await
            .map_err(|details| UploadError::FinalizationFailed { details })?;
        Ok(response.file_url)
    }

    async fn session_status(
        &self,
        session: &SessionId,
    ) -> Result<SessionStatusResponse, UploadError> {
        let url = self
            .endpoint(&format!("api/multipart/{}/status/", session))
            .map_err(|details| UploadError::StatusQueryFailed { details })?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UploadError::StatusQueryFailed {
                details: e.to_string(),
            })?;
        decode(response)
            .await
            .map_err(|details| UploadError::StatusQueryFailed { details })
    }

    async fn abort(&self, session: &SessionId) -> Result<(), UploadError> {
        let path = format!("api/multipart/{}/abort/", session);
        let _ack: serde_json::Value = self
            .post_json(&path, &serde_json::json!({}))
            .await
            .map_err(|details| UploadError::AbortFailed { details })?;
        Ok(())
    }

    fn set_base_url(&self, base_url: &str) -> Result<(), UploadError> {
        let parsed = parse_base_url(base_url)?;
        info!("Upload backend address changed to {}", parsed);
        *self.base_url.write() = parsed;
        Ok(())
    }
}

#[async_trait]
impl PartStore for HttpMultipartClient {
    async fn put_part(
        &self,
        target: &str,
        part_number: u32,
        content_type: &str,
        body: Bytes,
    ) -> Result<String, UploadError> {
        let transfer_error = |details: String| UploadError::PartTransferFailed {
            part_number,
            details,
        };

        debug!("PUT part {} ({} bytes)", part_number, body.len());
        let response = self
            .client
            .put(target)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| transfer_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transfer_error(format!("HTTP {}", status)));
        }

        response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| transfer_error("response carried no ETag header".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_keep_base_path() {
        let client =
            HttpMultipartClient::new("http://backend.test/exam", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.endpoint("api/multipart/create/").unwrap().as_str(),
            "http://backend.test/exam/api/multipart/create/"
        );
    }

    #[test]
    fn test_base_url_is_editable() {
        let client =
            HttpMultipartClient::new("http://localhost:8000", Duration::from_secs(5)).unwrap();
        client.set_base_url("http://10.0.0.2:9000/").unwrap();
        assert_eq!(client.base_url().as_str(), "http://10.0.0.2:9000/");

        let err = client.set_base_url("::not a url").unwrap_err();
        assert!(matches!(err, UploadError::InvalidAddress { .. }));
        assert_eq!(client.base_url().as_str(), "http://10.0.0.2:9000/");
    }
}
