use super::backend::{
    CompletedPart, CreateSessionRequest, CreateSessionResponse, MultipartBackend, PartStore,
    SessionState, SessionStatusResponse,
};
use super::session::SessionId;
use crate::error::UploadError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Protocol calls observed by the in-memory backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateSession,
    AuthorizePart(u32),
    PutPart(u32),
    RegisterPart(u32),
    Complete,
    Status,
    Abort,
}

/// Step at which an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailStep {
    Create,
    Authorize(u32),
    Transfer(u32),
    Register(u32),
    Complete,
}

#[derive(Debug)]
struct StoredSession {
    request: CreateSessionRequest,
    state: SessionState,
    // Transferred but not necessarily registered
    staged: HashMap<u32, (String, Bytes)>,
    registered: BTreeMap<u32, String>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    sessions: HashMap<SessionId, StoredSession>,
    objects: HashMap<String, Bytes>,
    calls: Vec<BackendCall>,
    failures: HashMap<FailStep, u32>,
}

impl Inner {
    fn take_failure(&mut self, step: FailStep) -> bool {
        match self.failures.get_mut(&step) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn session_mut(&mut self, id: &SessionId) -> Result<&mut StoredSession, String> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| format!("unknown session {}", id))
    }
}

/// Multipart backend and object store held entirely in memory.
///
/// Used by offline runs and tests. Every call is logged, and failures can be
/// injected per step.
#[derive(Default)]
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
    part_size_override: Option<u64>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Have session creation dictate this part size
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size_override = Some(part_size);
        self
    }

    /// Fail the given step the next `times` times it is attempted
    pub fn fail_on(&self, step: FailStep, times: u32) {
        self.inner.lock().failures.insert(step, times);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.inner.lock().calls.clone()
    }

    pub fn count_calls(&self, matcher: impl Fn(&BackendCall) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| matcher(c)).count()
    }

    /// Assembled object at a completed upload's address
    pub fn object(&self, file_url: &str) -> Option<Bytes> {
        self.inner.lock().objects.get(file_url).cloned()
    }

    pub fn is_aborted(&self, session: &SessionId) -> bool {
        self.inner
            .lock()
            .sessions
            .get(session)
            .map(|s| s.state == SessionState::Aborted)
            .unwrap_or(false)
    }

    fn parse_target(target: &str) -> Option<(SessionId, u32)> {
        let rest = target.strip_prefix("memory://")?;
        let (session, part) = rest.split_once('/')?;
        Some((SessionId(session.to_string()), part.parse().ok()?))
    }
}

#[async_trait]
impl MultipartBackend for InMemoryBackend {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, UploadError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BackendCall::CreateSession);
        if inner.take_failure(FailStep::Create) {
            return Err(UploadError::SessionCreationFailed {
                details: "injected failure".to_string(),
            });
        }

        inner.next_id += 1;
        let id = SessionId(inner.next_id.to_string());
        inner.sessions.insert(
            id.clone(),
            StoredSession {
                request: request.clone(),
                state: SessionState::Created,
                staged: HashMap::new(),
                registered: BTreeMap::new(),
            },
        );
        debug!("In-memory session {} created for {}", id, request.filename);

        Ok(CreateSessionResponse {
            id,
            part_size: self.part_size_override,
        })
    }

    async fn authorize_part(
        &self,
        session: &SessionId,
        part_number: u32,
    ) -> Result<String, UploadError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BackendCall::AuthorizePart(part_number));
        let fail = |details: String| UploadError::PartAuthorizationFailed {
            part_number,
            details,
        };

        if inner.take_failure(FailStep::Authorize(part_number)) {
            return Err(fail("injected failure".to_string()));
        }
        let stored = inner.session_mut(session).map_err(fail)?;
        if !stored.state.is_open() {
            return Err(fail(format!("session {} is not open", session)));
        }

        Ok(format!("memory://{}/{}", session, part_number))
    }

    async fn register_part(
        &self,
        session: &SessionId,
        part: &CompletedPart,
    ) -> Result<(), UploadError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BackendCall::RegisterPart(part.part_number));
        let fail = |details: String| UploadError::PartRegistrationFailed {
            part_number: part.part_number,
            details,
        };

        if inner.take_failure(FailStep::Register(part.part_number)) {
            return Err(fail("injected failure".to_string()));
        }
        let stored = inner.session_mut(session).map_err(fail)?;
        match stored.staged.get(&part.part_number) {
            Some((etag, _)) if *etag == part.etag => {}
            Some(_) => return Err(fail("etag mismatch".to_string())),
            None => return Err(fail("part was never transferred".to_string())),
        }
        stored
            .registered
            .insert(part.part_number, part.etag.clone());
        stored.state = SessionState::Uploading;
        Ok(())
    }

    async fn complete(
        &self,
        session: &SessionId,
        parts: &[CompletedPart],
    ) -> Result<String, UploadError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BackendCall::Complete);
        let fail = |details: String| UploadError::FinalizationFailed { details };

        if inner.take_failure(FailStep::Complete) {
            return Err(fail("injected failure".to_string()));
        }

        let stored = inner.session_mut(session).map_err(fail)?;
        if !stored.state.is_open() {
            return Err(fail(format!("session {} is not open", session)));
        }

        let mut assembled = BytesMut::new();
        for (index, part) in parts.iter().enumerate() {
            if part.part_number != index as u32 + 1 {
                return Err(fail(format!(
                    "parts out of order at position {}",
                    index + 1
                )));
            }
            match stored.staged.get(&part.part_number) {
                Some((etag, body)) if *etag == part.etag => assembled.extend_from_slice(body),
                _ => {
                    return Err(fail(format!(
                        "part {} is missing or has a stale etag",
                        part.part_number
                    )))
                }
            }
        }

        stored.state = SessionState::Completed;
        let file_url = format!("memory://objects/{}/{}", session, stored.request.filename);
        inner.objects.insert(file_url.clone(), assembled.freeze());
        Ok(file_url)
    }

    async fn session_status(
        &self,
        session: &SessionId,
    ) -> Result<SessionStatusResponse, UploadError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BackendCall::Status);
        let part_size = self.part_size_override;
        let stored = inner
            .session_mut(session)
            .map_err(|details| UploadError::StatusQueryFailed { details })?;

        Ok(SessionStatusResponse {
            id: session.clone(),
            filename: stored.request.filename.clone(),
            content_type: stored.request.content_type.clone(),
            size: Some(stored.request.size),
            part_size,
            status: stored.state,
            parts: stored
                .registered
                .iter()
                .map(|(part_number, etag)| CompletedPart {
                    part_number: *part_number,
                    etag: etag.clone(),
                })
                .collect(),
        })
    }

    async fn abort(&self, session: &SessionId) -> Result<(), UploadError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BackendCall::Abort);
        let stored = inner
            .session_mut(session)
            .map_err(|details| UploadError::AbortFailed { details })?;
        stored.state = SessionState::Aborted;
        stored.staged.clear();
        Ok(())
    }
}

#[async_trait]
impl PartStore for InMemoryBackend {
    async fn put_part(
        &self,
        target: &str,
        part_number: u32,
        _content_type: &str,
        body: Bytes,
    ) -> Result<String, UploadError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BackendCall::PutPart(part_number));
        let fail = |details: String| UploadError::PartTransferFailed {
            part_number,
            details,
        };

        if inner.take_failure(FailStep::Transfer(part_number)) {
            return Err(fail("injected failure".to_string()));
        }

        let (session, target_part) =
            Self::parse_target(target).ok_or_else(|| fail(format!("bad target {}", target)))?;
        if target_part != part_number {
            return Err(fail(format!("target is for part {}", target_part)));
        }

        let stored = inner.session_mut(&session).map_err(fail)?;
        let etag = format!("\"{}\"", uuid::Uuid::new_v4().simple());
        stored.staged.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(size: u64) -> CreateSessionRequest {
        CreateSessionRequest {
            filename: "exam.webm".to_string(),
            content_type: "video/webm".to_string(),
            size,
            user_id: "student-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_parts_assemble_in_order() {
        let backend = InMemoryBackend::new();
        let session = backend.create_session(&request(6)).await.unwrap().id;

        let mut completed = Vec::new();
        for (number, body) in [(1, &b"abc"[..]), (2, &b"def"[..])] {
            let target = backend.authorize_part(&session, number).await.unwrap();
            let etag = backend
                .put_part(&target, number, "video/webm", Bytes::from_static(body))
                .await
                .unwrap();
            let part = CompletedPart {
                part_number: number,
                etag,
            };
            backend.register_part(&session, &part).await.unwrap();
            completed.push(part);
        }

        let file_url = backend.complete(&session, &completed).await.unwrap();
        assert_eq!(backend.object(&file_url).unwrap(), Bytes::from_static(b"abcdef"));

        let status = backend.session_status(&session).await.unwrap();
        assert_eq!(status.status, SessionState::Completed);
        assert_eq!(status.parts.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let backend = InMemoryBackend::new();
        backend.fail_on(FailStep::Create, 1);

        assert!(backend.create_session(&request(1)).await.is_err());
        assert!(backend.create_session(&request(1)).await.is_ok());
        assert_eq!(backend.count_calls(|c| *c == BackendCall::CreateSession), 2);
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_etag() {
        let backend = InMemoryBackend::new();
        let session = backend.create_session(&request(3)).await.unwrap().id;
        let target = backend.authorize_part(&session, 1).await.unwrap();
        backend
            .put_part(&target, 1, "video/webm", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let err = backend
            .register_part(
                &session,
                &CompletedPart {
                    part_number: 1,
                    etag: "\"forged\"".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.step(), "register");
    }
}
