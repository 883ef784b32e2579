use super::backend::CompletedPart;
use crate::error::UploadError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Backend-assigned upload session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An allocated multipart upload session
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    pub id: SessionId,
    pub filename: String,
    pub content_type: String,
    pub total_size_bytes: u64,
    pub part_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartStatus {
    Pending,
    Authorized,
    Uploaded,
    Registered,
}

/// One contiguous byte range of the payload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPart {
    pub part_number: u32,
    pub byte_range: Range<u64>,
    pub etag: Option<String>,
    pub status: PartStatus,
}

impl UploadPart {
    pub fn len(&self) -> u64 {
        self.byte_range.end - self.byte_range.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_registered(&self) -> bool {
        self.status == PartStatus::Registered
    }
}

/// Most parts one multipart object may have (S3 limit)
pub const MAX_PARTS: u32 = 10_000;

/// ceil(total / part_size); zero-sized payloads have no parts
pub fn total_parts(total_size_bytes: u64, part_size_bytes: u64) -> Result<u32, UploadError> {
    if part_size_bytes == 0 {
        return Ok(0);
    }
    let count = total_size_bytes.div_ceil(part_size_bytes);
    match u32::try_from(count) {
        Ok(count) if count <= MAX_PARTS => Ok(count),
        _ => Err(UploadError::SessionCreationFailed {
            details: format!(
                "{} bytes in parts of {} bytes needs {} parts, at most {} allowed",
                total_size_bytes, part_size_bytes, count, MAX_PARTS
            ),
        }),
    }
}

/// Split [0, total) into contiguous, non-overlapping parts of `part_size`,
/// the last one possibly shorter.
pub fn partition(
    total_size_bytes: u64,
    part_size_bytes: u64,
) -> Result<Vec<UploadPart>, UploadError> {
    let count = total_parts(total_size_bytes, part_size_bytes)?;
    Ok((0..count)
        .map(|index| {
            let start = index as u64 * part_size_bytes;
            let end = (start + part_size_bytes).min(total_size_bytes);
            UploadPart {
                part_number: index + 1,
                byte_range: start..end,
                etag: None,
                status: PartStatus::Pending,
            }
        })
        .collect())
}

/// A session together with the state of every one of its parts
#[derive(Debug, Clone)]
pub struct UploadPlan {
    pub session: UploadSession,
    pub parts: Vec<UploadPart>,
}

impl UploadPlan {
    pub fn new(session: UploadSession) -> Result<Self, UploadError> {
        let parts = partition(session.total_size_bytes, session.part_size_bytes)?;
        Ok(Self { session, parts })
    }

    pub fn total_parts(&self) -> u32 {
        self.parts.len() as u32
    }

    pub fn registered_count(&self) -> u32 {
        self.parts.iter().filter(|part| part.is_registered()).count() as u32
    }

    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.registered_count(), self.total_parts())
    }

    pub fn part_mut(&mut self, part_number: u32) -> Option<&mut UploadPart> {
        self.parts
            .iter_mut()
            .find(|part| part.part_number == part_number)
    }

    pub fn part(&self, part_number: u32) -> Option<&UploadPart> {
        self.parts
            .iter()
            .find(|part| part.part_number == part_number)
    }

    /// A write target was obtained for the part
    pub fn mark_authorized(&mut self, part_number: u32) {
        if let Some(part) = self.part_mut(part_number) {
            part.etag = None;
            part.status = PartStatus::Authorized;
        }
    }

    /// The part's bytes reached storage, which returned `etag`
    pub fn mark_uploaded(&mut self, part_number: u32, etag: String) {
        if let Some(part) = self.part_mut(part_number) {
            part.etag = Some(etag);
            part.status = PartStatus::Uploaded;
        }
    }

    /// The backend acknowledged the uploaded part
    pub fn mark_part_registered(&mut self, part_number: u32) {
        if let Some(part) = self.part_mut(part_number) {
            if part.status == PartStatus::Uploaded {
                part.status = PartStatus::Registered;
            }
        }
    }

    /// Mark parts the backend already holds as registered
    pub fn mark_registered(&mut self, completed: &[CompletedPart]) -> u32 {
        let mut marked = 0;
        for done in completed {
            if let Some(part) = self.part_mut(done.part_number) {
                part.etag = Some(done.etag.clone());
                part.status = PartStatus::Registered;
                marked += 1;
            }
        }
        marked
    }

    /// Ordered (part_number, etag) list for finalization. Rejected unless
    /// every part is registered.
    pub fn completed_parts(&self) -> Result<Vec<CompletedPart>, UploadError> {
        let registered = self.registered_count();
        let total = self.total_parts();
        if registered != total || total == 0 {
            return Err(UploadError::IncompleteParts { registered, total });
        }

        let mut parts: Vec<CompletedPart> = self
            .parts
            .iter()
            .map(|part| CompletedPart {
                part_number: part.part_number,
                etag: part.etag.clone().unwrap_or_default(),
            })
            .collect();
        parts.sort_by_key(|part| part.part_number);
        Ok(parts)
    }
}

/// Rounded percentage of registered parts
pub fn progress_percent(registered: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    ((registered as u64 * 100 + total as u64 / 2) / total as u64).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn assert_exact_partition(total: u64, part_size: u64) {
        let parts = partition(total, part_size).unwrap();
        assert_eq!(parts.len() as u32, total_parts(total, part_size).unwrap());

        let mut cursor = 0;
        for (index, part) in parts.iter().enumerate() {
            assert_eq!(part.part_number, index as u32 + 1);
            assert_eq!(part.byte_range.start, cursor, "gap or overlap at part {}", index + 1);
            assert!(part.len() > 0 && part.len() <= part_size);
            assert_eq!(part.status, PartStatus::Pending);
            cursor = part.byte_range.end;
        }
        assert_eq!(cursor, total);

        if let Some(last) = parts.last() {
            let expected = if total % part_size == 0 {
                part_size
            } else {
                total % part_size
            };
            assert_eq!(last.len(), expected);
        }
    }

    #[test]
    fn test_partition_covers_payload_exactly() {
        for &(total, part_size) in &[
            (1, 1),
            (1, 7),
            (7, 7),
            (8, 7),
            (1000, 3),
            (12 * MIB, 5 * MIB),
            (15 * MIB, 5 * MIB),
            (5 * MIB + 1, 5 * MIB),
        ] {
            assert_exact_partition(total, part_size);
        }
    }

    #[test]
    fn test_twelve_mib_yields_three_parts() {
        let parts = partition(12 * MIB, 5 * MIB).unwrap();
        let sizes: Vec<u64> = parts.iter().map(UploadPart::len).collect();
        assert_eq!(sizes, vec![5 * MIB, 5 * MIB, 2 * MIB]);
    }

    #[test]
    fn test_empty_payload_has_no_parts() {
        assert!(partition(0, 5 * MIB).unwrap().is_empty());
        assert_eq!(total_parts(0, 5 * MIB), Ok(0));
    }

    #[test]
    fn test_progress_percent_rounding() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(0, 0), 0);
    }

    #[test]
    fn test_completed_parts_requires_every_part_registered() {
        let session = UploadSession {
            id: SessionId("9".to_string()),
            filename: "exam.webm".to_string(),
            content_type: "video/webm".to_string(),
            total_size_bytes: 12 * MIB,
            part_size_bytes: 5 * MIB,
        };
        let mut plan = UploadPlan::new(session).unwrap();

        plan.mark_registered(&[
            CompletedPart {
                part_number: 2,
                etag: "\"b\"".to_string(),
            },
            CompletedPart {
                part_number: 1,
                etag: "\"a\"".to_string(),
            },
        ]);
        assert_eq!(
            plan.completed_parts(),
            Err(UploadError::IncompleteParts {
                registered: 2,
                total: 3
            })
        );

        plan.mark_registered(&[CompletedPart {
            part_number: 3,
            etag: "\"c\"".to_string(),
        }]);
        let parts = plan.completed_parts().unwrap();
        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(parts[0].etag, "\"a\"");
        assert_eq!(plan.progress_percent(), 100);
    }

    #[test]
    fn test_part_count_beyond_store_limit_is_rejected() {
        assert_eq!(total_parts(10_000, 1), Ok(MAX_PARTS));
        assert!(matches!(
            total_parts(10_001, 1),
            Err(UploadError::SessionCreationFailed { .. })
        ));
        // Would wrap a u32 if narrowed unchecked
        assert!(partition(u64::MAX, 1).is_err());
    }

    #[test]
    fn test_part_transitions() {
        let session = UploadSession {
            id: SessionId("4".to_string()),
            filename: "exam.webm".to_string(),
            content_type: "video/webm".to_string(),
            total_size_bytes: 10,
            part_size_bytes: 5,
        };
        let mut plan = UploadPlan::new(session).unwrap();

        plan.mark_authorized(1);
        assert_eq!(plan.part(1).unwrap().status, PartStatus::Authorized);

        // Registration only follows an upload
        plan.mark_part_registered(1);
        assert_eq!(plan.part(1).unwrap().status, PartStatus::Authorized);

        plan.mark_uploaded(1, "\"a\"".to_string());
        assert_eq!(plan.part(1).unwrap().status, PartStatus::Uploaded);
        assert_eq!(plan.part(1).unwrap().etag.as_deref(), Some("\"a\""));

        plan.mark_part_registered(1);
        assert!(plan.part(1).unwrap().is_registered());
        assert_eq!(plan.part(2).unwrap().status, PartStatus::Pending);
        assert_eq!(plan.progress_percent(), 50);
    }
}
