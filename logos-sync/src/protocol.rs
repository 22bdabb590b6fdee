//! JSON wire types for the version-based event protocol.
//!
//! Shapes exchanged with clients:
//! ```text
//! GET  /docs/{doc}/events?version=V&auxVersion=C
//!      → { version, auxVersion, steps: [..], clientIDs: [..], auxDelta: [..], users }
//! POST /docs/{doc}/events  { version, steps: [..], auxDelta: [..], clientID }
//!      → { version, auxVersion }
//! ```
//!
//! Steps are opaque JSON values; only the document model interprets them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// An opaque edit command produced by a client.
pub type Step = serde_json::Value;

/// Document ids that would collide with well-known browser paths.
pub const RESERVED_DOC_IDS: &[&str] = &["favicon.ico", "robots.txt"];

/// Identifier a client attaches to the steps it submits.
///
/// Clients pick these themselves (usually a random number), so both
/// numeric and string forms are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientId {
    Number(u64),
    Text(String),
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientId::Number(n) => write!(f, "{n}"),
            ClientId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ClientId {
    fn from(n: u64) -> Self {
        ClientId::Number(n)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        ClientId::Text(s.to_string())
    }
}

/// A comment anchored to a document range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u64,
    pub from: u64,
    pub to: u64,
    pub text: String,
}

/// One change to the annotation stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnnotationEvent {
    Create {
        id: u64,
        from: u64,
        to: u64,
        text: String,
    },
    Delete {
        id: u64,
    },
}

impl AnnotationEvent {
    pub fn id(&self) -> u64 {
        match self {
            AnnotationEvent::Create { id, .. } | AnnotationEvent::Delete { id } => *id,
        }
    }
}

/// Events a reader has not seen yet.
///
/// `steps[i]` was submitted by `client_ids[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    pub version: u64,
    pub aux_version: u64,
    pub steps: Vec<Step>,
    #[serde(rename = "clientIDs")]
    pub client_ids: Vec<ClientId>,
    pub aux_delta: Vec<AnnotationEvent>,
    pub users: usize,
}

impl EventBatch {
    /// A batch carrying no events, e.g. the answer to a timed-out poll.
    pub fn unchanged(version: u64, aux_version: u64, users: usize) -> Self {
        Self {
            version,
            aux_version,
            steps: Vec::new(),
            client_ids: Vec::new(),
            aux_delta: Vec::new(),
            users,
        }
    }

    /// True when the reader is already current on both streams.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.aux_delta.is_empty()
    }
}

/// Body of `POST /docs/{doc}/events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// The version the client believes is current.
    pub version: u64,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub aux_delta: Vec<AnnotationEvent>,
    #[serde(rename = "clientID")]
    pub client_id: ClientId,
}

/// Successful answer to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAck {
    pub version: u64,
    pub aux_version: u64,
}

/// Full document state for clients that need to resync from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub doc: serde_json::Value,
    pub version: u64,
    pub aux_version: u64,
    pub annotations: Vec<Annotation>,
    pub users: usize,
}

/// Entry of the `GET /docs` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: String,
    pub users: usize,
    pub version: u64,
}

/// Everything that can go wrong between a request and the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Invalid document id: {0:?}")]
    InvalidDocId(String),

    #[error("Invalid version {requested} (current is {current})")]
    InvalidVersion { requested: u64, current: u64 },

    #[error("Invalid request: {0}")]
    InvalidQuery(String),

    #[error("Submission carries no steps and no annotation changes")]
    EmptySubmission,

    #[error("Step rejected by document: {0}")]
    InvalidStep(String),

    #[error("Version not current: expected {expected}, got {got}")]
    StaleVersion { expected: u64, got: u64 },

    #[error("History no longer available for version {requested} (oldest is {floor})")]
    HistoryUnavailable { requested: u64, floor: u64 },
}

/// Check that `id` may be used as a document key.
pub fn validate_doc_id(id: &str) -> Result<(), SyncError> {
    let valid = !id.is_empty()
        && !id.starts_with('_')
        && !id.contains('/')
        && !RESERVED_DOC_IDS.contains(&id);
    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidDocId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_doc_id_validation() {
        assert!(validate_doc_id("Example").is_ok());
        assert!(validate_doc_id("my-doc.v2").is_ok());

        assert!(validate_doc_id("").is_err());
        assert!(validate_doc_id("_private").is_err());
        assert!(validate_doc_id("favicon.ico").is_err());
        assert!(validate_doc_id("a/b").is_err());
    }

    #[test]
    fn test_event_batch_wire_names() {
        let batch = EventBatch {
            version: 3,
            aux_version: 1,
            steps: vec![json!({"from": 0, "to": 0, "text": "a"})],
            client_ids: vec![ClientId::Number(7)],
            aux_delta: vec![AnnotationEvent::Delete { id: 2 }],
            users: 2,
        };
        let value = serde_json::to_value(&batch).unwrap();

        assert_eq!(value["version"], 3);
        assert_eq!(value["auxVersion"], 1);
        assert_eq!(value["clientIDs"], json!([7]));
        assert_eq!(value["auxDelta"], json!([{"type": "delete", "id": 2}]));
        assert_eq!(value["users"], 2);
    }

    #[test]
    fn test_submit_request_defaults() {
        let req: SubmitRequest =
            serde_json::from_value(json!({"version": 4, "clientID": "alice"})).unwrap();
        assert_eq!(req.version, 4);
        assert!(req.steps.is_empty());
        assert!(req.aux_delta.is_empty());
        assert_eq!(req.client_id, ClientId::Text("alice".into()));
    }

    #[test]
    fn test_submit_request_rejects_negative_version() {
        let parsed: Result<SubmitRequest, _> =
            serde_json::from_value(json!({"version": -1, "clientID": 1}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_annotation_event_tagging() {
        let ev: AnnotationEvent = serde_json::from_value(
            json!({"type": "create", "id": 5, "from": 1, "to": 4, "text": "typo"}),
        )
        .unwrap();
        assert_eq!(ev.id(), 5);
        assert!(matches!(ev, AnnotationEvent::Create { from: 1, to: 4, .. }));
    }

    #[test]
    fn test_unchanged_batch_is_empty() {
        let batch = EventBatch::unchanged(5, 2, 1);
        assert!(batch.is_empty());
        assert_eq!(batch.version, 5);
        assert_eq!(batch.aux_version, 2);
    }

    #[test]
    fn test_error_messages() {
        let err = SyncError::StaleVersion { expected: 2, got: 1 };
        assert_eq!(err.to_string(), "Version not current: expected 2, got 1");
    }
}
