//! # logos-sync — Version-based event synchronization for Logos documents
//!
//! Clients submit batches of opaque steps against the version they last
//! saw. The server accepts a batch only if that version is current, bumps
//! the version by one, and immediately wakes every reader long-polling the
//! document.
//!
//! ## Architecture
//!
//! ```text
//!  GET /events ──┐                 ┌── POST /events
//!                ▼                 ▼
//!            ┌─────────────────────────┐
//!            │ SyncServer (axum edge)  │
//!            └───────────┬─────────────┘
//!                        │ get(id, addr)
//!                ┌───────▼────────┐
//!                │ InstanceStore  │── idle reaper
//!                └───────┬────────┘
//!                        │ Arc<Instance>
//!     ┌──────────────────▼───────────────────┐
//!     │ Instance (one mutex)                 │
//!     │  document · StepHistory · Annotations│
//!     │  WaiterRegistry (parked readers)     │
//!     └──────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire types and the [`SyncError`] taxonomy
//! - [`document`] — document models steps are applied to
//! - [`history`] — bounded step history with a version floor
//! - [`annotations`] — auxiliary annotation stream
//! - [`waiter`] — registry of parked long-poll readers
//! - [`instance`] — one document: submission, retrieval, long-polling
//! - [`store`] — lazily populated map of instances with eviction
//! - [`server`] — HTTP routes and server configuration

pub mod protocol;
pub mod document;
pub mod history;
pub mod annotations;
pub mod waiter;
pub mod instance;
pub mod store;
pub mod server;

// Re-exports for convenience
pub use protocol::{
    Annotation, AnnotationEvent, ClientId, DocumentSnapshot, EventBatch, InstanceSummary, Step,
    SubmitAck, SubmitRequest, SyncError, validate_doc_id,
};
pub use document::{DocumentFactory, DocumentModel, StepError, TextDocument, TextStep};
pub use history::{HistoryEntry, StepHistory};
pub use annotations::AnnotationLog;
pub use waiter::{WaitResult, Waiter, WaiterRegistry};
pub use instance::{Instance, InstanceConfig};
pub use store::{InstanceStore, StoreConfig};
pub use server::{ServerConfig, ServerStats, SyncServer};
