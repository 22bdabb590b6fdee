//! A single collaborative document and its event protocol.
//!
//! ```text
//!   add_events ──┐                         ┌── wait_for_events
//!                ▼                         ▼
//!        ┌──────────── Mutex<InstanceState> ────────────┐
//!        │ document · StepHistory · AnnotationLog       │
//!        │ users · WaiterRegistry                        │
//!        └───────────────────────────────────────────────┘
//! ```
//!
//! Everything that reads or mutates an instance goes through one mutex.
//! Submissions check the version, append, and resolve parked readers
//! without releasing it, and readers register under the same lock, so a
//! reader can never slip in between a publish and its notification pass.
//! The lock is never held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::annotations::AnnotationLog;
use crate::document::DocumentModel;
use crate::history::StepHistory;
use crate::protocol::{
    DocumentSnapshot, EventBatch, InstanceSummary, SubmitAck, SubmitRequest, SyncError,
};
use crate::waiter::{WaitResult, WaiterRegistry};

/// Per-document tunables.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// How long a reader stays parked before getting an empty batch
    pub poll_timeout: Duration,
    /// Steps retained for replay
    pub max_history_steps: usize,
    /// Annotation events retained for replay
    pub max_annotation_events: usize,
    /// How long a requester counts as an active user after its last request
    pub user_ttl: Duration,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(5 * 60),
            max_history_steps: 10_000,
            max_annotation_events: 1_000,
            user_ttl: Duration::from_secs(60),
        }
    }
}

struct InstanceState {
    doc: Box<dyn DocumentModel>,
    history: StepHistory,
    annotations: AnnotationLog,
    waiters: WaiterRegistry,
    users: HashMap<IpAddr, Instant>,
    last_active: Instant,
}

impl InstanceState {
    fn user_count(&self, ttl: Duration, now: Instant) -> usize {
        let mut active: HashSet<IpAddr> = self
            .users
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) <= ttl)
            .map(|(addr, _)| *addr)
            .collect();
        active.extend(self.waiters.clients());
        active.len()
    }
}

fn collect_batch(
    history: &StepHistory,
    annotations: &AnnotationLog,
    since_version: u64,
    since_aux_version: u64,
    users: usize,
) -> Result<EventBatch, SyncError> {
    let (steps, client_ids) = history.since(since_version)?;
    let aux_delta = annotations.since(since_aux_version)?;
    Ok(EventBatch {
        version: history.version(),
        aux_version: annotations.version(),
        steps,
        client_ids,
        aux_delta,
        users,
    })
}

/// One live document.
pub struct Instance {
    id: String,
    config: InstanceConfig,
    state: Mutex<InstanceState>,
}

impl Instance {
    pub fn new(id: impl Into<String>, doc: Box<dyn DocumentModel>, config: InstanceConfig) -> Self {
        let now = Instant::now();
        let state = InstanceState {
            doc,
            history: StepHistory::new(config.max_history_steps),
            annotations: AnnotationLog::new(config.max_annotation_events),
            waiters: WaiterRegistry::new(),
            users: HashMap::new(),
            last_active: now,
        };
        Self {
            id: id.into(),
            config,
            state: Mutex::new(state),
        }
    }

    // State is only mutated after every fallible check has passed, so a
    // panic elsewhere cannot leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, InstanceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn version(&self) -> u64 {
        self.lock().history.version()
    }

    pub fn aux_version(&self) -> u64 {
        self.lock().annotations.version()
    }

    pub fn last_active(&self) -> Instant {
        self.lock().last_active
    }

    pub fn waiter_count(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Note a request from `addr` and mark the instance active.
    pub fn register_user(&self, addr: Option<IpAddr>) {
        let now = Instant::now();
        let mut state = self.lock();
        if let Some(addr) = addr {
            state.users.insert(addr, now);
        }
        state.last_active = now;
    }

    pub fn user_count(&self) -> usize {
        self.lock().user_count(self.config.user_ttl, Instant::now())
    }

    /// Forget users not seen within the TTL. Returns the remaining count.
    pub fn collect_users(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.user_ttl;
        let mut state = self.lock();
        state
            .users
            .retain(|_, seen| now.saturating_duration_since(*seen) <= ttl);
        state.user_count(ttl, now)
    }

    /// Events after the given baselines, without waiting.
    pub fn get_events(
        &self,
        since_version: u64,
        since_aux_version: u64,
    ) -> Result<EventBatch, SyncError> {
        let state = self.lock();
        let users = state.user_count(self.config.user_ttl, Instant::now());
        collect_batch(
            &state.history,
            &state.annotations,
            since_version,
            since_aux_version,
            users,
        )
    }

    /// Accept a submission if it was made against the current version.
    ///
    /// Every parked reader is resolved before this returns.
    pub fn add_events(&self, request: SubmitRequest) -> Result<SubmitAck, SyncError> {
        let SubmitRequest {
            version,
            steps,
            aux_delta,
            client_id,
        } = request;
        if steps.is_empty() && aux_delta.is_empty() {
            return Err(SyncError::EmptySubmission);
        }

        let now = Instant::now();
        let mut state = self.lock();
        let current = state.history.version();
        if version != current {
            log::warn!(
                "Stale submission on {} from client {client_id}: at {version}, current {current}",
                self.id
            );
            return Err(SyncError::StaleVersion {
                expected: current,
                got: version,
            });
        }

        state
            .doc
            .apply_steps(&steps)
            .map_err(|e| SyncError::InvalidStep(e.to_string()))?;

        let step_count = steps.len();
        let new_version = state.history.append(steps, &client_id);
        let new_aux_version = state.annotations.apply(aux_delta);
        state.last_active = now;

        let users = state.user_count(self.config.user_ttl, now);
        let InstanceState {
            history,
            annotations,
            waiters,
            ..
        } = &mut *state;
        let delivered = waiters.resolve_all(|w| {
            collect_batch(
                history,
                annotations,
                w.since_version,
                w.since_aux_version,
                users,
            )
        });

        log::debug!(
            "Doc {} accepted {step_count} steps from {client_id}: \
             v{new_version}/aux{new_aux_version}, woke {delivered} readers",
            self.id
        );

        Ok(SubmitAck {
            version: new_version,
            aux_version: new_aux_version,
        })
    }

    /// Events after the given baselines, parking until some exist.
    ///
    /// Resolves with the published batch, with an empty batch after
    /// `poll_timeout`, or with an error if the baselines are unusable.
    /// Dropping the returned future removes the parked reader.
    pub async fn wait_for_events(
        self: &Arc<Self>,
        since_version: u64,
        since_aux_version: u64,
        client: Option<IpAddr>,
    ) -> Result<EventBatch, SyncError> {
        let (id, mut rx) = {
            let now = Instant::now();
            let mut state = self.lock();
            if let Some(addr) = client {
                state.users.insert(addr, now);
            }
            state.last_active = now;

            let users = state.user_count(self.config.user_ttl, now);
            let batch = collect_batch(
                &state.history,
                &state.annotations,
                since_version,
                since_aux_version,
                users,
            )?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            state
                .waiters
                .register(since_version, since_aux_version, client)
        };

        log::trace!("Waiter {id} parked on {} at v{since_version}", self.id);
        let _guard = WaitGuard {
            instance: Arc::downgrade(self),
            id,
        };

        match tokio::time::timeout(self.config.poll_timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped unresolved; treat like a timeout.
            Ok(Err(_)) | Err(_) => {
                self.finish_timeout(id, &mut rx, since_version, since_aux_version)
            }
        }
    }

    fn finish_timeout(
        &self,
        id: Uuid,
        rx: &mut oneshot::Receiver<WaitResult>,
        since_version: u64,
        since_aux_version: u64,
    ) -> WaitResult {
        let mut state = self.lock();
        let users = state.user_count(self.config.user_ttl, Instant::now());
        if state.waiters.remove(&id).is_some() {
            log::trace!("Waiter {id} on {} timed out", self.id);
            return Ok(EventBatch::unchanged(since_version, since_aux_version, users));
        }
        // A publish resolved it just as the timer fired.
        rx.try_recv()
            .unwrap_or_else(|_| Ok(EventBatch::unchanged(since_version, since_aux_version, users)))
    }

    /// Full state for a client that has to resync from scratch.
    pub fn snapshot(&self) -> DocumentSnapshot {
        let state = self.lock();
        DocumentSnapshot {
            doc: state.doc.to_json(),
            version: state.history.version(),
            aux_version: state.annotations.version(),
            annotations: state.annotations.annotations(),
            users: state.user_count(self.config.user_ttl, Instant::now()),
        }
    }

    pub fn summary(&self) -> InstanceSummary {
        let state = self.lock();
        InstanceSummary {
            id: self.id.clone(),
            users: state.user_count(self.config.user_ttl, Instant::now()),
            version: state.history.version(),
        }
    }
}

/// Removes a parked reader whose request went away before resolution.
struct WaitGuard {
    instance: Weak<Instance>,
    id: Uuid,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        let Some(instance) = self.instance.upgrade() else {
            return;
        };
        if instance.lock().waiters.remove(&self.id).is_some() {
            log::debug!("Waiter {} on {} aborted", self.id, instance.id);
        }
    }
}
