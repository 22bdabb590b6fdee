//! Bounded step history with a version floor.
//!
//! ```text
//!   floor = 3                          version = 7
//!     │                                     │
//!     ▼                                     ▼
//!   [ v4 v4 | v5 | v6 v6 v6 | v7 ]   ← entries tagged with the version
//!                                      their batch produced
//! ```
//!
//! A reader at version `v` receives every entry tagged `> v`. Trimming
//! drops whole batches from the front and raises the floor; readers below
//! the floor get [`SyncError::HistoryUnavailable`].

use std::collections::VecDeque;

use crate::protocol::{ClientId, Step, SyncError};

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub version: u64,
    pub step: Step,
    pub client_id: ClientId,
}

#[derive(Debug)]
pub struct StepHistory {
    entries: VecDeque<HistoryEntry>,
    version: u64,
    floor: u64,
    max_steps: usize,
}

impl StepHistory {
    pub fn new(max_steps: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            version: 0,
            floor: 0,
            max_steps,
        }
    }

    /// Current document version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Oldest version that can still be replayed from.
    pub fn floor(&self) -> u64 {
        self.floor
    }

    /// Number of retained steps.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record one accepted batch. Returns the new version.
    ///
    /// An empty batch is not a version step and leaves the history alone.
    pub fn append(&mut self, steps: Vec<Step>, client_id: &ClientId) -> u64 {
        if steps.is_empty() {
            return self.version;
        }
        self.version += 1;
        let version = self.version;
        self.entries.extend(steps.into_iter().map(|step| HistoryEntry {
            version,
            step,
            client_id: client_id.clone(),
        }));
        self.trim();
        self.version
    }

    /// Steps and their authors accepted after `since`.
    pub fn since(&self, since: u64) -> Result<(Vec<Step>, Vec<ClientId>), SyncError> {
        if since > self.version {
            return Err(SyncError::InvalidVersion {
                requested: since,
                current: self.version,
            });
        }
        if since < self.floor {
            return Err(SyncError::HistoryUnavailable {
                requested: since,
                floor: self.floor,
            });
        }
        let start = self.entries.partition_point(|e| e.version <= since);
        Ok(self
            .entries
            .range(start..)
            .map(|e| (e.step.clone(), e.client_id.clone()))
            .unzip())
    }

    fn trim(&mut self) {
        while self.entries.len() > self.max_steps {
            let Some(oldest) = self.entries.front().map(|e| e.version) else {
                break;
            };
            while self.entries.front().is_some_and(|e| e.version == oldest) {
                self.entries.pop_front();
            }
            self.floor = oldest;
        }
    }
}
