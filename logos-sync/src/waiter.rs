//! Registry of parked long-poll readers.
//!
//! A [`Waiter`] holds the sending half of a oneshot channel; the reader
//! awaits the receiving half. Taking the sender is the completion flag, so
//! a waiter can be resolved at most once and every later attempt is a
//! no-op.
//!
//! Waiters leave the registry in exactly one of three ways:
//! - publish: [`WaiterRegistry::resolve_all`] drains them in FIFO order
//! - timeout: the reader removes its own entry and answers with an empty batch
//! - abort: the reader's future is dropped and its guard removes the entry

use std::collections::VecDeque;
use std::net::IpAddr;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::protocol::{EventBatch, SyncError};

/// What a parked reader eventually receives.
pub type WaitResult = Result<EventBatch, SyncError>;

#[derive(Debug)]
pub struct Waiter {
    pub id: Uuid,
    pub since_version: u64,
    pub since_aux_version: u64,
    pub client: Option<IpAddr>,
    sender: Option<oneshot::Sender<WaitResult>>,
}

impl Waiter {
    /// Deliver `result`. Returns false if the waiter was already completed
    /// or its reader has gone away.
    pub fn resolve(&mut self, result: WaitResult) -> bool {
        match self.sender.take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.sender.is_none()
    }
}

#[derive(Debug, Default)]
pub struct WaiterRegistry {
    waiters: VecDeque<Waiter>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a reader that is current at the given versions.
    pub fn register(
        &mut self,
        since_version: u64,
        since_aux_version: u64,
        client: Option<IpAddr>,
    ) -> (Uuid, oneshot::Receiver<WaitResult>) {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        self.waiters.push_back(Waiter {
            id,
            since_version,
            since_aux_version,
            client,
            sender: Some(tx),
        });
        (id, rx)
    }

    /// Take a waiter out without resolving it.
    pub fn remove(&mut self, id: &Uuid) -> Option<Waiter> {
        let pos = self.waiters.iter().position(|w| w.id == *id)?;
        self.waiters.remove(pos)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.waiters.iter().any(|w| w.id == *id)
    }

    /// Resolve and remove every waiter in registration order.
    ///
    /// `batch_for` computes each waiter's answer from its own baseline.
    /// Returns how many readers actually received a result.
    pub fn resolve_all<F>(&mut self, mut batch_for: F) -> usize
    where
        F: FnMut(&Waiter) -> WaitResult,
    {
        let mut delivered = 0;
        while let Some(mut waiter) = self.waiters.pop_front() {
            let result = batch_for(&waiter);
            if waiter.resolve(result) {
                delivered += 1;
            } else {
                log::trace!("Waiter {} gone before resolution", waiter.id);
            }
        }
        delivered
    }

    /// Addresses of the readers currently parked.
    pub fn clients(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.waiters.iter().filter_map(|w| w.client)
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
