//! Process-wide map from document id to [`Instance`].
//!
//! Instances are created on first lookup. Two policies keep the map
//! bounded, and neither ever drops an instance with a parked reader:
//! - capacity: creating past `max_instances` evicts the least recently
//!   active idle instance
//! - idle reaper: instances untouched for `idle_timeout` are removed

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::document::{text_document_factory, DocumentFactory};
use crate::instance::{Instance, InstanceConfig};
use crate::protocol::{validate_doc_id, InstanceSummary, SyncError};

/// Store-wide tunables.
#[derive(Clone)]
pub struct StoreConfig {
    /// Configuration handed to every new instance
    pub instance: InstanceConfig,
    /// Soft cap on live instances
    pub max_instances: usize,
    /// Idle time after which the reaper drops an instance
    pub idle_timeout: Duration,
    /// Builds the initial document for new instances
    pub document_factory: DocumentFactory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            instance: InstanceConfig::default(),
            max_instances: 256,
            idle_timeout: Duration::from_secs(30 * 60),
            document_factory: text_document_factory(),
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("instance", &self.instance)
            .field("max_instances", &self.max_instances)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

pub struct InstanceStore {
    instances: RwLock<HashMap<String, Arc<Instance>>>,
    config: StoreConfig,
}

impl InstanceStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Look up `id`, creating the instance if needed, and record the
    /// requester as a user.
    ///
    /// The instance is marked active while the map lock is held, so eviction
    /// cannot remove it between lookup and use.
    pub async fn get(
        &self,
        id: &str,
        requester: Option<IpAddr>,
    ) -> Result<Arc<Instance>, SyncError> {
        validate_doc_id(id)?;

        // Fast path: read lock
        {
            let instances = self.instances.read().await;
            if let Some(instance) = instances.get(id) {
                instance.register_user(requester);
                return Ok(instance.clone());
            }
        }
        Ok(self.create(id, requester).await)
    }

    async fn create(&self, id: &str, requester: Option<IpAddr>) -> Arc<Instance> {
        let mut instances = self.instances.write().await;
        // Double-check after acquiring write lock
        if let Some(instance) = instances.get(id) {
            instance.register_user(requester);
            return instance.clone();
        }

        if instances.len() >= self.config.max_instances {
            Self::evict_least_recent(&mut instances);
        }

        let doc = (self.config.document_factory)(id);
        let instance = Arc::new(Instance::new(id, doc, self.config.instance.clone()));
        instance.register_user(requester);
        instances.insert(id.to_string(), instance.clone());
        log::info!("Created instance {id} ({} live)", instances.len());
        instance
    }

    fn evict_least_recent(instances: &mut HashMap<String, Arc<Instance>>) {
        let victim = instances
            .values()
            .filter(|inst| inst.waiter_count() == 0)
            .min_by_key(|inst| inst.last_active())
            .map(|inst| inst.id().to_string());
        match victim {
            Some(id) => {
                instances.remove(&id);
                log::info!("Evicted instance {id} to make room");
            }
            None => log::warn!(
                "All {} instances have parked readers; growing past capacity",
                instances.len()
            ),
        }
    }

    /// Summaries of every live instance, ordered by id.
    pub async fn list(&self) -> Vec<InstanceSummary> {
        let instances: Vec<Arc<Instance>> =
            self.instances.read().await.values().cloned().collect();
        let mut summaries: Vec<InstanceSummary> = instances.iter().map(|i| i.summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.instances.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Instance>> {
        self.instances.write().await.remove(id)
    }

    /// Drop instances idle since before `now - idle_timeout` that have no
    /// parked readers. Returns the evicted ids.
    pub async fn evict_idle(&self, now: Instant) -> Vec<String> {
        let timeout = self.config.idle_timeout;
        let mut instances = self.instances.write().await;
        let idle: Vec<String> = instances
            .values()
            .filter(|inst| {
                inst.waiter_count() == 0
                    && now.saturating_duration_since(inst.last_active()) >= timeout
            })
            .map(|inst| inst.id().to_string())
            .collect();
        for id in &idle {
            instances.remove(id);
            log::info!("Instance {id} removed (idle)");
        }
        idle
    }

    /// Prune stale users on every instance.
    pub async fn collect_users(&self) {
        let instances: Vec<Arc<Instance>> =
            self.instances.read().await.values().cloned().collect();
        for instance in instances {
            instance.collect_users();
        }
    }

    /// Run eviction and user collection every `interval` until aborted.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = store.evict_idle(Instant::now()).await;
                store.collect_users().await;
                if !evicted.is_empty() {
                    log::debug!("Reaper evicted {} instances", evicted.len());
                }
            }
        })
    }
}
