//! Registry of live simulations.
//!
//! Maintains `id → Simulation` under a readers/writer discipline:
//! lookups and snapshots take shared access, mutation takes exclusive
//! access. Send-handles are handed out by reference; callers serialize
//! their own writes to them (see the module docs on [`SendHandle`]).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::model::SimulationInfo;

/// The opaque per-simulation delivery primitive. One envelope at a
/// time; implementations must serialize concurrent calls themselves
/// (a connection actor wrapping a single outbound channel satisfies
/// this trivially).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SendHandle: Send + Sync {
    /// Deliver one framed JSON envelope. `Err` means the write failed
    /// (the peer is gone, the socket is closed, etc).
    async fn send(&self, envelope: Value) -> Result<(), String>;
}

/// Hook invoked by the Registry whenever a simulation's connection is
/// lost — either an explicit unregister, or an implicit replace when
/// a second `register` arrives for the same id. The Saga Engine
/// implements this to fail any saga still holding the target's
/// exclusion lock.
#[async_trait]
pub trait ConnectionLossHook: Send + Sync {
    async fn on_connection_lost(&self, simulation_id: &str);
}

struct Entry {
    info: SimulationInfo,
    handle: Arc<dyn SendHandle>,
}

/// Thread-safe table of live simulations.
pub struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
    loss_hook: RwLock<Option<Arc<dyn ConnectionLossHook>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            entries: RwLock::new(HashMap::new()),
            loss_hook: RwLock::new(None),
        }
    }

    /// Wire in the Saga Engine's connection-loss hook. Done once at
    /// startup since the Registry and Saga Engine are constructed
    /// independently and then linked (avoids a circular constructor
    /// dependency between the two).
    pub async fn set_connection_loss_hook(&self, hook: Arc<dyn ConnectionLossHook>) {
        *self.loss_hook.write().await = Some(hook);
    }

    /// Insert or replace the entry for `id`. If a previous entry
    /// existed, its saga (if any) is failed via the connection-loss
    /// hook before the new entry is installed.
    pub async fn register(
        &self,
        id: String,
        name: String,
        handle: Arc<dyn SendHandle>,
    ) -> SimulationInfo {
        let replaced = {
            let mut entries = self.entries.write().await;
            entries.insert(
                id.clone(),
                Entry {
                    info: SimulationInfo {
                        id: id.clone(),
                        name: name.clone(),
                    },
                    handle,
                },
            )
        };

        if replaced.is_some() {
            warn!(simulation_id = %id, "registration replaced a live connection");
            self.notify_connection_lost(&id).await;
        } else {
            info!(simulation_id = %id, name = %name, "simulation registered");
        }

        SimulationInfo { id, name }
    }

    /// Constant-time read of a simulation's send-handle, if present.
    pub async fn lookup(&self, id: &str) -> Option<Arc<dyn SendHandle>> {
        self.entries.read().await.get(id).map(|e| e.handle.clone())
    }

    /// Removes the entry for `id`. Idempotent. Triggers the
    /// connection-loss hook so any saga holding `id`'s exclusion lock
    /// is failed.
    pub async fn unregister(&self, id: &str) {
        let existed = self.entries.write().await.remove(id).is_some();
        if existed {
            debug!(simulation_id = %id, "simulation unregistered");
            self.notify_connection_lost(id).await;
        }
    }

    /// Copy of live entries, for the observability surface.
    pub async fn snapshot(&self) -> Vec<SimulationInfo> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| e.info.clone())
            .collect()
    }

    async fn notify_connection_lost(&self, id: &str) {
        if let Some(hook) = self.loss_hook.read().await.clone() {
            hook.on_connection_lost(id).await;
        }
    }
}
