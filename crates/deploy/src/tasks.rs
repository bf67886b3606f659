use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use factory_core::domain::agent::AgentId;

/// Cancellation handles for bridge provisioning attempts that are still running.
#[derive(Clone, Default)]
pub struct BridgeTasks {
    inner: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    next_generation: AtomicU64,
    running: Mutex<HashMap<String, Running>>,
}

struct Running {
    generation: u64,
    cancel: watch::Sender<bool>,
}

impl Registry {
    fn running(&self) -> MutexGuard<'_, HashMap<String, Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BridgeTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a new attempt for `agent_id`. The entry disappears when the returned
    /// registration is dropped.
    pub fn register(&self, agent_id: &AgentId) -> Registration {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (cancel, receiver) = watch::channel(false);
        self.inner.running().insert(agent_id.0.clone(), Running { generation, cancel });

        Registration {
            signal: CancelSignal { receiver },
            guard: RegistrationGuard {
                registry: Arc::clone(&self.inner),
                agent_id: agent_id.0.clone(),
                generation,
            },
        }
    }

    /// Returns `false` when nothing is running for the agent.
    pub fn cancel(&self, agent_id: &AgentId) -> bool {
        match self.inner.running().get(&agent_id.0) {
            Some(running) => {
                running.cancel.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let running = self.inner.running();
        for entry in running.values() {
            entry.cancel.send_replace(true);
        }
        running.len()
    }

    pub fn is_running(&self, agent_id: &AgentId) -> bool {
        self.inner.running().contains_key(&agent_id.0)
    }

    pub fn running_count(&self) -> usize {
        self.inner.running().len()
    }

    /// Cancels every attempt and waits for them to deregister. Returns `false` if some
    /// were still running when `timeout` elapsed.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            tracing::info!(
                event_name = "deploy.bridge.shutdown",
                cancelled,
                "cancelling in-flight bridge provisioning"
            );
        }

        let drained = tokio::time::timeout(timeout, async {
            while self.running_count() > 0 {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                event_name = "deploy.bridge.shutdown_timeout",
                remaining = self.running_count(),
                "bridge provisioning did not stop before the shutdown deadline"
            );
        }
        drained
    }
}

pub struct Registration {
    pub signal: CancelSignal,
    pub guard: RegistrationGuard,
}

/// Removes the registry entry on drop unless a newer attempt replaced it.
pub struct RegistrationGuard {
    registry: Arc<Registry>,
    agent_id: String,
    generation: u64,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let mut running = self.registry.running();
        if running.get(&self.agent_id).is_some_and(|entry| entry.generation == self.generation) {
            running.remove(&self.agent_id);
        }
    }
}

#[derive(Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_sender, receiver) = watch::channel(false);
        Self { receiver }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the registry entry is gone.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
