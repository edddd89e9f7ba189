//! Worker provisioning strategies.
//!
//! The default strategy reuses one persistent worker configured by id. The
//! per-request strategy creates a fresh worker for each run and deletes it
//! afterwards, trading latency for isolation between calls.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::backend::AgentBackend;
use crate::agent::error::{AgentError, AgentResult};
use crate::agent::ids::WorkerId;
use crate::worker::resources::ToolDefinition;

/// Definition of a worker created on demand.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Model deployment name.
    pub model: String,
    /// Display name.
    pub name: String,
    /// System instructions.
    pub instructions: String,
    /// Tools the worker may call.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// How a run obtains its worker.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WorkerStrategy {
    /// Reuse one long-lived worker.
    Persistent {
        /// Worker id; `None` leaves the coordinator unconfigured.
        worker_id: Option<WorkerId>,
    },
    /// Create a worker per run and delete it afterwards.
    PerRequest(WorkerSpec),
}

impl Default for WorkerStrategy {
    fn default() -> Self {
        Self::Persistent { worker_id: None }
    }
}

impl WorkerStrategy {
    /// Whether enough is known to obtain a worker.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        match self {
            Self::Persistent { worker_id } => worker_id
                .as_ref()
                .is_some_and(|id| !id.as_str().trim().is_empty()),
            Self::PerRequest(spec) => !spec.model.trim().is_empty(),
        }
    }
}

/// A worker obtained for one run.
///
/// Owned leases delete their worker when released. A lease dropped without
/// [`WorkerProvisioner::release`] (for example when the surrounding task is
/// aborted) schedules the deletion on the current runtime instead.
pub struct WorkerLease {
    worker_id: WorkerId,
    cleanup: Option<Arc<dyn AgentBackend>>,
}

impl WorkerLease {
    /// Worker to run against.
    #[must_use]
    pub const fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Whether releasing this lease deletes the worker.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        self.cleanup.is_some()
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        let Some(backend) = self.cleanup.take() else {
            return;
        };
        let worker_id = self.worker_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = backend.delete_worker(&worker_id).await {
                        warn!(%worker_id, %err, "Deferred worker deletion failed");
                    }
                });
            }
            Err(_) => warn!(worker_id = %self.worker_id, "Worker leaked: no runtime to delete it"),
        }
    }
}

/// Hands out workers according to the configured strategy.
pub struct WorkerProvisioner {
    backend: Arc<dyn AgentBackend>,
    strategy: WorkerStrategy,
}

impl WorkerProvisioner {
    /// Create a provisioner.
    #[must_use]
    pub fn new(backend: Arc<dyn AgentBackend>, strategy: WorkerStrategy) -> Self {
        Self { backend, strategy }
    }

    /// Active strategy.
    #[must_use]
    pub const fn strategy(&self) -> &WorkerStrategy {
        &self.strategy
    }

    /// Obtain a worker.
    ///
    /// # Errors
    /// Returns `Unconfigured` when no persistent worker id is set, or the
    /// backend error when creating a per-request worker fails.
    pub async fn acquire(&self) -> AgentResult<WorkerLease> {
        match &self.strategy {
            WorkerStrategy::Persistent { worker_id } => {
                let worker_id = worker_id
                    .clone()
                    .filter(|id| !id.as_str().trim().is_empty())
                    .ok_or_else(|| AgentError::Unconfigured("worker id is not set".to_string()))?;
                Ok(WorkerLease {
                    worker_id,
                    cleanup: None,
                })
            }
            WorkerStrategy::PerRequest(spec) => {
                let worker_id = self.backend.create_worker(spec).await?;
                debug!(%worker_id, "Created per-request worker");
                Ok(WorkerLease {
                    worker_id,
                    cleanup: Some(Arc::clone(&self.backend)),
                })
            }
        }
    }

    /// Release a lease, deleting owned workers. Failures are logged only.
    pub async fn release(&self, mut lease: WorkerLease) {
        let Some(backend) = lease.cleanup.take() else {
            return;
        };
        match backend.delete_worker(&lease.worker_id).await {
            Ok(()) => debug!(worker_id = %lease.worker_id, "Deleted per-request worker"),
            Err(err) => warn!(worker_id = %lease.worker_id, %err, "Failed to delete worker"),
        }
    }

    /// Run `work` with a worker, releasing it on every exit path.
    ///
    /// # Errors
    /// Returns the acquisition error or whatever `work` returns.
    pub async fn with_worker<T, F, Fut>(&self, work: F) -> AgentResult<T>
    where
        F: FnOnce(WorkerId) -> Fut,
        Fut: Future<Output = AgentResult<T>>,
    {
        let lease = self.acquire().await?;
        let result = work(lease.worker_id().clone()).await;
        self.release(lease).await;
        result
    }
}
