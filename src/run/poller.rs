//! Drives one run from submission to a terminal status.
//!
//! State machine: `Queued -> InProgress -> {NeedsInput <-> InProgress} ->
//! terminal`. Anything the poller does not recognise counts as terminal. An
//! overall deadline starts at submission; when it passes the run is
//! cancelled once, best effort, and `RunTimedOut` is returned regardless of
//! the cancel outcome.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::agent::backend::AgentBackend;
use crate::agent::error::{AgentError, AgentResult};
use crate::agent::ids::{ActionId, ConversationId, RunId};
use crate::agent::types::{RunHandle, RunRequest, RunStatus};
use crate::config::PollerConfig;
use crate::run::approval::ToolApprovalResolver;

/// Final state of a run that reached a terminal status.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// Last snapshot, with a terminal status.
    pub handle: RunHandle,
    /// Number of pending-action rounds answered.
    pub action_rounds: usize,
    /// Time from submission to the terminal status.
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Convert a non-completed terminal status into `RunFailed`.
    ///
    /// # Errors
    /// Returns `RunFailed` with the backend's detail unless the run completed.
    pub fn into_completed(self) -> AgentResult<RunHandle> {
        if self.handle.status == RunStatus::Completed {
            return Ok(self.handle);
        }
        let reason = self
            .handle
            .last_error
            .clone()
            .unwrap_or_else(|| format!("run ended with status {}", self.handle.status));
        Err(AgentError::RunFailed(reason))
    }
}

/// Polls runs and answers their pending actions.
pub struct RunPoller {
    backend: Arc<dyn AgentBackend>,
    resolver: Arc<dyn ToolApprovalResolver>,
    config: PollerConfig,
}

impl RunPoller {
    /// Create a poller.
    #[must_use]
    pub fn new(
        backend: Arc<dyn AgentBackend>,
        resolver: Arc<dyn ToolApprovalResolver>,
        config: PollerConfig,
    ) -> Self {
        Self {
            backend,
            resolver,
            config,
        }
    }

    /// Polling configuration.
    #[must_use]
    pub const fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Submit a run and wait for it to reach a terminal status.
    ///
    /// # Errors
    /// Returns `RunTimedOut` once the deadline passes (after one cancel
    /// attempt), the submission error, or a non-retryable polling error
    /// (also after one cancel attempt).
    pub async fn run(
        &self,
        conversation_id: &ConversationId,
        request: &RunRequest,
    ) -> AgentResult<RunOutcome> {
        let started = Instant::now();
        let deadline = started + self.config.run_timeout;

        let mut handle = match timeout_at(
            deadline,
            self.backend.submit_run(conversation_id, request),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(AgentError::BackendUnavailable(
                    "run submission did not return before the deadline".to_string(),
                ));
            }
        };
        info!(
            %conversation_id,
            run_id = %handle.run_id,
            worker_id = %request.worker_id,
            status = %handle.status,
            "Run submitted"
        );

        let mut action_rounds = 0;
        let mut answered: Option<BTreeSet<ActionId>> = None;

        loop {
            if handle.status.is_terminal() {
                let elapsed = started.elapsed();
                info!(
                    run_id = %handle.run_id,
                    status = %handle.status,
                    action_rounds,
                    elapsed_ms = elapsed.as_millis(),
                    "Run finished"
                );
                return Ok(RunOutcome {
                    handle,
                    action_rounds,
                    elapsed,
                });
            }

            if handle.status == RunStatus::NeedsInput {
                let pending: BTreeSet<ActionId> = handle
                    .pending_actions
                    .iter()
                    .map(|action| action.action_id.clone())
                    .collect();

                if answered.as_ref() != Some(&pending) {
                    match timeout_at(deadline, self.answer_pending(&handle)).await {
                        Ok(Ok(())) => {
                            action_rounds += 1;
                            answered = Some(pending);
                        }
                        Ok(Err(err)) => {
                            warn!(run_id = %handle.run_id, %err, "Pending action round failed, will retry");
                            let retry_at = (Instant::now() + self.config.action_retry_delay).min(deadline);
                            sleep_until(retry_at).await;
                        }
                        Err(_) => break,
                    }
                }
            }

            let wake = Instant::now() + self.config.poll_interval;
            if wake >= deadline {
                sleep_until(deadline).await;
                break;
            }
            sleep_until(wake).await;

            match timeout_at(deadline, self.backend.get_run(conversation_id, &handle.run_id)).await {
                Ok(Ok(next)) => {
                    if next.status != handle.status {
                        debug!(run_id = %next.run_id, from = %handle.status, to = %next.status, "Run status changed");
                    }
                    handle = next;
                }
                Ok(Err(err)) if err.is_retryable() => {
                    warn!(run_id = %handle.run_id, %err, "Run status refresh failed, will retry");
                }
                Ok(Err(err)) => {
                    warn!(run_id = %handle.run_id, %err, "Run status refresh failed, giving up");
                    self.cancel(conversation_id, &handle.run_id).await;
                    return Err(err);
                }
                Err(_) => break,
            }
        }

        let elapsed = started.elapsed();
        warn!(
            run_id = %handle.run_id,
            elapsed_ms = elapsed.as_millis(),
            "Run deadline passed, cancelling"
        );
        self.cancel(conversation_id, &handle.run_id).await;
        Err(AgentError::RunTimedOut {
            run_id: handle.run_id,
            elapsed,
        })
    }

    /// Resolve and submit one round of pending actions.
    async fn answer_pending(&self, handle: &RunHandle) -> AgentResult<()> {
        if handle.pending_actions.is_empty() {
            return Err(AgentError::TransientAction(
                "run needs input but reported no pending actions".to_string(),
            ));
        }

        let decisions = self.resolver.resolve(&handle.pending_actions);
        let approved = decisions.iter().filter(|decision| decision.approved).count();
        debug!(
            run_id = %handle.run_id,
            policy = self.resolver.name(),
            actions = decisions.len(),
            approved,
            "Submitting action decisions"
        );

        self.backend
            .submit_action_decisions(&handle.conversation_id, &handle.run_id, decisions)
            .await
            .map_err(|err| AgentError::TransientAction(err.to_string()))
    }

    /// Send a single best-effort cancel.
    async fn cancel(&self, conversation_id: &ConversationId, run_id: &RunId) {
        match timeout(
            self.config.cancel_timeout,
            self.backend.cancel_run(conversation_id, run_id),
        )
        .await
        {
            Ok(Ok(())) => info!(%run_id, "Run cancelled"),
            Ok(Err(err)) => warn!(%run_id, %err, "Cancel request failed"),
            Err(_) => warn!(%run_id, "Cancel request timed out"),
        }
    }
}
