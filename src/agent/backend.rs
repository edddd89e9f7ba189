//! Agent backend abstraction.

use std::future::Future;
use std::pin::Pin;

use crate::agent::error::AgentResult;
use crate::agent::ids::{ConversationId, MessageId, RunId, WorkerId};
use crate::agent::types::{
    ActionDecision, MessagePage, MessageRole, PageRequest, RunHandle, RunRequest,
};
use crate::worker::provisioning::WorkerSpec;

/// Boxed future type for backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remote service hosting conversations, runs and workers.
pub trait AgentBackend: Send + Sync {
    /// Allocate a new, empty conversation.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be reached.
    fn create_conversation(&self) -> BackendFuture<'_, AgentResult<ConversationId>>;

    /// Append a message to a conversation.
    ///
    /// # Errors
    /// Returns an error if the backend rejects the message.
    fn append_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        role: MessageRole,
        text: &'a str,
    ) -> BackendFuture<'a, AgentResult<MessageId>>;

    /// Start a run on a conversation and return its initial snapshot.
    ///
    /// # Errors
    /// Returns an error if the run cannot be created.
    fn submit_run<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        request: &'a RunRequest,
    ) -> BackendFuture<'a, AgentResult<RunHandle>>;

    /// Refresh a run's status.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be reached.
    fn get_run<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, AgentResult<RunHandle>>;

    /// Answer the pending actions of a run in the `NeedsInput` state.
    ///
    /// # Errors
    /// Returns an error if the decisions are rejected.
    fn submit_action_decisions<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        run_id: &'a RunId,
        decisions: Vec<ActionDecision>,
    ) -> BackendFuture<'a, AgentResult<()>>;

    /// Ask the backend to stop a run.
    ///
    /// # Errors
    /// Returns an error if the cancel request fails.
    fn cancel_run<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, AgentResult<()>>;

    /// Fetch one page of messages.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be reached.
    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        page: PageRequest,
    ) -> BackendFuture<'a, AgentResult<MessagePage>>;

    /// Create a worker for the per-request strategy.
    ///
    /// # Errors
    /// Returns an error if the worker cannot be created.
    fn create_worker<'a>(&'a self, spec: &'a WorkerSpec) -> BackendFuture<'a, AgentResult<WorkerId>>;

    /// Delete a worker created with [`AgentBackend::create_worker`].
    ///
    /// # Errors
    /// Returns an error if the deletion fails.
    fn delete_worker<'a>(&'a self, worker_id: &'a WorkerId) -> BackendFuture<'a, AgentResult<()>>;
}
