//! Agent backend: identifiers, domain types, errors and the HTTP client.

pub mod backend;
pub mod error;
pub mod http;
pub mod ids;
pub mod types;

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod fake;

pub use backend::{AgentBackend, BackendFuture};
pub use error::{AgentError, AgentResult};
pub use http::HttpAgentBackend;
pub use ids::{ActionId, ConversationId, MessageId, RunId, TurnId, WorkerId};
pub use types::{
    ActionDecision, ActionKind, ListOrder, Message, MessagePage, MessageRole, PageRequest,
    PendingAction, RunHandle, RunRequest, RunStatus,
};
