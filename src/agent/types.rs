//! Domain model shared by the backend, the poller and the coordinator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::ids::{ActionId, ConversationId, MessageId, RunId, WorkerId};
use crate::worker::resources::ToolResources;

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Text typed by the end user.
    User,
    /// Text produced by the remote worker.
    Agent,
}

impl MessageRole {
    /// Wire form used by the backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" | "agent" => Ok(Self::Agent),
            _ => Err(value.to_string()),
        }
    }
}

/// A single message of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Backend identifier, used for pagination and de-duplication.
    pub id: MessageId,
    /// Author of the message.
    pub role: MessageRole,
    /// Raw text as stored by the backend.
    pub content: String,
    /// Creation timestamp; the ordering key.
    pub created_at: DateTime<Utc>,
    /// Sanitized text ready for display, filled in locally.
    pub display_content: Option<String>,
}

impl Message {
    /// Build a message without display text.
    #[must_use]
    pub fn new(
        id: impl Into<MessageId>,
        role: MessageRole,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            created_at,
            display_content: None,
        }
    }

    /// Whether the user wrote this message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    /// Display text, falling back to the raw content.
    #[must_use]
    pub fn display_text(&self) -> &str {
        self.display_content.as_deref().unwrap_or(&self.content)
    }
}

/// Lifecycle status of a run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted, not started.
    Queued,
    /// The worker is producing a response.
    InProgress,
    /// The worker is waiting for tool-call decisions.
    NeedsInput,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled, either by us or by the backend.
    Cancelled,
    /// Any status this crate does not model; treated as terminal.
    Other(String),
}

impl RunStatus {
    /// Parse the backend's status string.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value {
            "queued" => Self::Queued,
            "in_progress" => Self::InProgress,
            "requires_action" => Self::NeedsInput,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        }
    }

    /// Stable string form for logs.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::NeedsInput => "requires_action",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Other(other) => other,
        }
    }

    /// Statuses during which the poller keeps waiting.
    #[must_use]
    pub const fn is_pollable(&self) -> bool {
        matches!(self, Self::Queued | Self::InProgress | Self::NeedsInput)
    }

    /// Statuses after which no further polling is meaningful.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !self.is_pollable()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a pending tool call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// A call routed to an external tool server (MCP style).
    ExternalToolCall {
        /// Label of the tool server the call targets.
        server_label: Option<String>,
    },
    /// A function call the client is expected to answer.
    FunctionCall,
}

impl ActionKind {
    /// Short name used in logs and allow-list rules.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ExternalToolCall { .. } => "external",
            Self::FunctionCall => "function",
        }
    }
}

/// One tool call the worker wants to perform, awaiting approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Backend identifier of the tool call.
    pub action_id: ActionId,
    /// Kind of call.
    pub kind: ActionKind,
    /// Tool or function name.
    pub name: String,
    /// Raw JSON arguments as sent by the worker.
    pub arguments: String,
}

impl PendingAction {
    /// Parse the raw arguments as JSON.
    ///
    /// # Errors
    /// Returns an error if the arguments are not valid JSON.
    pub fn arguments_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// Approval decision for one pending action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDecision {
    /// Tool call this decision answers.
    pub action_id: ActionId,
    /// Kind of the answered call; selects the submission format.
    pub kind: ActionKind,
    /// Whether the call may proceed.
    pub approved: bool,
    /// Optional explanation, forwarded for rejected function calls.
    pub reason: Option<String>,
}

impl ActionDecision {
    /// Approve an action.
    #[must_use]
    pub fn approve(action: &PendingAction) -> Self {
        Self {
            action_id: action.action_id.clone(),
            kind: action.kind.clone(),
            approved: true,
            reason: None,
        }
    }

    /// Reject an action with a reason.
    #[must_use]
    pub fn reject(action: &PendingAction, reason: impl Into<String>) -> Self {
        Self {
            action_id: action.action_id.clone(),
            kind: action.kind.clone(),
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

/// Snapshot of a run as last reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunHandle {
    /// Conversation the run belongs to.
    pub conversation_id: ConversationId,
    /// Run identifier.
    pub run_id: RunId,
    /// Last observed status.
    pub status: RunStatus,
    /// Pending actions, only populated while `status == NeedsInput`.
    pub pending_actions: Vec<PendingAction>,
    /// Error detail reported by the backend, if any.
    pub last_error: Option<String>,
}

impl RunHandle {
    /// Build a handle with no pending actions or error.
    #[must_use]
    pub const fn new(conversation_id: ConversationId, run_id: RunId, status: RunStatus) -> Self {
        Self {
            conversation_id,
            run_id,
            status,
            pending_actions: Vec::new(),
            last_error: None,
        }
    }
}

/// Parameters of a run submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRequest {
    /// Worker that should answer.
    pub worker_id: WorkerId,
    /// Run-time tool configuration.
    pub tool_resources: Option<ToolResources>,
}

/// Order in which a message page is requested.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    /// Oldest first.
    Ascending,
    /// Newest first, the backend's usual default.
    #[default]
    Descending,
}

impl ListOrder {
    /// Wire form of the order parameter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

/// Pagination request for `list_messages`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of messages in the page.
    pub limit: usize,
    /// Cursor: return messages after this one in the requested order.
    pub after: Option<MessageId>,
    /// Requested order.
    pub order: ListOrder,
}

/// One page of messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessagePage {
    /// Messages in the order the backend returned them.
    pub messages: Vec<Message>,
    /// Whether another page follows.
    pub has_more: bool,
    /// Cursor for the next page.
    pub last_id: Option<MessageId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(RunStatus::Queued.is_pollable());
        assert!(RunStatus::NeedsInput.is_pollable());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::from_wire("expired").is_terminal());
        assert_eq!(RunStatus::from_wire("requires_action"), RunStatus::NeedsInput);
        assert_eq!(RunStatus::from_wire("cancelling").as_str(), "cancelling");
    }

    #[test]
    fn test_role_round_trips_through_wire_names() {
        assert_eq!("assistant".parse::<MessageRole>(), Ok(MessageRole::Agent));
        assert_eq!(MessageRole::User.as_str(), "user");
        assert!("system".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_empty_arguments_parse_as_object() {
        let action = PendingAction {
            action_id: ActionId::new("call_1"),
            kind: ActionKind::FunctionCall,
            name: "view_cart".to_string(),
            arguments: String::new(),
        };
        let value = action.arguments_json().unwrap_or_default();
        assert!(value.is_object());
    }

    #[test]
    fn test_display_text_falls_back_to_content() {
        let mut message = Message::new("m1", MessageRole::Agent, "raw", Utc::now());
        assert_eq!(message.display_text(), "raw");
        message.display_content = Some("shown".to_string());
        assert_eq!(message.display_text(), "shown");
    }
}
