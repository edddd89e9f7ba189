//! Conversation façade: send, poll, reconcile and format.
//!
//! The coordinator owns the user-to-conversation map, the transcript cache
//! and the per-conversation locks. Public operations never surface transport
//! errors: `get_or_create_conversation` degrades to a sentinel id,
//! `get_history` to cached or empty data, and `send_for_display` to an
//! explanatory reply.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::agent::backend::AgentBackend;
use crate::agent::error::{AgentError, AgentResult};
use crate::agent::http::HttpAgentBackend;
use crate::agent::ids::{ConversationId, TurnId};
use crate::agent::types::{Message, MessageRole, RunRequest};
use crate::cache::{CacheLookup, CacheStats, TranscriptCache};
use crate::chat::locks::ConversationLocks;
use crate::chat::sanitizer::ResponseSanitizer;
use crate::chat::transcript::fetch_ordered;
use crate::config::{AtelierConfig, ConfigError, HistoryConfig};
use crate::run::approval::resolver_from_config;
use crate::run::poller::RunPoller;
use crate::worker::provisioning::WorkerProvisioner;
use crate::worker::resources::ToolResources;

/// Reply to a sent message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Sanitized agent response, or an explanation when the turn failed.
    pub display_text: String,
    /// Conversation the reply belongs to.
    pub conversation_id: ConversationId,
}

/// One transcript line as exposed to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Raw message text.
    pub text: String,
    /// Sanitized text.
    pub display_text: String,
    /// Whether the user wrote the message.
    pub is_user: bool,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            text: message.content.clone(),
            display_text: message.display_text().to_string(),
            is_user: message.is_user(),
            timestamp: message.created_at,
        }
    }
}

/// Everything needed to talk to a configured backend.
struct Engine {
    backend: Arc<dyn AgentBackend>,
    poller: RunPoller,
    provisioner: WorkerProvisioner,
    tool_resources: Option<ToolResources>,
}

/// Conversation coordinator.
pub struct ConversationCoordinator {
    engine: Option<Engine>,
    unconfigured_reason: String,
    cache: Arc<TranscriptCache>,
    sanitizer: ResponseSanitizer,
    history: HistoryConfig,
    conversations: DashMap<String, ConversationId>,
    locks: ConversationLocks,
}

impl ConversationCoordinator {
    /// Create a coordinator over an existing backend.
    ///
    /// # Errors
    /// Returns an error if the response patterns fail to compile.
    pub fn new(backend: Arc<dyn AgentBackend>, config: &AtelierConfig) -> Result<Self, ConfigError> {
        let poller = RunPoller::new(
            Arc::clone(&backend),
            resolver_from_config(&config.approval),
            config.poller.clone(),
        );
        let provisioner =
            WorkerProvisioner::new(Arc::clone(&backend), config.worker.resolved_strategy());
        let engine = Engine {
            backend,
            poller,
            provisioner,
            tool_resources: config.worker.tool_resources(),
        };
        Self::build(Some(engine), String::new(), config)
    }

    /// Create a coordinator with no backend.
    ///
    /// # Errors
    /// Returns an error if the response patterns fail to compile.
    pub fn unconfigured(reason: impl Into<String>, config: &AtelierConfig) -> Result<Self, ConfigError> {
        Self::build(None, reason.into(), config)
    }

    /// Create a coordinator from configuration, using the HTTP backend.
    ///
    /// A missing endpoint yields an unconfigured coordinator, not an error.
    ///
    /// # Errors
    /// Returns an error if the endpoint is set but unusable.
    pub fn from_config(config: &AtelierConfig) -> Result<Self, ConfigError> {
        match HttpAgentBackend::new(&config.backend) {
            Ok(backend) => {
                let backend = backend.with_approval_headers(config.worker.mcp_headers.clone());
                Self::new(Arc::new(backend), config)
            }
            Err(AgentError::Unconfigured(reason)) => {
                warn!(%reason, "Agent backend is not configured");
                Self::unconfigured(reason, config)
            }
            Err(err) => Err(ConfigError::Backend(err.to_string())),
        }
    }

    fn build(
        engine: Option<Engine>,
        unconfigured_reason: String,
        config: &AtelierConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            engine,
            unconfigured_reason,
            cache: Arc::new(TranscriptCache::new(config.cache.clone())),
            sanitizer: ResponseSanitizer::new()?,
            history: config.history.clone(),
            conversations: DashMap::new(),
            locks: ConversationLocks::new(),
        })
    }

    /// Whether both the backend and a worker are available.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.engine
            .as_ref()
            .is_some_and(|engine| engine.provisioner.strategy().is_configured())
    }

    /// Transcript cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop stale transcripts and idle locks. Returns the number of transcripts removed.
    pub fn run_maintenance(&self) -> usize {
        let removed = self.cache.cleanup_stale();
        self.locks.prune_idle();
        removed
    }

    fn engine(&self) -> AgentResult<&Engine> {
        self.engine
            .as_ref()
            .ok_or_else(|| AgentError::Unconfigured(self.unconfigured_reason.clone()))
    }

    /// Return the conversation for `user_key`, creating one on first use.
    ///
    /// Returns the "not usable" sentinel when the backend is unconfigured or
    /// unreachable; the sentinel is not remembered, so a later call retries.
    pub async fn get_or_create_conversation(&self, user_key: &str) -> ConversationId {
        let existing = self
            .conversations
            .get(user_key)
            .map(|entry| entry.value().clone());
        if let Some(conversation_id) = existing {
            return conversation_id;
        }

        let engine = match self.engine() {
            Ok(engine) => engine,
            Err(err) => {
                warn!(user_key, %err, "Cannot create conversation");
                return ConversationId::unusable();
            }
        };

        match engine.backend.create_conversation().await {
            Ok(created) => {
                let conversation_id = self
                    .conversations
                    .entry(user_key.to_string())
                    .or_insert(created)
                    .clone();
                info!(user_key, %conversation_id, "Conversation ready");
                conversation_id
            }
            Err(err) => {
                warn!(user_key, %err, "Conversation creation failed");
                ConversationId::unusable()
            }
        }
    }

    /// Send a user message and return the agent's sanitized reply.
    ///
    /// Sends on the same conversation are serialised: a second call waits
    /// for the first to finish.
    ///
    /// # Errors
    /// Returns `Unconfigured`, `UnusableConversation`, `RunTimedOut`,
    /// `RunFailed`, or `BackendUnavailable` for any transport failure.
    pub async fn send(&self, conversation_id: &ConversationId, text: &str) -> AgentResult<ChatReply> {
        let turn_id = TurnId::new();
        let span = info_span!("send", %turn_id, %conversation_id);
        self.send_inner(conversation_id, text)
            .instrument(span)
            .await
            .map_err(AgentError::into_public)
    }

    /// Like [`ConversationCoordinator::send`], with failures turned into a reply.
    pub async fn send_for_display(&self, conversation_id: &ConversationId, text: &str) -> ChatReply {
        match self.send(conversation_id, text).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%conversation_id, %err, "Send failed");
                ChatReply {
                    display_text: err.user_message(),
                    conversation_id: conversation_id.clone(),
                }
            }
        }
    }

    async fn send_inner(&self, conversation_id: &ConversationId, text: &str) -> AgentResult<ChatReply> {
        if !conversation_id.is_usable() {
            return Err(AgentError::UnusableConversation(conversation_id.clone()));
        }
        let engine = self.engine()?;

        let _permit = self.locks.acquire(conversation_id).await?;
        debug!("Conversation lock acquired");

        engine
            .backend
            .append_message(conversation_id, MessageRole::User, text)
            .await?;
        self.cache.invalidate(conversation_id);

        let tool_resources = engine.tool_resources.clone();
        let poller = &engine.poller;
        engine
            .provisioner
            .with_worker(|worker_id| async move {
                let request = RunRequest {
                    worker_id,
                    tool_resources,
                };
                poller.run(conversation_id, &request).await?.into_completed()
            })
            .await?;

        let messages = self.refresh(engine, conversation_id).await?;
        let reply = latest_reply(&messages)
            .ok_or_else(|| AgentError::RunFailed("the run completed without a reply".to_string()))?;

        Ok(ChatReply {
            display_text: reply.display_text().to_string(),
            conversation_id: conversation_id.clone(),
        })
    }

    /// Return the transcript, oldest first, with display text filled in.
    ///
    /// Serves the cached copy while fresh, refetches otherwise, and falls
    /// back to a stale copy or an empty list when the backend fails.
    pub async fn get_history(&self, conversation_id: &ConversationId) -> Vec<Message> {
        if !conversation_id.is_usable() {
            return Vec::new();
        }
        if let Some(messages) = self.cache.get(conversation_id) {
            debug!(%conversation_id, "Transcript cache hit");
            return messages;
        }

        let result = match self.engine() {
            Ok(engine) => self.refresh(engine, conversation_id).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(messages) => messages,
            Err(err) => {
                warn!(%conversation_id, %err, "History fetch failed, using cached copy");
                match self.cache.lookup(conversation_id) {
                    CacheLookup::Fresh(messages) | CacheLookup::Stale(messages) => messages,
                    CacheLookup::Miss => Vec::new(),
                }
            }
        }
    }

    /// Transcript in its client-facing form.
    pub async fn get_history_entries(&self, conversation_id: &ConversationId) -> Vec<HistoryEntry> {
        self.get_history(conversation_id)
            .await
            .iter()
            .map(HistoryEntry::from)
            .collect()
    }

    /// Fetch, sanitize and cache the full transcript.
    async fn refresh(&self, engine: &Engine, conversation_id: &ConversationId) -> AgentResult<Vec<Message>> {
        let fetched = tokio::time::timeout(
            self.history.fetch_timeout,
            fetch_ordered(engine.backend.as_ref(), conversation_id, &self.history),
        )
        .await
        .map_err(|_| AgentError::BackendUnavailable("history fetch timed out".to_string()))??;

        let messages: Vec<Message> = fetched
            .into_iter()
            .map(|mut message| {
                message.display_content = Some(self.sanitizer.format(&message.content));
                message
            })
            .collect();
        self.cache.put(conversation_id.clone(), messages.clone());
        Ok(messages)
    }
}

/// Newest agent message written after the last user message.
fn latest_reply(messages: &[Message]) -> Option<&Message> {
    let turn_start = messages
        .iter()
        .rposition(Message::is_user)
        .map_or(0, |index| index + 1);
    messages
        .get(turn_start..)?
        .iter()
        .rev()
        .find(|message| !message.is_user())
}
