//! Rebuilds a conversation transcript from paginated backend listings.
//!
//! Pages are requested newest first, so truncation at `max_pages` drops the
//! oldest messages. The backend's ordering is never trusted: results are
//! de-duplicated by id and stable-sorted by `created_at` before use.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::agent::backend::AgentBackend;
use crate::agent::error::AgentResult;
use crate::agent::ids::{ConversationId, MessageId};
use crate::agent::types::{ListOrder, Message, PageRequest};
use crate::config::HistoryConfig;

/// Fetch every message of a conversation, oldest first.
///
/// # Errors
/// Returns the first backend error encountered.
pub async fn fetch_ordered(
    backend: &dyn AgentBackend,
    conversation_id: &ConversationId,
    config: &HistoryConfig,
) -> AgentResult<Vec<Message>> {
    let mut collected = Vec::new();
    let mut after: Option<MessageId> = None;
    let mut pages = 0;

    loop {
        let page = backend
            .list_messages(
                conversation_id,
                PageRequest {
                    limit: config.page_size,
                    after: after.take(),
                    order: ListOrder::Descending,
                },
            )
            .await?;
        pages += 1;

        let cursor = page
            .last_id
            .clone()
            .or_else(|| page.messages.last().map(|message| message.id.clone()));
        collected.extend(page.messages);

        match cursor {
            Some(cursor) if page.has_more => {
                if pages >= config.max_pages {
                    warn!(
                        %conversation_id,
                        pages,
                        "Transcript truncated at page limit"
                    );
                    break;
                }
                after = Some(cursor);
            }
            _ => break,
        }
    }

    // Newest-first pages reversed restore arrival order for equal timestamps.
    collected.reverse();
    let messages = reconcile(collected);
    debug!(%conversation_id, pages, messages = messages.len(), "Fetched transcript");
    Ok(messages)
}

/// Drop repeated ids and sort ascending by `created_at`, keeping input order on ties.
#[must_use]
pub fn reconcile(messages: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Message> = messages
        .into_iter()
        .filter(|message| seen.insert(message.id.clone()))
        .collect();
    unique.sort_by_key(|message| message.created_at);
    unique
}
