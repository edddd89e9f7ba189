//! Per-conversation send serialisation.
//!
//! Each conversation maps to a `Semaphore(1)`. A second send on the same
//! conversation waits until the first one releases its permit; sends on
//! different conversations proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::agent::error::{AgentError, AgentResult};
use crate::agent::ids::ConversationId;

/// Lock map keyed by conversation.
#[derive(Default)]
pub struct ConversationLocks {
    locks: DashMap<ConversationId, Arc<Semaphore>>,
}

impl ConversationLocks {
    /// Create an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a conversation.
    ///
    /// The permit releases the lock when dropped.
    ///
    /// # Errors
    /// Returns an error only if the semaphore was closed.
    pub async fn acquire(&self, conversation_id: &ConversationId) -> AgentResult<OwnedSemaphorePermit> {
        let semaphore = self
            .locks
            .entry(conversation_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();

        semaphore
            .acquire_owned()
            .await
            .map_err(|_| AgentError::TransientAction("conversation lock closed".to_string()))
    }

    /// Number of tracked conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no conversation is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop locks nobody holds or waits for.
    pub fn prune_idle(&self) {
        self.locks.retain(|_, semaphore| {
            Arc::strong_count(semaphore) > 1 || semaphore.available_permits() == 0
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sequential_access() {
        let locks = ConversationLocks::new();
        let id = ConversationId::new("thread_1");

        let first = locks.acquire(&id).await.unwrap();
        drop(first);
        let second = locks.acquire(&id).await.unwrap();
        drop(second);
    }

    #[tokio::test]
    async fn test_different_conversations_are_independent() {
        let locks = ConversationLocks::new();
        let a = locks.acquire(&ConversationId::new("thread_a")).await.unwrap();
        let b = locks.acquire(&ConversationId::new("thread_b")).await.unwrap();
        assert_eq!(locks.len(), 2);
        drop((a, b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_waits() {
        let locks = Arc::new(ConversationLocks::new());
        let id = ConversationId::new("thread_1");
        let held = locks.acquire(&id).await.unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move { locks.acquire(&id).await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_prune_idle() {
        let locks = ConversationLocks::new();
        let id = ConversationId::new("thread_1");
        let held = locks.acquire(&id).await.unwrap();
        locks.acquire(&ConversationId::new("thread_2")).await.map(drop).unwrap();

        locks.prune_idle();
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.prune_idle();
        assert!(locks.is_empty());
    }
}
