//! Persistence seam for the send path.
//!
//! [`ThreadGuard`](crate::guard::ThreadGuard) only ever talks to these traits,
//! so the same rules run against the in-memory store and the SQLite backend.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use mercat_types::models::{Message, ThreadSummary};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("thread {0} not found")]
    ThreadNotFound(Uuid),

    #[error("message store unavailable after {0:?}")]
    Timeout(Duration),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Ordered, append-only message storage keyed by thread.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends one message at the end of the thread.
    async fn append(&self, thread_id: Uuid, message: Message) -> Result<Uuid, StoreError>;

    /// Appends `messages` contiguously, in order. Backends with concurrent
    /// writers must override this so no other message lands in between.
    ///
    /// A message whose id is already stored is skipped, so a retried batch
    /// never shows up twice.
    async fn append_all(
        &self,
        thread_id: Uuid,
        messages: Vec<Message>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            ids.push(self.append(thread_id, message).await?);
        }
        Ok(ids)
    }

    /// All messages of the thread, ascending by insertion order.
    async fn list(&self, thread_id: Uuid) -> Result<Vec<Message>, StoreError>;
}

/// Conversation list lookups, used only for display.
#[async_trait]
pub trait ThreadDirectory: Send + Sync {
    /// Threads where `user_id` is buyer or seller, most recent activity first.
    async fn list_threads_for_user(&self, user_id: Uuid) -> Result<Vec<ThreadSummary>, StoreError>;
}
