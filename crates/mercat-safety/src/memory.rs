//! Process-local message store.
//!
//! Owns every thread and message it knows about and notifies subscribers on
//! each append. Build one per process and share it behind an `Arc`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use mercat_types::models::{Message, MessageKind, Thread, ThreadSummary};

use crate::store::{MessageStore, StoreError, ThreadDirectory};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum StoreEvent {
    MessageAppended(Message),
}

struct ThreadEntry {
    thread: Thread,
    listing_title: String,
    listing_image: Option<String>,
    messages: Vec<Message>,
}

struct UserEntry {
    name: String,
    avatar: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    threads: HashMap<Uuid, ThreadEntry>,
    users: HashMap<Uuid, UserEntry>,
}

pub struct MemoryStore {
    state: RwLock<MemoryState>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(MemoryState::default()),
            events,
        }
    }

    /// Receive a [`StoreEvent`] for every message appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn register_user(&self, id: Uuid, name: impl Into<String>, avatar: Option<String>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.users.insert(id, UserEntry { name: name.into(), avatar });
    }

    /// Registers a thread. Re-opening an existing thread keeps its messages.
    pub fn open_thread(&self, thread: Thread, listing_title: impl Into<String>, listing_image: Option<String>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.threads.entry(thread.id).or_insert_with(|| ThreadEntry {
            thread,
            listing_title: listing_title.into(),
            listing_image,
            messages: Vec::new(),
        });
    }

    pub fn thread(&self, thread_id: Uuid) -> Option<Thread> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.threads.get(&thread_id).map(|entry| entry.thread.clone())
    }

    fn notify(&self, messages: &[Message]) {
        for message in messages {
            // No receivers is fine.
            let _ = self.events.send(StoreEvent::MessageAppended(message.clone()));
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, thread_id: Uuid, message: Message) -> Result<Uuid, StoreError> {
        let mut ids = self.append_all(thread_id, vec![message]).await?;
        ids.pop().ok_or_else(|| StoreError::Backend("append produced no id".into()))
    }

    async fn append_all(
        &self,
        thread_id: Uuid,
        messages: Vec<Message>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let fresh = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let entry = state
                .threads
                .get_mut(&thread_id)
                .ok_or(StoreError::ThreadNotFound(thread_id))?;

            let fresh: Vec<Message> = messages
                .iter()
                .filter(|m| !entry.messages.iter().any(|stored| stored.id == m.id))
                .cloned()
                .collect();

            for message in &fresh {
                if message.kind == MessageKind::Text {
                    entry.thread.last_message_preview = Some(message.content.clone());
                    entry.thread.last_message_at = message.created_at;
                }
                if message.risk_flag || message.is_system_warning() {
                    entry.thread.has_safety_warning = true;
                }
            }
            entry.messages.extend(fresh.iter().cloned());
            debug!(%thread_id, appended = fresh.len(), total = entry.messages.len(), "memory store append");
            fresh
        };

        self.notify(&fresh);
        Ok(messages.iter().map(|m| m.id).collect())
    }

    async fn list(&self, thread_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .threads
            .get(&thread_id)
            .map(|entry| entry.messages.clone())
            .ok_or(StoreError::ThreadNotFound(thread_id))
    }
}

#[async_trait]
impl ThreadDirectory for MemoryStore {
    async fn list_threads_for_user(&self, user_id: Uuid) -> Result<Vec<ThreadSummary>, StoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        let mut summaries: Vec<ThreadSummary> = state
            .threads
            .values()
            .filter(|entry| entry.thread.is_participant(user_id))
            .map(|entry| {
                let counterpart_id = entry.thread.counterpart_of(user_id);
                let counterpart = state.users.get(&counterpart_id);
                ThreadSummary {
                    thread: entry.thread.clone(),
                    counterpart_id,
                    counterpart_name: counterpart
                        .map(|u| u.name.clone())
                        .unwrap_or_else(|| "Unknown".to_string()),
                    counterpart_avatar: counterpart.and_then(|u| u.avatar.clone()),
                    listing_title: entry.listing_title.clone(),
                    listing_image: entry.listing_image.clone(),
                }
            })
            .collect();

        summaries.sort_by(|a, b| b.thread.last_message_at.cmp(&a.thread.last_message_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn thread_between(buyer_id: Uuid, seller_id: Uuid) -> Thread {
        Thread {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            buyer_id,
            seller_id,
            last_message_preview: None,
            last_message_at: Utc::now() - Duration::hours(1),
            has_safety_warning: false,
        }
    }

    #[tokio::test]
    async fn append_preserves_insertion_order() {
        let store = MemoryStore::new();
        let thread = thread_between(Uuid::new_v4(), Uuid::new_v4());
        let thread_id = thread.id;
        store.open_thread(thread.clone(), "Mesita de noche", None);

        for text in ["uno", "dos", "tres"] {
            store
                .append(thread_id, Message::text(thread_id, thread.buyer_id, text, false))
                .await
                .unwrap();
        }

        let contents: Vec<String> = store.list(thread_id).await.unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["uno", "dos", "tres"]);
    }

    #[tokio::test]
    async fn subscribers_see_every_append() {
        let store = MemoryStore::new();
        let thread = thread_between(Uuid::new_v4(), Uuid::new_v4());
        let thread_id = thread.id;
        store.open_thread(thread.clone(), "Nintendo Switch Lite", None);
        let mut rx = store.subscribe();

        let batch = vec![
            Message::text(thread_id, thread.buyer_id, "666123456", true),
            Message::system_warning(thread_id, "aviso"),
        ];
        store.append_all(thread_id, batch).await.unwrap();

        let StoreEvent::MessageAppended(first) = rx.recv().await.unwrap();
        let StoreEvent::MessageAppended(second) = rx.recv().await.unwrap();
        assert_eq!(first.content, "666123456");
        assert!(second.is_system_warning());
    }

    #[tokio::test]
    async fn preview_tracks_user_text_only() {
        let store = MemoryStore::new();
        let thread = thread_between(Uuid::new_v4(), Uuid::new_v4());
        let thread_id = thread.id;
        store.open_thread(thread.clone(), "Trona", None);

        store
            .append_all(
                thread_id,
                vec![
                    Message::text(thread_id, thread.seller_id, "llámame al 666123456", true),
                    Message::system_warning(thread_id, "aviso"),
                ],
            )
            .await
            .unwrap();

        let updated = store.thread(thread_id).unwrap();
        assert_eq!(updated.last_message_preview.as_deref(), Some("llámame al 666123456"));
        assert!(updated.has_safety_warning);
    }

    #[tokio::test]
    async fn directory_lists_threads_newest_first() {
        let store = MemoryStore::new();
        let me = Uuid::new_v4();
        let laura = Uuid::new_v4();
        let jordi = Uuid::new_v4();
        store.register_user(laura, "Laura G.", None);
        store.register_user(jordi, "Jordi R.", None);

        let older = thread_between(me, laura);
        let mut newer = thread_between(me, jordi);
        newer.last_message_at = Utc::now();
        let unrelated = thread_between(laura, jordi);
        store.open_thread(older.clone(), "Trona", None);
        store.open_thread(newer.clone(), "Switch", Some("https://picsum.photos/seed/switch/100".into()));
        store.open_thread(unrelated, "Mesita", None);

        let summaries = store.list_threads_for_user(me).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].thread.id, newer.id);
        assert_eq!(summaries[0].counterpart_name, "Jordi R.");
        assert_eq!(summaries[1].counterpart_name, "Laura G.");
        assert_eq!(summaries[1].listing_title, "Trona");
    }

    #[tokio::test]
    async fn re_appending_the_same_ids_is_a_no_op() {
        let store = MemoryStore::new();
        let thread = thread_between(Uuid::new_v4(), Uuid::new_v4());
        let thread_id = thread.id;
        store.open_thread(thread.clone(), "Trona", None);
        let mut rx = store.subscribe();

        let batch = vec![
            Message::text(thread_id, thread.buyer_id, "666123456", true),
            Message::system_warning(thread_id, "aviso"),
        ];
        store.append_all(thread_id, batch.clone()).await.unwrap();
        let ids = store.append_all(thread_id, batch.clone()).await.unwrap();

        assert_eq!(ids, vec![batch[0].id, batch[1].id]);
        assert_eq!(store.list(thread_id).await.unwrap(), batch);
        assert!(rx.recv().await.is_ok());
        assert!(rx.recv().await.is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_thread_is_an_error() {
        let store = MemoryStore::new();
        let err = store.list(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::ThreadNotFound(_)));
    }
}
