use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use mercat_types::events::GatewayEvent;
use mercat_types::models::Message;

/// Fans gateway events out to every connected client.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection holds a receiver; thread-scoped events are filtered per connection.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// user_id -> number of open connections
    online_users: RwLock<HashMap<Uuid, usize>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// One `MessageCreate` per message, in the order given.
    pub fn publish_messages(&self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.broadcast(GatewayEvent::MessageCreate { message });
        }
    }

    /// Registers a connection. Presence is announced on the first one only.
    pub async fn user_online(&self, user_id: Uuid) {
        let first = {
            let mut online = self.inner.online_users.write().await;
            let count = online.entry(user_id).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first {
            self.broadcast(GatewayEvent::PresenceUpdate { user_id, online: true });
        }
    }

    /// Drops a connection. Presence is announced when the last one closes.
    pub async fn user_offline(&self, user_id: Uuid) {
        let last = {
            let mut online = self.inner.online_users.write().await;
            match online.get_mut(&user_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    online.remove(&user_id);
                    true
                }
                None => false,
            }
        };

        if last {
            self.broadcast(GatewayEvent::PresenceUpdate { user_id, online: false });
        }
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.online_users.read().await.keys().copied().collect()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.online_users.read().await.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn presence_is_announced_once_per_user() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let user = Uuid::new_v4();

        dispatcher.user_online(user).await;
        dispatcher.user_online(user).await;
        assert!(dispatcher.is_online(user).await);

        dispatcher.user_offline(user).await;
        assert!(dispatcher.is_online(user).await);
        dispatcher.user_offline(user).await;
        assert!(!dispatcher.is_online(user).await);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let GatewayEvent::PresenceUpdate { online, .. } = event {
                seen.push(online);
            }
        }
        assert_eq!(seen, vec![true, false]);
    }

    #[tokio::test]
    async fn offline_without_online_is_silent() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        dispatcher.user_offline(Uuid::new_v4()).await;
        assert!(rx.try_recv().is_err());
        assert!(dispatcher.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn messages_are_published_in_order() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let thread_id = Uuid::new_v4();
        let first = Message::text(thread_id, Uuid::new_v4(), "mi móvil 612345678", true);
        let second = Message::system_warning(thread_id, "aviso");

        dispatcher.publish_messages(vec![first.clone(), second.clone()]);

        for expected in [first, second] {
            match rx.try_recv().unwrap() {
                GatewayEvent::MessageCreate { message } => assert_eq!(message, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }
}
