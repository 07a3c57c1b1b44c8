use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::error;
use uuid::Uuid;

use mercat_safety::store::{MessageStore, StoreError, ThreadDirectory};
use mercat_types::models::{Message, ThreadSummary};

use crate::Database;
use crate::models::MessageRow;

/// [`MessageStore`] and [`ThreadDirectory`] over the SQLite database.
/// Every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db.as_ref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StoreError::Backend(e.to_string())
            })?
            .map_err(|e| StoreError::Backend(format!("{:#}", e)))
    }
}

/// Sets its flag when dropped before [`AbandonOnDrop::disarm`].
#[derive(Default)]
struct AbandonOnDrop(Arc<AtomicBool>, bool);

impl AbandonOnDrop {
    fn disarm(mut self) {
        self.1 = true;
    }
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        if !self.1 {
            self.0.store(true, Ordering::Release);
        }
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, thread_id: Uuid, message: Message) -> Result<Uuid, StoreError> {
        let mut ids = self.append_all(thread_id, vec![message]).await?;
        ids.pop().ok_or_else(|| StoreError::Backend("append produced no id".into()))
    }

    async fn append_all(
        &self,
        thread_id: Uuid,
        messages: Vec<Message>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let rows: Vec<MessageRow> = messages.iter().map(MessageRow::from).collect();
        let tid = thread_id.to_string();

        // The blocking write outlives this future if the caller gives up
        // (e.g. a timeout). The flag makes it roll back instead of commit.
        let abandon = AbandonOnDrop::default();
        let cancelled = abandon.0.clone();
        let inserted = self
            .blocking(move |db| db.insert_messages(&tid, &rows, &cancelled))
            .await?;
        abandon.disarm();
        if !inserted {
            return Err(StoreError::ThreadNotFound(thread_id));
        }
        Ok(ids)
    }

    async fn list(&self, thread_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let tid = thread_id.to_string();
        self.blocking(move |db| {
            if db.get_thread(&tid)?.is_none() {
                return Ok(None);
            }
            let messages = db
                .get_messages(&tid)?
                .into_iter()
                .map(Message::try_from)
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(Some(messages))
        })
        .await?
        .ok_or(StoreError::ThreadNotFound(thread_id))
    }
}

#[async_trait]
impl ThreadDirectory for SqliteStore {
    async fn list_threads_for_user(&self, user_id: Uuid) -> Result<Vec<ThreadSummary>, StoreError> {
        let uid = user_id.to_string();
        self.blocking(move |db| {
            db.get_thread_summaries(&uid)?
                .into_iter()
                .map(|row| row.into_summary(user_id))
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format_ts;
    use crate::models::ListingRow;
    use chrono::Utc;
    use mercat_safety::{ComposeSession, GuardError, ThreadGuard};
    use mercat_types::models::{Author, MessageKind};
    use std::time::Duration;

    struct Fixture {
        store: SqliteStore,
        thread_id: Uuid,
        buyer: Uuid,
        seller: Uuid,
    }

    fn fixture(path: &std::path::Path) -> Fixture {
        let db = Arc::new(Database::open(path).unwrap());
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let now = format_ts(Utc::now());
        db.create_user(&buyer.to_string(), "Marc T.", "marc@terrassa.cat", "h", "Terrassa", &now).unwrap();
        db.create_user(&seller.to_string(), "Laura G.", "laura@gmail.com", "h", "Terrassa", &now).unwrap();

        let listing_id = Uuid::new_v4().to_string();
        db.insert_listing(&ListingRow {
            id: listing_id.clone(),
            seller_id: seller.to_string(),
            seller_name: String::new(),
            seller_verified: false,
            title: "Trona IKEA Antilop".into(),
            description: "Incluye la bandeja".into(),
            price_cents: 1000,
            currency: "EUR".into(),
            category: "Niños y Bebés".into(),
            condition: "used".into(),
            neighborhood: "Ca n'Aurell".into(),
            images: r#"["https://picsum.photos/seed/trona/400/300"]"#.into(),
            status: "active".into(),
            likes: 4,
            created_at: now.clone(),
        })
        .unwrap();

        let thread_id = Uuid::new_v4();
        db.get_or_create_thread(&thread_id.to_string(), &listing_id, &buyer.to_string(), &seller.to_string(), &now)
            .unwrap();

        Fixture { store: SqliteStore::new(db), thread_id, buyer, seller }
    }

    #[tokio::test]
    async fn guard_over_sqlite_stores_warning_after_flagged_message() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir.path().join("mercat.db"));
        let guard = ThreadGuard::new(Arc::new(f.store.clone()));

        let mut session = ComposeSession::new(f.thread_id);
        guard.compose(&mut session, "llamame al 666 11 22 33");
        guard.send(&mut session, Some(f.buyer)).await.unwrap();
        guard.compose(&mut session, "nos vemos en la plaza");
        guard.send(&mut session, Some(f.seller)).await.unwrap();

        let messages = f.store.list(f.thread_id).await.unwrap();
        let kinds: Vec<(MessageKind, bool)> = messages.iter().map(|m| (m.kind, m.risk_flag)).collect();
        assert_eq!(
            kinds,
            vec![
                (MessageKind::Text, true),
                (MessageKind::SystemWarning, false),
                (MessageKind::Text, false),
            ]
        );
        assert_eq!(messages[0].sender, Author::User(f.buyer));
        assert_eq!(messages[1].sender, Author::System);
        assert_eq!(messages[2].sender, Author::User(f.seller));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_send_is_rolled_back_and_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir.path().join("mercat.db"));
        let guard = ThreadGuard::new(Arc::new(f.store.clone())).with_send_timeout(Duration::from_millis(50));

        // Hold the connection well past the send timeout.
        let db = f.store.database().clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            db.with_conn(|_| {
                let _ = locked_tx.send(());
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap();
        });
        locked_rx.recv().unwrap();

        let mut session = ComposeSession::new(f.thread_id);
        guard.compose(&mut session, "llamame al 666 11 22 33");
        let err = guard.send(&mut session, Some(f.buyer)).await.unwrap_err();
        assert!(matches!(err, GuardError::Persistence(StoreError::Timeout(_))));
        assert_eq!(session.text(), "llamame al 666 11 22 33");

        holder.join().unwrap();
        // Give the abandoned write its turn at the lock.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(f.store.list(f.thread_id).await.unwrap().is_empty());

        let outcome = guard.send(&mut session, Some(f.buyer)).await.unwrap();
        let stored = f.store.list(f.thread_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(outcome.into_messages(), stored);
    }

    #[tokio::test]
    async fn appending_the_same_batch_twice_stores_it_once() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir.path().join("mercat.db"));
        let batch = vec![
            Message::text(f.thread_id, f.buyer, "666123456", true),
            Message::system_warning(f.thread_id, "aviso"),
        ];

        f.store.append_all(f.thread_id, batch.clone()).await.unwrap();
        f.store.append_all(f.thread_id, batch.clone()).await.unwrap();

        assert_eq!(f.store.list(f.thread_id).await.unwrap(), batch);
    }

    #[tokio::test]
    async fn messages_round_trip_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir.path().join("mercat.db"));

        let original = Message::text(f.thread_id, f.buyer, "¿Te va bien mañana en Vallparadís?", false);
        f.store.append(f.thread_id, original.clone()).await.unwrap();

        let stored = f.store.list(f.thread_id).await.unwrap();
        assert_eq!(stored, vec![original]);
    }

    #[tokio::test]
    async fn unknown_thread_maps_to_thread_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir.path().join("mercat.db"));
        let missing = Uuid::new_v4();

        let err = f
            .store
            .append(missing, Message::text(missing, f.buyer, "hola", false))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ThreadNotFound(id) if id == missing));
        assert!(matches!(f.store.list(missing).await, Err(StoreError::ThreadNotFound(_))));
    }

    #[tokio::test]
    async fn directory_reports_counterpart_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir.path().join("mercat.db"));

        let for_buyer = f.store.list_threads_for_user(f.buyer).await.unwrap();
        assert_eq!(for_buyer.len(), 1);
        assert_eq!(for_buyer[0].counterpart_id, f.seller);
        assert_eq!(for_buyer[0].counterpart_name, "Laura G.");
        assert_eq!(for_buyer[0].listing_image.as_deref(), Some("https://picsum.photos/seed/trona/400/300"));

        let for_seller = f.store.list_threads_for_user(f.seller).await.unwrap();
        assert_eq!(for_seller[0].counterpart_name, "Marc T.");

        assert!(f.store.list_threads_for_user(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
