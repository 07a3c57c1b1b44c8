use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use mercat_types::models::{Author, Message};

use crate::scanner::SafetyScanner;
use crate::store::{MessageStore, StoreError};

/// Banner shown above the compose field while the live scan matches.
pub const LIVE_BANNER_COPY: &str =
    "⚠️ ¡Cuidado! Si te piden hablar por WhatsApp o pagar por adelantado podría ser una estafa.";

/// Body of the system message appended after a flagged message.
pub const SYSTEM_WARNING_COPY: &str = "⚠️ Aviso de seguridad: este mensaje parece compartir un teléfono o un email. \
Mantened la conversación en Mercat, quedad en un sitio público y nunca pagues por adelantado sin ver el producto.";

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest message body accepted, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BannerState {
    #[default]
    Idle,
    Warning,
}

impl BannerState {
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Warning)
    }
}

/// Batch built by a send that did not complete. Retrying the same text
/// reuses it, so the store sees the same message ids again.
#[derive(Debug, Clone)]
struct PendingBatch {
    message: Message,
    warning: Option<Message>,
}

impl PendingBatch {
    fn matches(&self, text: &str, sender: Uuid) -> bool {
        self.message.content == text && self.message.sender == Author::User(sender)
    }
}

/// Compose field of one thread, owned by one client session.
#[derive(Debug, Clone)]
pub struct ComposeSession {
    thread_id: Uuid,
    text: String,
    banner: BannerState,
    pending: Option<PendingBatch>,
}

impl ComposeSession {
    pub fn new(thread_id: Uuid) -> Self {
        Self {
            thread_id,
            text: String::new(),
            banner: BannerState::Idle,
            pending: None,
        }
    }

    pub fn thread_id(&self) -> Uuid {
        self.thread_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn banner(&self) -> BannerState {
        self.banner
    }

    fn reset(&mut self) {
        self.text.clear();
        self.banner = BannerState::Idle;
        self.pending = None;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing to send: the text was empty or whitespace.
    Ignored,
    Sent {
        message: Message,
        /// System warning stored right after `message` when it was flagged.
        warning: Option<Message>,
    },
}

impl SendOutcome {
    /// Persisted messages in thread order.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Ignored => Vec::new(),
            Self::Sent { message, warning } => std::iter::once(message).chain(warning).collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("no signed-in user")]
    Unauthenticated,

    #[error("message must be at most {max} characters")]
    TooLong { max: usize },

    #[error("message could not be stored: {0}")]
    Persistence(#[from] StoreError),
}

/// Runs the safety scanner on the compose and send paths of a thread.
///
/// Warnings are advisory. A flagged message is always sent; the flag only
/// changes what gets stored alongside it.
#[derive(Clone)]
pub struct ThreadGuard {
    scanner: Arc<SafetyScanner>,
    store: Arc<dyn MessageStore>,
    send_timeout: Duration,
}

impl ThreadGuard {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            scanner: Arc::new(SafetyScanner::default()),
            store,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_scanner(mut self, scanner: SafetyScanner) -> Self {
        self.scanner = Arc::new(scanner);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn scanner(&self) -> &SafetyScanner {
        &self.scanner
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Replaces the compose text and re-evaluates the banner from scratch.
    pub fn compose(&self, session: &mut ComposeSession, text: impl Into<String>) -> BannerState {
        session.text = text.into();
        session.banner = if self.scanner.scan_live(&session.text) {
            BannerState::Warning
        } else {
            BannerState::Idle
        };
        trace!(thread_id = %session.thread_id, banner = ?session.banner, "compose scanned");
        session.banner
    }

    /// Sends the composed text. The session is cleared only once the store
    /// has accepted the message; on error it is left exactly as it was.
    ///
    /// A failed send remembers its batch. Sending the same text again reuses
    /// the message ids, so a retry after a timeout cannot store the message
    /// twice even if the first attempt reached the store.
    pub async fn send(
        &self,
        session: &mut ComposeSession,
        sender: Option<Uuid>,
    ) -> Result<SendOutcome, GuardError> {
        let thread_id = session.thread_id;
        let Some(sender) = self.validate(thread_id, &session.text, sender)? else {
            return Ok(SendOutcome::Ignored);
        };

        let batch = match session.pending.take() {
            Some(pending) if pending.matches(&session.text, sender) => {
                debug!(%thread_id, message_id = %pending.message.id, "retrying pending send");
                pending
            }
            _ => self.prepare(thread_id, &session.text, sender),
        };

        match self.persist(thread_id, &batch).await {
            Ok(()) => {
                session.reset();
                Ok(SendOutcome::Sent { message: batch.message, warning: batch.warning })
            }
            Err(e) => {
                session.pending = Some(batch);
                Err(e)
            }
        }
    }

    /// Send path for callers without a long-lived compose session.
    pub async fn send_text(
        &self,
        thread_id: Uuid,
        text: &str,
        sender: Option<Uuid>,
    ) -> Result<SendOutcome, GuardError> {
        let Some(sender) = self.validate(thread_id, text, sender)? else {
            return Ok(SendOutcome::Ignored);
        };
        let batch = self.prepare(thread_id, text, sender);
        self.persist(thread_id, &batch).await?;
        Ok(SendOutcome::Sent { message: batch.message, warning: batch.warning })
    }

    /// `None` when there is nothing to send.
    fn validate(&self, thread_id: Uuid, text: &str, sender: Option<Uuid>) -> Result<Option<Uuid>, GuardError> {
        if text.trim().is_empty() {
            debug!(%thread_id, "ignoring empty send");
            return Ok(None);
        }
        let sender = sender.ok_or(GuardError::Unauthenticated)?;
        if text.chars().count() > MAX_MESSAGE_CHARS {
            debug!(%thread_id, "rejecting oversized send");
            return Err(GuardError::TooLong { max: MAX_MESSAGE_CHARS });
        }
        Ok(Some(sender))
    }

    fn prepare(&self, thread_id: Uuid, text: &str, sender: Uuid) -> PendingBatch {
        let risk_flag = self.scanner.scan_final(text);
        PendingBatch {
            message: Message::text(thread_id, sender, text, risk_flag),
            warning: risk_flag.then(|| Message::system_warning(thread_id, SYSTEM_WARNING_COPY)),
        }
    }

    async fn persist(&self, thread_id: Uuid, batch: &PendingBatch) -> Result<(), GuardError> {
        let mut messages = vec![batch.message.clone()];
        messages.extend(batch.warning.clone());

        match tokio::time::timeout(self.send_timeout, self.store.append_all(thread_id, messages)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(%thread_id, error = %e, "send failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!(%thread_id, timeout = ?self.send_timeout, "send timed out");
                return Err(StoreError::Timeout(self.send_timeout).into());
            }
        }

        let message = &batch.message;
        if message.risk_flag {
            warn!(%thread_id, sender = %message.sender, message_id = %message.id, "flagged message sent, system warning appended");
        } else {
            info!(%thread_id, sender = %message.sender, message_id = %message.id, "message sent");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use mercat_types::models::{Author, MessageKind, Thread};

    use crate::memory::MemoryStore;

    fn open_thread(store: &MemoryStore) -> Uuid {
        let thread = Thread {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            last_message_preview: None,
            last_message_at: Utc::now(),
            has_safety_warning: false,
        };
        let id = thread.id;
        store.open_thread(thread, "Trona IKEA Antilop", None);
        id
    }

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn append(&self, _thread_id: Uuid, _message: Message) -> Result<Uuid, StoreError> {
            Err(StoreError::Backend("connection reset".into()))
        }

        async fn list(&self, _thread_id: Uuid) -> Result<Vec<Message>, StoreError> {
            Ok(vec![])
        }
    }

    struct StalledStore;

    #[async_trait]
    impl MessageStore for StalledStore {
        async fn append(&self, _thread_id: Uuid, message: Message) -> Result<Uuid, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(message.id)
        }

        async fn list(&self, _thread_id: Uuid) -> Result<Vec<Message>, StoreError> {
            Ok(vec![])
        }
    }

    /// Stores the batch, then stalls past the timeout once, like a commit
    /// whose acknowledgement arrives too late.
    struct SlowAckStore {
        inner: MemoryStore,
        stall: AtomicBool,
    }

    #[async_trait]
    impl MessageStore for SlowAckStore {
        async fn append(&self, thread_id: Uuid, message: Message) -> Result<Uuid, StoreError> {
            let mut ids = self.append_all(thread_id, vec![message]).await?;
            Ok(ids.remove(0))
        }

        async fn append_all(&self, thread_id: Uuid, messages: Vec<Message>) -> Result<Vec<Uuid>, StoreError> {
            let ids = self.inner.append_all(thread_id, messages).await?;
            if self.stall.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(ids)
        }

        async fn list(&self, thread_id: Uuid) -> Result<Vec<Message>, StoreError> {
            self.inner.list(thread_id).await
        }
    }

    #[test]
    fn banner_follows_every_keystroke() {
        let guard = ThreadGuard::new(Arc::new(FailingStore));
        let mut session = ComposeSession::new(Uuid::new_v4());

        assert_eq!(guard.compose(&mut session, "escribeme a juan"), BannerState::Idle);
        assert_eq!(guard.compose(&mut session, "escribeme a juan@"), BannerState::Warning);
        assert_eq!(guard.compose(&mut session, "escribeme a juan"), BannerState::Idle);
        assert_eq!(guard.compose(&mut session, "66612345"), BannerState::Idle);
        assert_eq!(guard.compose(&mut session, "666123456"), BannerState::Warning);
        assert_eq!(guard.compose(&mut session, "66612345"), BannerState::Idle);
        assert_eq!(session.text(), "66612345");
    }

    #[tokio::test]
    async fn risky_send_appends_warning_right_after() {
        let store = Arc::new(MemoryStore::new());
        let thread_id = open_thread(&store);
        let guard = ThreadGuard::new(store.clone());
        let sender = Uuid::new_v4();

        let mut session = ComposeSession::new(thread_id);
        guard.compose(&mut session, "llamame al 666 11 22 33");
        let outcome = guard.send(&mut session, Some(sender)).await.unwrap();

        let messages = store.list(thread_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "llamame al 666 11 22 33");
        assert_eq!(messages[0].sender, Author::User(sender));
        assert!(messages[0].risk_flag);
        assert_eq!(messages[1].kind, MessageKind::SystemWarning);
        assert_eq!(messages[1].sender, Author::System);
        assert_eq!(messages[1].content, SYSTEM_WARNING_COPY);
        assert_eq!(outcome.into_messages(), messages);

        assert_eq!(session.text(), "");
        assert_eq!(session.banner(), BannerState::Idle);
    }

    #[tokio::test]
    async fn clean_send_appends_single_message() {
        let store = Arc::new(MemoryStore::new());
        let thread_id = open_thread(&store);
        let guard = ThreadGuard::new(store.clone());

        let outcome = guard
            .send_text(thread_id, "nos vemos en la plaza", Some(Uuid::new_v4()))
            .await
            .unwrap();

        match outcome {
            SendOutcome::Sent { message, warning } => {
                assert!(!message.risk_flag);
                assert!(warning.is_none());
            }
            SendOutcome::Ignored => panic!("message should have been sent"),
        }
        let messages = store.list(thread_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::Text);
    }

    #[tokio::test]
    async fn blank_send_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let thread_id = open_thread(&store);
        let guard = ThreadGuard::new(store.clone());

        let mut session = ComposeSession::new(thread_id);
        guard.compose(&mut session, "   \n\t");
        let outcome = guard.send(&mut session, Some(Uuid::new_v4())).await.unwrap();

        assert_eq!(outcome, SendOutcome::Ignored);
        assert_eq!(session.text(), "   \n\t");
        assert!(store.list(thread_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_without_identity_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let thread_id = open_thread(&store);
        let guard = ThreadGuard::new(store.clone());

        let mut session = ComposeSession::new(thread_id);
        guard.compose(&mut session, "hola@ejemplo.com");
        let err = guard.send(&mut session, None).await.unwrap_err();

        assert!(matches!(err, GuardError::Unauthenticated));
        assert_eq!(session.text(), "hola@ejemplo.com");
        assert_eq!(session.banner(), BannerState::Warning);
        assert!(store.list(thread_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_keeps_compose_state() {
        let guard = ThreadGuard::new(Arc::new(FailingStore));
        let mut session = ComposeSession::new(Uuid::new_v4());
        guard.compose(&mut session, "mi correo es ana@gmail.com");

        let err = guard.send(&mut session, Some(Uuid::new_v4())).await.unwrap_err();

        assert!(matches!(err, GuardError::Persistence(StoreError::Backend(_))));
        assert_eq!(session.text(), "mi correo es ana@gmail.com");
        assert_eq!(session.banner(), BannerState::Warning);
    }

    #[tokio::test]
    async fn stalled_store_times_out() {
        let guard = ThreadGuard::new(Arc::new(StalledStore)).with_send_timeout(Duration::from_millis(20));
        let mut session = ComposeSession::new(Uuid::new_v4());
        guard.compose(&mut session, "hola");

        let err = guard.send(&mut session, Some(Uuid::new_v4())).await.unwrap_err();

        assert!(matches!(err, GuardError::Persistence(StoreError::Timeout(_))));
        assert_eq!(session.text(), "hola");
    }

    #[tokio::test]
    async fn unknown_thread_surfaces_as_persistence_error() {
        let store = Arc::new(MemoryStore::new());
        let guard = ThreadGuard::new(store);

        let err = guard
            .send_text(Uuid::new_v4(), "hola", Some(Uuid::new_v4()))
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::Persistence(StoreError::ThreadNotFound(_))));
    }

    #[tokio::test]
    async fn oversized_send_is_rejected_on_both_paths() {
        let store = Arc::new(MemoryStore::new());
        let thread_id = open_thread(&store);
        let guard = ThreadGuard::new(store.clone());
        let long = "a".repeat(MAX_MESSAGE_CHARS + 1);

        let mut session = ComposeSession::new(thread_id);
        guard.compose(&mut session, long.clone());
        let err = guard.send(&mut session, Some(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, GuardError::TooLong { max: MAX_MESSAGE_CHARS }));
        assert_eq!(session.text(), long);

        let err = guard.send_text(thread_id, &long, Some(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, GuardError::TooLong { .. }));
        assert!(store.list(thread_id).await.unwrap().is_empty());

        let exact = "ñ".repeat(MAX_MESSAGE_CHARS);
        assert!(guard.send_text(thread_id, &exact, Some(Uuid::new_v4())).await.is_ok());
    }

    #[tokio::test]
    async fn retry_after_late_ack_does_not_duplicate() {
        let inner = MemoryStore::new();
        let thread_id = open_thread(&inner);
        let store = Arc::new(SlowAckStore { inner, stall: AtomicBool::new(true) });
        let guard = ThreadGuard::new(store.clone()).with_send_timeout(Duration::from_millis(20));
        let sender = Uuid::new_v4();

        let mut session = ComposeSession::new(thread_id);
        guard.compose(&mut session, "llamame al 666 11 22 33");
        let err = guard.send(&mut session, Some(sender)).await.unwrap_err();
        assert!(matches!(err, GuardError::Persistence(StoreError::Timeout(_))));
        assert_eq!(session.text(), "llamame al 666 11 22 33");

        let outcome = guard.send(&mut session, Some(sender)).await.unwrap();
        let stored = store.list(thread_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(outcome.into_messages(), stored);
        assert_eq!(session.text(), "");
    }

    #[tokio::test]
    async fn edited_text_after_failure_is_a_new_message() {
        let inner = MemoryStore::new();
        let thread_id = open_thread(&inner);
        let store = Arc::new(SlowAckStore { inner, stall: AtomicBool::new(true) });
        let guard = ThreadGuard::new(store.clone()).with_send_timeout(Duration::from_millis(20));
        let sender = Uuid::new_v4();

        let mut session = ComposeSession::new(thread_id);
        guard.compose(&mut session, "hola");
        guard.send(&mut session, Some(sender)).await.unwrap_err();

        guard.compose(&mut session, "hola, ¿sigue disponible?");
        guard.send(&mut session, Some(sender)).await.unwrap();

        let contents: Vec<String> = store.list(thread_id).await.unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["hola", "hola, ¿sigue disponible?"]);
    }
}
