use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use mercat_db::Database;
use mercat_safety::{ComposeSession, SendOutcome, ThreadGuard};
use mercat_types::events::{GatewayCommand, GatewayEvent};
use mercat_types::models::Thread;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything a connection needs from the rest of the server.
#[derive(Clone)]
pub struct Gateway {
    pub dispatcher: Dispatcher,
    pub guard: ThreadGuard,
    pub db: Arc<Database>,
}

impl Gateway {
    async fn is_participant(&self, thread_id: Uuid, user_id: Uuid) -> bool {
        let db = self.db.clone();
        let tid = thread_id.to_string();
        match tokio::task::spawn_blocking(move || db.get_thread(&tid)).await {
            Ok(Ok(Some(row))) => match Thread::try_from(row) {
                Ok(thread) => thread.is_participant(user_id),
                Err(e) => {
                    warn!("thread {} is unreadable: {:#}", thread_id, e);
                    false
                }
            },
            Ok(Ok(None)) => false,
            Ok(Err(e)) => {
                warn!("membership lookup for thread {} failed: {:#}", thread_id, e);
                false
            }
            Err(e) => {
                warn!("spawn_blocking join error: {}", e);
                false
            }
        }
    }
}

/// Per-connection state: one compose session per thread the client typed in,
/// and the threads it wants events for.
pub struct ConnectionState {
    user_id: Uuid,
    sessions: HashMap<Uuid, ComposeSession>,
    members: HashSet<Uuid>,
    subscribed: Arc<RwLock<HashSet<Uuid>>>,
}

impl ConnectionState {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            sessions: HashMap::new(),
            members: HashSet::new(),
            subscribed: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn session(&self, thread_id: Uuid) -> Option<&ComposeSession> {
        self.sessions.get(&thread_id)
    }

    /// Whether a broadcast event should reach this client.
    pub fn wants(&self, event: &GatewayEvent) -> bool {
        forwards(&self.subscribed, event)
    }

    async fn ensure_member(&mut self, gateway: &Gateway, thread_id: Uuid) -> bool {
        if self.members.contains(&thread_id) {
            return true;
        }
        if gateway.is_participant(thread_id, self.user_id).await {
            self.members.insert(thread_id);
            true
        } else {
            warn!("user {} is not a participant of thread {}", self.user_id, thread_id);
            false
        }
    }

    /// Applies one client command. Returns the events meant only for this client.
    pub async fn handle_command(&mut self, gateway: &Gateway, cmd: GatewayCommand) -> Vec<GatewayEvent> {
        match cmd {
            GatewayCommand::Subscribe { thread_ids } => {
                let mut allowed = HashSet::new();
                for thread_id in thread_ids {
                    if self.ensure_member(gateway, thread_id).await {
                        allowed.insert(thread_id);
                    }
                }
                info!("user {} subscribed to {} threads", self.user_id, allowed.len());
                *self.subscribed.write().unwrap_or_else(PoisonError::into_inner) = allowed;
                Vec::new()
            }

            GatewayCommand::ComposeUpdate { thread_id, text } => {
                if !self.ensure_member(gateway, thread_id).await {
                    return Vec::new();
                }
                let (session, first) = match self.sessions.entry(thread_id) {
                    Entry::Occupied(e) => (e.into_mut(), false),
                    Entry::Vacant(e) => (e.insert(ComposeSession::new(thread_id)), true),
                };
                let before = session.banner();
                let after = gateway.guard.compose(session, text);
                if first || before != after {
                    vec![GatewayEvent::RiskBanner { thread_id, visible: after.is_visible() }]
                } else {
                    Vec::new()
                }
            }

            GatewayCommand::SendMessage { thread_id } => {
                let Some(session) = self.sessions.get_mut(&thread_id) else {
                    debug!("send on thread {} with nothing composed", thread_id);
                    return Vec::new();
                };
                let banner_was_visible = session.banner().is_visible();

                match gateway.guard.send(session, Some(self.user_id)).await {
                    Ok(outcome @ SendOutcome::Sent { .. }) => {
                        gateway.dispatcher.publish_messages(outcome.into_messages());
                        if banner_was_visible {
                            vec![GatewayEvent::RiskBanner { thread_id, visible: false }]
                        } else {
                            Vec::new()
                        }
                    }
                    Ok(SendOutcome::Ignored) => Vec::new(),
                    Err(e) => vec![GatewayEvent::SendFailed { thread_id, reason: e.to_string() }],
                }
            }
        }
    }
}

fn forwards(subscribed: &RwLock<HashSet<Uuid>>, event: &GatewayEvent) -> bool {
    match event.thread_id() {
        Some(thread_id) => subscribed.read().unwrap_or_else(PoisonError::into_inner).contains(&thread_id),
        None => true,
    }
}

fn encode(event: &GatewayEvent) -> Option<WsMessage> {
    match serde_json::to_string(event) {
        Ok(json) => Some(WsMessage::Text(json.into())),
        Err(e) => {
            warn!("failed to encode gateway event: {}", e);
            None
        }
    }
}

/// Handles a WebSocket whose token was already validated at the HTTP upgrade.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, user_id: Uuid, name: String) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", name, user_id);

    let ready = GatewayEvent::Ready { user_id, name: name.clone() };
    let Some(frame) = encode(&ready) else { return };
    if sender.send(frame).await.is_err() {
        return;
    }

    for uid in gateway.dispatcher.online_users().await {
        let Some(frame) = encode(&GatewayEvent::PresenceUpdate { user_id: uid, online: true }) else {
            continue;
        };
        if sender.send(frame).await.is_err() {
            return;
        }
    }

    // Subscribe before announcing ourselves so no event between the two is lost.
    let mut broadcast_rx = gateway.dispatcher.subscribe();
    gateway.dispatcher.user_online(user_id).await;

    let mut state = ConnectionState::new(user_id);
    let send_subscriptions = state.subscribed.clone();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !forwards(&send_subscriptions, &event) {
                        continue;
                    }

                    let Some(frame) = encode(&event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(event) = reply else { break };
                    let Some(frame) = encode(&event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_gateway = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        // Commands run one at a time, so a thread never has two sends in flight.
        while let Some(Ok(frame)) = receiver.next().await {
            match frame {
                WsMessage::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        trace!("user {} command {:?}", state.user_id(), cmd);
                        for event in state.handle_command(&recv_gateway, cmd).await {
                            if reply_tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "user {} bad command: {} -- raw: {}",
                            state.user_id(),
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.dispatcher.user_offline(user_id).await;
    info!("{} ({}) disconnected from gateway", name, user_id);
}
