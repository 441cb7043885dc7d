//! Sync coordinator
//!
//! Owns the local state (`MessageStore`, `ConversationIndex`,
//! `TypingTracker`) and keeps it consistent with the server:
//!
//! - user actions apply an optimistic local change, then reconcile with
//!   the REST response
//! - push events are filtered (our own echoes are dropped) and applied
//! - every new push connection triggers a full resync, because events
//!   missed while disconnected are never redelivered; a failed one is
//!   retried on a backoff timer while the connection stays up
//!
//! State machine: `uninitialized → syncing → live ⇄ degraded → exhausted`.
//! `exhausted` is only left through `retry_connection`.
//!
//! All push events and connection changes are handled by one worker task,
//! in order. Local state is only ever locked between suspension points.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::connection::{ConnectionManager, ConnectionState, ConnectionStatus, Halt};
use super::dispatcher::EventDispatcher;
use super::transport::{Connector, EventName, InboundEvent, OutboundEvent};
use super::ws::WsConnector;
use crate::api::{with_retry, ChatApi, HttpChatApi, RequestPolicy};
use crate::config::Config;
use crate::error::{SendFailure, SyncError, SyncResult};
use crate::models::{
    Conversation, ConversationId, Message, MessageKey, OptimisticMessage, TempId, UserId,
};
use crate::session::{CredentialSource, StaticCredentials};
use crate::store::{AppendOutcome, ConversationIndex, MessageEntry, MessageStore};
use crate::typing::TypingTracker;

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No session yet (or logged out)
    Uninitialized,
    /// Initial fetch done or in flight, push channel not yet up
    Syncing,
    /// Push channel connected and state resynced
    Live,
    /// Push channel lost; REST still works
    Degraded,
    /// Gave up reconnecting; needs `retry_connection`
    Exhausted,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::Syncing => "syncing",
            SyncState::Live => "live",
            SyncState::Degraded => "degraded",
            SyncState::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Change notifications for presentation layers
///
/// These say *what* changed; re-read the accessors for the new values.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncUpdate {
    StateChanged(SyncState),
    ConnectionChanged(ConnectionState),
    ConversationsChanged,
    MessagesChanged(ConversationId),
    TypingChanged {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    SendFailed {
        conversation_id: ConversationId,
        temp_id: TempId,
        reason: String,
    },
    SessionEnded(String),
}

#[derive(Debug, Default)]
struct LocalState {
    messages: MessageStore,
    conversations: ConversationIndex,
}

impl LocalState {
    /// Point the conversation at its newest entry if that is newer
    fn touch_latest(&mut self, conversation_id: &ConversationId) -> bool {
        match self.messages.latest(conversation_id).cloned() {
            Some(latest) => self.conversations.touch(conversation_id, &latest),
            None => self.conversations.contains(conversation_id),
        }
    }
}

struct Inner {
    api: Arc<dyn ChatApi>,
    credentials: Arc<dyn CredentialSource>,
    connection: ConnectionManager,
    typing: TypingTracker,
    requests: RequestPolicy,
    page_size: u32,
    keep_failed_sends: bool,
    local: Mutex<LocalState>,
    local_user: Mutex<Option<UserId>>,
    active: Mutex<Option<ConversationId>>,
    state: watch::Sender<SyncState>,
    updates: broadcast::Sender<SyncUpdate>,
    /// Bumped on logout; results fetched under an older epoch are dropped
    epoch: AtomicU64,
    /// Whether the conversation list was fetched at least once this session
    synced: AtomicBool,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<InboundEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps local chat state in sync with the server
pub struct SyncCoordinator {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    pub fn new(
        config: &Config,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        // Handlers are registered once; the dispatcher wires them to each
        // new connection and only forwards events from the live one
        let dispatcher = Arc::new(EventDispatcher::new());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        for name in EventName::ALL {
            let tx = inbound_tx.clone();
            dispatcher.on(name, move |event| {
                let _ = tx.send(event.clone());
            });
        }

        let connection = ConnectionManager::new(
            connector,
            Arc::clone(&credentials),
            dispatcher,
            config.reconnect_policy(),
        );
        let (state, _) = watch::channel(SyncState::Uninitialized);
        let (updates, _) = broadcast::channel(256);

        Self {
            inner: Arc::new(Inner {
                api,
                credentials,
                connection,
                typing: TypingTracker::new(config.typing_ttl()),
                requests: config.request_policy(),
                page_size: config.message_page_size.max(1),
                keep_failed_sends: config.keep_failed_sends,
                local: Mutex::new(LocalState::default()),
                local_user: Mutex::new(None),
                active: Mutex::new(None),
                state,
                updates,
                epoch: AtomicU64::new(0),
                synced: AtomicBool::new(false),
                inbound: Mutex::new(Some(inbound_rx)),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Build with the HTTP and WebSocket collaborators
    pub fn from_config(config: &Config) -> SyncResult<Self> {
        let credentials: Arc<dyn CredentialSource> =
            Arc::new(StaticCredentials::from_config(config));
        let api = HttpChatApi::new(
            &config.api_url,
            Arc::clone(&credentials),
            &config.request_policy(),
        )?;
        let connector = WsConnector::new(&config.push_url);
        Ok(Self::new(
            config,
            Arc::new(api),
            Arc::new(connector),
            credentials,
        ))
    }

    /// Begin the session: fetch conversations and open the push channel
    ///
    /// Fails with `SyncError::Auth` if no credential is available. A
    /// transient failure of the initial fetch is logged; the list is
    /// fetched again once the push channel connects. Calling it on a
    /// running session is a no-op.
    pub async fn start(&self) -> SyncResult<()> {
        if self.state() != SyncState::Uninitialized {
            debug!("Sync already started");
            return Ok(());
        }

        let session = self
            .inner
            .credentials
            .current()
            .ok_or_else(|| SyncError::Auth("not signed in".to_string()))?;
        info!("Starting sync for {}", session.user_id());
        *lock(&self.inner.local_user) = Some(session.user_id().clone());
        self.inner.set_state(SyncState::Syncing);
        self.spawn_worker();

        match self.inner.resync().await {
            Ok(()) => {}
            Err(e) if e.is_auth() => {
                self.inner.end_session(e.to_string()).await;
                return Err(e);
            }
            Err(e) => warn!("Initial sync failed: {}", e),
        }

        if let Err(e) = self.inner.connection.connect() {
            self.inner.end_session(e.to_string()).await;
            return Err(e);
        }
        Ok(())
    }

    fn spawn_worker(&self) {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }
        let Some(inbound) = lock(&self.inner.inbound).take() else {
            warn!("Event worker already consumed its inbox");
            return;
        };
        *worker = Some(tokio::spawn(run_worker(Arc::clone(&self.inner), inbound)));
    }

    /// Send a message: optimistic insert, REST create, then promote
    ///
    /// Never retried automatically (creating a message is not
    /// idempotent). On failure the text comes back in the `SendFailure`.
    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> Result<Message, SendFailure> {
        let failure = |temp_id: Option<TempId>, source: SyncError| SendFailure {
            temp_id,
            conversation_id: conversation_id.clone(),
            content: content.to_string(),
            source,
        };

        let Some(me) = self.local_user() else {
            return Err(failure(
                None,
                SyncError::Auth("not signed in".to_string()),
            ));
        };

        let shadow = OptimisticMessage::new(conversation_id.clone(), me, content);
        let temp_id = shadow.temp_id.clone();
        let local_key = MessageKey::Local(temp_id.clone());
        {
            let mut local = lock(&self.inner.local);
            local.messages.append_optimistic(conversation_id, shadow);
            if let Some(entry) = local.messages.get(&local_key).cloned() {
                local.conversations.touch(conversation_id, &entry);
            }
        }
        self.inner.publish_messages(conversation_id);

        let epoch = self.inner.epoch();
        match self
            .inner
            .api
            .create_message(conversation_id, content)
            .await
        {
            Ok(confirmed) => {
                if self.inner.epoch() != epoch {
                    return Ok(confirmed);
                }
                {
                    let mut local = lock(&self.inner.local);
                    let outcome = local.messages.promote(&temp_id, confirmed.clone());
                    debug!("Promoted {} to {} ({:?})", temp_id, confirmed.id, outcome);
                    local.touch_latest(conversation_id);
                }
                self.inner.publish_messages(conversation_id);
                Ok(confirmed)
            }
            Err(e) => {
                warn!("Send to {} failed: {}", conversation_id, e);
                {
                    let mut local = lock(&self.inner.local);
                    if self.inner.keep_failed_sends {
                        local.messages.mark_failed(&temp_id);
                    } else {
                        local.messages.remove(&temp_id);
                        let fallback = local.messages.latest(conversation_id).cloned();
                        local
                            .conversations
                            .rewind(conversation_id, &local_key, fallback.as_ref());
                    }
                }
                self.inner.publish_messages(conversation_id);
                self.inner.publish(SyncUpdate::SendFailed {
                    conversation_id: conversation_id.clone(),
                    temp_id: temp_id.clone(),
                    reason: e.to_string(),
                });
                if e.is_auth() {
                    self.inner.end_session(e.to_string()).await;
                }
                Err(failure(Some(temp_id), e))
            }
        }
    }

    /// Drop a failed send kept by `keep_failed_sends`
    pub fn discard_failed(&self, temp_id: &TempId) -> bool {
        let key = MessageKey::Local(temp_id.clone());
        let removed = {
            let mut local = lock(&self.inner.local);
            match local.messages.get(&key) {
                Some(entry) if !entry.is_pending() => {}
                _ => return false,
            }
            let removed = local.messages.remove(temp_id);
            if let Some(ref entry) = removed {
                let fallback = local.messages.latest(&entry.conversation_id).cloned();
                local
                    .conversations
                    .rewind(&entry.conversation_id, &key, fallback.as_ref());
            }
            removed
        };

        match removed {
            Some(entry) => {
                self.inner.publish_messages(&entry.conversation_id);
                true
            }
            None => false,
        }
    }

    /// Get or create the direct conversation with `participant`
    pub async fn create_conversation(&self, participant: &UserId) -> SyncResult<Conversation> {
        let me = self
            .local_user()
            .ok_or_else(|| SyncError::Auth("not signed in".to_string()))?;
        if participant == &me {
            return Err(SyncError::Protocol(
                "cannot start a conversation with yourself".to_string(),
            ));
        }

        let existing = lock(&self.inner.local)
            .conversations
            .find_direct(&me, participant)
            .cloned();
        if let Some(existing) = existing {
            debug!("Conversation with {} already exists: {}", participant, existing.id);
            return Ok(existing);
        }

        let epoch = self.inner.epoch();
        let result = with_retry(&self.inner.requests, "create conversation", || {
            self.inner.api.create_conversation(participant)
        })
        .await;
        let conversation = self.inner.guard(result).await?;

        if self.inner.epoch() == epoch {
            self.inner.apply_conversation(conversation.clone());
        }
        Ok(conversation)
    }

    /// Open a conversation: join its room and load the newest page
    ///
    /// `None` closes the active conversation.
    pub async fn set_active_conversation(
        &self,
        conversation_id: Option<&ConversationId>,
    ) -> SyncResult<()> {
        *lock(&self.inner.active) = conversation_id.cloned();
        let Some(conversation_id) = conversation_id else {
            return Ok(());
        };

        self.inner.join(conversation_id);
        self.inner.load_page(conversation_id, 1).await.map(|_| ())
    }

    /// Fetch an older page of messages; returns how many entries changed
    pub async fn load_older_messages(
        &self,
        conversation_id: &ConversationId,
        page: u32,
    ) -> SyncResult<usize> {
        self.inner.load_page(conversation_id, page.max(1)).await
    }

    /// Tell the other participants we are (not) typing
    ///
    /// Best effort: fails with `TransientNetwork` while offline.
    pub fn set_typing_status(
        &self,
        conversation_id: &ConversationId,
        is_typing: bool,
    ) -> SyncResult<()> {
        let user_id = self
            .local_user()
            .ok_or_else(|| SyncError::Auth("not signed in".to_string()))?;
        if let Some(failure) = self.connection_failure() {
            return Err(failure);
        }
        self.inner.connection.emit(OutboundEvent::Typing {
            conversation_id: conversation_id.clone(),
            is_typing,
            user_id,
        })
    }

    /// User-triggered reconnect; the only way out of `exhausted`
    pub fn retry_connection(&self) -> SyncResult<()> {
        match self.state() {
            SyncState::Uninitialized => {
                return Err(SyncError::Auth("no active session".to_string()));
            }
            SyncState::Exhausted => {
                info!("Manual reconnect requested");
                self.inner.set_state(SyncState::Degraded);
            }
            _ => {}
        }
        self.inner.connection.connect()
    }

    /// Re-fetch conversations (and the active conversation's messages)
    pub async fn resync(&self) -> SyncResult<()> {
        self.inner.resync().await?;
        if self.inner.connection.status().is_connected() {
            self.inner.transition(SyncState::Live, |s| s == SyncState::Degraded);
        }
        Ok(())
    }

    /// End the session: disconnect, cancel timers and clear local state
    pub async fn logout(&self) {
        self.inner.end_session("signed out".to_string()).await;
    }

    /// Stop background work, keeping local state
    ///
    /// The coordinator can't be started again afterwards.
    pub async fn shutdown(&self) {
        self.inner.connection.disconnect().await;
        if let Some(worker) = lock(&self.worker).take() {
            worker.abort();
        }
        self.inner.typing.clear();
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        lock(&self.inner.local).conversations.list().to_vec()
    }

    pub fn conversation(&self, conversation_id: &ConversationId) -> Option<Conversation> {
        lock(&self.inner.local)
            .conversations
            .get(conversation_id)
            .cloned()
    }

    /// Messages in read order (creation time, then identity)
    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<MessageEntry> {
        lock(&self.inner.local).messages.messages(conversation_id)
    }

    /// Whether anyone else is typing in a conversation
    pub fn is_typing(&self, conversation_id: &ConversationId) -> bool {
        self.inner.typing.is_anyone_typing(conversation_id)
    }

    pub fn typing_users(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        self.inner.typing.typing_users(conversation_id)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.connection.status()
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state.borrow()
    }

    /// Why the push channel stopped for good, if it did
    pub fn connection_failure(&self) -> Option<SyncError> {
        match self.inner.connection.status().halt {
            Some(Halt::Exhausted { attempts }) => Some(SyncError::ConnectionExhausted { attempts }),
            Some(Halt::AuthRejected(reason)) => Some(SyncError::Auth(reason)),
            None => None,
        }
    }

    /// Whether the conversation list was fetched this session
    pub fn has_synced(&self) -> bool {
        self.inner.synced.load(Ordering::SeqCst)
    }

    /// Change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SyncUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub fn local_user(&self) -> Option<UserId> {
        lock(&self.inner.local_user).clone()
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        lock(&self.inner.active).clone()
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.abort();
        }
    }
}

/// What the worker does about a resync that failed on a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResyncRetry {
    Schedule,
    Cancel,
    Keep,
}

/// Applies connection changes, push events and typing expiries in order
async fn run_worker(inner: Arc<Inner>, mut inbound: mpsc::UnboundedReceiver<InboundEvent>) {
    let mut status_rx = inner.connection.subscribe();
    let mut typing_rx = inner.typing.subscribe();
    let mut last_connection = status_rx.borrow_and_update().connection_id;

    let policy = inner.connection.policy().clone();
    let mut resync_backoff = Backoff::new(policy.base_delay, policy.max_delay);
    let resync_timer = tokio::time::sleep(policy.base_delay);
    tokio::pin!(resync_timer);
    let mut resync_pending = false;

    loop {
        let retry = tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                inner.on_connection(status, &mut last_connection).await
            }
            _ = &mut resync_timer, if resync_pending => {
                resync_pending = false;
                inner.retry_resync().await
            }
            event = inbound.recv() => match event {
                Some(event) => {
                    inner.on_event(event).await;
                    ResyncRetry::Keep
                }
                None => break,
            },
            signal = typing_rx.recv() => match signal {
                Ok(signal) => {
                    inner.publish(SyncUpdate::TypingChanged {
                        conversation_id: signal.conversation_id,
                        user_id: signal.user_id,
                        is_typing: signal.is_typing,
                    });
                    ResyncRetry::Keep
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Skipped {} typing signals", n);
                    ResyncRetry::Keep
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        match retry {
            ResyncRetry::Schedule => {
                let delay = resync_backoff.next_delay();
                debug!("Retrying resync in {:?}", delay);
                resync_timer.as_mut().reset(Instant::now() + delay);
                resync_pending = true;
            }
            ResyncRetry::Cancel => {
                resync_backoff.reset();
                resync_pending = false;
            }
            ResyncRetry::Keep => {}
        }
    }
    debug!("Event worker stopped");
}

impl Inner {
    fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SyncState) {
        self.transition(state, |_| true);
    }

    /// Move to `state` only if the current state passes `allowed`
    ///
    /// The check and the write happen under the same lock, so a
    /// concurrent logout can't be overwritten.
    fn transition(&self, state: SyncState, allowed: impl Fn(SyncState) -> bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == state || !allowed(*current) {
                return false;
            }
            info!("Sync state: {} -> {}", current, state);
            *current = state;
            true
        });
        if changed {
            self.publish(SyncUpdate::StateChanged(state));
        }
        changed
    }

    fn publish(&self, update: SyncUpdate) {
        let _ = self.updates.send(update);
    }

    fn publish_messages(&self, conversation_id: &ConversationId) {
        self.publish(SyncUpdate::MessagesChanged(conversation_id.clone()));
        self.publish(SyncUpdate::ConversationsChanged);
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn local_user(&self) -> Option<UserId> {
        lock(&self.local_user).clone()
    }

    /// An auth failure anywhere ends the session
    async fn guard<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        if let Err(ref e) = result {
            if e.is_auth() {
                self.end_session(e.to_string()).await;
            }
        }
        result
    }

    async fn on_connection(
        &self,
        status: ConnectionStatus,
        last_connection: &mut u64,
    ) -> ResyncRetry {
        self.publish(SyncUpdate::ConnectionChanged(status.state));

        if self.state() == SyncState::Uninitialized {
            return ResyncRetry::Cancel;
        }

        match status.halt {
            Some(Halt::AuthRejected(reason)) => {
                warn!("Push channel rejected the session: {}", reason);
                self.end_session(reason).await;
                return ResyncRetry::Cancel;
            }
            Some(Halt::Exhausted { attempts }) => {
                if self.state() != SyncState::Exhausted {
                    warn!("Push channel unreachable after {} retries", attempts);
                }
                // Exhausted is only reachable from degraded
                self.transition(SyncState::Degraded, |s| {
                    s != SyncState::Uninitialized && s != SyncState::Exhausted
                });
                self.transition(SyncState::Exhausted, |s| s == SyncState::Degraded);
                return ResyncRetry::Cancel;
            }
            None => {}
        }

        if status.is_connected() && status.connection_id != *last_connection {
            *last_connection = status.connection_id;
            self.on_connected().await
        } else if !status.is_connected() {
            self.transition(SyncState::Degraded, |s| s == SyncState::Live);
            ResyncRetry::Cancel
        } else {
            ResyncRetry::Keep
        }
    }

    /// A new push connection is up
    async fn on_connected(&self) -> ResyncRetry {
        let first_sync_done =
            self.state() == SyncState::Syncing && self.synced.load(Ordering::SeqCst);
        if !first_sync_done {
            // Anything sent while we were away is only visible via REST
            if let Err(e) = self.resync().await {
                warn!("Resync after reconnect failed: {}", e);
                self.transition(SyncState::Degraded, |s| s != SyncState::Uninitialized);
                if self.state() == SyncState::Degraded {
                    return ResyncRetry::Schedule;
                }
                return ResyncRetry::Cancel;
            }
        }

        self.go_live();
        ResyncRetry::Cancel
    }

    /// Resync again after a failure on a connection that is still up
    async fn retry_resync(&self) -> ResyncRetry {
        if self.state() != SyncState::Degraded || !self.connection.status().is_connected() {
            return ResyncRetry::Cancel;
        }
        match self.resync().await {
            Ok(()) => {
                self.go_live();
                ResyncRetry::Cancel
            }
            Err(e) if !e.is_auth() && self.state() == SyncState::Degraded => {
                warn!("Resync retry failed: {}", e);
                ResyncRetry::Schedule
            }
            Err(_) => ResyncRetry::Cancel,
        }
    }

    /// Join the active conversation and go live, if still connected
    fn go_live(&self) {
        if !self.connection.status().is_connected() {
            return;
        }
        let active = lock(&self.active).clone();
        if let Some(conversation_id) = active {
            self.join(&conversation_id);
        }
        self.transition(SyncState::Live, |s| {
            s != SyncState::Uninitialized && s != SyncState::Exhausted
        });
    }

    async fn on_event(&self, event: InboundEvent) {
        if self.state() == SyncState::Uninitialized {
            return;
        }
        let me = self.local_user();

        match event {
            InboundEvent::MessageReceived {
                conversation_id,
                message,
            } => {
                if me.as_ref() == Some(&message.sender) {
                    debug!("Ignoring echo of own message {}", message.id);
                    return;
                }

                let id = message.id.clone();
                let (outcome, known) = {
                    let mut local = lock(&self.local);
                    let outcome = local.messages.append(&conversation_id, message);
                    let known = local.touch_latest(&conversation_id);
                    (outcome, known)
                };

                if outcome == AppendOutcome::ConflictIgnored {
                    debug!("Duplicate message {} ignored", id);
                    return;
                }
                self.publish_messages(&conversation_id);

                if !known {
                    info!("Message for unknown conversation {}, refreshing", conversation_id);
                    if let Err(e) = self.resync().await {
                        warn!("Conversation refresh failed: {}", e);
                    }
                }
            }
            InboundEvent::Typing {
                conversation_id,
                user_id,
                is_typing,
            } => {
                if me.as_ref() == Some(&user_id) {
                    debug!("Ignoring own typing signal");
                    return;
                }
                // TypingChanged is published from the tracker's signal
                self.typing.set_typing(&conversation_id, &user_id, is_typing);
            }
            InboundEvent::ConversationCreated { conversation } => {
                debug!("Conversation created: {}", conversation.id);
                self.apply_conversation(conversation);
            }
        }
    }

    /// Upsert a conversation, keeping a newer local latest pointer
    fn apply_conversation(&self, conversation: Conversation) {
        {
            let mut local = lock(&self.local);
            let conversation_id = conversation.id.clone();
            local.conversations.upsert(conversation);
            local.touch_latest(&conversation_id);
        }
        self.publish(SyncUpdate::ConversationsChanged);
    }

    /// Full fetch: the server's copy wins for server-owned fields
    ///
    /// Each step commits independently; a failed message fetch doesn't
    /// undo the conversation update.
    async fn resync(&self) -> SyncResult<()> {
        let epoch = self.epoch();
        let result = with_retry(&self.requests, "fetch conversations", || {
            self.api.fetch_conversations()
        })
        .await;
        let conversations = self.guard(result).await?;
        if self.epoch() != epoch {
            return Ok(());
        }

        let count = conversations.len();
        {
            let mut local = lock(&self.local);
            for conversation in conversations {
                let conversation_id = conversation.id.clone();
                local.conversations.upsert(conversation);
                // Pending sends stay the latest entry until confirmed
                local.touch_latest(&conversation_id);
            }
        }
        self.synced.store(true, Ordering::SeqCst);
        info!("Synced {} conversations", count);
        self.publish(SyncUpdate::ConversationsChanged);

        let active = lock(&self.active).clone();
        if let Some(conversation_id) = active {
            if let Err(e) = self.load_page(&conversation_id, 1).await {
                warn!("Failed to refresh messages for {}: {}", conversation_id, e);
            }
        }
        Ok(())
    }

    async fn load_page(&self, conversation_id: &ConversationId, page: u32) -> SyncResult<usize> {
        let epoch = self.epoch();
        let result = with_retry(&self.requests, "fetch messages", || {
            self.api.fetch_messages(conversation_id, page, self.page_size)
        })
        .await;
        let messages = self.guard(result).await?;
        if self.epoch() != epoch {
            return Ok(0);
        }

        let changed = {
            let mut local = lock(&self.local);
            let changed = local.messages.reconcile(conversation_id, messages);
            local.touch_latest(conversation_id);
            changed
        };
        debug!(
            "Page {} of {}: {} entries changed",
            page, conversation_id, changed
        );
        if changed > 0 {
            self.publish_messages(conversation_id);
        }
        Ok(changed)
    }

    /// Join a conversation's room on the live connection, if any
    fn join(&self, conversation_id: &ConversationId) {
        if !self.connection.status().is_connected() {
            return;
        }
        let event = OutboundEvent::JoinConversation {
            conversation_id: conversation_id.clone(),
        };
        if let Err(e) = self.connection.emit(event) {
            debug!("Could not join {}: {}", conversation_id, e);
        }
    }

    async fn end_session(&self, reason: String) {
        info!("Ending session: {}", reason);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.connection.disconnect().await;
        self.typing.clear();
        {
            let mut local = lock(&self.local);
            local.messages.clear();
            local.conversations.clear();
        }
        *lock(&self.local_user) = None;
        *lock(&self.active) = None;
        self.synced.store(false, Ordering::SeqCst);
        self.set_state(SyncState::Uninitialized);
        self.publish(SyncUpdate::ConversationsChanged);
        self.publish(SyncUpdate::SessionEnded(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::models::DeliveryState;
    use crate::session::Session;
    use crate::store::EntryState;
    use crate::testing::{conversation, message, FakeApi, FakeConnector};

    fn coordinator_with(
        config: &Config,
        api: &Arc<FakeApi>,
        connector: &Arc<FakeConnector>,
    ) -> SyncCoordinator {
        SyncCoordinator::new(
            config,
            api.clone(),
            connector.clone(),
            Arc::new(StaticCredentials::new(Some(Session::new("alice", "token")))),
        )
    }

    fn coordinator(api: &Arc<FakeApi>, connector: &Arc<FakeConnector>) -> SyncCoordinator {
        coordinator_with(&Config::default(), api, connector)
    }

    async fn wait_for_state(coordinator: &SyncCoordinator, state: SyncState) {
        let mut rx = coordinator.subscribe_state();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    /// Let the worker drain its queue
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn c1() -> ConversationId {
        ConversationId::new("c1")
    }

    fn received(msg: Message) -> InboundEvent {
        InboundEvent::MessageReceived {
            conversation_id: msg.conversation_id.clone(),
            message: msg,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_goes_live() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        api.add_conversation(conversation("c2", "alice", "carol", 20));
        let connector = FakeConnector::new();
        let _remote = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        assert_eq!(coordinator.state(), SyncState::Uninitialized);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;

        let ids: Vec<String> = coordinator
            .conversations()
            .iter()
            .map(|c| c.id.to_string())
            .collect();
        assert_eq!(ids, vec!["c2", "c1"]);
        assert_eq!(api.calls("fetch_conversations"), 1);
        assert_eq!(coordinator.local_user(), Some(UserId::new("alice")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_credential() {
        let api = FakeApi::new("alice");
        let connector = FakeConnector::new();
        let coordinator = SyncCoordinator::new(
            &Config::default(),
            api.clone(),
            connector.clone(),
            Arc::new(StaticCredentials::new(None)),
        );

        assert!(coordinator.start().await.unwrap_err().is_auth());
        assert_eq!(coordinator.state(), SyncState::Uninitialized);
        assert_eq!(connector.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_message_event_is_discarded() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        let connector = FakeConnector::new();
        let remote = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;

        remote.push(received(message("m1", "c1", "alice", 30)));
        settle().await;
        assert!(coordinator.messages(&c1()).is_empty());

        remote.push(received(message("m2", "c1", "bob", 31)));
        settle().await;
        let messages = coordinator.messages(&c1());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.as_str(), "m2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_push_event_is_ignored() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        let connector = FakeConnector::new();
        let remote = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;

        remote.push(received(message("m1", "c1", "bob", 30)));
        remote.push(received(message("m1", "c1", "bob", 30)));
        settle().await;

        assert_eq!(coordinator.messages(&c1()).len(), 1);
        let conversation = coordinator.conversation(&c1()).unwrap();
        assert_eq!(conversation.latest_message.unwrap().as_str(), "m1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_promotes() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        let connector = FakeConnector::new();
        let _remote = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();

        let sent = coordinator.send_message(&c1(), "hello").await.unwrap();
        let messages = coordinator.messages(&c1());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key, MessageKey::Server(sent.id.clone()));
        assert_eq!(messages[0].state, EntryState::Confirmed);
        assert_eq!(messages[0].delivery, Some(DeliveryState::Sent));

        let conversation = coordinator.conversation(&c1()).unwrap();
        assert_eq!(conversation.latest_message, Some(MessageKey::Server(sent.id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_texts_are_both_kept() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        let coordinator = coordinator(&api, &FakeConnector::new());
        coordinator.start().await.unwrap();

        coordinator.send_message(&c1(), "ok").await.unwrap();
        coordinator.send_message(&c1(), "ok").await.unwrap();
        assert_eq!(coordinator.messages(&c1()).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_returns_text() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        let coordinator = coordinator(&api, &FakeConnector::new());
        coordinator.start().await.unwrap();
        let mut updates = coordinator.subscribe();

        api.fail("create_message", SyncError::TransientNetwork("503".into()));
        let failure = coordinator
            .send_message(&c1(), "keep me")
            .await
            .unwrap_err();

        assert_eq!(failure.content, "keep me");
        assert!(failure.source.is_retryable());
        assert!(failure.temp_id.is_some());
        // Not retried automatically
        assert_eq!(api.calls("create_message"), 1);
        assert!(coordinator.messages(&c1()).is_empty());
        assert_eq!(coordinator.conversation(&c1()).unwrap().latest_message, None);

        let mut saw_failure = false;
        while let Ok(update) = updates.try_recv() {
            saw_failure |= matches!(update, SyncUpdate::SendFailed { .. });
        }
        assert!(saw_failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_kept_when_configured() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        let config = Config {
            keep_failed_sends: true,
            ..Config::default()
        };
        let coordinator = coordinator_with(&config, &api, &FakeConnector::new());
        coordinator.start().await.unwrap();

        api.fail("create_message", SyncError::TransientNetwork("503".into()));
        let failure = coordinator.send_message(&c1(), "retry me").await.unwrap_err();
        let temp_id = failure.temp_id.unwrap();

        let messages = coordinator.messages(&c1());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].state, EntryState::Failed);
        assert_eq!(messages[0].body, "retry me");

        assert!(coordinator.discard_failed(&temp_id));
        assert!(!coordinator.discard_failed(&temp_id));
        assert!(coordinator.messages(&c1()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_degrades_and_reconnect_resyncs() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        let connector = FakeConnector::new();
        let mut first = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;

        first.drop_connection();
        wait_for_state(&coordinator, SyncState::Degraded).await;
        // Nothing is cleared while degraded
        assert_eq!(coordinator.conversations().len(), 1);

        // Missed while offline: only a resync can show it
        api.add_conversation(conversation("c2", "alice", "carol", 20));
        let _second = connector.push_link();
        wait_for_state(&coordinator, SyncState::Live).await;

        assert_eq!(coordinator.conversations().len(), 2);
        assert_eq!(api.calls("fetch_conversations"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_page_fetch_keeps_resynced_conversations() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        api.add_message(message("m1", "c1", "bob", 30));
        let connector = FakeConnector::new();
        let mut first = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;
        coordinator.set_active_conversation(Some(&c1())).await.unwrap();

        first.drop_connection();
        wait_for_state(&coordinator, SyncState::Degraded).await;

        api.add_conversation(conversation("c2", "alice", "carol", 20));
        for _ in 0..3 {
            api.fail("fetch_messages", SyncError::TransientNetwork("503".into()));
        }
        let _second = connector.push_link();
        wait_for_state(&coordinator, SyncState::Live).await;

        // The conversation list is committed even though the page fetch failed
        assert_eq!(coordinator.conversations().len(), 2);
        assert!(coordinator.conversation(&ConversationId::new("c2")).is_some());
        assert_eq!(coordinator.messages(&c1()).len(), 1);
        assert_eq!(api.calls("fetch_messages"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_send_survives_reconnect() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        api.add_message(message("m1", "c1", "bob", 30));
        let connector = FakeConnector::new();
        let mut first = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;
        coordinator.set_active_conversation(Some(&c1())).await.unwrap();

        // A send still waiting for its acknowledgment
        let shadow = OptimisticMessage::new(c1(), UserId::new("alice"), "in flight");
        let pending_key = MessageKey::Local(shadow.temp_id.clone());
        {
            let mut local = lock(&coordinator.inner.local);
            local.messages.append_optimistic(&c1(), shadow);
            local.touch_latest(&c1());
        }

        first.drop_connection();
        wait_for_state(&coordinator, SyncState::Degraded).await;
        let _second = connector.push_link();
        wait_for_state(&coordinator, SyncState::Live).await;
        assert_eq!(api.calls("fetch_messages"), 2);

        let entries: Vec<(String, EntryState)> = coordinator
            .messages(&c1())
            .iter()
            .map(|m| (m.key.to_string(), m.state))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("m1".to_string(), EntryState::Confirmed),
                (pending_key.to_string(), EntryState::Pending),
            ]
        );
        let conversation = coordinator.conversation(&c1()).unwrap();
        assert_eq!(conversation.latest_message, Some(pending_key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resync_on_live_connection_is_retried() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        let connector = FakeConnector::new();
        let mut first = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;

        first.drop_connection();
        wait_for_state(&coordinator, SyncState::Degraded).await;

        // Every try of the reconnect resync fails; the next one works
        api.add_conversation(conversation("c2", "alice", "carol", 20));
        for _ in 0..3 {
            api.fail("fetch_conversations", SyncError::TransientNetwork("503".into()));
        }
        let _second = connector.push_link();
        wait_for_state(&coordinator, SyncState::Live).await;

        assert_eq!(coordinator.connection_state(), ConnectionState::Connected);
        assert_eq!(coordinator.conversations().len(), 2);
        assert_eq!(api.calls("fetch_conversations"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_state_change_after_logout_is_dropped() {
        let api = FakeApi::new("alice");
        let connector = FakeConnector::new();
        let _remote = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;
        coordinator.logout().await;

        // A disconnect handled after logout must not resurrect the session
        assert!(!coordinator
            .inner
            .transition(SyncState::Degraded, |s| s == SyncState::Live));
        assert!(!coordinator.inner.transition(SyncState::Live, |s| {
            s != SyncState::Uninitialized && s != SyncState::Exhausted
        }));
        assert_eq!(coordinator.state(), SyncState::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_conversation_while_degraded() {
        let api = FakeApi::new("alice");
        let connector = FakeConnector::new();
        let mut first = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;
        first.drop_connection();
        wait_for_state(&coordinator, SyncState::Degraded).await;

        // REST down too: every retry fails
        for _ in 0..3 {
            api.fail("create_conversation", SyncError::TransientNetwork("503".into()));
        }
        let err = coordinator
            .create_conversation(&UserId::new("xavier"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::TransientNetwork(_)));
        assert!(coordinator.conversations().is_empty());

        // REST back, push channel still down
        let created = coordinator
            .create_conversation(&UserId::new("xavier"))
            .await
            .unwrap();
        assert_eq!(coordinator.state(), SyncState::Degraded);
        assert_eq!(coordinator.conversations().len(), 1);

        let second = connector.push_link();
        wait_for_state(&coordinator, SyncState::Live).await;
        assert_eq!(coordinator.conversations().len(), 1);

        // Late push notification of the same conversation
        second.push(InboundEvent::ConversationCreated {
            conversation: created.clone(),
        });
        settle().await;
        let conversations = coordinator.conversations();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, created.id);

        // Asking again is answered locally
        let again = coordinator
            .create_conversation(&UserId::new("xavier"))
            .await
            .unwrap();
        assert_eq!(again.id, created.id);
        assert_eq!(api.calls("create_conversation"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_needs_manual_retry() {
        let api = FakeApi::new("alice");
        let connector = FakeConnector::new();
        let mut config = Config::default();
        config.reconnect.max_attempts = 1;

        let coordinator = coordinator_with(&config, &api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Exhausted).await;
        assert!(coordinator.connection_status().is_exhausted());
        assert_eq!(
            coordinator.set_typing_status(&c1(), true),
            Err(SyncError::ConnectionExhausted { attempts: 1 })
        );

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(coordinator.state(), SyncState::Exhausted);
        assert_eq!(connector.attempt_count(), 2);

        let _remote = connector.push_link();
        coordinator.retry_connection().unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_ends_session() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        let connector = FakeConnector::new();
        connector.push_failure(SyncError::Auth("401".into()));

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Uninitialized).await;

        assert!(coordinator.conversations().is_empty());
        assert_eq!(coordinator.local_user(), None);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_signals() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        let connector = FakeConnector::new();
        let remote = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;

        remote.push(InboundEvent::Typing {
            conversation_id: c1(),
            user_id: UserId::new("alice"),
            is_typing: true,
        });
        settle().await;
        assert!(!coordinator.is_typing(&c1()));

        remote.push(InboundEvent::Typing {
            conversation_id: c1(),
            user_id: UserId::new("bob"),
            is_typing: true,
        });
        settle().await;
        assert_eq!(coordinator.typing_users(&c1()), vec![UserId::new("bob")]);

        // Lost "stopped typing": the TTL clears it
        tokio::time::sleep(Config::default().typing_ttl()).await;
        assert!(!coordinator.is_typing(&c1()));

        coordinator.set_typing_status(&c1(), true).unwrap();
        settle().await;
        assert_eq!(
            remote.sent(),
            vec![OutboundEvent::Typing {
                conversation_id: c1(),
                is_typing: true,
                user_id: UserId::new("alice"),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_for_unknown_conversation_refreshes() {
        let api = FakeApi::new("alice");
        let connector = FakeConnector::new();
        let remote = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;

        api.add_conversation(conversation("c9", "alice", "dave", 10));
        remote.push(received(message("m1", "c9", "dave", 40)));
        settle().await;

        let conversation = coordinator.conversation(&ConversationId::new("c9")).unwrap();
        assert_eq!(conversation.latest_message.unwrap().as_str(), "m1");
        assert_eq!(api.calls("fetch_conversations"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_conversation_pages() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        for i in 0..5 {
            api.add_message(message(&format!("m{}", i), "c1", "bob", 100 + i));
        }
        let connector = FakeConnector::new();
        let remote = connector.push_link();
        let config = Config {
            message_page_size: 3,
            ..Config::default()
        };

        let coordinator = coordinator_with(&config, &api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;

        coordinator.set_active_conversation(Some(&c1())).await.unwrap();
        let keys: Vec<String> = coordinator
            .messages(&c1())
            .iter()
            .map(|m| m.key.to_string())
            .collect();
        assert_eq!(keys, vec!["m2", "m3", "m4"]);
        assert_eq!(coordinator.active_conversation(), Some(c1()));

        assert_eq!(coordinator.load_older_messages(&c1(), 2).await.unwrap(), 2);
        assert_eq!(coordinator.messages(&c1()).len(), 5);
        // Same page again changes nothing
        assert_eq!(coordinator.load_older_messages(&c1(), 2).await.unwrap(), 0);

        settle().await;
        assert_eq!(
            remote.sent(),
            vec![OutboundEvent::JoinConversation {
                conversation_id: c1()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_everything() {
        let api = FakeApi::new("alice");
        api.add_conversation(conversation("c1", "alice", "bob", 10));
        let connector = FakeConnector::new();
        let remote = connector.push_link();

        let coordinator = coordinator(&api, &connector);
        coordinator.start().await.unwrap();
        wait_for_state(&coordinator, SyncState::Live).await;
        remote.push(InboundEvent::Typing {
            conversation_id: c1(),
            user_id: UserId::new("bob"),
            is_typing: true,
        });
        settle().await;
        coordinator.send_message(&c1(), "bye").await.unwrap();

        coordinator.logout().await;
        assert_eq!(coordinator.state(), SyncState::Uninitialized);
        assert_eq!(coordinator.connection_state(), ConnectionState::Disconnected);
        assert!(coordinator.conversations().is_empty());
        assert!(coordinator.messages(&c1()).is_empty());
        assert!(!coordinator.is_typing(&c1()));

        // No stray reconnect after logout
        let attempts = connector.attempt_count();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempt_count(), attempts);
    }
}
