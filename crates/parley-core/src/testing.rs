//! In-memory fakes for the REST and push-channel seams

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::api::ChatApi;
use crate::error::{SyncError, SyncResult};
use crate::models::{Conversation, ConversationId, DeliveryState, Message, MessageId, UserId};
use crate::session::Session;
use crate::sync::transport::{Connector, InboundEvent, OutboundEvent, PushLink};

/// Fixed timestamp `secs` seconds after a reference point
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_564_800 + secs, 0)
        .single()
        .unwrap()
}

pub fn conversation(id: &str, a: &str, b: &str, secs: i64) -> Conversation {
    Conversation::new(id, vec![UserId::new(a), UserId::new(b)], at(secs))
}

pub fn message(id: &str, conversation_id: &str, sender: &str, secs: i64) -> Message {
    Message {
        id: MessageId::new(id),
        conversation_id: ConversationId::new(conversation_id),
        sender: UserId::new(sender),
        body: format!("body of {}", id),
        delivery: DeliveryState::Sent,
        created_at: at(secs),
    }
}

/// Scriptable `ChatApi`
pub struct FakeApi {
    me: UserId,
    conversations: Mutex<Vec<Conversation>>,
    messages: Mutex<HashMap<ConversationId, Vec<Message>>>,
    failures: Mutex<HashMap<&'static str, VecDeque<SyncError>>>,
    calls: Mutex<Vec<&'static str>>,
    next_id: AtomicU64,
}

impl FakeApi {
    pub fn new(me: &str) -> Arc<Self> {
        Arc::new(Self {
            me: UserId::new(me),
            conversations: Mutex::new(Vec::new()),
            messages: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn add_conversation(&self, conversation: Conversation) {
        self.conversations.lock().unwrap().push(conversation);
    }

    pub fn add_message(&self, message: Message) {
        self.messages
            .lock()
            .unwrap()
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    /// Queue a failure for the next call to `op`
    pub fn fail(&self, op: &'static str, err: SyncError) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Number of calls made to `op`
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    fn check(&self, op: &'static str) -> SyncResult<()> {
        self.calls.lock().unwrap().push(op);
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn fetch_conversations(&self) -> SyncResult<Vec<Conversation>> {
        self.check("fetch_conversations")?;
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn create_conversation(&self, participant: &UserId) -> SyncResult<Conversation> {
        self.check("create_conversation")?;
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(existing) = conversations
            .iter()
            .find(|c| c.is_direct_between(&self.me, participant))
        {
            return Ok(existing.clone());
        }
        let conversation = Conversation::new(
            self.next_id("conv"),
            vec![self.me.clone(), participant.clone()],
            Utc::now(),
        );
        conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        page: u32,
        limit: u32,
    ) -> SyncResult<Vec<Message>> {
        self.check("fetch_messages")?;
        let mut all = self
            .messages
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        all.sort_by_key(|m| m.created_at);

        let limit = limit as usize;
        let skip = page.saturating_sub(1) as usize * limit;
        let end = all.len().saturating_sub(skip);
        let start = end.saturating_sub(limit);
        Ok(all[start..end].to_vec())
    }

    async fn create_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> SyncResult<Message> {
        self.check("create_message")?;
        let message = Message {
            id: MessageId::new(self.next_id("msg")),
            conversation_id: conversation_id.clone(),
            sender: self.me.clone(),
            body: content.to_string(),
            delivery: DeliveryState::Sent,
            created_at: Utc::now(),
        };
        self.add_message(message.clone());
        Ok(message)
    }
}

/// Scriptable `Connector`; each `connect` pops the next scripted result
///
/// An empty script fails with a transient error.
pub struct FakeConnector {
    script: Mutex<VecDeque<SyncResult<FakeLink>>>,
    attempts: Mutex<Vec<Instant>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn push_failure(&self, err: SyncError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    /// Script a successful connect; the remote drives the link
    #[must_use]
    pub fn push_link(&self) -> LinkRemote {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        self.script.lock().unwrap().push_back(Ok(FakeLink {
            inbound,
            sent: Arc::clone(&sent),
        }));
        LinkRemote {
            inbound: Some(inbound_tx),
            sent,
        }
    }

    /// When each connect attempt happened
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _session: &Session) -> SyncResult<Box<dyn PushLink>> {
        self.attempts.lock().unwrap().push(Instant::now());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(link)) => Ok(Box::new(link)),
            Some(Err(e)) => Err(e),
            None => Err(SyncError::TransientNetwork("connection refused".into())),
        }
    }
}

pub struct FakeLink {
    inbound: mpsc::UnboundedReceiver<InboundEvent>,
    sent: Arc<Mutex<Vec<OutboundEvent>>>,
}

#[async_trait]
impl PushLink for FakeLink {
    async fn next_event(&mut self) -> Option<SyncResult<InboundEvent>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn send(&mut self, event: &OutboundEvent) -> SyncResult<()> {
        self.sent.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Server side of a `FakeLink`
pub struct LinkRemote {
    inbound: Option<mpsc::UnboundedSender<InboundEvent>>,
    sent: Arc<Mutex<Vec<OutboundEvent>>>,
}

impl LinkRemote {
    /// Deliver an event to the client
    pub fn push(&self, event: InboundEvent) {
        if let Some(ref inbound) = self.inbound {
            let _ = inbound.send(event);
        }
    }

    /// Simulate the server dropping the connection
    pub fn drop_connection(&mut self) {
        self.inbound = None;
    }

    /// Events the client emitted on this link
    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.sent.lock().unwrap().clone()
    }
}
