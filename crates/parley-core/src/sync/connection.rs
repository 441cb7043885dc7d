//! Push-channel connection manager
//!
//! Owns at most one live connection. A background task connects,
//! pumps inbound events into the `EventDispatcher`, and reconnects with
//! exponential backoff when the connection drops. The task is the only
//! place a reconnect timer exists, so there is never more than one.
//!
//! State is published on a `watch` channel; observers only read it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::dispatcher::EventDispatcher;
use super::transport::{Connector, OutboundEvent, PushLink};
use crate::error::{SyncError, SyncResult};
use crate::session::CredentialSource;

/// Reconnect settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Retries before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why the manager stopped on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// Gave up after the configured number of retries
    Exhausted { attempts: u32 },
    /// The credential is missing or was rejected
    AuthRejected(String),
}

/// Snapshot of the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Retries scheduled since the last successful connect
    pub attempt: u32,
    /// Delay of the pending reconnect timer, if one is armed
    pub next_retry: Option<Duration>,
    /// Id of the latest successful connection (0 = never connected)
    pub connection_id: u64,
    pub last_error: Option<String>,
    pub halt: Option<Halt>,
}

impl ConnectionStatus {
    fn initial() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            next_retry: None,
            connection_id: 0,
            last_error: None,
            halt: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.halt, Some(Halt::Exhausted { .. }))
    }
}

/// Commands sent to the connection task
#[derive(Debug)]
enum Command {
    Emit(OutboundEvent),
    Disconnect,
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Owns the push-channel connection
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    dispatcher: Arc<EventDispatcher>,
    policy: ReconnectPolicy,
    status: Arc<watch::Sender<ConnectionStatus>>,
    connection_ids: Arc<AtomicU64>,
    worker: Mutex<Option<Worker>>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
        dispatcher: Arc<EventDispatcher>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::initial());
        Self {
            connector,
            credentials,
            dispatcher,
            policy,
            status: Arc::new(status),
            connection_ids: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current status snapshot
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Start connecting
    ///
    /// Fails with `SyncError::Auth` if no credential is available right
    /// now. Calling it while a connection task is running is a no-op.
    /// Must be called inside a tokio runtime.
    pub fn connect(&self) -> SyncResult<()> {
        if self.credentials.current().is_none() {
            return Err(SyncError::Auth("no credential available".to_string()));
        }

        let mut worker = self.worker();
        if worker.as_ref().is_some_and(|w| !w.task.is_finished()) {
            debug!("Connection task already running");
            return Ok(());
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = ConnectionTask {
            connector: Arc::clone(&self.connector),
            credentials: Arc::clone(&self.credentials),
            dispatcher: Arc::clone(&self.dispatcher),
            policy: self.policy.clone(),
            status: Arc::clone(&self.status),
            connection_ids: Arc::clone(&self.connection_ids),
        };
        *worker = Some(Worker {
            commands,
            task: tokio::spawn(task.run(command_rx)),
        });
        Ok(())
    }

    /// Tear down the connection and cancel any pending reconnect
    ///
    /// Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let worker = self.worker().take();
        if let Some(worker) = worker {
            let _ = worker.commands.send(Command::Disconnect);
            if let Err(e) = worker.task.await {
                if !e.is_cancelled() {
                    warn!("Connection task ended abnormally: {}", e);
                }
            }
        }
        self.status.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.next_retry = None;
        });
    }

    /// Emit an event on the live connection
    ///
    /// The push channel is at-most-once: nothing is queued while offline.
    pub fn emit(&self, event: OutboundEvent) -> SyncResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(SyncError::TransientNetwork(format!(
                "push channel not connected, dropped {}",
                event.name()
            )));
        }

        match self.worker().as_ref() {
            Some(worker) => worker
                .commands
                .send(Command::Emit(event))
                .map_err(|_| SyncError::TransientNetwork("connection task stopped".to_string())),
            None => Err(SyncError::TransientNetwork(
                "push channel not connected".to_string(),
            )),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker().take() {
            worker.task.abort();
        }
    }
}

/// How a live connection ended
enum Pump {
    Shutdown,
    Lost(String),
}

/// State owned by the background task
struct ConnectionTask {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    dispatcher: Arc<EventDispatcher>,
    policy: ReconnectPolicy,
    status: Arc<watch::Sender<ConnectionStatus>>,
    connection_ids: Arc<AtomicU64>,
}

impl ConnectionTask {
    /// Main loop with reconnection
    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut backoff = Backoff::new(self.policy.base_delay, self.policy.max_delay);

        loop {
            let attempt = backoff.attempt();
            self.publish(|s| {
                s.state = ConnectionState::Connecting;
                s.attempt = attempt;
                s.next_retry = None;
                s.halt = None;
            });

            // Credential is read at attempt time: a logout must stop us
            let Some(session) = self.credentials.current() else {
                return self.halt(Halt::AuthRejected(
                    "credential no longer available".to_string(),
                ));
            };

            let result = {
                let connecting = self.connector.connect(&session);
                tokio::pin!(connecting);
                loop {
                    tokio::select! {
                        result = &mut connecting => break result,
                        cmd = commands.recv() => match cmd {
                            Some(Command::Emit(event)) => {
                                debug!("Dropping {} while connecting", event.name());
                            }
                            Some(Command::Disconnect) | None => return self.stopped(),
                        }
                    }
                }
            };

            match result {
                Ok(mut link) => {
                    backoff.reset();
                    let connection_id = self.connection_ids.fetch_add(1, Ordering::SeqCst) + 1;
                    self.dispatcher.attach(connection_id);
                    info!("Push channel connected (connection {})", connection_id);
                    self.publish(|s| {
                        s.state = ConnectionState::Connected;
                        s.attempt = 0;
                        s.connection_id = connection_id;
                        s.last_error = None;
                    });

                    let outcome = self
                        .pump(connection_id, link.as_mut(), &mut commands)
                        .await;
                    self.dispatcher.detach(connection_id);

                    match outcome {
                        Pump::Shutdown => {
                            link.close().await;
                            return self.stopped();
                        }
                        Pump::Lost(reason) => {
                            warn!("Push channel lost: {}", reason);
                            self.publish(|s| s.last_error = Some(reason));
                        }
                    }
                }
                Err(SyncError::Auth(reason)) => {
                    warn!("Push channel rejected credential: {}", reason);
                    return self.halt(Halt::AuthRejected(reason));
                }
                Err(e) => {
                    warn!("Push channel connect failed: {}", e);
                    self.publish(|s| s.last_error = Some(e.to_string()));
                }
            }

            if backoff.attempt() >= self.policy.max_attempts {
                let attempts = backoff.attempt();
                warn!("Giving up on push channel after {} retries", attempts);
                return self.halt(Halt::Exhausted { attempts });
            }

            let delay = backoff.next_delay();
            let attempt = backoff.attempt();
            info!("Reconnecting in {:?} (attempt {})", delay, attempt);
            self.publish(|s| {
                s.state = ConnectionState::Disconnected;
                s.attempt = attempt;
                s.next_retry = Some(delay);
            });

            // The one pending reconnect timer
            let timer = tokio::time::sleep(delay);
            tokio::pin!(timer);
            loop {
                tokio::select! {
                    _ = &mut timer => break,
                    cmd = commands.recv() => match cmd {
                        Some(Command::Emit(event)) => {
                            debug!("Dropping {} while disconnected", event.name());
                        }
                        Some(Command::Disconnect) | None => return self.stopped(),
                    }
                }
            }
        }
    }

    /// Move events and commands until the connection ends
    async fn pump(
        &self,
        connection_id: u64,
        link: &mut dyn PushLink,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Pump {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Emit(event)) => {
                        if let Err(e) = link.send(&event).await {
                            return Pump::Lost(e.to_string());
                        }
                    }
                    Some(Command::Disconnect) | None => return Pump::Shutdown,
                },
                frame = link.next_event() => match frame {
                    Some(Ok(event)) => {
                        self.dispatcher.dispatch(connection_id, &event);
                    }
                    Some(Err(e)) => return Pump::Lost(e.to_string()),
                    None => return Pump::Lost("closed by server".to_string()),
                },
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut ConnectionStatus)) {
        self.status.send_modify(update);
    }

    fn stopped(&self) {
        info!("Push channel disconnected");
        self.publish(|s| {
            s.state = ConnectionState::Disconnected;
            s.next_retry = None;
        });
    }

    fn halt(&self, halt: Halt) {
        self.publish(|s| {
            s.state = ConnectionState::Disconnected;
            s.next_retry = None;
            s.halt = Some(halt);
        });
    }
}
