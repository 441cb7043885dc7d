//! Push-channel synchronization
//!
//! - `connection`: one authenticated push connection with backoff reconnect
//! - `dispatcher`: handler registry replayed onto each new connection
//! - `transport`: wire events and the `Connector`/`PushLink` seam
//! - `ws`: WebSocket implementation of the transport
//! - `coordinator`: the state machine tying REST, push events and local
//!   state together

pub mod backoff;
pub mod connection;
pub mod coordinator;
pub mod dispatcher;
pub mod transport;
pub mod ws;

pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, Halt, ReconnectPolicy};
pub use coordinator::{SyncCoordinator, SyncState, SyncUpdate};
pub use dispatcher::{EventDispatcher, HandlerId};
pub use transport::{Connector, EventName, InboundEvent, OutboundEvent, PushLink};
pub use ws::WsConnector;
