//! # relay-server
//!
//! Real-time delivery core for chat messages across a horizontally scaled
//! fleet of processes.
//!
//! - [`registry`]: which user is connected to this process
//! - [`presence`]: which users are connected anywhere, with a local-only
//!   fallback
//! - [`bus`] and [`subscriber`]: cross-process fanout over a shared channel
//! - [`dispatcher`]: persist, echo, route
//! - [`node`]: wires it all together and picks the backend at startup
//!
//! Shared state lives behind [`backend`] traits, implemented for Redis and
//! in memory.

#![deny(unsafe_code)]

pub mod backend;
pub mod bus;
pub mod connection;
pub mod dispatcher;
pub mod metrics;
pub mod node;
pub mod presence;
pub mod presence_writer;
pub mod registry;
pub mod shutdown;
pub mod store;
pub mod subscriber;

pub use backend::{MemoryBackend, RedisBackend, SharedBackend};
pub use bus::{FanoutBus, LocalBus, SharedBus};
pub use connection::{ClientConnection, OutboundFrames};
pub use dispatcher::{DispatchReport, MessageDispatcher, ReceiverDelivery};
pub use node::ChatNode;
pub use presence::{DistributedPresence, LocalPresence, PresenceMode, PresenceStore};
pub use presence_writer::PresenceWriter;
pub use registry::{ConnectionRegistry, LocalDelivery};
pub use shutdown::ShutdownCoordinator;
pub use store::{MemoryMessageStore, MessageStore};
pub use subscriber::{EnvelopeOutcome, FanoutSubscriber};
