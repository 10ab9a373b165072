//! Sync Module - real-time synchronization with the family sync service.
//!
//! - [`machine`]: connection state machine
//! - [`client`]: the actor that owns the connection, the offline queue and dispatch
//! - [`dispatch`]: ordering gate between inbound updates and the stores
//! - [`transport`]: event-stream and request-channel seams
//!
//! The UI talks to the client through a [`SyncHandle`].

pub mod backoff;
pub mod client;
pub mod dispatch;
pub mod guard;
mod handle;
pub mod machine;
pub mod poller;
pub mod queue;
mod session;
pub mod transport;

pub use client::{SyncClient, SyncClientParams, SyncStatus};
pub use dispatch::{DispatchOutcome, UpdateDispatcher, UpdateSource};
pub use handle::{QueuedMutation, SyncHandle};
pub use machine::{ConnectionEvent, ConnectionState, SyncConnection, Transition};
pub use queue::{OfflineQueue, QueuedUpdate};
pub use transport::{
    HttpRequestChannel, RequestChannel, StreamConnector, StreamTransport, WebSocketConnector,
};
