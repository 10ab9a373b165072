//! kinsync - family collaboration and real-time sync client core.
//!
//! Keeps a device's view of family data (memberships, invitations,
//! caregiver presence, orders, predictions) consistent with the sync
//! service over an unreliable connection.
//!
//! The [`sync`] client owns the connection and all store writes; the UI
//! reads [`state`] snapshots and submits actions through a
//! [`sync::SyncHandle`] or the [`invitation::InvitationManager`].

pub mod config;
pub mod credentials;
pub mod error;
pub mod invitation;
pub mod metrics;
pub mod model;
pub mod permissions;
pub mod state;
pub mod sync;
pub mod telemetry;

pub use credentials::{Credential, CredentialProvider};
pub use error::{ActionError, ErrorKind, InvitationError, TransportError};
pub use invitation::InvitationManager;
pub use state::{StoreChange, Stores};
pub use sync::{SyncClient, SyncClientParams, SyncHandle, SyncStatus};
