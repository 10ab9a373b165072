//! # kinsync-proto
//!
//! The wire contract between a kinsync device client and the family sync
//! service.
//!
//! ## Features
//!
//! - Event-stream frames ([`ClientFrame`], [`ServerFrame`]) carried as JSON
//!   text frames over a persistent connection
//! - Request/response envelopes ([`Request`], [`Response`]) for mutations and
//!   polling queries
//! - Entity update envelopes ([`EntityUpdate`]) shared by stream events,
//!   mutation results and query results
//! - A sans-IO [`HandshakeMachine`] for the `init` / `init_ack` exchange
//! - A last-writer-wins register ([`LwwRegister`]) for per-entity ordering
//!
//! ## Quick Start
//!
//! ```rust
//! use kinsync_proto::{ClientFrame, ServerFrame, StreamKey};
//!
//! let frame = ClientFrame::Subscribe { seq: 1, stream: StreamKey::Family("f-1".into()) };
//! let text = frame.encode().expect("encodable");
//! assert!(text.contains("\"subscribe\""));
//!
//! let ack = ServerFrame::decode(r#"{"type":"init_ack","session_id":"s-1"}"#).unwrap();
//! assert!(matches!(ack, ServerFrame::InitAck { .. }));
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod entity;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod lww;
pub mod request;

pub use self::entity::{EntityKind, EntityUpdate, StreamKey, UpdateBatch};
pub use self::error::{ProtocolError, Result};
pub use self::frame::{codes, ClientFrame, ServerFrame};
pub use self::handshake::{HandshakeAction, HandshakeError, HandshakeMachine, HandshakeState};
pub use self::lww::LwwRegister;
pub use self::request::{ApiError, Operation, Request, Response};
