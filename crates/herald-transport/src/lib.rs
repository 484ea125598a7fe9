//! # herald-transport
//!
//! Persistent subscription to the notification broker.
//!
//! - **Frame codec**: STOMP 1.2 encode/decode and heart-beat negotiation
//! - **Connector**: socket opening behind a trait, [`WsConnector`] for production
//! - **Session**: connect, subscribe, forward pushes, reconnect on failure
//! - **Heart-beat**: inbound liveness watchdog
//! - **State**: [`ConnectionState`] published through a `watch` channel

#![deny(unsafe_code)]

pub mod connector;
pub mod frame;
pub mod heartbeat;
pub mod session;
pub mod state;

pub use connector::{Connector, FrameChannel, WsConnector};
pub use frame::{Command, Frame, FrameError, HeartBeat};
pub use session::{SUBSCRIPTION_ID, TransportConfig, TransportSession, topic_for};
pub use state::ConnectionState;
