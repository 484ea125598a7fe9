//! # herald-core
//!
//! Foundation types shared by every herald crate:
//!
//! - **Record**: [`Notification`] with lenient wire decoding
//! - **Branded IDs**: [`NotificationId`], [`UserId`]
//! - **Errors**: [`HeraldError`] over network, transport and deserialization failures
//! - **Retry**: backoff math for the bulk fetch
//! - **Logging**: subscriber setup and test capture

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod notification;
pub mod retry;

pub use errors::{
    DeserializationError, HeraldError, NetworkError, RequestOperation, TransportError,
};
pub use ids::{NotificationId, UserId};
pub use notification::Notification;
pub use retry::RetryConfig;
