//! # herald-api
//!
//! HTTP collaborator of the notification subsystem: bulk fetch and
//! acknowledgement, plus the publish and unread-count endpoints used by the
//! command-line tool. Every failure is a [`herald_core::NetworkError`].

#![deny(unsafe_code)]

pub mod client;
pub mod errors;

pub use client::{ApiConfig, NotificationApi, ReqwestNotificationApi};
pub use errors::Result;
