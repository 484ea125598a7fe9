//! # herald-runtime
//!
//! The notification subsystem for one user:
//!
//! - **Store**: ordered, id-unique records with an exact unread counter
//! - **Merge**: reconciling a bulk fetch with pushes that raced ahead of it
//! - **Controller**: the single task that serializes fetch results, pushes
//!   and acknowledgements
//! - **Handle**: [`Subsystem`] lifecycle and the cloneable [`NotificationHandle`]

#![deny(unsafe_code)]

pub mod controller;
pub mod handle;
pub mod merge;
pub mod store;

pub use controller::{ControlMessage, NotificationView, SubsystemConfig, SubsystemPhase};
pub use handle::{NotificationHandle, Subsystem};
pub use merge::{apply_fetch, merge_by_id};
pub use store::{MarkReadOutcome, NotificationStore, PrependOutcome, StoreSnapshot};
