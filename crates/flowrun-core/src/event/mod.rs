//! Run event distribution.
//!
//! Provides an `EventBroadcaster` that assigns per-run sequence numbers and
//! fans events out to subscribers via `tokio::sync::broadcast` channels.

pub mod broadcaster;

pub use broadcaster::{EventBroadcaster, EventStream, SubscriptionError};
