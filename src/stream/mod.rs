// src/stream/mod.rs

//! Reactive value channels.
//!
//! - [`value_stream`] holds [`ValueStream`], the multicast latest-value
//!   channel every derived-config stage publishes on.
//! - [`follower`] holds [`Follower`], the per-consumer buffered cursor.

pub mod follower;
pub mod value_stream;

pub use follower::{Follower, SLOW_FOLLOWER_WARN_AT};
pub use value_stream::{Subscription, ValueStream};
