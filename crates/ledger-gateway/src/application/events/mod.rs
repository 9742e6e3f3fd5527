//! # Event Subscription
//!
//! Per-channel event streams, listener registrations and ordered dispatch.

mod registration;
mod stream;
mod subscription;

pub use subscription::EventSubscription;
