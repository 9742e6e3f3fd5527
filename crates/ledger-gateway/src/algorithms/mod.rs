//! # Algorithms Module
//!
//! Pure decision logic of the pipelines: target precedence, response
//! reconciliation, reconnect backoff and replay resume.

pub mod backoff;
pub mod reconciliation;
pub mod resume;
pub mod targets;

pub use backoff::backoff_delay;
pub use reconciliation::{check_payload_agreement, classify, reconcile, EndorsementResult};
pub use resume::{effective_start, reconnect_start};
pub use targets::{resolve_targets, TargetSource};
