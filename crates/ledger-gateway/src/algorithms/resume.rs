//! # Replay Resume
//!
//! Where a registration's stream starts, and where a dropped stream picks up.

use crate::domain::{Checkpoint, StartPosition};

/// Effective start of a new registration.
///
/// A stored checkpoint wins over the requested start block. A replay with
/// neither starts at the chain head.
pub fn effective_start(start_block: Option<u64>, checkpoint: Option<&Checkpoint>) -> StartPosition {
    match (checkpoint, start_block) {
        (Some(cp), _) => StartPosition::Block(cp.resume_block()),
        (None, Some(block)) => StartPosition::Block(block),
        (None, None) => StartPosition::Newest,
    }
}

/// Start of a reconnect after a drop.
///
/// Resumes after the last block dispatched on the stream; falls back to the
/// original start when nothing was delivered yet.
pub fn reconnect_start(original: StartPosition, last_dispatched: Option<u64>) -> StartPosition {
    match last_dispatched {
        Some(block) => StartPosition::Block(block.saturating_add(1)),
        None => original,
    }
}
