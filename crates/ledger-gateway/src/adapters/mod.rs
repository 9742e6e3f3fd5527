//! # Adapters Layer (Hexagonal Architecture)
//!
//! Concrete implementations of outbound ports and the static channel view.

mod checkpointer;
mod topology;

pub use checkpointer::{FileCheckpointer, InMemoryCheckpointer};
pub use topology::ChannelTopology;
