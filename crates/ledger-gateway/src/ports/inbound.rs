//! # Inbound Ports
//!
//! API surface exposed to application code: contract invocation and event
//! listener registration.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::outbound::Checkpointer;
use crate::domain::{GatewayError, GatewayResult, ListenerEvent, ProposalArg};

/// Listener callback.
///
/// Receives events, or the error that ended the registration (premature end,
/// stream lost). A returned error is logged and never stops delivery to
/// other listeners.
pub type ListenerCallback =
    Arc<dyn Fn(Result<ListenerEvent, GatewayError>) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`ListenerCallback`].
pub fn listener_fn<F>(f: F) -> ListenerCallback
where
    F: Fn(Result<ListenerEvent, GatewayError>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which transactions a commit listener fires for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TxFilter {
    /// Every transaction.
    Any,
    /// A single transaction id.
    Id(String),
}

impl TxFilter {
    /// Whether `tx_id` passes the filter.
    pub fn matches(&self, tx_id: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Id(id) => id == tx_id,
        }
    }
}

/// Registration options.
#[derive(Clone, Default)]
pub struct ListenerOptions {
    /// Name used as checkpoint key. Generated when absent.
    pub listener_name: Option<String>,
    /// Replay historical blocks.
    pub replay: bool,
    /// First block of the window.
    pub start_block: Option<u64>,
    /// Last block of the window; reaching it completes the registration.
    pub end_block: Option<u64>,
    /// Strip full block payloads.
    pub filtered: bool,
    /// Unregister after the first delivered event. Defaults to true for
    /// commit listeners on a single transaction id, false otherwise.
    pub unregister_after_event: Option<bool>,
    /// Event source peer. Chosen by the subscription when absent.
    pub peer: Option<String>,
    /// Progress store for resumable replay.
    pub checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl ListenerOptions {
    /// Options for a replay from `start_block`.
    pub fn replay_from(start_block: u64) -> Self {
        Self {
            replay: true,
            start_block: Some(start_block),
            ..Self::default()
        }
    }

    /// Whether the registration needs its own historical stream.
    pub fn is_replay(&self) -> bool {
        self.replay || self.start_block.is_some()
    }
}

impl fmt::Debug for ListenerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerOptions")
            .field("listener_name", &self.listener_name)
            .field("replay", &self.replay)
            .field("start_block", &self.start_block)
            .field("end_block", &self.end_block)
            .field("filtered", &self.filtered)
            .field("unregister_after_event", &self.unregister_after_event)
            .field("peer", &self.peer)
            .field("checkpointer", &self.checkpointer.is_some())
            .finish()
    }
}

/// Handle to a live registration. Holds keys, not the registration itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    /// Registration id within the subscription.
    pub id: u64,
    /// Channel name.
    pub channel: String,
    /// Peer whose stream serves the registration.
    pub peer: String,
    /// Checkpoint key.
    pub listener_name: String,
}

/// Contract invocation API.
#[async_trait]
pub trait ContractApi: Send + Sync {
    /// Endorse, order and confirm a transaction; returns the first valid payload.
    async fn submit_transaction(
        &self,
        name: &str,
        args: Vec<ProposalArg>,
    ) -> GatewayResult<Option<Vec<u8>>>;

    /// Read-only query against one peer.
    async fn evaluate_transaction(
        &self,
        name: &str,
        args: Vec<ProposalArg>,
    ) -> GatewayResult<Option<Vec<u8>>>;
}

/// Event listener API.
#[async_trait]
pub trait EventApi: Send + Sync {
    /// Listen for transaction commits.
    async fn add_commit_listener(
        &self,
        filter: TxFilter,
        callback: ListenerCallback,
        options: ListenerOptions,
    ) -> GatewayResult<ListenerHandle>;

    /// Listen for blocks.
    async fn add_block_listener(
        &self,
        callback: ListenerCallback,
        options: ListenerOptions,
    ) -> GatewayResult<ListenerHandle>;

    /// Remove a registration. No callback fires for it afterwards.
    fn unregister(&self, handle: &ListenerHandle) -> GatewayResult<()>;
}
