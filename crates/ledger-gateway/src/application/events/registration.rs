//! Listener registrations and per-registration delivery.

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{
    BlockEvent, BlockNotification, CommitEvent, GatewayError, ListenerEvent,
    TransactionNotification,
};
use crate::ports::{Checkpointer, ListenerCallback, TxFilter};

/// What a registration listens for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RegistrationKind {
    Commit(TxFilter),
    Block,
}

/// Stream a registration is served by.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct StreamKey {
    pub peer: String,
    /// Replay streams carry a single registration and their own start block.
    pub replay: bool,
}

/// Block range of a registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Window {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl Window {
    fn admits(&self, block_number: u64) -> bool {
        self.start.map_or(true, |s| block_number >= s) && self.end.map_or(true, |e| block_number <= e)
    }
}

/// Whether a registration stays after a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Continue,
    Finished,
}

/// One live listener, owned by the subscription's arena.
pub(crate) struct Registration {
    pub id: u64,
    pub channel: String,
    pub listener_name: String,
    pub kind: RegistrationKind,
    pub stream: StreamKey,
    /// Stream instance serving the registration.
    pub stream_id: u64,
    pub filtered: bool,
    pub unregister_after_event: bool,
    pub checkpointer: Option<Arc<dyn Checkpointer>>,
    callback: ListenerCallback,
    /// Cleared on removal so a removed registration never matches again.
    window: Mutex<Option<Window>>,
    live: AtomicBool,
    /// Held across each callback and by `retire`. Reentrant so a callback
    /// may unregister its own listener.
    callback_gate: ReentrantMutex<()>,
}

impl Registration {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        channel: String,
        listener_name: String,
        kind: RegistrationKind,
        stream: StreamKey,
        stream_id: u64,
        window: Window,
        filtered: bool,
        unregister_after_event: bool,
        checkpointer: Option<Arc<dyn Checkpointer>>,
        callback: ListenerCallback,
    ) -> Self {
        Self {
            id,
            channel,
            listener_name,
            kind,
            stream,
            stream_id,
            filtered,
            unregister_after_event,
            checkpointer,
            callback,
            window: Mutex::new(Some(window)),
            live: AtomicBool::new(true),
            callback_gate: ReentrantMutex::new(()),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_replay(&self) -> bool {
        self.stream.replay
    }

    /// Stop all further callbacks and drop the window and replay state.
    /// Waits for a callback running on another thread to return. Returns
    /// false if already retired.
    pub fn retire(&self) -> bool {
        let _gate = self.callback_gate.lock();
        let was_live = self.live.swap(false, Ordering::AcqRel);
        *self.window.lock() = None;
        was_live
    }

    pub fn window(&self) -> Option<Window> {
        *self.window.lock()
    }

    /// Report a terminal error. The caller removes the registration.
    pub fn fail(&self, error: GatewayError) {
        if self.is_live() {
            self.invoke(Err(error));
        }
    }

    /// Deliver one notification from `peer`.
    pub async fn deliver(&self, peer: &str, notification: &BlockNotification) -> Delivery {
        let Some(window) = self.window() else {
            return Delivery::Finished;
        };
        let block_number = notification.block_number;

        if notification.end_block_reached {
            return self.deliver_end_marker(peer, notification, window).await;
        }

        if let Some(end) = window.end {
            if block_number > end {
                return self.complete(block_number).await;
            }
        }
        if !window.admits(block_number) {
            return Delivery::Continue;
        }

        if self.deliver_content(peer, notification).await == Delivery::Finished {
            return Delivery::Finished;
        }
        if window.end == Some(block_number) {
            return self.complete(block_number).await;
        }
        Delivery::Continue
    }

    async fn deliver_end_marker(
        &self,
        peer: &str,
        notification: &BlockNotification,
        window: Window,
    ) -> Delivery {
        let block_number = notification.block_number;
        let Some(end) = window.end else {
            debug!(
                registration_id = self.id,
                block_number, "[gateway] End marker ignored by open-ended listener"
            );
            return Delivery::Continue;
        };

        if block_number < end {
            warn!(
                registration_id = self.id,
                block_number,
                end_block = end,
                "[gateway] Event stream ended before end block"
            );
            self.fail(GatewayError::PrematureEnd {
                block_number,
                end_block: end,
            });
            return Delivery::Finished;
        }

        let has_content = !notification.transactions.is_empty() || notification.payload.is_some();
        if has_content
            && window.admits(block_number)
            && self.deliver_content(peer, notification).await == Delivery::Finished
        {
            return Delivery::Finished;
        }
        self.complete(block_number).await
    }

    async fn complete(&self, block_number: u64) -> Delivery {
        if self.is_live() {
            self.invoke(Ok(ListenerEvent::Completed { block_number }));
            self.save_checkpoint(block_number, None).await;
        }
        Delivery::Finished
    }

    async fn deliver_content(&self, peer: &str, notification: &BlockNotification) -> Delivery {
        match &self.kind {
            RegistrationKind::Commit(filter) => {
                let matching = notification
                    .transactions
                    .iter()
                    .filter(|tx| filter.matches(&tx.tx_id));
                for tx in matching {
                    if self.deliver_commit(peer, notification.block_number, tx).await
                        == Delivery::Finished
                    {
                        return Delivery::Finished;
                    }
                }
                self.save_checkpoint(notification.block_number, None).await;
                Delivery::Continue
            }
            RegistrationKind::Block => {
                let block_number = notification.block_number;
                if self.already_processed(block_number, None).await {
                    return Delivery::Continue;
                }
                if !self.is_live() {
                    return Delivery::Finished;
                }
                self.invoke(Ok(ListenerEvent::Block(BlockEvent {
                    peer: peer.to_string(),
                    block_number,
                    transactions: notification.transactions.clone(),
                    payload: if self.filtered {
                        None
                    } else {
                        notification.payload.clone()
                    },
                })));
                self.save_checkpoint(block_number, None).await;
                self.after_event()
            }
        }
    }

    async fn deliver_commit(
        &self,
        peer: &str,
        block_number: u64,
        tx: &TransactionNotification,
    ) -> Delivery {
        if self.already_processed(block_number, Some(&tx.tx_id)).await {
            return Delivery::Continue;
        }
        if !self.is_live() {
            return Delivery::Finished;
        }
        self.invoke(Ok(ListenerEvent::Commit(CommitEvent {
            peer: peer.to_string(),
            block_number,
            transaction: tx.clone(),
        })));
        self.save_checkpoint(block_number, Some(&tx.tx_id)).await;
        self.after_event()
    }

    fn after_event(&self) -> Delivery {
        if self.unregister_after_event {
            Delivery::Finished
        } else {
            Delivery::Continue
        }
    }

    fn invoke(&self, event: Result<ListenerEvent, GatewayError>) {
        let _gate = self.callback_gate.lock();
        if !self.is_live() {
            debug!(registration_id = self.id, "[gateway] Event dropped, listener retired");
            return;
        }
        if let Err(e) = (self.callback)(event) {
            warn!(
                registration_id = self.id,
                listener = %self.listener_name,
                error = %e,
                "[gateway] Listener callback failed"
            );
        }
    }

    async fn already_processed(&self, block_number: u64, tx_id: Option<&str>) -> bool {
        let Some(checkpointer) = &self.checkpointer else {
            return false;
        };
        match checkpointer
            .check(&self.channel, &self.listener_name, block_number, tx_id)
            .await
        {
            Ok(seen) => seen,
            Err(e) => {
                warn!(
                    registration_id = self.id,
                    error = %e,
                    "[gateway] Checkpoint check failed, delivering"
                );
                false
            }
        }
    }

    /// Saved after the callback returns, so an interrupted callback is
    /// replayed rather than skipped.
    async fn save_checkpoint(&self, block_number: u64, tx_id: Option<&str>) {
        let Some(checkpointer) = &self.checkpointer else {
            return;
        };
        if let Err(e) = checkpointer
            .save(&self.channel, &self.listener_name, block_number, tx_id)
            .await
        {
            warn!(
                registration_id = self.id,
                block_number,
                error = %e,
                "[gateway] Checkpoint save failed"
            );
        }
    }
}
