//! Per-stream delivery task.
//!
//! ```text
//! IDLE → CONNECTING → READY ──drop──→ TRANSIENT_FAILURE ──backoff──→ CONNECTING
//!                                            │
//!                                            └── budget exhausted ──→ FATAL_FAILURE
//! any ──disconnect──→ SHUTDOWN
//! ```
//!
//! One task drains one stream and dispatches in delivery order, so
//! listeners on the same stream never see events concurrently.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use super::registration::StreamKey;
use super::subscription::SubscriptionCore;
use crate::algorithms::backoff_delay;
use crate::config::ReconnectPolicy;
use crate::domain::{ConnectionState, PeerInfo, StartPosition, TransportError};
use crate::ports::{EventStreamConnector, NotificationStream};

/// Apply `next` if the state machine allows it. Subscribers are woken only
/// on an applied change.
pub(crate) fn transition(
    state: &watch::Sender<ConnectionState>,
    peer: &str,
    next: ConnectionState,
) -> bool {
    state.send_if_modified(|current| {
        if current.can_transition_to(next) {
            debug!(peer, from = ?*current, to = ?next, "[gateway] Event stream state");
            *current = next;
            true
        } else {
            false
        }
    })
}

enum Connect {
    Opened(NotificationStream),
    Failed(TransportError),
    Shutdown,
}

enum Drain {
    Dropped(String),
    Shutdown,
}

pub(crate) struct StreamTask {
    pub core: Weak<SubscriptionCore>,
    pub connector: Arc<dyn EventStreamConnector>,
    pub peer: PeerInfo,
    pub key: StreamKey,
    pub stream_id: u64,
    pub start: StartPosition,
    pub policy: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub state: Arc<watch::Sender<ConnectionState>>,
    pub shutdown: watch::Receiver<bool>,
}

impl StreamTask {
    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut last_dispatched: Option<u64> = None;
        let mut start = self.start;

        loop {
            self.set_state(ConnectionState::Connecting);
            let reason = match self.connect(start).await {
                Connect::Shutdown => return self.stop(),
                Connect::Failed(e) if !e.is_failover_trigger() => {
                    return self.escalate(e.to_string());
                }
                Connect::Failed(e) => e.to_string(),
                Connect::Opened(stream) => {
                    self.set_state(ConnectionState::Ready);
                    info!(
                        peer = %self.peer.name,
                        replay = self.key.replay,
                        ?start,
                        "[gateway] Event stream connected"
                    );
                    match self.drain(stream, &mut last_dispatched, &mut attempt).await {
                        Drain::Shutdown => return self.stop(),
                        Drain::Dropped(reason) => reason,
                    }
                }
            };

            self.set_state(ConnectionState::TransientFailure);
            attempt += 1;
            if attempt > self.policy.max_attempts {
                return self.escalate(reason);
            }

            let delay = backoff_delay(&self.policy, attempt);
            warn!(
                peer = %self.peer.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "[gateway] Event stream dropped, reconnecting"
            );
            tokio::select! {
                biased;
                _ = wait_shutdown(&mut self.shutdown) => return self.stop(),
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(core) = self.core.upgrade() else {
                return self.stop();
            };
            start = core
                .resume_position(self.stream_id, self.start, last_dispatched)
                .await;
        }
    }

    async fn connect(&mut self, start: StartPosition) -> Connect {
        let open = tokio::time::timeout(
            self.connect_timeout,
            self.connector.open_event_stream(&self.peer, start),
        );
        tokio::select! {
            biased;
            _ = wait_shutdown(&mut self.shutdown) => Connect::Shutdown,
            opened = open => match opened {
                Ok(Ok(stream)) => Connect::Opened(stream),
                Ok(Err(e)) => Connect::Failed(e),
                Err(_) => Connect::Failed(TransportError::Timeout {
                    peer: self.peer.name.clone(),
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                }),
            },
        }
    }

    async fn drain(
        &mut self,
        mut stream: NotificationStream,
        last_dispatched: &mut Option<u64>,
        attempt: &mut u32,
    ) -> Drain {
        loop {
            let item = tokio::select! {
                biased;
                _ = wait_shutdown(&mut self.shutdown) => return Drain::Shutdown,
                item = stream.next() => item,
            };
            let notification = match item {
                Some(Ok(notification)) => notification,
                Some(Err(e)) => return Drain::Dropped(e.to_string()),
                None => return Drain::Dropped("stream closed by peer".to_string()),
            };

            let Some(core) = self.core.upgrade() else {
                return Drain::Shutdown;
            };
            core.dispatch(self.stream_id, &self.peer.name, &notification)
                .await;
            *last_dispatched = Some(notification.block_number);
            *attempt = 0;
        }
    }

    fn set_state(&self, next: ConnectionState) {
        transition(&self.state, &self.peer.name, next);
    }

    fn stop(&self) {
        self.set_state(ConnectionState::Shutdown);
        debug!(peer = %self.peer.name, "[gateway] Event stream task stopped");
    }

    fn escalate(&self, reason: String) {
        self.set_state(ConnectionState::FatalFailure);
        error!(
            peer = %self.peer.name,
            max_attempts = self.policy.max_attempts,
            reason = %reason,
            "[gateway] Event stream lost, reconnect budget exhausted"
        );
        if let Some(core) = self.core.upgrade() {
            core.fail_stream(self.stream_id, &self.peer.name, &reason);
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_transition_ignored() {
        let (state, observer) = watch::channel(ConnectionState::Idle);
        assert!(!transition(&state, "p1", ConnectionState::Ready));
        assert!(!observer.has_changed().unwrap());
        assert!(transition(&state, "p1", ConnectionState::Connecting));
        assert!(transition(&state, "p1", ConnectionState::Shutdown));
        assert!(!transition(&state, "p1", ConnectionState::Connecting));
        assert_eq!(*observer.borrow(), ConnectionState::Shutdown);
    }

    #[tokio::test]
    async fn test_wait_shutdown_on_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_millis(100), wait_shutdown(&mut rx))
            .await
            .unwrap();
    }
}
