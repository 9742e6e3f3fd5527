//! Event subscription of one channel.
//!
//! Registrations live in an arena keyed by id. Handles and stream tasks
//! refer to the arena by id only, so the subscription tears everything down
//! without back-references.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::registration::{Delivery, Registration, RegistrationKind, StreamKey, Window};
use super::stream::{transition, StreamTask};
use crate::adapters::ChannelTopology;
use crate::algorithms::{effective_start, reconnect_start};
use crate::config::{GatewayConfig, ReconnectPolicy};
use crate::domain::{
    invariant_block_window, BlockNotification, ConnectionState, GatewayError, GatewayResult,
    PeerInfo, StartPosition,
};
use crate::ports::{
    EventApi, EventStreamConnector, ListenerCallback, ListenerHandle, ListenerOptions, TxFilter,
};

struct StreamHandle {
    id: u64,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Sender<bool>,
}

impl StreamHandle {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Stop the task. A stream that already failed fatally keeps that state.
    fn shut_down(&self, peer: &str) {
        if !self.state().is_terminal() {
            transition(&self.state, peer, ConnectionState::Shutdown);
        }
        // The task may already be gone.
        let _ = self.shutdown.send(true);
    }
}

#[derive(Default)]
struct Arena {
    registrations: HashMap<u64, Arc<Registration>>,
    streams: HashMap<StreamKey, StreamHandle>,
}

/// State shared with the stream tasks.
pub(crate) struct SubscriptionCore {
    channel: String,
    arena: Mutex<Arena>,
    next_id: AtomicU64,
}

impl SubscriptionCore {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Live registrations served by stream `stream_id`, oldest first.
    fn registrations_on(&self, stream_id: u64) -> Vec<Arc<Registration>> {
        let arena = self.arena.lock();
        let mut regs: Vec<_> = arena
            .registrations
            .values()
            .filter(|r| r.stream_id == stream_id && r.is_live())
            .cloned()
            .collect();
        regs.sort_by_key(|r| r.id);
        regs
    }

    /// Deliver one notification to every registration on the stream.
    pub(crate) async fn dispatch(&self, stream_id: u64, peer: &str, notification: &BlockNotification) {
        for reg in self.registrations_on(stream_id) {
            // An earlier listener may have unregistered this one.
            if !reg.is_live() {
                continue;
            }
            if reg.deliver(peer, notification).await == Delivery::Finished {
                self.remove(reg.id);
            }
        }
    }

    /// Report the lost stream to its registrations and drop them.
    pub(crate) fn fail_stream(&self, stream_id: u64, peer: &str, reason: &str) {
        for reg in self.registrations_on(stream_id) {
            reg.fail(GatewayError::StreamDisconnected {
                peer: peer.to_string(),
                reason: reason.to_string(),
            });
            self.remove(reg.id);
        }
    }

    /// Where a dropped stream reconnects from.
    pub(crate) async fn resume_position(
        &self,
        stream_id: u64,
        original: StartPosition,
        last_dispatched: Option<u64>,
    ) -> StartPosition {
        let checkpointed = self
            .registrations_on(stream_id)
            .into_iter()
            .find(|r| r.is_replay() && r.checkpointer.is_some());

        if let Some(reg) = checkpointed {
            if let Some(checkpointer) = &reg.checkpointer {
                match checkpointer.load(&self.channel, &reg.listener_name).await {
                    Ok(Some(checkpoint)) => return StartPosition::Block(checkpoint.resume_block()),
                    Ok(None) => {}
                    Err(e) => warn!(
                        registration_id = reg.id,
                        error = %e,
                        "[gateway] Checkpoint load failed on reconnect"
                    ),
                }
            }
        }
        reconnect_start(original, last_dispatched)
    }

    /// Remove a registration; shut its stream down when it was the last one.
    /// Retiring happens outside the arena lock, since it may wait on a
    /// running callback that itself needs the arena.
    fn remove(&self, id: u64) -> Option<Arc<Registration>> {
        let reg = {
            let mut arena = self.arena.lock();
            let reg = arena.registrations.remove(&id)?;
            let stream_in_use = arena
                .registrations
                .values()
                .any(|r| r.stream_id == reg.stream_id);
            if !stream_in_use {
                if let Some(handle) = arena.streams.get(&reg.stream) {
                    if handle.id == reg.stream_id {
                        handle.shut_down(&reg.stream.peer);
                    }
                }
            }
            reg
        };
        reg.retire();
        info!(
            channel = %self.channel,
            registration_id = id,
            listener = %reg.listener_name,
            "[gateway] Listener unregistered"
        );
        Some(reg)
    }
}

/// Manages the event streams and listener registrations of one channel.
pub struct EventSubscription {
    core: Arc<SubscriptionCore>,
    connector: Arc<dyn EventStreamConnector>,
    topology: Arc<ChannelTopology>,
    reconnect: ReconnectPolicy,
    connect_timeout: Duration,
}

impl EventSubscription {
    pub fn new(
        connector: Arc<dyn EventStreamConnector>,
        topology: Arc<ChannelTopology>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            core: Arc::new(SubscriptionCore {
                channel: topology.name().to_string(),
                arena: Mutex::new(Arena::default()),
                next_id: AtomicU64::new(1),
            }),
            connector,
            topology,
            reconnect: config.events.reconnect.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.core.channel
    }

    /// Number of live registrations.
    pub fn listener_count(&self) -> usize {
        self.core.arena.lock().registrations.len()
    }

    /// State of the stream serving `peer`. The live stream is reported when
    /// both a live and a replay stream exist.
    pub fn connection_state(&self, peer: &str) -> Option<ConnectionState> {
        let arena = self.core.arena.lock();
        [false, true].into_iter().find_map(|replay| {
            arena
                .streams
                .get(&StreamKey {
                    peer: peer.to_string(),
                    replay,
                })
                .map(StreamHandle::state)
        })
    }

    /// Disconnect every stream and drop every registration.
    pub fn close(&self) {
        let retired: Vec<_> = {
            let mut arena = self.core.arena.lock();
            for (key, handle) in arena.streams.iter() {
                handle.shut_down(&key.peer);
            }
            arena.registrations.drain().map(|(_, reg)| reg).collect()
        };
        for reg in retired {
            reg.retire();
        }
    }

    fn event_peer(&self, requested: Option<&str>) -> GatewayResult<PeerInfo> {
        if let Some(name) = requested {
            return self.topology.peer(name).cloned();
        }
        self.topology
            .event_peers(None)
            .into_iter()
            .next()
            .ok_or_else(|| {
                GatewayError::InvalidArgument(format!(
                    "no event source peers on channel {}",
                    self.core.channel
                ))
            })
    }

    /// Hold a new registration back until its stream delivers, so nothing
    /// the caller triggers next can slip past it on a stream opened at the
    /// newest block. A stream that does not connect in time takes the
    /// registration down with it.
    async fn wait_connected(
        &self,
        id: u64,
        peer: &str,
        mut connection: watch::Receiver<ConnectionState>,
    ) -> GatewayResult<()> {
        let settled = tokio::time::timeout(
            self.connect_timeout,
            connection.wait_for(|state| *state == ConnectionState::Ready || state.is_terminal()),
        )
        .await
        .map(|seen| seen.map(|state| *state));

        let error = match settled {
            Ok(Ok(ConnectionState::Ready)) => return Ok(()),
            Ok(Ok(state)) => GatewayError::StreamDisconnected {
                peer: peer.to_string(),
                reason: format!("event stream ended in state {state:?} before connecting"),
            },
            Ok(Err(_)) => GatewayError::StreamDisconnected {
                peer: peer.to_string(),
                reason: "event stream task stopped before connecting".to_string(),
            },
            Err(_) => GatewayError::Timeout {
                operation: "event stream connect",
                timeout_ms: self.connect_timeout.as_millis() as u64,
            },
        };
        warn!(
            channel = %self.core.channel,
            registration_id = id,
            peer,
            error = %error,
            "[gateway] Listener dropped, event stream not connected"
        );
        self.core.remove(id);
        Err(error)
    }

    async fn register(
        &self,
        kind: RegistrationKind,
        callback: ListenerCallback,
        options: ListenerOptions,
    ) -> GatewayResult<ListenerHandle> {
        invariant_block_window(options.start_block, options.end_block)?;
        let peer = self.event_peer(options.peer.as_deref())?;
        let key = StreamKey {
            peer: peer.name.clone(),
            replay: options.is_replay(),
        };
        let listener_name = options
            .listener_name
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let start = if key.replay {
            let checkpoint = match &options.checkpointer {
                Some(checkpointer) => checkpointer.load(self.channel(), &listener_name).await?,
                None => None,
            };
            effective_start(options.start_block, checkpoint.as_ref())
        } else {
            StartPosition::Newest
        };

        let unregister_after_event = options
            .unregister_after_event
            .unwrap_or(matches!(kind, RegistrationKind::Commit(TxFilter::Id(_))));
        let window = Window {
            start: options.start_block,
            end: options.end_block,
        };

        let id = self.core.next_id();
        let (task, connection) = {
            let mut arena = self.core.arena.lock();
            if key.replay && arena.registrations.values().any(|r| r.stream == key) {
                return Err(GatewayError::ReplayAlreadyRegistered { peer: peer.name });
            }

            let reusable = arena
                .streams
                .get(&key)
                .filter(|h| !h.state().is_terminal())
                .map(|h| (h.id, h.state.subscribe()));
            let (stream_id, task, connection) = match reusable {
                Some((stream_id, connection)) => (stream_id, None, connection),
                None => {
                    let stream_id = self.core.next_id();
                    let (shutdown_tx, shutdown_rx) = watch::channel(false);
                    let (state, connection) = watch::channel(ConnectionState::Idle);
                    let state = Arc::new(state);
                    arena.streams.insert(
                        key.clone(),
                        StreamHandle {
                            id: stream_id,
                            state: state.clone(),
                            shutdown: shutdown_tx,
                        },
                    );
                    let task = StreamTask {
                        core: Arc::downgrade(&self.core),
                        connector: self.connector.clone(),
                        peer: peer.clone(),
                        key: key.clone(),
                        stream_id,
                        start,
                        policy: self.reconnect.clone(),
                        connect_timeout: self.connect_timeout,
                        state,
                        shutdown: shutdown_rx,
                    };
                    (stream_id, Some(task), connection)
                }
            };

            let registration = Registration::new(
                id,
                self.core.channel.clone(),
                listener_name.clone(),
                kind,
                key.clone(),
                stream_id,
                window,
                options.filtered,
                unregister_after_event,
                options.checkpointer.clone(),
                callback,
            );
            arena.registrations.insert(id, Arc::new(registration));
            (task, connection)
        };
        if let Some(task) = task {
            task.spawn();
        }
        self.wait_connected(id, &peer.name, connection).await?;

        info!(
            channel = %self.core.channel,
            registration_id = id,
            peer = %peer.name,
            listener = %listener_name,
            replay = key.replay,
            ?start,
            "[gateway] Listener registered"
        );
        Ok(ListenerHandle {
            id,
            channel: self.core.channel.clone(),
            peer: peer.name,
            listener_name,
        })
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl EventApi for EventSubscription {
    async fn add_commit_listener(
        &self,
        filter: TxFilter,
        callback: ListenerCallback,
        options: ListenerOptions,
    ) -> GatewayResult<ListenerHandle> {
        self.register(RegistrationKind::Commit(filter), callback, options)
            .await
    }

    async fn add_block_listener(
        &self,
        callback: ListenerCallback,
        options: ListenerOptions,
    ) -> GatewayResult<ListenerHandle> {
        self.register(RegistrationKind::Block, callback, options).await
    }

    fn unregister(&self, handle: &ListenerHandle) -> GatewayResult<()> {
        if handle.channel != self.core.channel {
            return Err(GatewayError::UnknownRegistration(handle.id));
        }
        self.core
            .remove(handle.id)
            .map(|_| ())
            .ok_or(GatewayError::UnknownRegistration(handle.id))
    }
}
