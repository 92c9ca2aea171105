//! Notification hub: maps user id to the live connection handle and routes events to it.
//!
//! All registry mutation happens on the [`Dispatcher`] task. Callers only push requests
//! into its intake queues, so registration, unregistration and sends never block on a
//! slow client. Reads (`is_connected`, `connection_count`) go straight to the map.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::connection::{ConnectionHandle, HandleId, OfferError, UserId};
use crate::metrics::HubMetrics;

/// A notification waiting for dispatch.
#[derive(Debug)]
struct Event {
    user_id: UserId,
    kind: String,
    payload: serde_json::Value,
}

/// Wire shape read by the client-side listener.
#[derive(Serialize)]
struct WireEvent<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: &'a serde_json::Value,
}

struct Shared {
    clients: DashMap<UserId, ConnectionHandle>,
    metrics: HubMetrics,
}

/// Cheap, cloneable front door of the hub. Constructed once at startup and injected
/// wherever notifications originate.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<Shared>,
    register_tx: mpsc::UnboundedSender<ConnectionHandle>,
    unregister_tx: mpsc::UnboundedSender<HandleId>,
    event_tx: mpsc::Sender<Event>,
}

/// The dispatch loop. Owns the intake receivers, so it can only be run once.
pub struct Dispatcher {
    shared: Arc<Shared>,
    /// Handles displaced by a reconnect. Never dispatched to; kept until their own
    /// adapter unregisters so the old session stays open.
    retired: HashMap<HandleId, ConnectionHandle>,
    register_rx: mpsc::UnboundedReceiver<ConnectionHandle>,
    unregister_rx: mpsc::UnboundedReceiver<HandleId>,
    event_rx: mpsc::Receiver<Event>,
}

impl Hub {
    /// Build a hub whose send queue holds at most `intake_capacity` pending events.
    /// The returned [`Dispatcher`] must be spawned for anything to be delivered.
    pub fn new(intake_capacity: usize) -> Result<(Hub, Dispatcher), prometheus::Error> {
        let shared = Arc::new(Shared {
            clients: DashMap::new(),
            metrics: HubMetrics::new()?,
        });
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(intake_capacity.max(1));

        let hub = Hub {
            shared: shared.clone(),
            register_tx,
            unregister_tx,
            event_tx,
        };
        let dispatcher = Dispatcher {
            shared,
            retired: HashMap::new(),
            register_rx,
            unregister_rx,
            event_rx,
        };
        Ok((hub, dispatcher))
    }

    /// Make `handle` the live connection for its user, replacing any previous one.
    pub fn register(&self, handle: ConnectionHandle) {
        let id = handle.id();
        if self.register_tx.send(handle).is_err() {
            // The handle is dropped here, which closes its mailbox.
            tracing::warn!(user_id = id.user_id, conn_id = id.conn_id, "hub not running, register dropped");
        }
    }

    /// Remove the registration identified by `id` if it is still the live one.
    /// Safe to call more than once and after the handle was replaced or evicted.
    pub fn unregister(&self, id: HandleId) {
        if self.unregister_tx.send(id).is_err() {
            tracing::debug!(user_id = id.user_id, conn_id = id.conn_id, "hub not running, unregister ignored");
        }
    }

    /// Queue an event for `user_id`. Returns immediately; delivery is best effort.
    pub fn send_to_user<P: Serialize>(&self, user_id: UserId, kind: &str, payload: P) {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(user_id, kind, "serialize hub payload: {:?}", e);
                return;
            }
        };
        let event = Event {
            user_id,
            kind: kind.to_string(),
            payload,
        };
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.shared.metrics.dropped_intake.inc();
                tracing::warn!(user_id, kind = %event.kind, "hub intake full, event dropped");
            }
            Err(TrySendError::Closed(event)) => {
                tracing::warn!(user_id, kind = %event.kind, "hub not running, event dropped");
            }
        }
    }

    /// Send the same event to each of `user_ids`, in order.
    pub fn send_to_users<P: Serialize>(&self, user_ids: &[UserId], kind: &str, payload: P) {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(kind, "serialize hub payload: {:?}", e);
                return;
            }
        };
        for &user_id in user_ids {
            self.send_to_user(user_id, kind, &payload);
        }
    }

    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.shared.clients.contains_key(&user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.clients.len()
    }

    pub fn metrics(&self) -> &HubMetrics {
        &self.shared.metrics
    }
}

impl Dispatcher {
    /// Process intake until every [`Hub`] clone is gone. In the server that is never;
    /// the loop lives for the whole process.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                // Polled in this order so an adapter's register is always applied
                // before its own later unregister.
                biased;
                Some(handle) = self.register_rx.recv() => self.register(handle),
                Some(id) = self.unregister_rx.recv() => self.unregister(id),
                Some(event) = self.event_rx.recv() => self.dispatch(event),
                else => break,
            }
        }
        tracing::info!("hub dispatcher stopped");
    }

    fn register(&mut self, handle: ConnectionHandle) {
        let id = handle.id();
        if let Some(previous) = self.shared.clients.insert(id.user_id, handle) {
            tracing::debug!(
                user_id = id.user_id,
                old_conn_id = previous.id().conn_id,
                "replacing existing connection"
            );
            self.retired.insert(previous.id(), previous);
        }
        let total = self.shared.clients.len();
        self.shared.metrics.connections.set(total as i64);
        tracing::info!(user_id = id.user_id, conn_id = id.conn_id, total, "client registered");
    }

    fn unregister(&mut self, id: HandleId) {
        let removed = self
            .shared
            .clients
            .remove_if(&id.user_id, |_, current| current.id() == id);
        if removed.is_some() {
            let total = self.shared.clients.len();
            self.shared.metrics.connections.set(total as i64);
            tracing::info!(user_id = id.user_id, conn_id = id.conn_id, total, "client unregistered");
        } else if self.retired.remove(&id).is_some() {
            tracing::debug!(user_id = id.user_id, conn_id = id.conn_id, "replaced connection released");
        } else {
            tracing::debug!(user_id = id.user_id, conn_id = id.conn_id, "stale unregister ignored");
        }
    }

    fn dispatch(&self, event: Event) {
        let user_id = event.user_id;
        let text = match serde_json::to_string(&WireEvent {
            kind: &event.kind,
            payload: &event.payload,
        }) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(user_id, kind = %event.kind, "encode hub event: {:?}", e);
                return;
            }
        };

        // The map guard must be released before any removal on the same shard.
        let outcome = self
            .shared
            .clients
            .get(&user_id)
            .map(|handle| (handle.id(), handle.offer(text)));

        match outcome {
            None => {
                self.shared.metrics.dropped_offline.inc();
                tracing::debug!(user_id, kind = %event.kind, "user not connected, event dropped");
            }
            Some((_, Ok(()))) => {
                self.shared.metrics.delivered.inc();
                tracing::debug!(user_id, kind = %event.kind, "event queued");
            }
            Some((id, Err(reason))) => self.evict(id, reason),
        }
    }

    fn evict(&self, id: HandleId, reason: OfferError) {
        if self
            .shared
            .clients
            .remove_if(&id.user_id, |_, current| current.id() == id)
            .is_some()
        {
            self.shared.metrics.evictions.inc();
            let total = self.shared.clients.len();
            self.shared.metrics.connections.set(total as i64);
            tracing::warn!(
                user_id = id.user_id,
                conn_id = id.conn_id,
                ?reason,
                total,
                "mailbox unusable, connection evicted"
            );
        }
    }
}
