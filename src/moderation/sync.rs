//! Cross-node Punishment Sync
//!
//! Outbound, every locally issued punishment becomes a `NetworkEvent` handed to
//! the transport. Inbound, events from peers are decoded on the receive task,
//! the caches the record's type owns are refreshed, and the record is queued for the apply
//! worker. The worker is the node's primary processing context: enforcement
//! never runs inline on the receive path.
//!
//! ```text
//! transport ──► receiver task ──(dedupe, refresh)──► apply queue ──► worker
//!                                                                     │
//!                                          engine.apply(Origin::Remote)
//! ```
//!
//! Delivery is best effort. A record already applied (or already queued) on
//! this node is dropped before it touches any cache, and remote applies never
//! propagate again.

use anyhow::{Context, Result};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::moderation::collaborators::{Envelope, Transport};
use crate::moderation::engine::{Origin, PunishmentEngine};
use crate::moderation::punishment::{PunishmentRecord, PunishmentType};

/// Logical message shapes exchanged between nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkEvent {
    /// A punishment to replay on every peer
    Punishment {
        record: PunishmentRecord,
        origin_server: String,
    },
    /// Cache invalidation only, no new record. Scoped to the caches `kind` owns.
    Refresh { target: Uuid, kind: PunishmentType },
}

impl NetworkEvent {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize network event")
    }

    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).context("Failed to deserialize network event")
    }
}

/// Outbound half, owned by the engine
pub struct NetworkSync {
    node_id: String,
    transport: Arc<dyn Transport>,
    sent: AtomicU64,
}

impl NetworkSync {
    pub fn new(node_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            node_id: node_id.into(),
            transport,
            sent: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Events handed to the transport so far
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }

    /// Send a punishment to every peer, stamped with this node as origin
    pub async fn broadcast(&self, record: &PunishmentRecord) {
        let event = NetworkEvent::Punishment {
            record: record.clone(),
            origin_server: self.node_id.clone(),
        };
        self.emit(event).await;
    }

    /// Ask peers to drop the `kind` state they cache for `target`
    pub async fn send_refresh(&self, target: Uuid, kind: PunishmentType) {
        self.emit(NetworkEvent::Refresh { target, kind }).await;
    }

    async fn emit(&self, event: NetworkEvent) {
        // CREATED
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Dropping unserializable network event");
                return;
            }
        };

        let envelope = Envelope {
            origin_server: self.node_id.clone(),
            payload,
        };

        // SENT (no ack, no retry)
        match self.transport.send(envelope).await {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::AcqRel);
                debug!(node = %self.node_id, "Network event sent");
            }
            Err(e) => {
                warn!(node = %self.node_id, error = %e, "Failed to send network event");
            }
        }
    }
}

/// A peer record waiting for the apply worker
struct QueuedApply {
    record: Arc<PunishmentRecord>,
    origin_server: String,
}

/// Handles of the inbound tasks
pub struct SyncTasks {
    pub receiver: JoinHandle<()>,
    pub worker: JoinHandle<()>,
}

impl SyncTasks {
    pub fn abort(&self) {
        self.receiver.abort();
        self.worker.abort();
    }
}

/// Start the receive task and the apply worker for `engine`
pub fn spawn_receiver(
    engine: Arc<PunishmentEngine>,
    mut inbound: mpsc::Receiver<Envelope>,
) -> SyncTasks {
    let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<QueuedApply>();
    let in_flight: Arc<DashSet<Uuid>> = Arc::new(DashSet::new());

    let worker_engine = engine.clone();
    let worker_in_flight = in_flight.clone();
    let worker = tokio::spawn(async move {
        while let Some(queued) = queue_rx.recv().await {
            let id = queued.record.id();
            let outcome = worker_engine
                .apply(queued.record, true, Origin::Remote(queued.origin_server))
                .await;
            worker_in_flight.remove(&id);
            debug!(record = %id, outcome = ?outcome, "Applied peer punishment");
        }
    });

    let receiver = tokio::spawn(async move {
        while let Some(envelope) = inbound.recv().await {
            handle_envelope(&engine, &in_flight, &queue_tx, envelope);
        }
        info!(node = %engine.service(), "Network receiver stopped");
    });

    SyncTasks { receiver, worker }
}

fn handle_envelope(
    engine: &PunishmentEngine,
    in_flight: &DashSet<Uuid>,
    queue: &mpsc::UnboundedSender<QueuedApply>,
    envelope: Envelope,
) {
    if envelope.origin_server == engine.service() {
        return;
    }

    let event = match NetworkEvent::decode(&envelope.payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(origin = %envelope.origin_server, error = %e, "Skipping undecodable event");
            return;
        }
    };

    match event {
        NetworkEvent::Punishment {
            record,
            origin_server,
        } => {
            let id = record.id();
            if engine.has_applied(id) || !in_flight.insert(id) {
                debug!(record = %id, origin = %origin_server, "Duplicate punishment event ignored");
                return;
            }

            engine.refresh(record.target_id(), record.kind());

            let queued = QueuedApply {
                record: Arc::new(record),
                origin_server,
            };
            if queue.send(queued).is_err() {
                in_flight.remove(&id);
                warn!(record = %id, "Apply worker stopped, dropping peer punishment");
            }
        }
        NetworkEvent::Refresh { target, kind } => {
            debug!(target = %target, kind = ?kind, origin = %envelope.origin_server, "Refreshing punishments");
            engine.refresh(target, kind);
        }
    }
}
