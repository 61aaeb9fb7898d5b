//! In-memory collaborators
//!
//! Single-process implementations of every collaborator trait. The node binary
//! runs on these when no external backends are wired in, and the test suites
//! use them to observe exactly what the engine did.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::moderation::broadcast::ChatSink;
use crate::moderation::collaborators::{
    Broadcaster, Enforcer, Envelope, Issuer, Presence, PunishmentStore, Transport, UserDirectory,
};
use crate::moderation::formats::AlertColor;
use crate::moderation::punishment::{PunishmentRecord, PunishmentType};

// ============================================================================
// Store
// ============================================================================

/// Record store kept in a map, keyed by record id
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, PunishmentRecord>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `save` fail (persistence outage)
    pub fn set_failing(&self, failing: bool) {
        self.fail_saves.store(failing, Ordering::Release);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Acquire)
    }

    pub async fn get(&self, id: Uuid) -> Option<PunishmentRecord> {
        self.records.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl PunishmentStore for MemoryStore {
    async fn save(&self, record: &PunishmentRecord) -> Result<()> {
        if self.fail_saves.load(Ordering::Acquire) {
            return Err(anyhow!("store unavailable"));
        }

        self.records.write().await.insert(record.id(), record.clone());
        self.saves.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn find_active(
        &self,
        target: Uuid,
        kinds: &[PunishmentType],
    ) -> Result<Option<PunishmentRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.target_id() == target && kinds.contains(&r.kind()) && r.is_active())
            .max_by_key(|r| r.issued_at())
            .cloned())
    }

    async fn deactivate(&self, record_id: Uuid, by: Option<Uuid>) -> Result<bool> {
        let records = self.records.read().await;
        match records.get(&record_id) {
            Some(record) => {
                record.deactivate();
                debug!(record = %record_id, by = ?by, "Deactivated stored punishment");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// Directory
// ============================================================================

struct DirectoryEntry {
    name: String,
    fingerprints: HashSet<String>,
}

/// Player directory with optional artificial lookup latency
#[derive(Default)]
pub struct MemoryDirectory {
    entries: DashMap<Uuid, DirectoryEntry>,
    latency: Option<Duration>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            latency: Some(latency),
        }
    }

    pub fn register<'a>(
        &self,
        identity: Uuid,
        name: &str,
        fingerprints: impl IntoIterator<Item = &'a str>,
    ) {
        self.entries.insert(
            identity,
            DirectoryEntry {
                name: name.to_string(),
                fingerprints: fingerprints.into_iter().map(str::to_string).collect(),
            },
        );
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn known_fingerprints(&self, identity: Uuid) -> Result<HashSet<String>> {
        self.delay().await;
        Ok(self
            .entries
            .get(&identity)
            .map(|entry| entry.fingerprints.clone())
            .unwrap_or_default())
    }

    async fn display_name(&self, identity: Uuid) -> Result<String> {
        self.delay().await;
        self.entries
            .get(&identity)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| anyhow!("unknown identity {}", identity))
    }
}

// ============================================================================
// Presence
// ============================================================================

/// Connected players and whether each holds the exemption capability
#[derive(Default)]
pub struct MemoryPresence {
    online: DashMap<Uuid, bool>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, identity: Uuid, exempt: bool) {
        self.online.insert(identity, exempt);
    }

    pub fn disconnect(&self, identity: Uuid) {
        self.online.remove(&identity);
    }
}

impl Presence for MemoryPresence {
    fn is_online(&self, identity: Uuid) -> bool {
        self.online.contains_key(&identity)
    }

    fn is_exempt(&self, identity: Uuid) -> bool {
        self.online.get(&identity).is_some_and(|entry| *entry.value())
    }

    fn online_players(&self) -> Vec<Uuid> {
        self.online.iter().map(|entry| *entry.key()).collect()
    }
}

// ============================================================================
// Enforcement
// ============================================================================

/// Enforcer that logs and remembers every restriction it was asked to apply
#[derive(Default)]
pub struct RecordingEnforcer {
    applied: Mutex<Vec<(Uuid, PunishmentType)>>,
}

impl RecordingEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// (record id, type) in application order
    pub fn applied(&self) -> Vec<(Uuid, PunishmentType)> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_for(&self, record_id: Uuid) -> usize {
        self.applied()
            .iter()
            .filter(|(id, _)| *id == record_id)
            .count()
    }
}

impl Enforcer for RecordingEnforcer {
    fn apply_restriction(&self, record: &PunishmentRecord, silent: bool) {
        info!(
            record = %record.id(),
            target = %record.target_id(),
            kind = ?record.kind(),
            silent,
            "Applying restriction"
        );
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((record.id(), record.kind()));
    }
}

// ============================================================================
// Transport
// ============================================================================

/// In-process cluster bus. Every joined node sees every envelope, its own
/// included; NetworkSync drops its own echoes.
#[derive(Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<Envelope>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Attach a node: returns its outbound transport and inbound queue.
    /// Must be called inside a tokio runtime.
    pub fn join(&self) -> (Arc<BusTransport>, mpsc::Receiver<Envelope>) {
        let mut subscription = self.sender.subscribe();
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        tokio::spawn(async move {
            loop {
                match subscription.recv().await {
                    Ok(envelope) => {
                        if inbound_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Bus subscriber lagged, envelopes dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let transport = Arc::new(BusTransport {
            sender: self.sender.clone(),
            sent: AtomicUsize::new(0),
        });
        (transport, inbound_rx)
    }
}

pub struct BusTransport {
    sender: broadcast::Sender<Envelope>,
    sent: AtomicUsize,
}

impl BusTransport {
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for BusTransport {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        self.sent.fetch_add(1, Ordering::AcqRel);
        // No subscribers is not an error for a best-effort broadcast
        let _ = self.sender.send(envelope);
        Ok(())
    }
}

/// Transport that only records what it was asked to send
#[derive(Default)]
pub struct CapturingTransport {
    sent: Mutex<Vec<Envelope>>,
}

impl CapturingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for CapturingTransport {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);
        Ok(())
    }
}

// ============================================================================
// Announcements
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub record_id: Uuid,
    pub silent: bool,
    pub origin_server: Option<String>,
}

/// Broadcaster that remembers every call
#[derive(Default)]
pub struct RecordingBroadcaster {
    announcements: Mutex<Vec<Announcement>>,
    warnings: Mutex<Vec<(Option<Uuid>, String)>>,
    alerts: Mutex<Vec<String>>,
    reminders: Mutex<Vec<(Uuid, AlertColor)>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announcements(&self) -> Vec<Announcement> {
        lock_clone(&self.announcements)
    }

    pub fn warnings(&self) -> Vec<(Option<Uuid>, String)> {
        lock_clone(&self.warnings)
    }

    pub fn alerts(&self) -> Vec<String> {
        lock_clone(&self.alerts)
    }

    pub fn reminders(&self) -> Vec<(Uuid, AlertColor)> {
        lock_clone(&self.reminders)
    }
}

fn lock_clone<T: Clone>(items: &Mutex<Vec<T>>) -> Vec<T> {
    items.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

fn lock_push<T>(items: &Mutex<Vec<T>>, item: T) {
    items.lock().unwrap_or_else(PoisonError::into_inner).push(item);
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn announce(
        &self,
        record: Arc<PunishmentRecord>,
        silent: bool,
        origin_server: Option<&str>,
        _viewer: Option<&Issuer>,
    ) {
        lock_push(
            &self.announcements,
            Announcement {
                record_id: record.id(),
                silent,
                origin_server: origin_server.map(str::to_string),
            },
        );
    }

    fn warn_issuer(&self, issuer: &Issuer, message: &str) {
        lock_push(&self.warnings, (issuer.id, message.to_string()));
    }

    fn alert_staff(&self, message: &str) {
        lock_push(&self.alerts, message.to_string());
    }

    fn remind_banned(&self, identity: Uuid, color: AlertColor) {
        lock_push(&self.reminders, (identity, color));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMessage {
    Global(String),
    Staff(String),
    Direct(Option<Uuid>, String),
    ActionBar(Uuid, AlertColor),
}

/// Chat sink that remembers every delivered message
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<SinkMessage>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<SinkMessage> {
        lock_clone(&self.messages)
    }
}

impl ChatSink for RecordingSink {
    fn send_global(&self, message: &str) {
        lock_push(&self.messages, SinkMessage::Global(message.to_string()));
    }

    fn send_staff(&self, message: &str) {
        lock_push(&self.messages, SinkMessage::Staff(message.to_string()));
    }

    fn send_to(&self, viewer: Option<Uuid>, message: &str) {
        lock_push(&self.messages, SinkMessage::Direct(viewer, message.to_string()));
    }

    fn send_action_bar(&self, identity: Uuid, _message: &str, color: AlertColor) {
        lock_push(&self.messages, SinkMessage::ActionBar(identity, color));
    }
}
