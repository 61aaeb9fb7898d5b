//! External collaborator interfaces
//!
//! The engine owns no storage, directory, transport or game hooks. Each of
//! those is injected behind one of these traits so a node can be wired to its
//! real backends and tests can swap in the in-memory versions.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::moderation::formats::AlertColor;
use crate::moderation::punishment::{PunishmentRecord, PunishmentType};

/// Durable record store
#[async_trait]
pub trait PunishmentStore: Send + Sync {
    async fn save(&self, record: &PunishmentRecord) -> Result<()>;

    /// Most recent active record of one of `kinds` for `target`
    async fn find_active(
        &self,
        target: Uuid,
        kinds: &[PunishmentType],
    ) -> Result<Option<PunishmentRecord>>;

    /// Mark a stored record inactive. Returns false if it was not found.
    async fn deactivate(&self, record_id: Uuid, by: Option<Uuid>) -> Result<bool>;
}

/// Player directory (known addresses, display names)
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn known_fingerprints(&self, identity: Uuid) -> Result<HashSet<String>>;

    async fn display_name(&self, identity: Uuid) -> Result<String>;
}

/// Performs the connection-level effect of a punishment
pub trait Enforcer: Send + Sync {
    fn apply_restriction(&self, record: &PunishmentRecord, silent: bool);
}

/// Live view of who is connected to this node
pub trait Presence: Send + Sync {
    fn is_online(&self, identity: Uuid) -> bool;

    /// Target holds the exemption capability
    fn is_exempt(&self, identity: Uuid) -> bool;

    fn online_players(&self) -> Vec<Uuid>;
}

/// Serialized event as handed to the cluster transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin_server: String,
    pub payload: String,
}

/// Best-effort fan-out to every other node
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<()>;
}

/// Who asked for a punishment to be applied on this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuer {
    /// None for the console or an automated system
    pub id: Option<Uuid>,
    /// May punish exempt targets
    pub can_override: bool,
}

impl Issuer {
    pub fn console() -> Self {
        Self {
            id: None,
            can_override: true,
        }
    }

    pub fn player(id: Uuid, can_override: bool) -> Self {
        Self {
            id: Some(id),
            can_override,
        }
    }
}

/// Announcement hook
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Announce an applied punishment. `viewer` receives feedback when
    /// broadcasting is disabled.
    async fn announce(
        &self,
        record: Arc<PunishmentRecord>,
        silent: bool,
        origin_server: Option<&str>,
        viewer: Option<&Issuer>,
    );

    /// Tell an issuer their punishment was not applied
    fn warn_issuer(&self, issuer: &Issuer, message: &str);

    /// Staff-only alert (ban evasion)
    fn alert_staff(&self, message: &str);

    /// Overlay shown to a connected, observer-banned player
    fn remind_banned(&self, identity: Uuid, color: AlertColor);
}
