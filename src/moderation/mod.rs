//! Punishment State Engine
//!
//! Issues punishments, keeps the per-node caches consistent with them, and
//! replays punishments issued elsewhere in the cluster.
//!
//! ## Architecture
//!
//! ```text
//!   issue() ──► ┌───────────────────┐ ──► PunishmentStore (background)
//!               │ PunishmentEngine  │ ──► Enforcer
//!   peers  ──►  │ (apply pipeline)  │ ──► Broadcaster
//!   (sync)      └───────────────────┘ ──► NetworkSync ──► peers
//!                        │
//!                        ▼
//!               ┌───────────────────┐     ┌─────────────────┐
//!               │ CacheLayer        │◄────│ EvasionDetector │
//!               │ mutes, evasion,   │     │ (join checks)   │
//!               │ pardons, recents  │     └─────────────────┘
//!               └───────────────────┘
//!                        ▲
//!                        │
//!               ban reminder loop
//! ```
//!
//! ## Consistency Model
//!
//! - The store is the source of truth, every cache is derived state
//! - A record id is applied at most once per node
//! - Only locally issued records are persisted and propagated
//! - Remote delivery is best effort (no ack, no retry)

mod broadcast;
mod cache;
mod collaborators;
mod engine;
mod error;
mod evasion;
pub mod formats;
pub mod memory;
mod punishment;
mod reminder;
mod sync;

pub use broadcast::{ChatBroadcaster, ChatSink, TracingSink};
pub use cache::{CacheLayer, Fingerprints};
pub use collaborators::{
    Broadcaster, Enforcer, Envelope, Issuer, Presence, PunishmentStore, Transport, UserDirectory,
};
pub use engine::{ApplyOutcome, BAN_TYPES, Collaborators, Issued, Origin, PunishmentEngine};
pub use error::PunishmentError;
pub use evasion::{EvasionAlert, EvasionDetector};
pub use formats::AlertColor;
pub use punishment::{PunishmentRecord, PunishmentType};
pub use reminder::{remind_once, spawn_ban_reminder};
pub use sync::{NetworkEvent, NetworkSync, SyncTasks, spawn_receiver};
