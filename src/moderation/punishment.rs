//! Punishment Records
//!
//! A record describes one punishment instance. Every field is fixed at creation
//! except the `active` flag, which may only move from true to false. Caches hold
//! records behind an `Arc` so that a pardon seen by one holder is seen by all.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::moderation::error::PunishmentError;

/// Kinds of punishment (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PunishmentType {
    Warn,
    Kick,
    Mute,
    Ban,
    TempBan,
    NameBan,
}

impl PunishmentType {
    pub const ALL: [PunishmentType; 6] = [
        PunishmentType::Warn,
        PunishmentType::Kick,
        PunishmentType::Mute,
        PunishmentType::Ban,
        PunishmentType::TempBan,
        PunishmentType::NameBan,
    ];

    /// Bans remove the player from the network and feed evasion detection
    pub fn is_ban(&self) -> bool {
        matches!(
            self,
            PunishmentType::Ban | PunishmentType::TempBan | PunishmentType::NameBan
        )
    }

    /// Types that require a duration to be meaningful
    pub fn requires_duration(&self) -> bool {
        matches!(self, PunishmentType::TempBan)
    }

    /// Past-tense verb used in broadcasts ("Steve was banned by ...")
    pub fn verb(&self) -> &'static str {
        match self {
            PunishmentType::Warn => "warned",
            PunishmentType::Kick => "kicked",
            PunishmentType::Mute => "muted",
            PunishmentType::Ban => "banned",
            PunishmentType::TempBan => "temporarily banned",
            PunishmentType::NameBan => "name banned",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PunishmentType::Warn => "Warn",
            PunishmentType::Kick => "Kick",
            PunishmentType::Mute => "Mute",
            PunishmentType::Ban => "Ban",
            PunishmentType::TempBan => "Temp Ban",
            PunishmentType::NameBan => "Name Ban",
        }
    }
}

impl fmt::Display for PunishmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PunishmentType {
    type Err = PunishmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "warn" | "warning" => Ok(PunishmentType::Warn),
            "kick" => Ok(PunishmentType::Kick),
            "mute" => Ok(PunishmentType::Mute),
            "ban" => Ok(PunishmentType::Ban),
            "tempban" => Ok(PunishmentType::TempBan),
            "nameban" => Ok(PunishmentType::NameBan),
            _ => Err(PunishmentError::UnknownType(s.to_string())),
        }
    }
}

/// One issued punishment
#[derive(Debug, Serialize, Deserialize)]
#[serde(try_from = "PunishmentWire", into = "PunishmentWire")]
pub struct PunishmentRecord {
    id: Uuid,
    target_id: Uuid,
    /// None when issued by the console or an automated system
    issuer_id: Option<Uuid>,
    kind: PunishmentType,
    reason: String,
    issued_at: DateTime<Utc>,
    /// None means permanent
    duration: Option<Duration>,
    active: AtomicBool,
    /// Node that first issued this punishment
    source_server: String,
}

impl PunishmentRecord {
    /// Mint a new record with a fresh identifier and the current time
    pub fn new(
        kind: PunishmentType,
        target_id: Uuid,
        issuer_id: Option<Uuid>,
        reason: impl Into<String>,
        duration: Option<Duration>,
        active: bool,
        source_server: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id,
            issuer_id,
            kind,
            reason: reason.into(),
            issued_at: Utc::now(),
            duration,
            active: AtomicBool::new(active),
            source_server: source_server.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target_id(&self) -> Uuid {
        self.target_id
    }

    pub fn issuer_id(&self) -> Option<Uuid> {
        self.issuer_id
    }

    pub fn kind(&self) -> PunishmentType {
        self.kind
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn source_server(&self) -> &str {
        &self.source_server
    }

    /// `issued_at + duration`, or None for permanent punishments. A duration
    /// past the end of the calendar never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.duration
            .and_then(|d| self.issued_at.checked_add_signed(d))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    /// Stored flag only, ignoring expiry
    pub fn is_flagged_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Active flag set and not yet expired
    pub fn is_active(&self) -> bool {
        self.is_flagged_active() && !self.is_expired(Utc::now())
    }

    /// Mark inactive. Returns true if this call flipped the flag.
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    /// Time left before expiry (None for permanent or already expired)
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at()
            .map(|at| at - now)
            .filter(|left| *left > Duration::zero())
    }
}

/// Truncate to whole milliseconds, the precision records travel with
pub fn wire_precision(duration: Duration) -> Duration {
    Duration::milliseconds(duration.num_milliseconds())
}

/// Reject a duration whose expiry cannot be represented
pub fn check_expiry(issued_at: DateTime<Utc>, duration: Duration) -> Result<(), PunishmentError> {
    issued_at
        .checked_add_signed(duration)
        .map(|_| ())
        .ok_or(PunishmentError::DurationOutOfRange)
}

impl Clone for PunishmentRecord {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            target_id: self.target_id,
            issuer_id: self.issuer_id,
            kind: self.kind,
            reason: self.reason.clone(),
            issued_at: self.issued_at,
            duration: self.duration,
            active: AtomicBool::new(self.is_flagged_active()),
            source_server: self.source_server.clone(),
        }
    }
}

impl PartialEq for PunishmentRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PunishmentRecord {}

/// Serialized shape of a record (durations in whole milliseconds)
#[derive(Debug, Serialize, Deserialize)]
struct PunishmentWire {
    id: Uuid,
    target_id: Uuid,
    issuer_id: Option<Uuid>,
    kind: PunishmentType,
    reason: String,
    issued_at: DateTime<Utc>,
    duration_ms: Option<i64>,
    active: bool,
    source_server: String,
}

impl TryFrom<PunishmentWire> for PunishmentRecord {
    type Error = PunishmentError;

    fn try_from(wire: PunishmentWire) -> Result<Self, Self::Error> {
        let duration = match wire.duration_ms {
            Some(ms) if ms < 0 => return Err(PunishmentError::NegativeDuration),
            Some(ms) => {
                let duration =
                    Duration::try_milliseconds(ms).ok_or(PunishmentError::DurationOutOfRange)?;
                check_expiry(wire.issued_at, duration)?;
                Some(duration)
            }
            None => None,
        };

        Ok(Self {
            id: wire.id,
            target_id: wire.target_id,
            issuer_id: wire.issuer_id,
            kind: wire.kind,
            reason: wire.reason,
            issued_at: wire.issued_at,
            duration,
            active: AtomicBool::new(wire.active),
            source_server: wire.source_server,
        })
    }
}

impl From<PunishmentRecord> for PunishmentWire {
    fn from(record: PunishmentRecord) -> Self {
        Self {
            id: record.id,
            target_id: record.target_id,
            issuer_id: record.issuer_id,
            kind: record.kind,
            active: record.is_flagged_active(),
            reason: record.reason,
            issued_at: record.issued_at,
            duration_ms: record.duration.map(|d| d.num_milliseconds()),
            source_server: record.source_server,
        }
    }
}
