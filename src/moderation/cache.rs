//! Punishment Cache Layer
//!
//! In-memory lookup structures used to answer "is this identity restricted"
//! without a store round-trip. All entries are derived state; the store stays
//! the source of truth.
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┬─────────────────────────┐
//! │ cache            │ value                    │ eviction                │
//! ├──────────────────┼──────────────────────────┼─────────────────────────┤
//! │ mutes            │ active mute record       │ manual + check on read  │
//! │ ban_evasion      │ known fingerprints       │ TTL (evasion_expiry)    │
//! │ observer_bans    │ ban record               │ manual                  │
//! │ pardoned         │ pardon timestamp         │ manual                  │
//! │ match_bans       │ kick record              │ TTL, only if configured │
//! │ recents          │ record (by record id)    │ TTL (recent_retention)  │
//! └──────────────────┴──────────────────────────┴─────────────────────────┘
//! ```
//!
//! Writers are crate-internal: only the engine and the evasion detector mutate.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::sync::Cache;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::moderation::punishment::{PunishmentRecord, PunishmentType};

/// Set of network fingerprints (host addresses) seen for one identity
pub type Fingerprints = Arc<HashSet<String>>;

pub struct CacheLayer {
    mutes: DashMap<Uuid, Arc<PunishmentRecord>>,
    ban_evasion: Cache<Uuid, Fingerprints>,
    observer_bans: DashMap<Uuid, Arc<PunishmentRecord>>,
    pardoned: DashMap<Uuid, DateTime<Utc>>,
    match_bans: Option<Cache<Uuid, Arc<PunishmentRecord>>>,
    recents: Cache<Uuid, Arc<PunishmentRecord>>,
}

impl CacheLayer {
    pub fn new(config: &CacheConfig) -> Self {
        let match_bans = config
            .match_ban_duration
            .map(|ttl| Cache::builder().time_to_live(ttl).build());

        Self {
            mutes: DashMap::new(),
            ban_evasion: Cache::builder()
                .time_to_live(config.evasion_expiry)
                .build(),
            observer_bans: DashMap::new(),
            pardoned: DashMap::new(),
            match_bans,
            recents: Cache::builder()
                .time_to_live(config.recent_retention)
                .build(),
        }
    }

    // ------------------------------------------------------------------
    // Mutes
    // ------------------------------------------------------------------

    pub(crate) fn put_mute(&self, record: Arc<PunishmentRecord>) {
        self.mutes.insert(record.target_id(), record);
    }

    pub(crate) fn remove_mute(&self, target: &Uuid) -> Option<Arc<PunishmentRecord>> {
        self.mutes.remove(target).map(|(_, record)| record)
    }

    /// Raw lookup, no staleness check
    pub(crate) fn peek_mute(&self, target: &Uuid) -> Option<Arc<PunishmentRecord>> {
        self.mutes.get(target).map(|entry| entry.value().clone())
    }

    /// Remove the mute entry only if it still holds this exact record
    pub(crate) fn evict_mute_if(&self, target: &Uuid, record_id: Uuid) -> bool {
        self.mutes
            .remove_if(target, |_, record| record.id() == record_id)
            .is_some()
    }

    // ------------------------------------------------------------------
    // Ban evasion
    // ------------------------------------------------------------------

    pub(crate) fn put_fingerprints(&self, target: Uuid, fingerprints: HashSet<String>) {
        self.ban_evasion.insert(target, Arc::new(fingerprints));
    }

    pub(crate) fn remove_fingerprints(&self, target: &Uuid) {
        self.ban_evasion.invalidate(target);
    }

    pub fn fingerprints(&self, target: &Uuid) -> Option<Fingerprints> {
        self.ban_evasion.get(target)
    }

    /// First identity whose cached fingerprint set contains `fingerprint`
    pub(crate) fn find_fingerprint_owner(&self, fingerprint: &str) -> Option<Uuid> {
        self.ban_evasion
            .iter()
            .find(|(_, fingerprints)| fingerprints.contains(fingerprint))
            .map(|(target, _)| *target)
    }

    // ------------------------------------------------------------------
    // Observer bans
    // ------------------------------------------------------------------

    pub(crate) fn put_observer_ban(&self, record: Arc<PunishmentRecord>) {
        self.observer_bans.insert(record.target_id(), record);
    }

    pub(crate) fn remove_observer_ban(&self, target: &Uuid) {
        self.observer_bans.remove(target);
    }

    pub fn observer_banned(&self) -> Vec<Uuid> {
        self.observer_bans.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_observer_banned(&self, target: &Uuid) -> bool {
        self.observer_bans.contains_key(target)
    }

    // ------------------------------------------------------------------
    // Pardons
    // ------------------------------------------------------------------

    pub(crate) fn mark_pardoned(&self, target: Uuid, at: DateTime<Utc>) {
        self.pardoned.insert(target, at);
    }

    pub(crate) fn clear_pardon(&self, target: &Uuid) {
        self.pardoned.remove(target);
    }

    pub fn pardoned_at(&self, target: &Uuid) -> Option<DateTime<Utc>> {
        self.pardoned.get(target).map(|entry| *entry.value())
    }

    // ------------------------------------------------------------------
    // Match bans
    // ------------------------------------------------------------------

    pub fn match_bans_enabled(&self) -> bool {
        self.match_bans.is_some()
    }

    /// Returns false when match bans are not configured
    pub(crate) fn put_match_ban(&self, record: Arc<PunishmentRecord>) -> bool {
        match &self.match_bans {
            Some(cache) => {
                cache.insert(record.target_id(), record);
                true
            }
            None => false,
        }
    }

    pub fn match_ban(&self, target: &Uuid) -> Option<Arc<PunishmentRecord>> {
        self.match_bans.as_ref().and_then(|cache| cache.get(target))
    }

    pub(crate) fn remove_match_ban(&self, target: &Uuid) {
        if let Some(cache) = &self.match_bans {
            cache.invalidate(target);
        }
    }

    // ------------------------------------------------------------------
    // Recent issuance
    // ------------------------------------------------------------------

    /// Insert `record` into the recent set unless its id is already there.
    /// Returns true for the caller that inserted it.
    pub(crate) fn claim_recent(&self, record: Arc<PunishmentRecord>) -> bool {
        self.recents
            .entry(record.id())
            .or_insert_with(|| record)
            .is_fresh()
    }

    pub fn recent(&self, record_id: &Uuid) -> Option<Arc<PunishmentRecord>> {
        self.recents.get(record_id)
    }

    pub fn is_recent(&self, record_id: &Uuid) -> bool {
        self.recents.contains_key(record_id)
    }

    /// Most recently issued record by `issuer`, ties broken by latest issue time
    pub fn latest_by_issuer(&self, issuer: &Uuid) -> Option<Arc<PunishmentRecord>> {
        self.recents
            .iter()
            .map(|(_, record)| record)
            .filter(|record| record.issuer_id().as_ref() == Some(issuer))
            .max_by_key(|record| record.issued_at())
    }

    /// Drop the entries a punishment of `kind` owns for `target`. Pardon
    /// marks and entries of other types are left alone.
    pub(crate) fn invalidate_kind(&self, target: &Uuid, kind: PunishmentType) {
        match kind {
            PunishmentType::Mute => {
                self.remove_mute(target);
            }
            PunishmentType::Kick => self.remove_match_ban(target),
            kind if kind.is_ban() => {
                self.remove_observer_ban(target);
                self.remove_fingerprints(target);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn config(evasion_ms: u64, match_ban_ms: Option<u64>) -> CacheConfig {
        CacheConfig {
            evasion_expiry: StdDuration::from_millis(evasion_ms),
            match_ban_duration: match_ban_ms.map(StdDuration::from_millis),
            recent_retention: StdDuration::from_secs(60),
        }
    }

    fn record(kind: PunishmentType, issuer: Option<Uuid>) -> Arc<PunishmentRecord> {
        Arc::new(PunishmentRecord::new(
            kind,
            Uuid::new_v4(),
            issuer,
            "test",
            None,
            true,
            "node-a",
        ))
    }

    #[test]
    fn test_fingerprint_lookup() {
        let cache = CacheLayer::new(&config(60_000, None));
        let banned = Uuid::new_v4();
        cache.put_fingerprints(
            banned,
            HashSet::from(["10.0.0.1".to_string(), "10.0.0.2".to_string()]),
        );

        assert_eq!(cache.find_fingerprint_owner("10.0.0.2"), Some(banned));
        assert_eq!(cache.find_fingerprint_owner("192.168.1.1"), None);
    }

    #[test]
    fn test_ban_evasion_ttl_expiry() {
        let cache = CacheLayer::new(&config(100, None));
        let banned = Uuid::new_v4();
        cache.put_fingerprints(banned, HashSet::from(["10.0.0.9".to_string()]));

        assert!(cache.fingerprints(&banned).is_some());

        std::thread::sleep(StdDuration::from_millis(250));

        assert!(cache.fingerprints(&banned).is_none());
        assert_eq!(cache.find_fingerprint_owner("10.0.0.9"), None);
    }

    #[test]
    fn test_match_bans_disabled_without_duration() {
        let cache = CacheLayer::new(&config(60_000, None));
        let kick = record(PunishmentType::Kick, None);

        assert!(!cache.match_bans_enabled());
        assert!(!cache.put_match_ban(kick.clone()));
        assert!(cache.match_ban(&kick.target_id()).is_none());
    }

    #[test]
    fn test_match_ban_expires() {
        let cache = CacheLayer::new(&config(60_000, Some(100)));
        let kick = record(PunishmentType::Kick, None);

        assert!(cache.put_match_ban(kick.clone()));
        assert!(cache.match_ban(&kick.target_id()).is_some());

        std::thread::sleep(StdDuration::from_millis(250));
        assert!(cache.match_ban(&kick.target_id()).is_none());
    }

    #[test]
    fn test_evict_mute_only_matching_record() {
        let cache = CacheLayer::new(&config(60_000, None));
        let mute = record(PunishmentType::Mute, None);
        cache.put_mute(mute.clone());

        assert!(!cache.evict_mute_if(&mute.target_id(), Uuid::new_v4()));
        assert!(cache.peek_mute(&mute.target_id()).is_some());
        assert!(cache.evict_mute_if(&mute.target_id(), mute.id()));
        assert!(cache.peek_mute(&mute.target_id()).is_none());
    }

    #[test]
    fn test_latest_by_issuer() {
        let cache = CacheLayer::new(&config(60_000, None));
        let issuer = Uuid::new_v4();

        let first = record(PunishmentType::Warn, Some(issuer));
        std::thread::sleep(StdDuration::from_millis(5));
        let second = record(PunishmentType::Kick, Some(issuer));
        let other = record(PunishmentType::Ban, Some(Uuid::new_v4()));

        assert!(cache.claim_recent(second.clone()));
        assert!(cache.claim_recent(first.clone()));
        assert!(cache.claim_recent(other));
        assert!(!cache.claim_recent(first.clone()));

        let latest = cache.latest_by_issuer(&issuer).unwrap();
        assert_eq!(latest.id(), second.id());
        assert!(cache.latest_by_issuer(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_invalidate_kind_only_touches_its_caches() {
        let cache = CacheLayer::new(&config(60_000, None));
        let mute = record(PunishmentType::Mute, None);
        let target = mute.target_id();

        cache.put_mute(mute);
        cache.put_fingerprints(target, HashSet::from(["1.1.1.1".to_string()]));
        cache.mark_pardoned(target, Utc::now());

        cache.invalidate_kind(&target, PunishmentType::Warn);
        assert!(cache.peek_mute(&target).is_some());
        assert!(cache.fingerprints(&target).is_some());

        cache.invalidate_kind(&target, PunishmentType::Mute);
        assert!(cache.peek_mute(&target).is_none());
        assert!(cache.fingerprints(&target).is_some());

        cache.invalidate_kind(&target, PunishmentType::TempBan);
        assert!(cache.fingerprints(&target).is_none());
        assert!(cache.pardoned_at(&target).is_some());
    }
}
