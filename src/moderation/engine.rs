//! Punishment Engine - Main Orchestrator
//!
//! Issues records and runs the apply pipeline that keeps the local caches,
//! the store, the enforcement hook and the rest of the cluster in step.
//!
//! Apply order for one record:
//!
//! 1. exemption check (local issues only)
//! 2. duplicate check + recent-set insert (one atomic claim, taken before the
//!    persist is spawned so a record is never saved twice)
//! 3. persist (local issues only, background)
//! 4. mute cache, then enforcement
//! 5. type-specific caches
//! 6. propagate (local issues only)
//! 7. announce

use anyhow::Result;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ModerationConfig;
use crate::moderation::cache::CacheLayer;
use crate::moderation::collaborators::{
    Broadcaster, Enforcer, Issuer, Presence, PunishmentStore, Transport, UserDirectory,
};
use crate::moderation::error::PunishmentError;
use crate::moderation::evasion::EvasionDetector;
use crate::moderation::formats;
use crate::moderation::punishment::{self, PunishmentRecord, PunishmentType};
use crate::moderation::sync::NetworkSync;

/// Ban types, as used for unban lookups
pub const BAN_TYPES: [PunishmentType; 3] = [
    PunishmentType::Ban,
    PunishmentType::TempBan,
    PunishmentType::NameBan,
];

/// Where an apply request came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Issued on this node
    Local(Issuer),
    /// Replayed from the named peer
    Remote(String),
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local(_))
    }
}

/// Result of running the apply pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Target is protected; nothing happened except a warning to the issuer
    Exempt,
    /// Record id was already applied on this node
    Duplicate,
}

/// A freshly issued record and what the pipeline did with it
#[derive(Debug, Clone)]
pub struct Issued {
    pub record: Arc<PunishmentRecord>,
    pub outcome: ApplyOutcome,
}

/// External hooks the engine is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn PunishmentStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub enforcer: Arc<dyn Enforcer>,
    pub presence: Arc<dyn Presence>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub transport: Arc<dyn Transport>,
}

pub struct PunishmentEngine {
    service: String,
    observer_ban_overlay: bool,
    cache: Arc<CacheLayer>,
    evasion: EvasionDetector,
    sync: NetworkSync,
    store: Arc<dyn PunishmentStore>,
    directory: Arc<dyn UserDirectory>,
    enforcer: Arc<dyn Enforcer>,
    presence: Arc<dyn Presence>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl PunishmentEngine {
    pub fn new(
        config: &ModerationConfig,
        cache: Arc<CacheLayer>,
        collaborators: Collaborators,
    ) -> Self {
        let evasion = EvasionDetector::new(
            cache.clone(),
            collaborators.directory.clone(),
            collaborators.broadcaster.clone(),
        );

        Self {
            service: config.service.clone(),
            observer_ban_overlay: config.broadcast.observer_ban_overlay,
            cache,
            evasion,
            sync: NetworkSync::new(config.service.clone(), collaborators.transport),
            store: collaborators.store,
            directory: collaborators.directory,
            enforcer: collaborators.enforcer,
            presence: collaborators.presence,
            broadcaster: collaborators.broadcaster,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn evasion(&self) -> &EvasionDetector {
        &self.evasion
    }

    pub fn network(&self) -> &NetworkSync {
        &self.sync
    }

    pub fn presence(&self) -> &Arc<dyn Presence> {
        &self.presence
    }

    pub fn broadcaster(&self) -> &Arc<dyn Broadcaster> {
        &self.broadcaster
    }

    // ------------------------------------------------------------------
    // Issuance
    // ------------------------------------------------------------------

    /// Mint a record and run it through the local apply pipeline.
    ///
    /// Invalid input is rejected before anything is touched.
    #[allow(clippy::too_many_arguments)]
    pub async fn issue(
        &self,
        kind: PunishmentType,
        target: Uuid,
        issuer: Issuer,
        reason: &str,
        duration: Option<Duration>,
        active: bool,
        silent: bool,
    ) -> Result<Issued, PunishmentError> {
        if duration.is_some_and(|d| d < Duration::zero()) {
            return Err(PunishmentError::NegativeDuration);
        }
        if kind.requires_duration() && duration.is_none() {
            return Err(PunishmentError::MissingDuration(kind));
        }

        // Peers only see whole milliseconds
        let duration = duration.map(punishment::wire_precision);
        let record = Arc::new(PunishmentRecord::new(
            kind,
            target,
            issuer.id,
            reason,
            duration,
            active,
            self.service.clone(),
        ));
        if let Some(duration) = duration {
            punishment::check_expiry(record.issued_at(), duration)?;
        }

        info!(
            record = %record.id(),
            target = %target,
            issuer = ?issuer.id,
            kind = ?kind,
            "Issuing punishment"
        );

        let outcome = self.apply(record.clone(), silent, Origin::Local(issuer)).await;
        Ok(Issued { record, outcome })
    }

    /// Apply pipeline, shared by local issues and peer replays
    pub async fn apply(
        &self,
        record: Arc<PunishmentRecord>,
        silent: bool,
        origin: Origin,
    ) -> ApplyOutcome {
        let target = record.target_id();

        if let Origin::Local(issuer) = &origin {
            if self.is_protected(target, issuer) {
                let name = self.display_name(target).await;
                self.broadcaster
                    .warn_issuer(issuer, &formats::format_exempt(&name));
                info!(target = %target, issuer = ?issuer.id, "Target exempt from punishment");
                return ApplyOutcome::Exempt;
            }
        }

        if !self.cache.claim_recent(record.clone()) {
            debug!(record = %record.id(), "Punishment already applied");
            return ApplyOutcome::Duplicate;
        }

        if origin.is_local() {
            self.persist(record.clone());
        }

        if record.kind() == PunishmentType::Mute {
            self.cache.put_mute(record.clone());
        }
        self.enforcer.apply_restriction(&record, silent);

        self.update_caches(&record);

        if origin.is_local() {
            self.sync.broadcast(&record).await;
        }

        match &origin {
            Origin::Local(issuer) => {
                self.broadcaster
                    .announce(record, silent, None, Some(issuer))
                    .await;
            }
            Origin::Remote(server) => {
                self.broadcaster
                    .announce(record, true, Some(server.as_str()), None)
                    .await;
            }
        }

        ApplyOutcome::Applied
    }

    fn is_protected(&self, target: Uuid, issuer: &Issuer) -> bool {
        !issuer.can_override && self.presence.is_online(target) && self.presence.is_exempt(target)
    }

    fn persist(&self, record: Arc<PunishmentRecord>) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&record).await {
                error!(record = %record.id(), error = %e, "Failed to persist punishment");
            }
        });
    }

    fn update_caches(&self, record: &Arc<PunishmentRecord>) {
        let target = record.target_id();

        match record.kind() {
            kind if kind.is_ban() => {
                // A new ban ends any pardon grace for this identity
                self.cache.clear_pardon(&target);
                if self.observer_ban_overlay {
                    self.cache.put_observer_ban(record.clone());
                }

                let directory = self.directory.clone();
                let cache = self.cache.clone();
                tokio::spawn(async move {
                    match directory.known_fingerprints(target).await {
                        Ok(fingerprints) => {
                            debug!(
                                target = %target,
                                count = fingerprints.len(),
                                "Caching fingerprints of banned player"
                            );
                            cache.put_fingerprints(target, fingerprints);
                        }
                        Err(e) => {
                            warn!(target = %target, error = %e, "Failed to fetch known fingerprints");
                        }
                    }
                });
            }
            PunishmentType::Kick => {
                if self.cache.put_match_ban(record.clone()) {
                    debug!(target = %target, "Stored match ban");
                }
            }
            // Mute was cached before enforcement
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Pardons
    // ------------------------------------------------------------------

    /// Deactivate the most recent active record of one of `kinds` for
    /// `target` and clear the matching cached state here and on peers.
    pub async fn pardon(
        &self,
        target: Uuid,
        kinds: &[PunishmentType],
        by: &Issuer,
    ) -> Result<Option<PunishmentRecord>> {
        let Some(record) = self.store.find_active(target, kinds).await? else {
            debug!(target = %target, "No active punishment to pardon");
            return Ok(None);
        };

        if let Err(e) = self.store.deactivate(record.id(), by.id).await {
            error!(record = %record.id(), error = %e, "Failed to deactivate stored punishment");
        }
        record.deactivate();

        // In-memory holders share the record, so flip their flag too
        if let Some(recent) = self.cache.recent(&record.id()) {
            recent.deactivate();
        }

        self.cache.invalidate_kind(&target, record.kind());
        if record.kind().is_ban() {
            self.cache.mark_pardoned(target, Utc::now());
        }

        info!(
            record = %record.id(),
            target = %target,
            kind = ?record.kind(),
            by = ?by.id,
            "Pardoned punishment"
        );

        self.sync.send_refresh(target, record.kind()).await;
        Ok(Some(record))
    }

    pub async fn unban(&self, target: Uuid, by: &Issuer) -> Result<Option<PunishmentRecord>> {
        self.pardon(target, &BAN_TYPES, by).await
    }

    pub async fn unmute(&self, target: Uuid, by: &Issuer) -> Result<Option<PunishmentRecord>> {
        self.pardon(target, &[PunishmentType::Mute], by).await
    }

    /// Drop the cached state `kind` owns for `target` (peer refresh).
    /// Entries held for other types stay.
    pub fn refresh(&self, target: Uuid, kind: PunishmentType) {
        self.cache.invalidate_kind(&target, kind);
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Cached mute for `target`, evicting it if it is no longer active
    pub fn get_cached_mute(&self, target: Uuid) -> Option<Arc<PunishmentRecord>> {
        let mute = self.cache.peek_mute(&target)?;

        if !mute.is_active() {
            self.cache.evict_mute_if(&target, mute.id());
            debug!(target = %target, record = %mute.id(), "Evicted inactive mute");
            return None;
        }

        Some(mute)
    }

    pub fn remove_mute(&self, target: Uuid) {
        self.cache.remove_mute(&target);
    }

    /// Connected players with a live cached mute
    pub fn get_online_mutes(&self) -> HashSet<Uuid> {
        self.presence
            .online_players()
            .into_iter()
            .filter(|player| self.get_cached_mute(*player).is_some())
            .collect()
    }

    /// Latest punishment issued by `issuer` still in the recent set
    pub fn get_last_punishment(&self, issuer: Uuid) -> Option<Arc<PunishmentRecord>> {
        self.cache.latest_by_issuer(&issuer)
    }

    pub fn get_match_ban(&self, target: Uuid) -> Option<Arc<PunishmentRecord>> {
        self.cache.match_ban(&target)
    }

    /// Identities currently under an observer ban
    pub fn observer_banned(&self) -> Vec<Uuid> {
        self.cache.observer_banned()
    }

    pub fn has_applied(&self, record_id: Uuid) -> bool {
        self.cache.is_recent(&record_id)
    }

    /// Notice for a chat line that must be dropped, if the player is muted
    pub fn chat_gate(&self, player: Uuid) -> Option<String> {
        self.get_cached_mute(player)
            .map(|mute| formats::chat_mute_message(&mute))
    }

    /// Notice for sign text that must be cleared, if the player is muted
    pub fn sign_gate(&self, player: Uuid) -> Option<String> {
        self.get_cached_mute(player)
            .map(|mute| formats::sign_mute_message(&mute))
    }

    async fn display_name(&self, identity: Uuid) -> String {
        self.directory
            .display_name(identity)
            .await
            .unwrap_or_else(|_| identity.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::memory::{
        CapturingTransport, MemoryDirectory, MemoryPresence, MemoryStore, RecordingBroadcaster,
        RecordingEnforcer,
    };
    use std::time::Duration as StdDuration;

    struct Harness {
        engine: PunishmentEngine,
        store: Arc<MemoryStore>,
        directory: Arc<MemoryDirectory>,
        presence: Arc<MemoryPresence>,
        enforcer: Arc<RecordingEnforcer>,
        broadcaster: Arc<RecordingBroadcaster>,
        transport: Arc<CapturingTransport>,
    }

    fn harness(config: ModerationConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        let presence = Arc::new(MemoryPresence::new());
        let enforcer = Arc::new(RecordingEnforcer::new());
        let broadcaster = Arc::new(RecordingBroadcaster::new());
        let transport = Arc::new(CapturingTransport::new());

        let cache = Arc::new(CacheLayer::new(&config.cache));
        let engine = PunishmentEngine::new(
            &config,
            cache,
            Collaborators {
                store: store.clone(),
                directory: directory.clone(),
                enforcer: enforcer.clone(),
                presence: presence.clone(),
                broadcaster: broadcaster.clone(),
                transport: transport.clone(),
            },
        );

        Harness {
            engine,
            store,
            directory,
            presence,
            enforcer,
            broadcaster,
            transport,
        }
    }

    fn config() -> ModerationConfig {
        ModerationConfig {
            service: "node-a".to_string(),
            ..ModerationConfig::default()
        }
    }

    async fn settle() {
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_issue_rejects_invalid_input() {
        let h = harness(config());
        let target = Uuid::new_v4();

        let negative = h
            .engine
            .issue(
                PunishmentType::Mute,
                target,
                Issuer::console(),
                "spam",
                Some(Duration::minutes(-5)),
                true,
                false,
            )
            .await;
        assert_eq!(negative.unwrap_err(), PunishmentError::NegativeDuration);

        let missing = h
            .engine
            .issue(
                PunishmentType::TempBan,
                target,
                Issuer::console(),
                "spam",
                None,
                true,
                false,
            )
            .await;
        assert_eq!(
            missing.unwrap_err(),
            PunishmentError::MissingDuration(PunishmentType::TempBan)
        );

        settle().await;
        assert_eq!(h.store.save_count(), 0);
        assert!(h.enforcer.applied().is_empty());
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_issue_rejects_unrepresentable_expiry() {
        let h = harness(config());
        let target = Uuid::new_v4();

        let result = h
            .engine
            .issue(
                PunishmentType::Mute,
                target,
                Issuer::console(),
                "spam",
                Some(Duration::MAX),
                true,
                false,
            )
            .await;
        assert_eq!(result.unwrap_err(), PunishmentError::DurationOutOfRange);

        settle().await;
        assert!(h.engine.get_cached_mute(target).is_none());
        assert_eq!(h.store.save_count(), 0);
        assert!(h.enforcer.applied().is_empty());
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_issued_duration_is_whole_milliseconds() {
        let h = harness(config());

        let issued = h
            .engine
            .issue(
                PunishmentType::Mute,
                Uuid::new_v4(),
                Issuer::console(),
                "spam",
                Some(Duration::microseconds(1_500_750)),
                true,
                false,
            )
            .await
            .unwrap();
        assert_eq!(issued.record.duration(), Some(Duration::milliseconds(1_500)));
    }

    #[tokio::test]
    async fn test_mute_is_cached_and_enforced() {
        let h = harness(config());
        let target = Uuid::new_v4();
        h.presence.connect(target, false);

        let issued = h
            .engine
            .issue(
                PunishmentType::Mute,
                target,
                Issuer::console(),
                "caps",
                Some(Duration::minutes(10)),
                true,
                false,
            )
            .await
            .unwrap();

        assert_eq!(issued.outcome, ApplyOutcome::Applied);
        assert_eq!(
            h.engine.get_cached_mute(target).unwrap().id(),
            issued.record.id()
        );
        assert_eq!(h.enforcer.count_for(issued.record.id()), 1);
        assert!(h.engine.get_online_mutes().contains(&target));
        assert!(h.engine.chat_gate(target).unwrap().contains("caps"));
        assert!(h.engine.sign_gate(target).is_some());
    }

    #[tokio::test]
    async fn test_inactive_mute_evicted_on_read() {
        let h = harness(config());
        let target = Uuid::new_v4();
        h.presence.connect(target, false);

        let issued = h
            .engine
            .issue(
                PunishmentType::Mute,
                target,
                Issuer::console(),
                "spam",
                None,
                true,
                false,
            )
            .await
            .unwrap();

        // Flip the shared record without touching the cache
        issued.record.deactivate();
        assert!(h.engine.cache().peek_mute(&target).is_some());

        assert!(h.engine.get_cached_mute(target).is_none());
        assert!(h.engine.cache().peek_mute(&target).is_none());
        assert!(h.engine.get_online_mutes().is_empty());
        assert!(h.engine.chat_gate(target).is_none());
    }

    #[tokio::test]
    async fn test_exempt_target_has_no_side_effects() {
        let h = harness(config());
        let admin = Uuid::new_v4();
        let moderator = Uuid::new_v4();
        h.presence.connect(admin, true);
        h.directory.register(admin, "Admin", ["10.0.0.1"]);

        let issued = h
            .engine
            .issue(
                PunishmentType::Ban,
                admin,
                Issuer::player(moderator, false),
                "abuse",
                None,
                true,
                false,
            )
            .await
            .unwrap();
        settle().await;

        assert_eq!(issued.outcome, ApplyOutcome::Exempt);
        assert_eq!(h.store.save_count(), 0);
        assert!(h.enforcer.applied().is_empty());
        assert!(h.transport.sent().is_empty());
        assert!(h.broadcaster.announcements().is_empty());
        assert!(h.engine.cache().fingerprints(&admin).is_none());
        assert!(!h.engine.has_applied(issued.record.id()));

        let warnings = h.broadcaster.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].0, Some(moderator));
        assert_eq!(warnings[0].1, "Admin is exempt from punishment");
    }

    #[tokio::test]
    async fn test_override_issuer_punishes_exempt_target() {
        let h = harness(config());
        let admin = Uuid::new_v4();
        h.presence.connect(admin, true);

        let issued = h
            .engine
            .issue(
                PunishmentType::Kick,
                admin,
                Issuer::player(Uuid::new_v4(), true),
                "testing",
                None,
                true,
                true,
            )
            .await
            .unwrap();

        assert_eq!(issued.outcome, ApplyOutcome::Applied);
        assert_eq!(h.enforcer.count_for(issued.record.id()), 1);
    }

    #[tokio::test]
    async fn test_offline_exempt_target_is_punished() {
        let h = harness(config());
        let target = Uuid::new_v4();

        let issued = h
            .engine
            .issue(
                PunishmentType::Warn,
                target,
                Issuer::player(Uuid::new_v4(), false),
                "language",
                None,
                true,
                false,
            )
            .await
            .unwrap();

        assert_eq!(issued.outcome, ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn test_duplicate_apply_is_noop() {
        let h = harness(config());
        let target = Uuid::new_v4();
        let record = Arc::new(PunishmentRecord::new(
            PunishmentType::Mute,
            target,
            None,
            "spam",
            None,
            true,
            "node-b",
        ));

        let first = h
            .engine
            .apply(record.clone(), true, Origin::Remote("node-b".to_string()))
            .await;
        let second = h
            .engine
            .apply(record.clone(), true, Origin::Remote("node-b".to_string()))
            .await;

        assert_eq!(first, ApplyOutcome::Applied);
        assert_eq!(second, ApplyOutcome::Duplicate);
        assert_eq!(h.enforcer.count_for(record.id()), 1);
        assert_eq!(h.broadcaster.announcements().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_apply_does_not_propagate_or_persist() {
        let h = harness(config());
        let record = Arc::new(PunishmentRecord::new(
            PunishmentType::Kick,
            Uuid::new_v4(),
            None,
            "afk",
            None,
            true,
            "node-b",
        ));

        h.engine
            .apply(record.clone(), true, Origin::Remote("node-b".to_string()))
            .await;
        settle().await;

        assert!(h.transport.sent().is_empty());
        assert_eq!(h.store.save_count(), 0);

        let announcements = h.broadcaster.announcements();
        assert_eq!(announcements.len(), 1);
        assert!(announcements[0].silent);
        assert_eq!(announcements[0].origin_server.as_deref(), Some("node-b"));
    }

    #[tokio::test]
    async fn test_local_issue_persists_and_propagates_once() {
        let h = harness(config());

        let issued = h
            .engine
            .issue(
                PunishmentType::Warn,
                Uuid::new_v4(),
                Issuer::console(),
                "be nice",
                None,
                true,
                false,
            )
            .await
            .unwrap();
        settle().await;

        assert_eq!(h.store.save_count(), 1);
        assert!(h.store.get(issued.record.id()).await.is_some());
        assert_eq!(h.transport.sent().len(), 1);
        assert_eq!(h.transport.sent()[0].origin_server, "node-a");
        assert_eq!(issued.record.source_server(), "node-a");
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_cache_state() {
        let h = harness(config());
        h.store.set_failing(true);
        let target = Uuid::new_v4();

        let issued = h
            .engine
            .issue(
                PunishmentType::Mute,
                target,
                Issuer::console(),
                "spam",
                None,
                true,
                false,
            )
            .await
            .unwrap();
        settle().await;

        assert_eq!(issued.outcome, ApplyOutcome::Applied);
        assert!(h.engine.get_cached_mute(target).is_some());
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_ban_caches_fingerprints() {
        let h = harness(config());
        let target = Uuid::new_v4();
        h.directory.register(target, "Griefer", ["10.0.0.5", "10.0.0.6"]);

        h.engine
            .issue(
                PunishmentType::Ban,
                target,
                Issuer::console(),
                "griefing",
                None,
                true,
                false,
            )
            .await
            .unwrap();
        settle().await;

        let fingerprints = h.engine.cache().fingerprints(&target).unwrap();
        assert!(fingerprints.contains("10.0.0.5"));
        assert_eq!(h.engine.evasion().is_evading("10.0.0.6"), Some(target));
    }

    #[tokio::test]
    async fn test_kick_stores_match_ban_when_configured() {
        let mut cfg = config();
        cfg.cache.match_ban_duration = Some(StdDuration::from_secs(60));
        let h = harness(cfg);
        let target = Uuid::new_v4();

        let issued = h
            .engine
            .issue(
                PunishmentType::Kick,
                target,
                Issuer::console(),
                "leave",
                None,
                true,
                false,
            )
            .await
            .unwrap();

        assert_eq!(
            h.engine.get_match_ban(target).unwrap().id(),
            issued.record.id()
        );

        let h = harness(config());
        h.engine
            .issue(
                PunishmentType::Kick,
                target,
                Issuer::console(),
                "leave",
                None,
                true,
                false,
            )
            .await
            .unwrap();
        assert!(h.engine.get_match_ban(target).is_none());
    }

    #[tokio::test]
    async fn test_observer_ban_overlay() {
        let mut cfg = config();
        cfg.broadcast.observer_ban_overlay = true;
        let h = harness(cfg);
        let target = Uuid::new_v4();

        h.engine
            .issue(
                PunishmentType::Ban,
                target,
                Issuer::console(),
                "hacks",
                None,
                true,
                false,
            )
            .await
            .unwrap();
        assert!(h.engine.cache().is_observer_banned(&target));

        h.engine.unban(target, &Issuer::console()).await.unwrap();
        assert!(!h.engine.cache().is_observer_banned(&target));
    }

    #[tokio::test]
    async fn test_unban_clears_evasion_and_marks_pardon() {
        let h = harness(config());
        let target = Uuid::new_v4();
        h.directory.register(target, "Steve", ["10.0.0.7"]);

        let issued = h
            .engine
            .issue(
                PunishmentType::Ban,
                target,
                Issuer::console(),
                "x-ray",
                None,
                true,
                false,
            )
            .await
            .unwrap();
        settle().await;
        assert!(h.engine.evasion().is_evading("10.0.0.7").is_some());

        let pardoned = h
            .engine
            .unban(target, &Issuer::console())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(pardoned.id(), issued.record.id());
        assert!(!pardoned.is_active());
        assert!(!issued.record.is_active());
        assert!(h.engine.evasion().has_recent_pardon(target));
        assert!(h.engine.evasion().is_evading("10.0.0.7").is_none());

        // Ban event + refresh event
        assert_eq!(h.transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_unmute_clears_cached_mute() {
        let h = harness(config());
        let target = Uuid::new_v4();

        h.engine
            .issue(
                PunishmentType::Mute,
                target,
                Issuer::console(),
                "spam",
                None,
                true,
                false,
            )
            .await
            .unwrap();
        settle().await;

        let pardoned = h.engine.unmute(target, &Issuer::console()).await.unwrap();
        assert!(pardoned.is_some());
        assert!(h.engine.get_cached_mute(target).is_none());

        let again = h.engine.unmute(target, &Issuer::console()).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_unmute_keeps_ban_state() {
        let h = harness(config());
        let target = Uuid::new_v4();
        h.directory.register(target, "Steve", ["10.0.0.9"]);

        h.engine
            .issue(PunishmentType::Ban, target, Issuer::console(), "x-ray", None, true, false)
            .await
            .unwrap();
        h.engine
            .issue(PunishmentType::Mute, target, Issuer::console(), "spam", None, true, false)
            .await
            .unwrap();
        settle().await;

        h.engine.unmute(target, &Issuer::console()).await.unwrap();

        assert!(h.engine.get_cached_mute(target).is_none());
        assert_eq!(h.engine.evasion().is_evading("10.0.0.9"), Some(target));
        assert!(!h.engine.evasion().has_recent_pardon(target));
    }

    #[tokio::test]
    async fn test_new_ban_ends_pardon_grace() {
        let h = harness(config());
        let target = Uuid::new_v4();

        h.engine
            .issue(PunishmentType::Ban, target, Issuer::console(), "a", None, true, false)
            .await
            .unwrap();
        settle().await;
        h.engine.unban(target, &Issuer::console()).await.unwrap();
        assert!(h.engine.evasion().has_recent_pardon(target));

        h.engine
            .issue(PunishmentType::Ban, target, Issuer::console(), "b", None, true, false)
            .await
            .unwrap();
        assert!(!h.engine.evasion().has_recent_pardon(target));
    }

    #[tokio::test]
    async fn test_last_punishment_by_issuer() {
        let h = harness(config());
        let moderator = Uuid::new_v4();

        h.engine
            .issue(
                PunishmentType::Warn,
                Uuid::new_v4(),
                Issuer::player(moderator, false),
                "first",
                None,
                true,
                false,
            )
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let second = h
            .engine
            .issue(
                PunishmentType::Kick,
                Uuid::new_v4(),
                Issuer::player(moderator, false),
                "second",
                None,
                true,
                false,
            )
            .await
            .unwrap();

        let last = h.engine.get_last_punishment(moderator).unwrap();
        assert_eq!(last.id(), second.record.id());
        assert!(h.engine.get_last_punishment(Uuid::new_v4()).is_none());
    }
}
