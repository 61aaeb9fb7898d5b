//! Ban Evasion Detection
//!
//! Maps a connecting player's network fingerprint back to a recently banned
//! identity. Detection is advisory: it raises a staff alert and never blocks
//! the connection itself.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::moderation::cache::CacheLayer;
use crate::moderation::collaborators::{Broadcaster, UserDirectory};
use crate::moderation::formats;

/// A joining player that shares a fingerprint with a banned identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvasionAlert {
    pub joining: Uuid,
    pub banned: Uuid,
    pub fingerprint: String,
}

pub struct EvasionDetector {
    cache: Arc<CacheLayer>,
    directory: Arc<dyn UserDirectory>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl EvasionDetector {
    pub fn new(
        cache: Arc<CacheLayer>,
        directory: Arc<dyn UserDirectory>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            cache,
            directory,
            broadcaster,
        }
    }

    /// Identity whose cached fingerprints contain `fingerprint`, if any.
    /// With several matches the first one found wins.
    pub fn is_evading(&self, fingerprint: &str) -> Option<Uuid> {
        self.cache.find_fingerprint_owner(fingerprint)
    }

    pub fn has_recent_pardon(&self, identity: Uuid) -> bool {
        self.cache.pardoned_at(&identity).is_some()
    }

    /// Evaluate a join: alert only when a different, non-pardoned identity
    /// matches a banned fingerprint.
    pub fn check_join(&self, joining: Uuid, fingerprint: &str) -> Option<EvasionAlert> {
        let banned = self.is_evading(fingerprint)?;

        if self.has_recent_pardon(joining) || banned == joining {
            return None;
        }

        Some(EvasionAlert {
            joining,
            banned,
            fingerprint: fingerprint.to_string(),
        })
    }

    /// Run the join check and, on a match, resolve both names and alert staff
    /// from a background task. Returns the task so callers may wait on it.
    pub fn on_join(&self, joining: Uuid, fingerprint: &str) -> Option<JoinHandle<()>> {
        let alert = self.check_join(joining, fingerprint)?;

        info!(
            joining = %alert.joining,
            banned = %alert.banned,
            "Possible ban evasion detected"
        );

        let directory = self.directory.clone();
        let broadcaster = self.broadcaster.clone();

        Some(tokio::spawn(async move {
            let joining_name = resolve_name(directory.as_ref(), alert.joining).await;
            let banned_name = resolve_name(directory.as_ref(), alert.banned).await;
            broadcaster.alert_staff(&formats::format_ban_evasion(&joining_name, &banned_name));
        }))
    }
}

async fn resolve_name(directory: &dyn UserDirectory, identity: Uuid) -> String {
    directory.display_name(identity).await.unwrap_or_else(|e| {
        warn!(identity = %identity, error = %e, "Failed to resolve display name");
        identity.to_string()
    })
}
