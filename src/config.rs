use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use crate::moderation::PunishmentType;

/// Configuration for a moderation node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Identifier of this node, stamped on every record it issues
    pub service: String,
    /// Master switch; when false the node binary exits without starting the engine
    pub enabled: bool,
    /// Admin API binding
    pub server: ServerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Cache lifetimes
    pub cache: CacheConfig,
    /// Announcement policy
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind the admin API to
    pub host: String,
    /// Port to bind the admin API to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log span open/close for HTTP requests
    pub log_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long fingerprints of a banned identity stay in the evasion window
    pub evasion_expiry: Duration,
    /// Session-scoped kick window; None disables the match-ban cache
    pub match_ban_duration: Option<Duration>,
    /// How long issued records stay in the recent-issuance set
    pub recent_retention: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Announce punishments to players at all
    pub enabled: bool,
    /// Types announced to everyone; others go to staff only
    pub public_types: HashSet<PunishmentType>,
    /// Keep banned players connected as observers and show the ban overlay
    pub observer_ban_overlay: bool,
    /// Tick of the ban overlay reminder
    pub reminder_interval: Duration,
}

impl BroadcastConfig {
    pub fn is_public(&self, kind: PunishmentType) -> bool {
        self.public_types.contains(&kind)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            evasion_expiry: Duration::from_secs(30 * 60),
            match_ban_duration: None,
            recent_retention: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            public_types: HashSet::from([
                PunishmentType::Kick,
                PunishmentType::Ban,
                PunishmentType::TempBan,
                PunishmentType::NameBan,
            ]),
            observer_ban_overlay: false,
            reminder_interval: Duration::from_secs(1),
        }
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            service: "local".to_string(),
            enabled: true,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8790,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_requests: false,
            },
            cache: CacheConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl ModerationConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(service) = env::var("MODERATION_SERVICE") {
            config.service = service;
        } else {
            warn!("MODERATION_SERVICE not set, using '{}'", config.service);
        }

        if let Ok(enabled) = env::var("MODERATION_ENABLED") {
            config.enabled = enabled
                .parse()
                .context("Invalid MODERATION_ENABLED value")?;
        }

        // Server configuration
        if let Ok(host) = env::var("MODERATION_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = env::var("MODERATION_PORT") {
            config.server.port = port.parse().context("Invalid MODERATION_PORT value")?;
        }

        // Logging configuration
        if let Ok(level) = env::var("MODERATION_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(log_requests) = env::var("MODERATION_LOG_REQUESTS") {
            config.logging.log_requests = log_requests
                .parse()
                .context("Invalid MODERATION_LOG_REQUESTS value")?;
        }

        // Cache configuration
        if let Ok(mins) = env::var("MODERATION_EVASION_EXPIRE_MINS") {
            let mins: u64 = mins
                .parse()
                .context("Invalid MODERATION_EVASION_EXPIRE_MINS value")?;
            config.cache.evasion_expiry = Duration::from_secs(mins * 60);
        }

        if let Ok(secs) = env::var("MODERATION_MATCH_BAN_SECS") {
            let secs: u64 = secs
                .parse()
                .context("Invalid MODERATION_MATCH_BAN_SECS value")?;
            config.cache.match_ban_duration = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Ok(mins) = env::var("MODERATION_RECENT_MINS") {
            let mins: u64 = mins
                .parse()
                .context("Invalid MODERATION_RECENT_MINS value")?;
            config.cache.recent_retention = Duration::from_secs(mins * 60);
        }

        // Broadcast configuration
        if let Ok(enabled) = env::var("MODERATION_BROADCAST") {
            config.broadcast.enabled = enabled
                .parse()
                .context("Invalid MODERATION_BROADCAST value")?;
        }

        if let Ok(types) = env::var("MODERATION_PUBLIC_TYPES") {
            config.broadcast.public_types = Self::parse_types(&types)?;
        }

        if let Ok(overlay) = env::var("MODERATION_OBSERVER_BANS") {
            config.broadcast.observer_ban_overlay = overlay
                .parse()
                .context("Invalid MODERATION_OBSERVER_BANS value")?;
        }

        if let Ok(ms) = env::var("MODERATION_REMINDER_MS") {
            let ms: u64 = ms.parse().context("Invalid MODERATION_REMINDER_MS value")?;
            config.broadcast.reminder_interval = Duration::from_millis(ms);
        }

        config.validate()?;

        info!(
            service = %config.service,
            evasion_expiry_secs = config.cache.evasion_expiry.as_secs(),
            match_bans = config.cache.match_ban_duration.is_some(),
            "Loaded moderation configuration"
        );

        Ok(config)
    }

    /// Parse a comma separated list of punishment types
    fn parse_types(list: &str) -> Result<HashSet<PunishmentType>> {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                name.parse::<PunishmentType>()
                    .with_context(|| format!("Invalid MODERATION_PUBLIC_TYPES entry '{}'", name))
            })
            .collect()
    }

    /// Validate configuration for consistency
    fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(anyhow::anyhow!("Service name cannot be empty"));
        }

        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.cache.evasion_expiry.is_zero() {
            return Err(anyhow::anyhow!("Evasion expiry must be non-zero"));
        }

        if self.cache.recent_retention.is_zero() {
            return Err(anyhow::anyhow!("Recent punishment retention must be non-zero"));
        }

        if self.broadcast.reminder_interval < Duration::from_millis(50) {
            return Err(anyhow::anyhow!(
                "Ban reminder interval is too short (minimum 50ms)"
            ));
        }

        Ok(())
    }
}
