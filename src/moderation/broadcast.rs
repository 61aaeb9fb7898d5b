//! Punishment announcements
//!
//! `ChatBroadcaster` is the stock `Broadcaster`: it resolves display names,
//! renders the broadcast line and routes it according to the visibility
//! policy. Delivery to players is left to a `ChatSink`.
//!
//! Routing:
//! - broadcasting enabled, silent or staff-only type -> staff channel
//! - broadcasting enabled, public type               -> everyone
//! - broadcasting disabled                           -> issuer (or console)

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BroadcastConfig;
use crate::moderation::collaborators::{Broadcaster, Issuer, UserDirectory};
use crate::moderation::formats::{self, AlertColor};
use crate::moderation::punishment::PunishmentRecord;

/// Message delivery to connected players
pub trait ChatSink: Send + Sync {
    fn send_global(&self, message: &str);

    /// Players holding the punishment-broadcast capability
    fn send_staff(&self, message: &str);

    /// A single viewer; None is the console
    fn send_to(&self, viewer: Option<Uuid>, message: &str);

    fn send_action_bar(&self, identity: Uuid, message: &str, color: AlertColor);
}

pub struct ChatBroadcaster {
    config: BroadcastConfig,
    directory: Arc<dyn UserDirectory>,
    sink: Arc<dyn ChatSink>,
}

impl ChatBroadcaster {
    pub fn new(
        config: BroadcastConfig,
        directory: Arc<dyn UserDirectory>,
        sink: Arc<dyn ChatSink>,
    ) -> Self {
        Self {
            config,
            directory,
            sink,
        }
    }

    async fn name_of(&self, identity: Uuid) -> String {
        match self.directory.display_name(identity).await {
            Ok(name) => name,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Failed to resolve display name");
                identity.to_string()
            }
        }
    }
}

#[async_trait]
impl Broadcaster for ChatBroadcaster {
    async fn announce(
        &self,
        record: Arc<PunishmentRecord>,
        silent: bool,
        origin_server: Option<&str>,
        viewer: Option<&Issuer>,
    ) {
        let target_name = self.name_of(record.target_id()).await;
        let issuer_name = match record.issuer_id() {
            Some(issuer) => Some(self.name_of(issuer).await),
            None => None,
        };

        let line = formats::format_broadcast(
            &record,
            &target_name,
            issuer_name.as_deref(),
            origin_server,
        );

        if self.config.enabled {
            if silent || !self.config.is_public(record.kind()) {
                self.sink.send_staff(&line);
            } else {
                self.sink.send_global(&line);
            }
        } else {
            self.sink.send_to(viewer.and_then(|issuer| issuer.id), &line);
        }
    }

    fn warn_issuer(&self, issuer: &Issuer, message: &str) {
        self.sink.send_to(issuer.id, message);
    }

    fn alert_staff(&self, message: &str) {
        self.sink.send_staff(message);
    }

    fn remind_banned(&self, identity: Uuid, color: AlertColor) {
        self.sink
            .send_action_bar(identity, &formats::format_ban_overlay(), color);
    }
}

/// Sink that writes every message to the node log
#[derive(Debug, Default)]
pub struct TracingSink;

impl ChatSink for TracingSink {
    fn send_global(&self, message: &str) {
        info!(audience = "global", "{}", message);
    }

    fn send_staff(&self, message: &str) {
        info!(audience = "staff", "{}", message);
    }

    fn send_to(&self, viewer: Option<Uuid>, message: &str) {
        match viewer {
            Some(viewer) => info!(audience = "player", viewer = %viewer, "{}", message),
            None => info!(audience = "console", "{}", message),
        }
    }

    fn send_action_bar(&self, identity: Uuid, message: &str, color: AlertColor) {
        tracing::trace!(identity = %identity, color = ?color, "{}", message);
    }
}
