//! Ban reminder loop
//!
//! Observer-banned players stay connected but get a flashing overlay. Every
//! tick the color flips between yellow and dark red.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::moderation::engine::PunishmentEngine;
use crate::moderation::formats::AlertColor;

/// Send one overlay per connected, observer-banned player. Returns how many
/// were reminded.
pub fn remind_once(engine: &PunishmentEngine, phase: bool) -> usize {
    let color = AlertColor::from_phase(phase);
    let presence = engine.presence();
    let mut reminded = 0;

    for identity in engine.observer_banned() {
        if presence.is_online(identity) {
            engine.broadcaster().remind_banned(identity, color);
            reminded += 1;
        }
    }

    reminded
}

pub fn spawn_ban_reminder(engine: Arc<PunishmentEngine>, period: Duration) -> JoinHandle<()> {
    info!(period_ms = period.as_millis() as u64, "Starting ban reminder");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let mut phase = false;

        loop {
            interval.tick().await;
            phase = !phase;

            let reminded = remind_once(&engine, phase);
            if reminded > 0 {
                debug!(reminded, "Sent ban reminders");
            }
        }
    })
}
