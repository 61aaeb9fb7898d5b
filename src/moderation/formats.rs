//! Punishment text formatting
//!
//! Plain-text renderings of records for broadcasts, mute notices and staff
//! alerts. Colour and styling belong to the chat sink, not to these strings.

use chrono::Duration;

use crate::moderation::punishment::{PunishmentRecord, PunishmentType};

/// Name shown when a punishment has no player issuer
pub const CONSOLE_NAME: &str = "Console";

/// Alternating overlay colours for the ban reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertColor {
    Yellow,
    DarkRed,
}

impl AlertColor {
    pub fn from_phase(phase: bool) -> Self {
        if phase {
            AlertColor::Yellow
        } else {
            AlertColor::DarkRed
        }
    }
}

/// "2 days 3 hours", "45 minutes", "10 seconds". At most two units.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let units = [
        (total / 86_400, "day"),
        ((total % 86_400) / 3_600, "hour"),
        ((total % 3_600) / 60, "minute"),
        (total % 60, "second"),
    ];

    let parts: Vec<String> = units
        .iter()
        .filter(|(value, _)| *value > 0)
        .take(2)
        .map(|(value, unit)| {
            if *value == 1 {
                format!("{} {}", value, unit)
            } else {
                format!("{} {}s", value, unit)
            }
        })
        .collect();

    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(" ")
    }
}

/// Broadcast line for an applied punishment
///
/// `[server] Issuer » Target was <verb> (<duration>): <reason>`
pub fn format_broadcast(
    record: &PunishmentRecord,
    target_name: &str,
    issuer_name: Option<&str>,
    origin_server: Option<&str>,
) -> String {
    let mut line = String::new();

    if let Some(server) = origin_server {
        line.push_str(&format!("[{}] ", server));
    }

    line.push_str(&format!(
        "{} \u{00bb} {} was {}",
        issuer_name.unwrap_or(CONSOLE_NAME),
        target_name,
        record.kind().verb()
    ));

    if let Some(duration) = record.duration() {
        if record.kind() != PunishmentType::Kick {
            line.push_str(&format!(" ({})", format_duration(duration)));
        }
    }

    line.push_str(&format!(": {}", record.reason()));
    line
}

/// Notice shown to a muted player whose chat message was dropped
pub fn chat_mute_message(record: &PunishmentRecord) -> String {
    let mut message = format!("You are muted for {}", record.reason());
    if let Some(expires_at) = record.expires_at() {
        let left = expires_at - chrono::Utc::now();
        if left > Duration::zero() {
            message.push_str(&format!(" ({} remaining)", format_duration(left)));
        }
    }
    message
}

/// Notice shown to a muted player whose sign text was cleared
pub fn sign_mute_message(record: &PunishmentRecord) -> String {
    format!("You may not edit signs while muted ({})", record.reason())
}

/// Staff alert raised when a joining player shares a fingerprint with a ban
pub fn format_ban_evasion(joining_name: &str, banned_name: &str) -> String {
    format!(
        "{} may be evading a ban (shares an address with {})",
        joining_name, banned_name
    )
}

/// Overlay text for an observer-banned player
pub fn format_ban_overlay() -> String {
    " \u{26a0} You have been banned \u{26a0} ".to_string()
}

/// Warning for an issuer whose target is exempt
pub fn format_exempt(target_name: &str) -> String {
    format!("{} is exempt from punishment", target_name)
}
