//! Validation errors for punishment issuance

use crate::moderation::punishment::PunishmentType;

/// Rejected issuance input. Raised before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunishmentError {
    /// Type name did not match any known punishment
    UnknownType(String),
    /// Duration was below zero
    NegativeDuration,
    /// Type needs a duration but none was given
    MissingDuration(PunishmentType),
    /// Expiry would fall outside the representable time range
    DurationOutOfRange,
}

impl std::fmt::Display for PunishmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PunishmentError::UnknownType(name) => write!(f, "Unknown punishment type: {}", name),
            PunishmentError::NegativeDuration => write!(f, "Punishment duration cannot be negative"),
            PunishmentError::MissingDuration(kind) => {
                write!(f, "{} requires a duration", kind)
            }
            PunishmentError::DurationOutOfRange => {
                write!(f, "Punishment duration is out of range")
            }
        }
    }
}

impl std::error::Error for PunishmentError {}
