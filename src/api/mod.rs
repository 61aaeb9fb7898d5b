//! HTTP API endpoints for a moderation node
//!
//! Provides REST APIs for:
//! - Health checks
//! - Issuing and pardoning punishments
//! - Inspecting cached mutes and recent issuance

pub mod punishments;

pub use punishments::{ModerationApiState, create_router};
