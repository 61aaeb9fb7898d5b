//! Moderation Core
//!
//! Cluster punishment state and caching engine. Every game-server node runs
//! one engine; punishments issued on any node converge on all of them.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Node entrypoint
//! ├── config.rs      - Configuration management
//! ├── moderation/    - Punishment state engine
//! │   ├── punishment.rs    - Records and punishment types
//! │   ├── cache.rs         - Mute / evasion / pardon / recent caches
//! │   ├── engine.rs        - Issue, apply and pardon pipeline
//! │   ├── evasion.rs       - Fingerprint based ban evasion checks
//! │   ├── sync.rs          - Cross-node events and the apply worker
//! │   ├── broadcast.rs     - Announcement routing
//! │   ├── formats.rs       - Player facing message text
//! │   ├── reminder.rs      - Ban overlay loop
//! │   ├── collaborators.rs - Store, directory, transport and hook traits
//! │   └── memory.rs        - In-memory collaborators
//! └── api/           - HTTP admin API
//! ```

pub mod api;
pub mod config;
pub mod moderation;

// Re-export main types for convenience
pub use config::ModerationConfig;
pub use moderation::{
    ApplyOutcome, CacheLayer, Collaborators, EvasionDetector, Issuer, NetworkSync, Origin,
    PunishmentEngine, PunishmentError, PunishmentRecord, PunishmentType,
};
