//! Observable status of a resolution run

use std::fmt;

/// Status the UI observes while mods are being resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResolveStatus {
    #[default]
    Idle,
    Resolving,
    /// Last run failed; carries the message shown to the user
    Failed(String),
}

impl ResolveStatus {
    pub fn is_resolving(&self) -> bool {
        matches!(self, ResolveStatus::Resolving)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ResolveStatus::Failed(_))
    }
}

impl fmt::Display for ResolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveStatus::Idle => write!(f, "idle"),
            ResolveStatus::Resolving => write!(f, "resolving"),
            ResolveStatus::Failed(message) => write!(f, "failed: {}", message),
        }
    }
}
