//! Side-effect hooks that migrations can depend on.

use std::fmt;

/// Something that must have happened before a migration body runs.
///
/// Each requirement is processed at most once per run: right before the
/// first pending migration that declares it, or (depending on
/// [`process_at_completion_if_not_required`](Self::process_at_completion_if_not_required))
/// once all migrations finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MigrationRequirement {
    /// The current session identifier has been cached.
    SessionIdCached,
    /// Configuration state has been loaded from the database.
    ConfigStateLoaded,
}

impl MigrationRequirement {
    /// Every requirement, in processing order.
    pub const ALL: [Self; 2] = [Self::SessionIdCached, Self::ConfigStateLoaded];

    /// Whether the requirement still gets processed at the end of a run in
    /// which no migration declared it.
    #[must_use]
    pub const fn process_at_completion_if_not_required(self) -> bool {
        match self {
            Self::SessionIdCached => false,
            Self::ConfigStateLoaded => true,
        }
    }
}

impl fmt::Display for MigrationRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionIdCached => write!(f, "session-id-cached"),
            Self::ConfigStateLoaded => write!(f, "config-state-loaded"),
        }
    }
}
