//! CLI value enums and domain type conversions.

use clap::ValueEnum;

use crate::domain::SortPolicy;
use crate::federation::ResolutionStrategy;

/// Sort policy for the ready command
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortPolicyArg {
    /// Recent issues (48h) by priority, older by age
    #[default]
    Hybrid,
    /// Strict priority ordering (P0 -> P1 -> P2 -> P3 -> P4)
    Priority,
    /// Oldest issues first
    Oldest,
}

impl std::fmt::Display for SortPolicyArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hybrid => write!(f, "hybrid"),
            Self::Priority => write!(f, "priority"),
            Self::Oldest => write!(f, "oldest"),
        }
    }
}

/// Bulk conflict resolution strategy
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    /// Keep the local value of every conflicting field
    Ours,
    /// Take the peer's value of every conflicting field
    Theirs,
}

impl std::fmt::Display for StrategyArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

impl From<SortPolicyArg> for SortPolicy {
    fn from(arg: SortPolicyArg) -> Self {
        match arg {
            SortPolicyArg::Hybrid => SortPolicy::Hybrid,
            SortPolicyArg::Priority => SortPolicy::Priority,
            SortPolicyArg::Oldest => SortPolicy::Oldest,
        }
    }
}

impl From<StrategyArg> for ResolutionStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Ours => ResolutionStrategy::Ours,
            StrategyArg::Theirs => ResolutionStrategy::Theirs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(SortPolicy::from(SortPolicyArg::Oldest), SortPolicy::Oldest);
        assert_eq!(
            ResolutionStrategy::from(StrategyArg::Theirs),
            ResolutionStrategy::Theirs
        );
    }

    #[test]
    fn test_display_implementations() {
        assert_eq!(format!("{}", SortPolicyArg::Hybrid), "hybrid");
        assert_eq!(format!("{}", StrategyArg::Ours), "ours");
    }
}
