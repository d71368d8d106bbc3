//! Producer categories and lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The producer category a block belongs to.
///
/// Closed set: rendering code matches on it exhaustively, so adding a role is
/// a compile-time decision. Lifecycle logic never branches on the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockRole {
    User,
    Assistant,
    Tool,
    /// Intent/planning output produced ahead of the main answer.
    Cognition,
    /// A step of a composite operation, normally held as a sub-block.
    SubStep,
    Error,
}

impl BlockRole {
    pub const ALL: [BlockRole; 6] = [
        BlockRole::User,
        BlockRole::Assistant,
        BlockRole::Tool,
        BlockRole::Cognition,
        BlockRole::SubStep,
        BlockRole::Error,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockRole::User => "user",
            BlockRole::Assistant => "assistant",
            BlockRole::Tool => "tool",
            BlockRole::Cognition => "cognition",
            BlockRole::SubStep => "sub_step",
            BlockRole::Error => "error",
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            BlockRole::User => "You",
            BlockRole::Assistant => "Assistant",
            BlockRole::Tool => "Tool",
            BlockRole::Cognition => "Thinking",
            BlockRole::SubStep => "Step",
            BlockRole::Error => "Error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for BlockRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a block.
///
/// Transitions: Live -> Transitioning -> Inscribed. Nothing else is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    #[default]
    Live,
    Transitioning,
    Inscribed,
}

impl BlockState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockState::Live => "live",
            BlockState::Transitioning => "transitioning",
            BlockState::Inscribed => "inscribed",
        }
    }

    /// Whether `self -> next` is one of the two legal forward steps.
    #[must_use]
    pub fn can_advance_to(self, next: BlockState) -> bool {
        matches!(
            (self, next),
            (BlockState::Live, BlockState::Transitioning)
                | (BlockState::Transitioning, BlockState::Inscribed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == BlockState::Inscribed
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_round_trips_names() {
        for role in BlockRole::ALL {
            assert_eq!(BlockRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(BlockRole::parse(" Assistant "), Some(BlockRole::Assistant));
        assert_eq!(BlockRole::parse("narrator"), None);
    }

    #[test]
    fn test_only_forward_steps_are_legal() {
        use BlockState::{Inscribed, Live, Transitioning};

        assert!(Live.can_advance_to(Transitioning));
        assert!(Transitioning.can_advance_to(Inscribed));

        assert!(!Live.can_advance_to(Inscribed));
        assert!(!Inscribed.can_advance_to(Live));
        assert!(!Inscribed.can_advance_to(Transitioning));
        assert!(!Transitioning.can_advance_to(Live));
        assert!(!Live.can_advance_to(Live));
    }
}
