//! Error taxonomy for the block lifecycle.
//!
//! Validation and recovery never produce these directly; they return
//! structured reports. The transition manager is the one place that turns a
//! failed report into a [`TransitionError`].

use std::fmt;

use thiserror::Error;

use scriv_types::{BlockId, BlockState};

use crate::validator::ValidationCondition;

/// Who currently holds a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Owner {
    /// Freshly created or released; may be attached anywhere.
    #[default]
    Unowned,
    /// Registered top-level with the timeline.
    Timeline,
    /// Held by value inside the named parent.
    Parent(BlockId),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Unowned => f.write_str("unowned"),
            Owner::Timeline => f.write_str("timeline"),
            Owner::Parent(id) => write!(f, "parent {id}"),
        }
    }
}

/// Failures of a single block's mutating operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("cannot {operation} block {id}: block is {state}")]
    IllegalState {
        id: BlockId,
        state: BlockState,
        operation: &'static str,
    },
    #[error("block {id} is already owned by {owner}")]
    OwnershipViolation { id: BlockId, owner: Owner },
    #[error("block {parent} has no sub-block {id}")]
    NotFound { parent: BlockId, id: BlockId },
}

/// Failures of the ownership authority.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    #[error("block {0} is not owned top-level by the timeline")]
    NotFound(BlockId),
    #[error("block {id} is {state}")]
    IllegalState { id: BlockId, state: BlockState },
    #[error("block {id} is already owned by {owner}")]
    OwnershipViolation { id: BlockId, owner: Owner },
    #[error(transparent)]
    Block(#[from] BlockError),
}

/// The only error `transition_to_inscribed` produces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Content or state was not ready, even after recovery.
    #[error("block {id} failed validation: {}", format_conditions(.failed))]
    Validation {
        id: BlockId,
        failed: Vec<ValidationCondition>,
        messages: Vec<String>,
    },
    /// Validation passed but the authority refused the inscription.
    #[error("block {id} could not be inscribed: {source}")]
    Inscription { id: BlockId, source: TimelineError },
}

impl TransitionError {
    #[must_use]
    pub fn block_id(&self) -> BlockId {
        match self {
            TransitionError::Validation { id, .. } | TransitionError::Inscription { id, .. } => *id,
        }
    }

    #[must_use]
    pub fn failed_conditions(&self) -> &[ValidationCondition] {
        match self {
            TransitionError::Validation { failed, .. } => failed,
            TransitionError::Inscription { .. } => &[],
        }
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, TransitionError::Validation { .. })
    }
}

fn format_conditions(conditions: &[ValidationCondition]) -> String {
    conditions
        .iter()
        .map(ValidationCondition::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_conditions() {
        let id = BlockId::new();
        let err = TransitionError::Validation {
            id,
            failed: vec![
                ValidationCondition::ContentComplete,
                ValidationCondition::SubBlocksReady,
            ],
            messages: Vec::new(),
        };
        assert_eq!(
            err.to_string(),
            format!("block {id} failed validation: ContentComplete, SubBlocksReady")
        );
        assert!(err.is_validation());
        assert_eq!(err.block_id(), id);
    }

    #[test]
    fn test_inscription_error_wraps_timeline_error() {
        let id = BlockId::new();
        let err = TransitionError::Inscription {
            id,
            source: TimelineError::NotFound(id),
        };
        assert!(!err.is_validation());
        assert!(err.failed_conditions().is_empty());
        assert!(err.to_string().contains("not owned top-level"));
    }
}
