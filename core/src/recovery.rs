//! Best-effort in-place repair before re-validation.
//!
//! Recovery only touches conditions that are safe to fix without inventing
//! data. It cannot produce missing content or finish a sub-block, so the
//! caller always re-validates afterwards.

use std::fmt;

use crate::block::Block;

/// One repair applied to a block.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// The in-flight producer was aborted and the flag cleared.
    ClearedActiveOperation { label: String },
    /// Top-level progress forced to 1.0.
    CompletedProgress { from: f64 },
    ClampedTokensIn { from: i64 },
    ClampedTokensOut { from: i64 },
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::ClearedActiveOperation { label } => {
                write!(f, "aborted active operation '{label}'")
            }
            RecoveryAction::CompletedProgress { from } => {
                write!(f, "forced progress {from:.2} -> 1.00")
            }
            RecoveryAction::ClampedTokensIn { from } => write!(f, "clamped tokens_in {from} -> 0"),
            RecoveryAction::ClampedTokensOut { from } => {
                write!(f, "clamped tokens_out {from} -> 0")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryOutcome {
    actions: Vec<RecoveryAction>,
    error: Option<String>,
}

impl RecoveryOutcome {
    /// Every repair the strategy attempted went through.
    ///
    /// Success says nothing about validity; only the validator decides that.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    #[must_use]
    pub fn actions(&self) -> &[RecoveryAction] {
        &self.actions
    }

    #[must_use]
    pub fn changed(&self) -> bool {
        !self.actions.is_empty()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn into_actions(self) -> Vec<RecoveryAction> {
        self.actions
    }
}

/// A repair policy run by the transition manager on invalid blocks.
pub trait RecoveryStrategy: Send + Sync {
    fn recover(&self, block: &mut Block) -> RecoveryOutcome;
}

/// Default policy: stop the producer, finish progress, clamp negative tokens.
///
/// Running it on an already-recovered block changes nothing and succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeRecovery;

impl RecoveryStrategy for SafeRecovery {
    fn recover(&self, block: &mut Block) -> RecoveryOutcome {
        let mut outcome = RecoveryOutcome::default();
        if let Err(err) = repair(block, &mut outcome.actions) {
            tracing::warn!(block = %block.id(), "Recovery stopped: {err}");
            outcome.error = Some(err.to_string());
        }
        for action in &outcome.actions {
            tracing::info!(block = %block.id(), "Recovered: {action}");
        }
        outcome
    }
}

fn repair(block: &mut Block, actions: &mut Vec<RecoveryAction>) -> Result<(), crate::BlockError> {
    if let Some(operation) = block.abort_operation()? {
        actions.push(RecoveryAction::ClearedActiveOperation {
            label: operation.label().to_string(),
        });
    }

    if block.progress() < 1.0 {
        let from = block.progress();
        block.set_progress(1.0)?;
        actions.push(RecoveryAction::CompletedProgress { from });
    }

    let (tokens_in, tokens_out) = (block.tokens_in(), block.tokens_out());
    if tokens_in < 0 || tokens_out < 0 {
        block.set_tokens(tokens_in.max(0), tokens_out.max(0))?;
        if tokens_in < 0 {
            actions.push(RecoveryAction::ClampedTokensIn { from: tokens_in });
        }
        if tokens_out < 0 {
            actions.push(RecoveryAction::ClampedTokensOut { from: tokens_out });
        }
    }

    Ok(())
}
