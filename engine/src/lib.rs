//! Ordered output and orchestration for Scriv.
//!
//! This crate adds the async half on top of `scriv-core`: the
//! [`Scrivener`] sequencer, TOML configuration, and the [`Ledger`] facade
//! that wires a timeline, a transition manager, and a sequencer together.

// Re-export from crates for public API
pub use scriv_core::{
    ActiveOperation, ActiveTransition, Block, BlockError, BlockHandle, Owner, RecoveryAction,
    RecoveryOutcome, RecoveryStrategy, SafeRecovery, Timeline, TimelineEntry, TimelineError,
    TimelineEvent, TransitionError, TransitionManager, TransitionOptions, TransitionOutcome,
    TransitionRecord, ValidationCondition, ValidationReport, ValidationWarning, Validator,
    lock_block,
};
pub use scriv_types::{BlockId, BlockRole, BlockState, Completed, InscribedBlock};

mod config;
pub use config::{ConfigError, LogConfig, ScrivConfig, ScrivenerConfig, TransitionConfig};

mod ledger;
pub use ledger::{Ledger, LedgerError, LedgerItem};

mod notice;
pub use notice::Notice;

mod scrivener;
pub use scrivener::{DrainReport, Scrivener, ScrivenerHandler, ScrivenerState, SubmitError};
