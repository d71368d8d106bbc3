//! Block lifecycle and inscription for Scriv.
//!
//! A [`Block`] is mutable while `Live`. The [`Timeline`] owns top-level
//! blocks and is the only component allowed to inscribe them; the
//! [`TransitionManager`] drives the `Live -> Inscribed` path with
//! validation and recovery in front of it.
//!
//! Nothing here is async. Locks are `std::sync` and never held across
//! observer callbacks on the timeline index.

mod block;
mod errors;
mod recovery;
mod timeline;
mod transition;
mod validator;

pub use block::{ActiveOperation, Block, BlockObserver};
pub use errors::{BlockError, Owner, TimelineError, TransitionError};
pub use recovery::{RecoveryAction, RecoveryOutcome, RecoveryStrategy, SafeRecovery};
pub use timeline::{
    BlockHandle, Timeline, TimelineEntry, TimelineEvent, TimelineObserver, lock_block,
};
pub use transition::{
    ActiveTransition, TransitionCallback, TransitionManager, TransitionOptions, TransitionOutcome,
    TransitionRecord,
};
pub use validator::{ValidationCondition, ValidationReport, ValidationWarning, Validator};
