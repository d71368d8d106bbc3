//! Live -> Inscribed transitions.
//!
//! ```text
//! transition_to_inscribed(id)
//!   open scope (active set += record)
//!   ├── validate                      (skipped when forced)
//!   ├── recover + validate once more  (only if invalid and auto_recover)
//!   ├── Err(Validation)               block stays Live, annotated
//!   ├── timeline.inscribe_block       Err(Inscription) on failure
//!   ├── callbacks(record)             success and failure alike
//!   └── close scope (active set -= record, on every exit path)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use scriv_types::metadata::keys;
use scriv_types::{BlockId, BlockState, InscribedBlock, TransitionId};

use crate::block::Block;
use crate::errors::{TimelineError, TransitionError};
use crate::recovery::{RecoveryAction, RecoveryStrategy, SafeRecovery};
use crate::timeline::{Timeline, TimelineEntry, lock_block};
use crate::validator::{ValidationWarning, Validator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOptions {
    /// Skip validation entirely.
    pub force: bool,
    /// Run the recovery strategy once when validation fails.
    pub auto_recover: bool,
}

impl Default for TransitionOptions {
    fn default() -> Self {
        Self {
            force: false,
            auto_recover: true,
        }
    }
}

impl TransitionOptions {
    #[must_use]
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn without_recovery() -> Self {
        Self {
            auto_recover: false,
            ..Self::default()
        }
    }
}

/// A transition that is currently executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTransition {
    pub id: TransitionId,
    pub block: BlockId,
    pub from: BlockState,
    pub to: BlockState,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Inscribed,
    ValidationFailed,
    InscriptionFailed,
}

/// What happened during one call, handed to every transition callback.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub transition: ActiveTransition,
    pub outcome: TransitionOutcome,
    pub error: Option<String>,
    pub forced: bool,
    pub recovery: Vec<RecoveryAction>,
    pub warnings: Vec<ValidationWarning>,
    pub duration: Duration,
}

impl TransitionRecord {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == TransitionOutcome::Inscribed
    }
}

pub type TransitionCallback = Box<dyn Fn(&TransitionRecord) + Send + Sync>;

type ActiveSet = Mutex<HashMap<TransitionId, ActiveTransition>>;

/// Membership of one transition in the active set, released on drop.
struct TransitionScope<'a> {
    active: &'a ActiveSet,
    transition: ActiveTransition,
}

impl<'a> TransitionScope<'a> {
    fn open(active: &'a ActiveSet, transition: ActiveTransition) -> Self {
        active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(transition.id, transition.clone());
        Self { active, transition }
    }
}

impl Drop for TransitionScope<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.transition.id);
    }
}

#[derive(Debug, Default)]
struct Attempt {
    recovery: Vec<RecoveryAction>,
    warnings: Vec<ValidationWarning>,
}

pub struct TransitionManager {
    timeline: Arc<Timeline>,
    validator: Validator,
    recovery: Box<dyn RecoveryStrategy>,
    callbacks: RwLock<Vec<TransitionCallback>>,
    active: ActiveSet,
    next_id: AtomicU64,
}

impl TransitionManager {
    #[must_use]
    pub fn new(timeline: Arc<Timeline>) -> Self {
        Self::with_recovery(timeline, SafeRecovery)
    }

    #[must_use]
    pub fn with_recovery(
        timeline: Arc<Timeline>,
        recovery: impl RecoveryStrategy + 'static,
    ) -> Self {
        Self {
            timeline,
            validator: Validator::new(),
            recovery: Box::new(recovery),
            callbacks: RwLock::new(Vec::new()),
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Register a callback fired after every transition attempt.
    pub fn on_transition(&self, callback: impl Fn(&TransitionRecord) + Send + Sync + 'static) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Transitions executing right now, oldest first.
    #[must_use]
    pub fn active_transitions(&self) -> Vec<ActiveTransition> {
        let mut active: Vec<ActiveTransition> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        active.sort_by_key(|t| t.id.value());
        active
    }

    #[must_use]
    pub fn is_transitioning(&self, block: BlockId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|t| t.block == block)
    }

    /// Validate, optionally recover, and inscribe a top-level live block.
    ///
    /// Exactly one of success, [`TransitionError::Validation`], or
    /// [`TransitionError::Inscription`] comes back per call.
    pub fn transition_to_inscribed(
        &self,
        id: BlockId,
        options: TransitionOptions,
    ) -> Result<Arc<InscribedBlock>, TransitionError> {
        let scope = TransitionScope::open(
            &self.active,
            ActiveTransition {
                id: TransitionId::new(self.next_id.fetch_add(1, Ordering::Relaxed)),
                block: id,
                from: BlockState::Live,
                to: BlockState::Inscribed,
                started_at: Utc::now(),
            },
        );
        let started = Instant::now();
        tracing::debug!(
            block = %id,
            transition = %scope.transition.id,
            ?options,
            "Transition started"
        );

        let mut attempt = Attempt::default();
        let result = self.attempt(id, options, &mut attempt);

        let (outcome, error) = match &result {
            Ok(_) => (TransitionOutcome::Inscribed, None),
            Err(err @ TransitionError::Validation { .. }) => {
                (TransitionOutcome::ValidationFailed, Some(err.to_string()))
            }
            Err(err @ TransitionError::Inscription { .. }) => {
                (TransitionOutcome::InscriptionFailed, Some(err.to_string()))
            }
        };
        match &error {
            None => tracing::debug!(block = %id, "Transition succeeded"),
            Some(err) => tracing::warn!(block = %id, "Transition failed: {err}"),
        }

        let record = TransitionRecord {
            transition: scope.transition.clone(),
            outcome,
            error,
            forced: options.force,
            recovery: attempt.recovery,
            warnings: attempt.warnings,
            duration: started.elapsed(),
        };
        self.fire(&record);
        drop(scope);

        result
    }

    fn attempt(
        &self,
        id: BlockId,
        options: TransitionOptions,
        attempt: &mut Attempt,
    ) -> Result<Arc<InscribedBlock>, TransitionError> {
        let handle = match self.timeline.get_block(id) {
            Some(TimelineEntry::Live(handle)) => handle,
            Some(TimelineEntry::Inscribed(_)) => {
                return Err(TransitionError::Inscription {
                    id,
                    source: TimelineError::IllegalState {
                        id,
                        state: BlockState::Inscribed,
                    },
                });
            }
            None => {
                return Err(TransitionError::Inscription {
                    id,
                    source: TimelineError::NotFound(id),
                });
            }
        };

        {
            let mut block = lock_block(&handle);
            if !block.is_live() {
                return Err(TransitionError::Inscription {
                    id,
                    source: TimelineError::IllegalState {
                        id,
                        state: block.state(),
                    },
                });
            }
            if options.force {
                tracing::warn!(block = %id, "Inscribing without validation (forced)");
            } else {
                self.check(&mut block, options.auto_recover, attempt)?;
            }
            // A stale annotation from an earlier failed attempt must not end
            // up in the permanent record.
            if block.metadata().contains_key(keys::TRANSITION_ERROR) {
                let _ = block.remove_metadata(keys::TRANSITION_ERROR);
            }
        }

        self.timeline
            .inscribe_block(id)
            .map_err(|source| TransitionError::Inscription { id, source })
    }

    fn check(
        &self,
        block: &mut Block,
        auto_recover: bool,
        attempt: &mut Attempt,
    ) -> Result<(), TransitionError> {
        let mut report = self.validator.validate(block);
        if !report.is_valid() && auto_recover {
            let outcome = self.recovery.recover(block);
            if let Some(err) = outcome.error() {
                tracing::warn!(block = %block.id(), "Recovery incomplete: {err}");
            }
            attempt.recovery = outcome.into_actions();
            report = self.validator.validate(block);
        }

        for warning in report.warnings() {
            tracing::warn!(block = %block.id(), "Validation warning: {warning}");
        }
        attempt.warnings = report.warnings().to_vec();

        if report.is_valid() {
            return Ok(());
        }

        let summary = report.summary();
        if let Err(err) = block.set_metadata(keys::TRANSITION_ERROR, serde_json::json!(summary)) {
            tracing::debug!("Could not annotate failed block: {err}");
        }
        Err(TransitionError::Validation {
            id: block.id(),
            failed: report.failed().to_vec(),
            messages: report.errors().to_vec(),
        })
    }

    fn fire(&self, record: &TransitionRecord) {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        for callback in callbacks.iter() {
            callback(record);
        }
    }
}
