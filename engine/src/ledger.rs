//! One timeline, one transition manager, one sequencer.
//!
//! Orchestration code creates blocks through [`Ledger::timeline`], drives
//! them with producers, and calls [`Ledger::inscribe_and_publish`] (or
//! [`Ledger::publish`] for notices) in the order output should appear.

use std::sync::Arc;

use thiserror::Error;

use scriv_core::{Timeline, TransitionError, TransitionManager, TransitionOptions};
use scriv_types::{BlockId, Completed, InscribedBlock};

use crate::config::ScrivConfig;
use crate::notice::Notice;
use crate::scrivener::{DrainReport, Scrivener, ScrivenerHandler, SubmitError};

/// Anything the ledger hands downstream.
#[derive(Debug, Clone)]
pub enum LedgerItem {
    Block(Arc<InscribedBlock>),
    Notice(Notice),
}

impl LedgerItem {
    #[must_use]
    pub fn as_block(&self) -> Option<&Arc<InscribedBlock>> {
        match self {
            LedgerItem::Block(block) => Some(block),
            LedgerItem::Notice(_) => None,
        }
    }

    #[must_use]
    pub fn as_notice(&self) -> Option<&Notice> {
        match self {
            LedgerItem::Notice(notice) => Some(notice),
            LedgerItem::Block(_) => None,
        }
    }
}

impl Completed for LedgerItem {
    fn completion_key(&self) -> String {
        match self {
            LedgerItem::Block(block) => block.completion_key(),
            LedgerItem::Notice(notice) => format!("notice:{}", notice.completion_key()),
        }
    }

    fn is_complete(&self) -> bool {
        match self {
            LedgerItem::Block(block) => block.is_complete(),
            LedgerItem::Notice(notice) => notice.is_complete(),
        }
    }
}

impl From<Arc<InscribedBlock>> for LedgerItem {
    fn from(block: Arc<InscribedBlock>) -> Self {
        LedgerItem::Block(block)
    }
}

impl From<Notice> for LedgerItem {
    fn from(notice: Notice) -> Self {
        LedgerItem::Notice(notice)
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// The block was inscribed but could not be queued for output.
    #[error("block {id} was inscribed but not published: {source}")]
    Publish { id: BlockId, source: SubmitError },
}

pub struct Ledger {
    timeline: Arc<Timeline>,
    transitions: TransitionManager,
    scrivener: Scrivener<LedgerItem>,
    options: TransitionOptions,
}

impl Ledger {
    pub fn new(handler: impl ScrivenerHandler<LedgerItem>) -> Self {
        Self::from_config(&ScrivConfig::default(), handler)
    }

    pub fn from_config(config: &ScrivConfig, handler: impl ScrivenerHandler<LedgerItem>) -> Self {
        let timeline = Arc::new(Timeline::new());
        let options = config.transition_options();
        if options.force {
            tracing::warn!("Transitions are forced; validation is disabled");
        }
        Self {
            transitions: TransitionManager::new(Arc::clone(&timeline)),
            scrivener: Scrivener::new(handler).reject_duplicates(config.reject_duplicates()),
            timeline,
            options,
        }
    }

    #[must_use]
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    #[must_use]
    pub fn transitions(&self) -> &TransitionManager {
        &self.transitions
    }

    #[must_use]
    pub fn scrivener(&self) -> &Scrivener<LedgerItem> {
        &self.scrivener
    }

    #[must_use]
    pub fn options(&self) -> TransitionOptions {
        self.options
    }

    /// Start the sequencer. Must be called within a tokio runtime.
    pub fn start(&self) -> bool {
        self.scrivener.start()
    }

    /// Inscribe with the configured options.
    pub fn inscribe(&self, id: BlockId) -> Result<Arc<InscribedBlock>, TransitionError> {
        self.transitions.transition_to_inscribed(id, self.options)
    }

    pub fn publish(&self, item: impl Into<LedgerItem>) -> Result<(), SubmitError> {
        self.scrivener.submit(item.into())
    }

    /// Inscribe `id`, then queue its record behind everything already queued.
    ///
    /// On a transition failure nothing is queued and the block stays live.
    pub fn inscribe_and_publish(&self, id: BlockId) -> Result<Arc<InscribedBlock>, LedgerError> {
        let record = self.inscribe(id)?;
        self.publish(Arc::clone(&record))
            .map_err(|source| LedgerError::Publish { id, source })?;
        Ok(record)
    }

    /// Drain everything queued and stop the sequencer.
    pub async fn shutdown(&self) -> DrainReport {
        self.scrivener.stop().await
    }
}
