//! The ownership authority.
//!
//! The timeline is the single index of top-level blocks and the only thing
//! allowed to turn a live block into an inscribed record. Sub-blocks never
//! appear in the index; enumerating the timeline is therefore enough to
//! render every visible item exactly once.
//!
//! # Locking
//!
//! - `ops` serializes the authority's mutating operations against each other.
//! - `index` guards the id -> entry map and is only held for short reads/writes,
//!   never while a block lock is being acquired.
//! - Each live block sits behind its own mutex ([`BlockHandle`]); content
//!   mutation by producers never touches `ops` or `index`.
//!
//! Observers run synchronously on the calling thread. They may query the
//! timeline but must not call its mutating operations, and must not lock the
//! block they are handed.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use chrono::Utc;

use scriv_types::{BlockId, BlockRole, BlockState, InscribedBlock};

use crate::block::{Block, BlockObserver};
use crate::errors::{Owner, TimelineError};

/// Shared handle to a live block owned by the timeline.
pub type BlockHandle = Arc<Mutex<Block>>;

/// Lock a block handle, recovering the guard if a writer panicked.
pub fn lock_block(handle: &BlockHandle) -> MutexGuard<'_, Block> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A top-level slot: a live block, or the record that replaced it.
#[derive(Debug, Clone)]
pub enum TimelineEntry {
    Live(BlockHandle),
    Inscribed(Arc<InscribedBlock>),
}

impl TimelineEntry {
    #[must_use]
    pub fn is_inscribed(&self) -> bool {
        matches!(self, TimelineEntry::Inscribed(_))
    }

    #[must_use]
    pub fn as_live(&self) -> Option<&BlockHandle> {
        match self {
            TimelineEntry::Live(handle) => Some(handle),
            TimelineEntry::Inscribed(_) => None,
        }
    }

    #[must_use]
    pub fn as_inscribed(&self) -> Option<&Arc<InscribedBlock>> {
        match self {
            TimelineEntry::Inscribed(record) => Some(record),
            TimelineEntry::Live(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum TimelineEvent<'a> {
    BlockAdded(&'a Block),
    BlockUpdated(&'a Block),
    BlockInscribed {
        record: &'a InscribedBlock,
        /// Id of the live block the record replaced; equal to `record.id()`.
        live_id: BlockId,
    },
    BlockRemoved { id: BlockId },
}

pub type TimelineObserver = Arc<dyn Fn(&TimelineEvent<'_>) + Send + Sync>;

#[derive(Default)]
struct ObserverList(RwLock<Vec<TimelineObserver>>);

impl ObserverList {
    fn push(&self, observer: TimelineObserver) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn emit(&self, event: &TimelineEvent<'_>) {
        let observers = self.0.read().unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter() {
            observer(event);
        }
    }
}

/// Top-level entries in insertion order, with a revision that bumps on every
/// structural change. Renderers can use the revision as a cache key.
#[derive(Debug, Default)]
struct Index {
    order: Vec<BlockId>,
    entries: HashMap<BlockId, TimelineEntry>,
    revision: u64,
}

impl Index {
    fn insert(&mut self, id: BlockId, entry: TimelineEntry) {
        self.order.push(id);
        self.entries.insert(id, entry);
        self.bump();
    }

    fn replace(&mut self, id: BlockId, entry: TimelineEntry) {
        self.entries.insert(id, entry);
        self.bump();
    }

    fn remove(&mut self, id: BlockId) -> Option<TimelineEntry> {
        let removed = self.entries.remove(&id)?;
        self.order.retain(|existing| *existing != id);
        self.bump();
        Some(removed)
    }

    fn ordered(&self) -> Vec<TimelineEntry> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).cloned())
            .collect()
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

#[derive(Default)]
pub struct Timeline {
    ops: Mutex<()>,
    index: RwLock<Index>,
    observers: Arc<ObserverList>,
}

impl Timeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to timeline events. Observers fire in registration order.
    pub fn add_observer(&self, observer: impl Fn(&TimelineEvent<'_>) + Send + Sync + 'static) {
        self.observers.push(Arc::new(observer));
    }

    /// Create a block and register it top-level.
    pub fn add_live_block(&self, role: BlockRole, content: impl Into<String>) -> BlockHandle {
        let block = Block::new(role, content);
        match self.adopt_block(block) {
            Ok(handle) => handle,
            // A fresh block is always unowned.
            Err(err) => unreachable!("fresh block rejected: {err}"),
        }
    }

    /// Register an externally created, unowned block top-level.
    pub fn adopt_block(&self, mut block: Block) -> Result<BlockHandle, TimelineError> {
        let _op = self.lock_ops();
        let id = block.id();
        if block.owner() != Owner::Unowned {
            return Err(TimelineError::OwnershipViolation {
                id,
                owner: block.owner(),
            });
        }
        if !block.is_live() {
            return Err(TimelineError::IllegalState {
                id,
                state: block.state(),
            });
        }
        block.claim_for_timeline(self.forwarder())?;
        let role = block.role();
        let handle = Arc::new(Mutex::new(block));
        self.write_index()
            .insert(id, TimelineEntry::Live(Arc::clone(&handle)));
        tracing::debug!(block = %id, role = %role, "Block added");

        let guard = lock_block(&handle);
        self.observers.emit(&TimelineEvent::BlockAdded(&guard));
        drop(guard);
        Ok(handle)
    }

    /// Create a block inside a top-level live parent.
    ///
    /// The child is held by value by the parent and is not indexed.
    pub fn add_sub_block(
        &self,
        parent_id: BlockId,
        role: BlockRole,
        content: impl Into<String>,
    ) -> Result<BlockId, TimelineError> {
        let _op = self.lock_ops();
        let handle = self.live_handle(parent_id)?;
        let mut parent = lock_block(&handle);
        let id = parent.add_sub_block(Block::new(role, content))?;
        tracing::debug!(block = %id, parent = %parent_id, role = %role, "Sub-block added");
        Ok(id)
    }

    /// True if `id` is a top-level entry, live or inscribed.
    #[must_use]
    pub fn owns_block(&self, id: BlockId) -> bool {
        self.read_index().entries.contains_key(&id)
    }

    /// Top-level lookup only. Sub-blocks are deliberately invisible here.
    #[must_use]
    pub fn get_block(&self, id: BlockId) -> Option<TimelineEntry> {
        self.read_index().entries.get(&id).cloned()
    }

    /// Every top-level entry, in the order it was added.
    #[must_use]
    pub fn get_all_top_level_blocks(&self) -> Vec<TimelineEntry> {
        self.read_index().ordered()
    }

    #[must_use]
    pub fn live_ids(&self) -> Vec<BlockId> {
        let index = self.read_index();
        index
            .order
            .iter()
            .copied()
            .filter(|id| matches!(index.entries.get(id), Some(TimelineEntry::Live(_))))
            .collect()
    }

    #[must_use]
    pub fn inscribed_records(&self) -> Vec<Arc<InscribedBlock>> {
        self.get_all_top_level_blocks()
            .into_iter()
            .filter_map(|entry| entry.as_inscribed().cloned())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_index().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.read_index().revision
    }

    /// Which context currently holds `id`, searching inside every top-level
    /// entry. `None` if the block is unknown to this timeline.
    #[must_use]
    pub fn owner_of(&self, id: BlockId) -> Option<Owner> {
        if self.owns_block(id) {
            return Some(Owner::Timeline);
        }
        self.get_all_top_level_blocks().iter().find_map(|entry| match entry {
            TimelineEntry::Live(handle) => lock_block(handle).parent_of(id).map(Owner::Parent),
            TimelineEntry::Inscribed(record) => record_parent_of(record, id).map(Owner::Parent),
        })
    }

    /// Replace a live top-level block with its immutable record.
    ///
    /// The block moves Live -> Transitioning -> Inscribed while its lock is
    /// held, and the index entry is swapped in between, so no observer can
    /// see the id owned twice or not at all.
    pub fn inscribe_block(&self, id: BlockId) -> Result<Arc<InscribedBlock>, TimelineError> {
        let _op = self.lock_ops();
        let handle = self.live_handle(id)?;
        let record = {
            let mut block = lock_block(&handle);
            if !block.is_live() {
                return Err(TimelineError::IllegalState {
                    id,
                    state: block.state(),
                });
            }
            block.advance_state(BlockState::Transitioning)?;
            let record = Arc::new(block.snapshot(Utc::now()));
            self.write_index()
                .replace(id, TimelineEntry::Inscribed(Arc::clone(&record)));
            block.advance_state(BlockState::Inscribed)?;
            record
        };
        tracing::debug!(
            block = %id,
            sub_blocks = record.sub_blocks().len(),
            "Block inscribed"
        );

        self.observers.emit(&TimelineEvent::BlockInscribed {
            record: &record,
            live_id: id,
        });
        Ok(record)
    }

    /// Drop a live block from the index and hand it back unowned.
    ///
    /// Inscribed records are permanent and cannot be removed.
    pub fn remove_block(&self, id: BlockId) -> Result<BlockHandle, TimelineError> {
        let _op = self.lock_ops();
        let handle = self.live_handle(id)?;
        lock_block(&handle).release();
        self.write_index().remove(id);
        tracing::debug!(block = %id, "Block removed");

        self.observers.emit(&TimelineEvent::BlockRemoved { id });
        Ok(handle)
    }

    fn live_handle(&self, id: BlockId) -> Result<BlockHandle, TimelineError> {
        match self.read_index().entries.get(&id) {
            Some(TimelineEntry::Live(handle)) => Ok(Arc::clone(handle)),
            Some(TimelineEntry::Inscribed(_)) => Err(TimelineError::IllegalState {
                id,
                state: BlockState::Inscribed,
            }),
            None => Err(TimelineError::NotFound(id)),
        }
    }

    fn forwarder(&self) -> BlockObserver {
        let observers = Arc::clone(&self.observers);
        Arc::new(move |block: &Block| observers.emit(&TimelineEvent::BlockUpdated(block)))
    }

    fn lock_ops(&self) -> MutexGuard<'_, ()> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_index(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn record_parent_of(record: &InscribedBlock, id: BlockId) -> Option<BlockId> {
    for child in record.sub_blocks() {
        if child.id() == id {
            return Some(record.id());
        }
        if let Some(parent) = record_parent_of(child, id) {
            return Some(parent);
        }
    }
    None
}
