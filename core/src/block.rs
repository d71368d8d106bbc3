//! The mutable "live" block.
//!
//! A block has exactly one logical writer at a time (the producer driving
//! it). There is no locking in here: callers that share a block across tasks
//! wrap it, as the timeline does with [`crate::BlockHandle`].
//!
//! Sub-blocks are held by value. A child moved into a parent cannot be
//! reachable from anywhere else, so a cycle or a second owner cannot exist.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::AbortHandle;

use scriv_types::{BlockId, BlockRole, BlockState, InscribedBlock, InscribedParts, Metadata};

use crate::errors::{BlockError, Owner};

/// Called synchronously after every mutation of the block it is registered on.
pub type BlockObserver = Arc<dyn Fn(&Block) + Send + Sync>;

/// An asynchronous producer still writing into a block.
#[derive(Debug, Clone)]
pub struct ActiveOperation {
    label: String,
    handle: AbortHandle,
}

impl ActiveOperation {
    #[must_use]
    pub fn new(label: impl Into<String>, handle: AbortHandle) -> Self {
        Self {
            label: label.into(),
            handle,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Ask the producer to stop. Idempotent.
    pub fn abort(&self) {
        self.handle.abort();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.handle.is_aborted()
    }
}

pub struct Block {
    id: BlockId,
    role: BlockRole,
    state: BlockState,
    content: String,
    // Signed because providers occasionally report negative corrections;
    // the validator rejects them and recovery clamps them.
    tokens_in: i64,
    tokens_out: i64,
    progress: f64,
    sub_blocks: Vec<Block>,
    metadata: Metadata,
    created_at: DateTime<Utc>,
    owner: Owner,
    active_operation: Option<ActiveOperation>,
    observers: Vec<BlockObserver>,
    /// Installed by the timeline while it owns the block.
    forwarder: Option<BlockObserver>,
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("content", &self.content)
            .field("tokens_in", &self.tokens_in)
            .field("tokens_out", &self.tokens_out)
            .field("progress", &self.progress)
            .field("sub_blocks", &self.sub_blocks)
            .field("metadata", &self.metadata)
            .field("owner", &self.owner)
            .field("active_operation", &self.active_operation)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Block {
    #[must_use]
    pub fn new(role: BlockRole, initial_content: impl Into<String>) -> Self {
        Self {
            id: BlockId::new(),
            role,
            state: BlockState::Live,
            content: initial_content.into(),
            tokens_in: 0,
            tokens_out: 0,
            progress: 0.0,
            sub_blocks: Vec::new(),
            metadata: Metadata::new(),
            created_at: Utc::now(),
            owner: Owner::Unowned,
            active_operation: None,
            observers: Vec::new(),
            forwarder: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[must_use]
    pub fn role(&self) -> BlockRole {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> BlockState {
        self.state
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state == BlockState::Live
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn tokens_in(&self) -> i64 {
        self.tokens_in
    }

    #[must_use]
    pub fn tokens_out(&self) -> i64 {
        self.tokens_out
    }

    #[must_use]
    pub fn progress(&self) -> f64 {
        self.progress
    }

    #[must_use]
    pub fn sub_blocks(&self) -> &[Block] {
        &self.sub_blocks
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn owner(&self) -> Owner {
        self.owner
    }

    #[must_use]
    pub fn active_operation(&self) -> Option<&ActiveOperation> {
        self.active_operation.as_ref()
    }

    #[must_use]
    pub fn has_active_operation(&self) -> bool {
        self.active_operation.is_some()
    }

    /// Find a sub-block at any depth.
    #[must_use]
    pub fn sub_block(&self, id: BlockId) -> Option<&Block> {
        self.sub_blocks
            .iter()
            .find_map(|child| if child.id == id { Some(child) } else { child.sub_block(id) })
    }

    /// Id of the direct parent of `id`, searching this subtree.
    #[must_use]
    pub fn parent_of(&self, id: BlockId) -> Option<BlockId> {
        for child in &self.sub_blocks {
            if child.id == id {
                return Some(self.id);
            }
            if let Some(parent) = child.parent_of(id) {
                return Some(parent);
            }
        }
        None
    }

    pub fn register_observer(&mut self, observer: impl Fn(&Block) + Send + Sync + 'static) {
        self.observers.push(Arc::new(observer));
    }

    pub fn update_content(&mut self, text: impl Into<String>) -> Result<(), BlockError> {
        self.ensure_live("update content of")?;
        self.content = text.into();
        self.notify();
        Ok(())
    }

    pub fn append_content(&mut self, text: &str) -> Result<(), BlockError> {
        self.ensure_live("append to")?;
        self.content.push_str(text);
        self.notify();
        Ok(())
    }

    /// Overwrite both counters with provider-reported totals.
    pub fn set_tokens(&mut self, tokens_in: i64, tokens_out: i64) -> Result<(), BlockError> {
        self.ensure_live("set tokens on")?;
        self.tokens_in = tokens_in;
        self.tokens_out = tokens_out;
        self.notify();
        Ok(())
    }

    pub fn add_tokens(&mut self, tokens_in: u64, tokens_out: u64) -> Result<(), BlockError> {
        self.ensure_live("add tokens to")?;
        self.tokens_in = self.tokens_in.saturating_add_unsigned(tokens_in);
        self.tokens_out = self.tokens_out.saturating_add_unsigned(tokens_out);
        self.notify();
        Ok(())
    }

    /// Clamps to `[0.0, 1.0]`; NaN reads as no progress.
    ///
    /// Progress should never go backwards. That is the producer's contract
    /// and is not checked here.
    pub fn set_progress(&mut self, value: f64) -> Result<(), BlockError> {
        self.ensure_live("set progress on")?;
        self.progress = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        };
        self.notify();
        Ok(())
    }

    pub fn set_metadata(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), BlockError> {
        self.ensure_live("annotate")?;
        self.metadata.insert(key.into(), value);
        self.notify();
        Ok(())
    }

    pub fn remove_metadata(&mut self, key: &str) -> Result<Option<serde_json::Value>, BlockError> {
        self.ensure_live("annotate")?;
        let removed = self.metadata.remove(key);
        if removed.is_some() {
            self.notify();
        }
        Ok(removed)
    }

    /// Mark an asynchronous producer as writing into this block.
    pub fn begin_operation(&mut self, operation: ActiveOperation) -> Result<(), BlockError> {
        self.ensure_live("begin an operation on")?;
        self.active_operation = Some(operation);
        self.notify();
        Ok(())
    }

    /// The producer finished normally.
    pub fn end_operation(&mut self) -> Result<Option<ActiveOperation>, BlockError> {
        self.ensure_live("end an operation on")?;
        let ended = self.active_operation.take();
        if ended.is_some() {
            self.notify();
        }
        Ok(ended)
    }

    /// Abort the in-flight producer, if any, and clear the flag.
    pub fn abort_operation(&mut self) -> Result<Option<ActiveOperation>, BlockError> {
        let ended = self.end_operation()?;
        if let Some(operation) = &ended {
            operation.abort();
        }
        Ok(ended)
    }

    /// Take exclusive ownership of `child`.
    pub fn add_sub_block(&mut self, child: Block) -> Result<BlockId, BlockError> {
        let id = self.attach(child)?;
        self.notify();
        Ok(id)
    }

    /// Mutate a sub-block (at any depth) in place.
    ///
    /// The parent's observers fire once after `f` returns successfully,
    /// since the parent's visible state changed with it.
    pub fn update_sub_block<R>(
        &mut self,
        id: BlockId,
        f: impl FnOnce(&mut Block) -> Result<R, BlockError>,
    ) -> Result<R, BlockError> {
        self.ensure_live("update a sub-block of")?;
        let parent = self.id;
        let child = self
            .sub_block_mut(id)
            .ok_or(BlockError::NotFound { parent, id })?;
        let result = f(child)?;
        self.notify();
        Ok(result)
    }

    /// Snapshot this block and every sub-block into an immutable record.
    ///
    /// Does not change state; the timeline does that while it inscribes.
    pub fn to_inscribed_snapshot(&self) -> Result<InscribedBlock, BlockError> {
        self.ensure_live("snapshot")?;
        Ok(self.snapshot(Utc::now()))
    }

    pub(crate) fn snapshot(&self, inscribed_at: DateTime<Utc>) -> InscribedBlock {
        InscribedBlock::from_parts(InscribedParts {
            id: self.id,
            role: self.role,
            content: self.content.clone(),
            tokens_in: self.tokens_in.max(0).unsigned_abs(),
            tokens_out: self.tokens_out.max(0).unsigned_abs(),
            progress: self.progress,
            created_at: self.created_at,
            inscribed_at,
            metadata: self.metadata.clone(),
            sub_blocks: self
                .sub_blocks
                .iter()
                .map(|child| child.snapshot(inscribed_at))
                .collect(),
        })
    }

    /// Move one step along Live -> Transitioning -> Inscribed.
    ///
    /// Sub-blocks follow their parent so nothing inside an inscribed block
    /// stays writable.
    pub(crate) fn advance_state(&mut self, next: BlockState) -> Result<(), BlockError> {
        if !self.state.can_advance_to(next) {
            return Err(BlockError::IllegalState {
                id: self.id,
                state: self.state,
                operation: "advance",
            });
        }
        self.set_state_recursive(next);
        self.notify();
        Ok(())
    }

    fn set_state_recursive(&mut self, next: BlockState) {
        self.state = next;
        for child in &mut self.sub_blocks {
            child.set_state_recursive(next);
        }
    }

    pub(crate) fn attach(&mut self, mut child: Block) -> Result<BlockId, BlockError> {
        self.ensure_live("add a sub-block to")?;
        if child.owner != Owner::Unowned {
            return Err(BlockError::OwnershipViolation {
                id: child.id,
                owner: child.owner,
            });
        }
        if child.id == self.id || self.sub_block(child.id).is_some() {
            return Err(BlockError::OwnershipViolation {
                id: child.id,
                owner: Owner::Parent(self.id),
            });
        }
        let id = child.id;
        child.owner = Owner::Parent(self.id);
        self.sub_blocks.push(child);
        Ok(id)
    }

    pub(crate) fn claim_for_timeline(
        &mut self,
        forwarder: BlockObserver,
    ) -> Result<(), BlockError> {
        if self.owner != Owner::Unowned {
            return Err(BlockError::OwnershipViolation {
                id: self.id,
                owner: self.owner,
            });
        }
        self.owner = Owner::Timeline;
        self.forwarder = Some(forwarder);
        Ok(())
    }

    pub(crate) fn release(&mut self) {
        self.owner = Owner::Unowned;
        self.forwarder = None;
    }

    fn sub_block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        for child in &mut self.sub_blocks {
            if child.id == id {
                return Some(child);
            }
            if let Some(found) = child.sub_block_mut(id) {
                return Some(found);
            }
        }
        None
    }

    fn ensure_live(&self, operation: &'static str) -> Result<(), BlockError> {
        if self.state == BlockState::Live {
            Ok(())
        } else {
            Err(BlockError::IllegalState {
                id: self.id,
                state: self.state,
                operation,
            })
        }
    }

    pub(crate) fn notify(&self) {
        for observer in &self.observers {
            observer(self);
        }
        if let Some(forwarder) = &self.forwarder {
            forwarder(self);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_owner_for_test(&mut self, owner: Owner) {
        self.owner = owner;
    }
}
