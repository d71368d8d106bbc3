//! Core domain types for Scriv.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

use std::sync::Arc;

mod ids;
mod inscribed;
pub mod metadata;
mod role;

pub use ids::{BlockId, TransitionId};
pub use inscribed::{InscribedBlock, InscribedParts};
pub use metadata::Metadata;
pub use role::{BlockRole, BlockState};

/// A unit of work that has finished and may be handed to the sequencer.
///
/// `completion_key` is the logical identity used to reject duplicate
/// submissions; two items with the same key are the same unit of work.
pub trait Completed: Send + 'static {
    fn completion_key(&self) -> String;

    fn is_complete(&self) -> bool;
}

impl Completed for Arc<InscribedBlock> {
    fn completion_key(&self) -> String {
        self.id().as_uuid().to_string()
    }

    // Existence of the record is proof of completion.
    fn is_complete(&self) -> bool {
        true
    }
}
