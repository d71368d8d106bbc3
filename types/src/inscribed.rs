//! Immutable inscription records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BlockId, BlockRole, Metadata};

/// Raw fields of an [`InscribedBlock`], filled in by the snapshot taker.
#[derive(Debug, Clone)]
pub struct InscribedParts {
    pub id: BlockId,
    pub role: BlockRole,
    pub content: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub inscribed_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub sub_blocks: Vec<InscribedBlock>,
}

/// Finalized record of a completed block.
///
/// Built once at the moment of inscription and never mutated afterwards:
/// there are no `&mut self` methods. Every sub-block the live block held is
/// captured recursively in `sub_blocks`, including its own metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InscribedBlock {
    id: BlockId,
    role: BlockRole,
    content: String,
    tokens_in: u64,
    tokens_out: u64,
    progress: f64,
    created_at: DateTime<Utc>,
    inscribed_at: DateTime<Utc>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    sub_blocks: Vec<InscribedBlock>,
}

impl InscribedBlock {
    #[must_use]
    pub fn from_parts(parts: InscribedParts) -> Self {
        let InscribedParts {
            id,
            role,
            content,
            tokens_in,
            tokens_out,
            progress,
            created_at,
            inscribed_at,
            metadata,
            sub_blocks,
        } = parts;
        Self {
            id,
            role,
            content,
            tokens_in,
            tokens_out,
            progress,
            created_at,
            inscribed_at,
            metadata,
            sub_blocks,
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
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn tokens_in(&self) -> u64 {
        self.tokens_in
    }

    #[must_use]
    pub fn tokens_out(&self) -> u64 {
        self.tokens_out
    }

    #[must_use]
    pub fn progress(&self) -> f64 {
        self.progress
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn inscribed_at(&self) -> DateTime<Utc> {
        self.inscribed_at
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn sub_blocks(&self) -> &[InscribedBlock] {
        &self.sub_blocks
    }

    /// Number of records nested below this one, at any depth.
    #[must_use]
    pub fn descendant_count(&self) -> usize {
        self.sub_blocks
            .iter()
            .map(|child| 1 + child.descendant_count())
            .sum()
    }

    /// Depth-first search for a nested record.
    #[must_use]
    pub fn find(&self, id: BlockId) -> Option<&InscribedBlock> {
        if self.id == id {
            return Some(self);
        }
        self.sub_blocks.iter().find_map(|child| child.find(id))
    }

    /// Full JSON form, sub-blocks included, for persistence collaborators.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
