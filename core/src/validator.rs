//! Pre-inscription checks.
//!
//! The validator reads a block and reports; it never mutates and never
//! errors. Hard conditions block inscription, warnings are only surfaced.

use std::fmt;

use scriv_types::metadata;

use crate::block::Block;

/// A named precondition for inscription. Every variant is a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationCondition {
    /// Content is non-empty.
    ContentComplete,
    /// Both token counters are non-negative.
    TokensFinalized,
    /// Every direct sub-block has finished (`progress == 1.0`).
    SubBlocksReady,
    /// No asynchronous producer is still writing.
    NoActiveOperations,
}

impl ValidationCondition {
    pub const ALL: [ValidationCondition; 4] = [
        ValidationCondition::ContentComplete,
        ValidationCondition::TokensFinalized,
        ValidationCondition::SubBlocksReady,
        ValidationCondition::NoActiveOperations,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCondition::ContentComplete => "ContentComplete",
            ValidationCondition::TokensFinalized => "TokensFinalized",
            ValidationCondition::SubBlocksReady => "SubBlocksReady",
            ValidationCondition::NoActiveOperations => "NoActiveOperations",
        }
    }
}

impl fmt::Display for ValidationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Soft findings that do not block inscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationWarning {
    /// `duration_ms` is recorded as zero.
    ZeroDuration,
    /// Tokens were reported but the block never reached full progress.
    ProgressIncomplete { progress: f64 },
    EmptyMetadata,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::ZeroDuration => f.write_str("wall-clock duration is zero"),
            ValidationWarning::ProgressIncomplete { progress } => {
                write!(f, "tokens reported but progress is {progress:.2}, not 1.00")
            }
            ValidationWarning::EmptyMetadata => f.write_str("metadata is empty"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    failed: Vec<ValidationCondition>,
    errors: Vec<String>,
    warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.failed.is_empty()
    }

    #[must_use]
    pub fn failed(&self) -> &[ValidationCondition] {
        &self.failed
    }

    #[must_use]
    pub fn has_failed(&self, condition: ValidationCondition) -> bool {
        self.failed.contains(&condition)
    }

    /// One human-readable message per failed condition, in the same order.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    #[must_use]
    pub fn warnings(&self) -> &[ValidationWarning] {
        &self.warnings
    }

    /// Errors joined into a single line, for annotations and logs.
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors.join("; ")
    }

    fn fail(&mut self, condition: ValidationCondition, message: String) {
        self.failed.push(condition);
        self.errors.push(message);
    }
}

/// Evaluates the fixed inscription preconditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn validate(&self, block: &Block) -> ValidationReport {
        let mut report = ValidationReport::default();

        if block.content().is_empty() {
            report.fail(
                ValidationCondition::ContentComplete,
                format!("block {} has no content", block.id()),
            );
        }

        if block.tokens_in() < 0 || block.tokens_out() < 0 {
            report.fail(
                ValidationCondition::TokensFinalized,
                format!(
                    "block {} has negative token counts (in {}, out {})",
                    block.id(),
                    block.tokens_in(),
                    block.tokens_out()
                ),
            );
        }

        let pending: Vec<String> = block
            .sub_blocks()
            .iter()
            .filter(|child| child.progress() < 1.0)
            .map(|child| format!("{} at {:.0}%", child.id(), child.progress() * 100.0))
            .collect();
        if !pending.is_empty() {
            report.fail(
                ValidationCondition::SubBlocksReady,
                format!(
                    "block {} has unfinished sub-blocks: {}",
                    block.id(),
                    pending.join(", ")
                ),
            );
        }

        if let Some(operation) = block.active_operation() {
            report.fail(
                ValidationCondition::NoActiveOperations,
                format!(
                    "block {} still has an active operation ({})",
                    block.id(),
                    operation.label()
                ),
            );
        }

        if metadata::duration_ms(block.metadata()) == Some(0) {
            report.warnings.push(ValidationWarning::ZeroDuration);
        }
        let has_tokens = block.tokens_in() > 0 || block.tokens_out() > 0;
        if has_tokens && block.progress() < 1.0 {
            report.warnings.push(ValidationWarning::ProgressIncomplete {
                progress: block.progress(),
            });
        }
        if block.metadata().is_empty() {
            report.warnings.push(ValidationWarning::EmptyMetadata);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::future::AbortHandle;
    use scriv_types::BlockRole;
    use scriv_types::metadata::keys;

    use super::*;
    use crate::block::ActiveOperation;

    fn ready_block() -> Block {
        let mut block = Block::new(BlockRole::Assistant, "done");
        block.set_tokens(10, 5).unwrap();
        block.set_progress(1.0).unwrap();
        block
            .set_metadata(keys::DURATION_MS, serde_json::json!(420))
            .unwrap();
        block
    }

    #[test]
    fn test_ready_block_is_valid_without_warnings() {
        let report = Validator::new().validate(&ready_block());
        assert!(report.is_valid());
        assert!(report.errors().is_empty());
        assert!(report.warnings().is_empty());
    }

    #[test]
    fn test_empty_content_always_fails_content_complete() {
        let mut block = Block::new(BlockRole::Assistant, "");
        block.set_tokens(10, 5).unwrap();
        block.set_progress(1.0).unwrap();

        let report = Validator::new().validate(&block);
        assert!(!report.is_valid());
        assert!(report.has_failed(ValidationCondition::ContentComplete));
        assert_eq!(report.failed().len(), report.errors().len());
    }

    #[test]
    fn test_whitespace_only_content_counts_as_content() {
        let mut block = ready_block();
        block.update_content("\n").unwrap();
        let report = Validator::new().validate(&block);
        assert!(!report.has_failed(ValidationCondition::ContentComplete));

        block.update_content("").unwrap();
        assert!(Validator::new()
            .validate(&block)
            .has_failed(ValidationCondition::ContentComplete));
    }

    #[test]
    fn test_negative_tokens_fail_tokens_finalized() {
        let mut block = ready_block();
        block.set_tokens(3, -1).unwrap();
        let report = Validator::new().validate(&block);
        assert_eq!(report.failed(), &[ValidationCondition::TokensFinalized]);
        assert!(report.errors()[0].contains("out -1"));
    }

    #[test]
    fn test_unfinished_sub_block_fails_sub_blocks_ready() {
        let mut parent = ready_block();
        let mut child = Block::new(BlockRole::SubStep, "step");
        child.set_progress(0.4).unwrap();
        let child_id = parent.add_sub_block(child).unwrap();

        let report = Validator::new().validate(&parent);
        assert_eq!(report.failed(), &[ValidationCondition::SubBlocksReady]);
        assert!(report.summary().contains(&child_id.to_string()));
        assert!(report.summary().contains("40%"));

        parent
            .update_sub_block(child_id, |c| c.set_progress(1.0))
            .unwrap();
        assert!(Validator::new().validate(&parent).is_valid());
    }

    #[test]
    fn test_active_operation_fails_no_active_operations() {
        let (handle, _reg) = AbortHandle::new_pair();
        let mut block = ready_block();
        block
            .begin_operation(ActiveOperation::new("stream", handle))
            .unwrap();
        let report = Validator::new().validate(&block);
        assert_eq!(report.failed(), &[ValidationCondition::NoActiveOperations]);
        assert!(report.summary().contains("stream"));
    }

    #[test]
    fn test_soft_warnings_do_not_invalidate() {
        let mut block = Block::new(BlockRole::Assistant, "partial");
        block.set_tokens(4, 4).unwrap();
        block.set_progress(0.5).unwrap();

        let report = Validator::new().validate(&block);
        assert!(report.is_valid());
        assert_eq!(
            report.warnings(),
            &[
                ValidationWarning::ProgressIncomplete { progress: 0.5 },
                ValidationWarning::EmptyMetadata,
            ]
        );

        block
            .set_metadata(keys::DURATION_MS, serde_json::json!(0))
            .unwrap();
        let report = Validator::new().validate(&block);
        assert!(report.warnings().contains(&ValidationWarning::ZeroDuration));
        assert!(!report.warnings().contains(&ValidationWarning::EmptyMetadata));
    }

    #[test]
    fn test_validate_does_not_mutate() {
        let mut block = Block::new(BlockRole::Assistant, "");
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&calls);
        block.register_observer(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let _ = Validator::new().validate(&block);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_every_condition_can_fail_at_once() {
        let (handle, _reg) = AbortHandle::new_pair();
        let mut block = Block::new(BlockRole::Tool, "");
        block.set_tokens(-1, 0).unwrap();
        block
            .add_sub_block(Block::new(BlockRole::SubStep, "s"))
            .unwrap();
        block
            .begin_operation(ActiveOperation::new("exec", handle))
            .unwrap();

        let report = Validator::new().validate(&block);
        assert_eq!(report.failed(), &ValidationCondition::ALL);
    }
}
