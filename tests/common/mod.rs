//! Shared test utilities and fixtures

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use scriv_engine::{BlockId, BlockRole, LedgerItem, ScrivenerHandler, Timeline, lock_block};

/// A downstream handler that remembers what it rendered, in order.
#[derive(Clone, Default)]
pub struct Recorder {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> impl ScrivenerHandler<LedgerItem> {
        let lines = Arc::clone(&self.lines);
        move |item: &LedgerItem| -> anyhow::Result<()> {
            let line = match item {
                LedgerItem::Block(block) => block.content().to_string(),
                LedgerItem::Notice(notice) => notice.text().to_string(),
            };
            lines.lock().unwrap().push(line);
            Ok(())
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

/// Add a top-level block that passes validation without recovery.
pub fn ready_block(timeline: &Timeline, role: BlockRole, content: &str) -> BlockId {
    let handle = timeline.add_live_block(role, content);
    let mut block = lock_block(&handle);
    block.set_progress(1.0).unwrap();
    block.id()
}

/// Ids reachable below any top-level entry, live or inscribed.
pub fn nested_ids(timeline: &Timeline) -> Vec<BlockId> {
    fn walk_live(block: &scriv_engine::Block, out: &mut Vec<BlockId>) {
        for child in block.sub_blocks() {
            out.push(child.id());
            walk_live(child, out);
        }
    }
    fn walk_record(record: &scriv_engine::InscribedBlock, out: &mut Vec<BlockId>) {
        for child in record.sub_blocks() {
            out.push(child.id());
            walk_record(child, out);
        }
    }

    let mut out = Vec::new();
    for entry in timeline.get_all_top_level_blocks() {
        if let Some(handle) = entry.as_live() {
            walk_live(&lock_block(handle), &mut out);
        } else if let Some(record) = entry.as_inscribed() {
            walk_record(record, &mut out);
        }
    }
    out
}

pub fn top_level_ids(timeline: &Timeline) -> Vec<BlockId> {
    timeline
        .get_all_top_level_blocks()
        .iter()
        .map(|entry| match (entry.as_live(), entry.as_inscribed()) {
            (Some(handle), _) => lock_block(handle).id(),
            (None, Some(record)) => record.id(),
            (None, None) => unreachable!("entry is either live or inscribed"),
        })
        .collect()
}
