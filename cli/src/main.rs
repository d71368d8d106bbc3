//! Scriv CLI - runs one simulated turn through the ledger.
//!
//! ```text
//! main() -> Ledger::from_config -> spawn producers -> inscribe_and_publish (in order)
//!                                        |                     |
//!                                        v                     v
//!                               finish in any order     stdout, in submission order
//! ```
//!
//! Producers for thinking, a tool call with sub-steps, and the answer run
//! concurrently and finish out of order. The turn publishes them in the order
//! a reader expects regardless.

use std::{
    fs::{self, OpenOptions},
    io::{Write, stderr, stdout},
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};

use anyhow::{Context, Result};
use futures_util::future::{AbortHandle, Abortable};
use tokio::time::sleep;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use scriv_engine::{
    ActiveOperation, BlockHandle, BlockId, BlockRole, InscribedBlock, Ledger, LedgerError,
    LedgerItem, Notice, ScrivConfig, lock_block,
};

fn init_tracing(configured: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.unwrap_or("info")))
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_scriv_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout carries the rendered turn, so logs fall back to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_scriv_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in scriv_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn scriv_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.scriv/logs/scriv.log
    if let Some(config_path) = ScrivConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("scriv.log"));
    }

    // Fallback: ./.scriv/logs/scriv.log
    candidates.push(PathBuf::from(".scriv").join("logs").join("scriv.log"));

    candidates
}

/// Downstream handler: one rendered entry per item.
fn render(item: &LedgerItem) -> Result<()> {
    let mut out = stdout().lock();
    match item {
        LedgerItem::Block(record) => render_record(&mut out, record, 0)?,
        LedgerItem::Notice(notice) => writeln!(out, "{notice}")?,
    }
    out.flush().context("flush stdout")
}

fn render_record(out: &mut impl Write, record: &InscribedBlock, depth: usize) -> Result<()> {
    let indent = "  ".repeat(depth);
    let mut lines = record.content().lines();
    let first = lines.next().unwrap_or_default();
    write!(out, "{indent}[{}] {first}", record.role().display_name())?;
    if record.tokens_in() + record.tokens_out() > 0 {
        write!(
            out,
            "  ({} in / {} out)",
            record.tokens_in(),
            record.tokens_out()
        )?;
    }
    writeln!(out)?;
    for line in lines {
        writeln!(out, "{indent}    {line}")?;
    }
    for child in record.sub_blocks() {
        render_record(out, child, depth + 1)?;
    }
    Ok(())
}

/// Thinking finishes last despite starting first.
async fn think(block: BlockHandle) {
    for chunk in ["The user wants a status report. ", "Check the tests before answering."] {
        sleep(Duration::from_millis(40)).await;
        let mut block = lock_block(&block);
        if let Err(err) = block.append_content(chunk) {
            tracing::warn!("Thinking producer stopped: {err}");
            return;
        }
        if let Err(err) = block.add_tokens(0, 8) {
            tracing::warn!("Thinking token count not recorded: {err}");
        }
    }
    if let Err(err) = lock_block(&block).set_progress(1.0) {
        tracing::warn!("Thinking block not finished: {err}");
    }
}

/// A tool call whose steps finish one after another.
async fn run_tool(block: BlockHandle, steps: Vec<BlockId>) {
    let total = steps.len();
    for (done, step) in steps.into_iter().enumerate() {
        sleep(Duration::from_millis(15)).await;
        let mut parent = lock_block(&block);
        let result = parent.update_sub_block(step, |child| {
            child.append_content(" ... ok")?;
            child.set_progress(1.0)
        });
        if let Err(err) = result {
            tracing::warn!("Tool producer stopped: {err}");
            return;
        }
        if let Err(err) = parent.set_progress((done + 1) as f64 / total as f64) {
            tracing::warn!("Tool progress not recorded: {err}");
        }
    }
    if let Err(err) = lock_block(&block).update_content("cargo test: 3 suites passed") {
        tracing::warn!("Tool summary not written: {err}");
    }
}

/// The answer streams under an abortable operation.
async fn stream_answer(block: BlockHandle) {
    let (handle, registration) = AbortHandle::new_pair();
    if lock_block(&block)
        .begin_operation(ActiveOperation::new("answer-stream", handle))
        .is_err()
    {
        return;
    }

    let producer = {
        let block = block.clone();
        Abortable::new(
            async move {
                let chunks = ["All three ", "test suites ", "pass.\n", "Nothing to fix."];
                for chunk in chunks {
                    sleep(Duration::from_millis(5)).await;
                    let mut block = lock_block(&block);
                    if block.append_content(chunk).is_err() {
                        return;
                    }
                    if let Err(err) = block.add_tokens(0, 3) {
                        tracing::warn!("Answer token count not recorded: {err}");
                    }
                }
            },
            registration,
        )
    };

    if producer.await.is_err() {
        tracing::debug!("Answer stream aborted");
        return;
    }
    let mut block = lock_block(&block);
    if let Err(err) = block.end_operation() {
        tracing::warn!("Answer stream not closed: {err}");
    }
    if let Err(err) = block.set_progress(1.0) {
        tracing::warn!("Answer block not finished: {err}");
    }
}

fn publish(ledger: &Ledger, id: BlockId) {
    match ledger.inscribe_and_publish(id) {
        Ok(record) => tracing::info!(block = %record.id(), role = %record.role(), "Published"),
        Err(LedgerError::Transition(err)) => {
            tracing::warn!("{err}");
            let notice = Notice::new(id.to_string(), BlockRole::Error, err.to_string());
            if let Err(err) = ledger.publish(notice) {
                tracing::error!("Could not publish failure notice: {err}");
            }
        }
        Err(err) => tracing::error!("{err}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let loaded = ScrivConfig::load();
    let config = loaded.as_ref().ok().and_then(Option::as_ref);
    init_tracing(config.and_then(ScrivConfig::log_filter));
    if let Err(err) = &loaded {
        tracing::warn!(path = %err.path().display(), "Using default config: {err}");
    }

    let default_config = ScrivConfig::default();
    let ledger = Ledger::from_config(config.unwrap_or(&default_config), render);
    ledger.start();
    let timeline = ledger.timeline();

    let user = timeline.add_live_block(BlockRole::User, "Are the tests passing?");
    let user_id = {
        let mut block = lock_block(&user);
        block.set_progress(1.0)?;
        block.id()
    };
    publish(&ledger, user_id);

    let thinking = timeline.add_live_block(BlockRole::Cognition, "");
    let tool = timeline.add_live_block(BlockRole::Tool, "cargo test");
    let answer = timeline.add_live_block(BlockRole::Assistant, "");
    let thinking_id = lock_block(&thinking).id();
    let tool_id = lock_block(&tool).id();
    let answer_id = lock_block(&answer).id();

    let mut steps = Vec::new();
    for suite in ["scriv-types", "scriv-core", "scriv-engine"] {
        steps.push(timeline.add_sub_block(tool_id, BlockRole::SubStep, suite)?);
    }

    let producers = [
        tokio::spawn(think(thinking)),
        tokio::spawn(run_tool(tool, steps)),
        tokio::spawn(stream_answer(answer)),
    ];
    for producer in producers {
        producer.await.context("producer task panicked")?;
    }

    for id in [thinking_id, tool_id, answer_id] {
        publish(&ledger, id);
    }

    // Nothing ever wrote to this one, so it stays live with an annotation.
    let stalled = timeline.add_live_block(BlockRole::Error, "");
    publish(&ledger, lock_block(&stalled).id());

    let report = ledger.shutdown().await;
    tracing::info!(
        processed = report.processed,
        failed = report.failed,
        live = timeline.live_ids().len(),
        inscribed = timeline.inscribed_records().len(),
        "Turn complete"
    );
    Ok(())
}
