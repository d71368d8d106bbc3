//! Single-consumer ordered sequencer.
//!
//! Producers may finish in any order. Orchestration code calls
//! [`Scrivener::submit`] in the order results should become visible, and one
//! consumer task hands each item to the downstream handler in exactly that
//! order.
//!
//! ```text
//! Stopped --start()--> Running --stop()--> Draining --sentinel seen--> Stopped
//! ```

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use scriv_types::Completed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrivenerState {
    #[default]
    Stopped,
    Running,
    Draining,
}

impl ScrivenerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ScrivenerState::Stopped => "stopped",
            ScrivenerState::Running => "running",
            ScrivenerState::Draining => "draining",
        }
    }
}

impl fmt::Display for ScrivenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("scrivener is {0}; submissions are closed")]
    NotRunning(ScrivenerState),
    #[error("item {0} was already submitted")]
    Duplicate(String),
    #[error("item {0} is not complete")]
    Incomplete(String),
}

/// Counts from one run of the consumer loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items the handler accepted.
    pub processed: usize,
    /// Items whose handler returned an error or panicked.
    pub failed: usize,
}

impl DrainReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.processed + self.failed
    }
}

/// Downstream render/persist step, called once per item in submission order.
///
/// Errors are logged and the item is skipped; they never stop the loop.
pub trait ScrivenerHandler<T>: Send + 'static {
    fn handle(&mut self, item: &T) -> anyhow::Result<()>;
}

impl<T, F> ScrivenerHandler<T> for F
where
    F: FnMut(&T) -> anyhow::Result<()> + Send + 'static,
{
    fn handle(&mut self, item: &T) -> anyhow::Result<()> {
        self(item)
    }
}

type BoxedHandler<T> = Box<dyn ScrivenerHandler<T>>;

enum Envelope<T> {
    Item(T),
    Sentinel,
}

struct Inner<T> {
    state: ScrivenerState,
    seen: HashSet<String>,
    tx: Option<mpsc::UnboundedSender<Envelope<T>>>,
    /// Set by the consumer once it has parked the handler and stopped.
    done: Option<watch::Receiver<Option<DrainReport>>>,
    /// Parked here while stopped; moved into the consumer while running.
    handler: Option<BoxedHandler<T>>,
}

pub struct Scrivener<T: Completed> {
    inner: Arc<Mutex<Inner<T>>>,
    reject_duplicates: bool,
}

impl<T: Completed> Scrivener<T> {
    pub fn new(handler: impl ScrivenerHandler<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ScrivenerState::Stopped,
                seen: HashSet::new(),
                tx: None,
                done: None,
                handler: Some(Box::new(handler)),
            })),
            reject_duplicates: true,
        }
    }

    /// Accept repeated completion keys instead of rejecting them.
    #[must_use]
    pub fn reject_duplicates(mut self, reject: bool) -> Self {
        self.reject_duplicates = reject;
        self
    }

    #[must_use]
    pub fn state(&self) -> ScrivenerState {
        self.lock().state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ScrivenerState::Running
    }

    /// Spawn the consumer task. Must be called within a tokio runtime.
    ///
    /// Returns `false` when already running or draining, or when the handler
    /// was lost to a consumer task that did not finish cleanly.
    pub fn start(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != ScrivenerState::Stopped {
            tracing::debug!(state = %inner.state, "Scrivener start ignored");
            return false;
        }
        let Some(handler) = inner.handler.take() else {
            tracing::error!("Scrivener cannot start: handler is gone");
            return false;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(None);
        inner.tx = Some(tx);
        inner.done = Some(done_rx);
        tokio::spawn(consume(rx, handler, Arc::downgrade(&self.inner), done_tx));
        inner.state = ScrivenerState::Running;
        tracing::info!("Scrivener started");
        true
    }

    /// Queue a completed item behind everything submitted before it.
    ///
    /// The duplicate check and the enqueue happen under one lock, so the order
    /// in which `submit` calls return `Ok` is the order the handler sees.
    pub fn submit(&self, item: T) -> Result<(), SubmitError> {
        let key = item.completion_key();
        let mut inner = self.lock();

        if inner.state != ScrivenerState::Running {
            return Err(SubmitError::NotRunning(inner.state));
        }
        if !item.is_complete() {
            tracing::warn!(item = %key, "Rejected incomplete item");
            return Err(SubmitError::Incomplete(key));
        }
        if self.reject_duplicates && inner.seen.contains(&key) {
            tracing::warn!(item = %key, "Rejected duplicate item");
            return Err(SubmitError::Duplicate(key));
        }

        let Some(tx) = inner.tx.as_ref() else {
            return Err(SubmitError::NotRunning(inner.state));
        };
        if tx.send(Envelope::Item(item)).is_err() {
            tracing::error!(item = %key, "Scrivener consumer is gone");
            return Err(SubmitError::NotRunning(ScrivenerState::Stopped));
        }
        tracing::debug!(item = %key, "Submitted");
        inner.seen.insert(key);
        Ok(())
    }

    /// Send the sentinel and wait for the consumer to reach it.
    ///
    /// Everything submitted before this call is handled before it returns.
    /// Concurrent callers all wait for the same drain and get the same report.
    /// Dropping the returned future does not interrupt the drain: the consumer
    /// still parks the handler and returns to `Stopped` on its own.
    /// A call made while already stopped returns an empty report.
    pub async fn stop(&self) -> DrainReport {
        let done = {
            let mut inner = self.lock();
            match inner.state {
                ScrivenerState::Stopped => return DrainReport::default(),
                ScrivenerState::Running => {
                    inner.state = ScrivenerState::Draining;
                    tracing::info!("Scrivener draining");
                    if let Some(tx) = inner.tx.take() {
                        let _ = tx.send(Envelope::Sentinel);
                    }
                }
                ScrivenerState::Draining => {
                    tracing::debug!("Scrivener already draining, waiting");
                }
            }
            inner.done.clone()
        };

        let Some(mut done) = done else {
            return DrainReport::default();
        };
        match done.wait_for(Option::is_some).await {
            Ok(report) => (*report).unwrap_or_default(),
            Err(_) => {
                tracing::error!("Scrivener consumer exited without a report");
                DrainReport::default()
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn consume<T: Completed>(
    mut rx: mpsc::UnboundedReceiver<Envelope<T>>,
    mut handler: BoxedHandler<T>,
    owner: Weak<Mutex<Inner<T>>>,
    done: watch::Sender<Option<DrainReport>>,
) {
    let mut report = DrainReport::default();

    while let Some(envelope) = rx.recv().await {
        let item = match envelope {
            Envelope::Item(item) => item,
            Envelope::Sentinel => break,
        };
        let key = item.completion_key();

        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&item))) {
            Ok(Ok(())) => report.processed += 1,
            Ok(Err(err)) => {
                report.failed += 1;
                tracing::warn!(item = %key, "Handler failed, skipping: {err:#}");
            }
            Err(payload) => {
                report.failed += 1;
                let message = panic_message(payload.as_ref());
                tracing::error!(item = %key, "Handler panicked, skipping: {message}");
            }
        }
    }

    // The scrivener itself may be gone; then there is nothing to restore.
    if let Some(shared) = owner.upgrade() {
        let mut inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
        inner.handler = Some(handler);
        inner.tx = None;
        inner.done = None;
        inner.state = ScrivenerState::Stopped;
    }
    tracing::info!(
        processed = report.processed,
        failed = report.failed,
        "Scrivener stopped"
    );
    done.send_replace(Some(report));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
