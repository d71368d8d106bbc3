//! Output order follows submission order, not completion order.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{AbortHandle, Abortable};
use scriv_engine::{ActiveOperation, BlockRole, Ledger, Notice, lock_block};
use tokio::sync::oneshot;
use tokio::task::yield_now;
use tokio::time::sleep;

use crate::common::Recorder;

/// Producers finish in reverse order; orchestration still publishes a, b, c.
#[tokio::test]
async fn reverse_completion_renders_in_submission_order() {
    let recorder = Recorder::new();
    let ledger = Arc::new(Ledger::new(recorder.handler()));
    ledger.start();

    let mut producers = Vec::new();
    let mut ids = Vec::new();
    for (name, delay_ms) in [("a", 60), ("b", 30), ("c", 0)] {
        let handle = ledger.timeline().add_live_block(BlockRole::Assistant, "");
        ids.push(lock_block(&handle).id());
        producers.push(tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;
            let mut block = lock_block(&handle);
            block.append_content(name).unwrap();
            block.set_progress(1.0).unwrap();
        }));
    }

    // Wait for whichever finishes; the order of joins does not matter.
    for producer in producers.into_iter().rev() {
        producer.await.unwrap();
    }
    for id in &ids {
        ledger.inscribe_and_publish(*id).unwrap();
    }
    ledger.shutdown().await;

    assert_eq!(recorder.lines(), vec!["a", "b", "c"]);
}

/// Each producer publishes as soon as it and every earlier producer are done.
#[tokio::test]
async fn chained_publication_preserves_order() {
    let recorder = Recorder::new();
    let ledger = Arc::new(Ledger::new(recorder.handler()));
    ledger.start();

    let count = 8_u64;
    let mut previous: Option<oneshot::Receiver<()>> = None;
    let mut tasks = Vec::new();
    for n in 0..count {
        let ledger = Arc::clone(&ledger);
        let handle = ledger
            .timeline()
            .add_live_block(BlockRole::Assistant, format!("item {n}"));
        let id = lock_block(&handle).id();
        let wait_for = previous.take();
        let (done_tx, done_rx) = oneshot::channel();
        previous = Some(done_rx);

        tasks.push(tokio::spawn(async move {
            // Later items finish their own work first.
            sleep(Duration::from_millis((count - n) * 5)).await;
            lock_block(&handle).set_progress(1.0).unwrap();
            if let Some(earlier) = wait_for {
                let _ = earlier.await;
            }
            ledger.inscribe_and_publish(id).unwrap();
            let _ = done_tx.send(());
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    let report = ledger.shutdown().await;

    let expected: Vec<String> = (0..count).map(|n| format!("item {n}")).collect();
    assert_eq!(recorder.lines(), expected);
    assert_eq!(report.processed, 8);
}

/// Many submitters at once: nothing lost, nothing doubled, per-task order kept.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submitters_keep_per_task_order() {
    let recorder = Recorder::new();
    let ledger = Arc::new(Ledger::new(recorder.handler()));
    ledger.start();

    let mut tasks = Vec::new();
    for task in 0..6 {
        let ledger = Arc::clone(&ledger);
        tasks.push(tokio::spawn(async move {
            for seq in 0..20 {
                let key = format!("{task}-{seq}");
                ledger
                    .publish(Notice::new(key.clone(), BlockRole::Tool, key))
                    .unwrap();
                yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    ledger.shutdown().await;

    let lines = recorder.lines();
    assert_eq!(lines.len(), 120);
    for task in 0..6 {
        let seqs: Vec<u32> = lines
            .iter()
            .filter_map(|line| line.strip_prefix(&format!("{task}-")))
            .map(|seq| seq.parse().unwrap())
            .collect();
        assert_eq!(seqs, (0..20).collect::<Vec<_>>());
    }
}

/// A still-running producer is aborted by recovery, not waited on.
#[tokio::test]
async fn recovery_aborts_running_producer() {
    let recorder = Recorder::new();
    let ledger = Ledger::new(recorder.handler());
    ledger.start();

    let handle = ledger
        .timeline()
        .add_live_block(BlockRole::Assistant, "partial answer");
    let id = lock_block(&handle).id();
    let (abort, registration) = AbortHandle::new_pair();
    let producer = tokio::spawn(Abortable::new(
        pending::<()>(),
        registration,
    ));
    lock_block(&handle)
        .begin_operation(ActiveOperation::new("stream", abort))
        .unwrap();

    let record = ledger.inscribe_and_publish(id).unwrap();
    assert!(producer.await.unwrap().is_err(), "producer should be aborted");
    ledger.shutdown().await;

    assert_eq!(record.progress(), 1.0);
    assert_eq!(recorder.lines(), vec!["partial answer"]);
}

#[tokio::test]
async fn stop_waits_for_everything_queued() {
    let recorder = Recorder::new();
    let ledger = Ledger::new(recorder.handler());
    ledger.start();

    for n in 0..50 {
        ledger
            .publish(Notice::new(format!("n{n}"), BlockRole::Tool, format!("{n}")))
            .unwrap();
    }
    let report = ledger.shutdown().await;

    assert_eq!(report.processed, 50);
    assert_eq!(recorder.lines().len(), 50);
    assert!(ledger.publish(Notice::new("late", BlockRole::Tool, "late")).is_err());
}
