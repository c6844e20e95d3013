//! Unit tests for the batch dispatcher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;

use fleet_warden::batch::{BatchDispatcher, BatchSink};
use fleet_warden::errors::AppError;
use fleet_warden::Result;

/// Sink that doubles each item and records the size of every batch it saw.
#[derive(Default)]
struct DoublingSink {
    batch_sizes: Mutex<Vec<usize>>,
}

impl BatchSink<u64, u64> for DoublingSink {
    fn dispatch(&self, items: Vec<u64>) -> BoxFuture<'static, Result<Vec<u64>>> {
        self.batch_sizes.lock().expect("lock").push(items.len());
        Box::pin(async move { Ok(items.into_iter().map(|n| n * 2).collect()) })
    }
}

/// Sink that fails every batch.
struct FailingSink;

impl BatchSink<u64, u64> for FailingSink {
    fn dispatch(&self, _items: Vec<u64>) -> BoxFuture<'static, Result<Vec<u64>>> {
        Box::pin(async { Err(AppError::Db("store unavailable".into())) })
    }
}

/// Sink that returns one result fewer than it was given.
struct ShortSink;

impl BatchSink<u64, u64> for ShortSink {
    fn dispatch(&self, items: Vec<u64>) -> BoxFuture<'static, Result<Vec<u64>>> {
        Box::pin(async move { Ok(vec![0; items.len().saturating_sub(1)]) })
    }
}

#[tokio::test]
async fn full_batch_dispatches_and_resolves_each_caller() {
    let sink = Arc::new(DoublingSink::default());
    let (dispatcher, runtime) =
        BatchDispatcher::start(Arc::clone(&sink) as Arc<dyn BatchSink<u64, u64>>, 3, Duration::from_secs(60));

    let (a, b, c) = tokio::join!(dispatcher.add(1), dispatcher.add(2), dispatcher.add(3));
    let mut results = vec![a.expect("a"), b.expect("b"), c.expect("c")];
    results.sort_unstable();
    assert_eq!(results, vec![2, 4, 6]);
    assert_eq!(sink.batch_sizes.lock().expect("lock").as_slice(), &[3]);

    drop(dispatcher);
    runtime.await_completion().await;
}

#[tokio::test]
async fn partial_batch_dispatches_when_wait_budget_expires() {
    let sink = Arc::new(DoublingSink::default());
    let (dispatcher, runtime) = BatchDispatcher::start(
        Arc::clone(&sink) as Arc<dyn BatchSink<u64, u64>>,
        100,
        Duration::from_millis(50),
    );

    let (a, b) = tokio::join!(dispatcher.add(10), dispatcher.add(20));
    let mut results = vec![a.expect("a"), b.expect("b")];
    results.sort_unstable();
    assert_eq!(results, vec![20, 40]);
    assert_eq!(sink.batch_sizes.lock().expect("lock").as_slice(), &[2]);

    drop(dispatcher);
    runtime.await_completion().await;
}

#[tokio::test]
async fn burst_splits_into_full_batches_plus_flushed_remainder() {
    let sink = Arc::new(DoublingSink::default());
    let (dispatcher, runtime) = BatchDispatcher::start(
        Arc::clone(&sink) as Arc<dyn BatchSink<u64, u64>>,
        100,
        Duration::from_secs(60),
    );

    let successes = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for n in 0..250_u64 {
        let dispatcher = dispatcher.clone();
        let successes = Arc::clone(&successes);
        handles.push(tokio::spawn(async move {
            let result = dispatcher.add(n).await.expect("add");
            assert_eq!(result, n * 2);
            successes.fetch_add(1, Ordering::SeqCst);
        }));
    }

    // Let every submission reach the worker before forcing the remainder out.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let flushed = dispatcher.flush().await.expect("flush");
    assert_eq!(flushed, 50);

    for handle in handles {
        handle.await.expect("join");
    }
    assert_eq!(successes.load(Ordering::SeqCst), 250);
    assert_eq!(
        sink.batch_sizes.lock().expect("lock").as_slice(),
        &[100, 100, 50]
    );

    drop(dispatcher);
    runtime.await_completion().await;
}

#[tokio::test]
async fn flush_dispatches_the_partial_queue_at_once() {
    let sink = Arc::new(DoublingSink::default());
    let (dispatcher, runtime) = BatchDispatcher::start(
        Arc::clone(&sink) as Arc<dyn BatchSink<u64, u64>>,
        100,
        Duration::from_secs(60),
    );

    let mut handles = Vec::new();
    for n in 0..7_u64 {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move { dispatcher.add(n).await }));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(dispatcher.flush().await.expect("flush"), 7);
    for handle in handles {
        handle.await.expect("join").expect("resolved by flush");
    }
    assert_eq!(sink.batch_sizes.lock().expect("lock").as_slice(), &[7]);

    drop(dispatcher);
    runtime.await_completion().await;
}

#[tokio::test]
async fn flush_on_empty_queue_returns_zero() {
    let sink = Arc::new(DoublingSink::default());
    let (dispatcher, runtime) = BatchDispatcher::start(
        Arc::clone(&sink) as Arc<dyn BatchSink<u64, u64>>,
        100,
        Duration::from_secs(60),
    );

    assert_eq!(dispatcher.flush().await.expect("flush"), 0);
    assert!(sink.batch_sizes.lock().expect("lock").is_empty());

    drop(dispatcher);
    runtime.await_completion().await;
}

#[tokio::test]
async fn sink_failure_rejects_every_caller_in_the_batch() {
    let (dispatcher, runtime) =
        BatchDispatcher::start(Arc::new(FailingSink), 2, Duration::from_secs(60));

    let (a, b) = tokio::join!(dispatcher.add(1), dispatcher.add(2));
    for result in [a, b] {
        let err = result.expect_err("sink failed");
        assert!(matches!(err, AppError::SinkFailure(_)));
        assert!(err.to_string().contains("store unavailable"));
    }

    drop(dispatcher);
    runtime.await_completion().await;
}

#[tokio::test]
async fn result_count_mismatch_is_a_sink_failure() {
    let (dispatcher, runtime) =
        BatchDispatcher::start(Arc::new(ShortSink), 2, Duration::from_secs(60));

    let (a, b) = tokio::join!(dispatcher.add(1), dispatcher.add(2));
    for result in [a, b] {
        assert!(matches!(result, Err(AppError::SinkFailure(_))));
    }

    drop(dispatcher);
    runtime.await_completion().await;
}

#[tokio::test]
async fn dropping_every_handle_drains_and_stops_the_worker() {
    let sink = Arc::new(DoublingSink::default());
    let (dispatcher, runtime) = BatchDispatcher::start(
        Arc::clone(&sink) as Arc<dyn BatchSink<u64, u64>>,
        100,
        Duration::from_secs(60),
    );

    // An aborted caller leaves its item queued with no one waiting.
    let pending = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.add(7).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    pending.abort();
    let _ = pending.await;

    drop(dispatcher);
    runtime.await_completion().await;
    assert_eq!(
        sink.batch_sizes.lock().expect("lock").as_slice(),
        &[1],
        "queued item dispatched during drain"
    );
}

#[tokio::test]
async fn add_after_shutdown_is_an_internal_error() {
    let sink = Arc::new(DoublingSink::default());
    let (dispatcher, runtime) = BatchDispatcher::start(
        Arc::clone(&sink) as Arc<dyn BatchSink<u64, u64>>,
        100,
        Duration::from_secs(60),
    );

    let survivor = dispatcher.clone();
    drop(dispatcher);
    runtime.await_completion().await;

    let err = survivor.add(1).await.expect_err("worker gone");
    assert!(matches!(err, AppError::Internal(_)));
}
