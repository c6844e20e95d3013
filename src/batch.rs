//! Generic batching/admission layer for coalescing bursty writes.
//!
//! Callers submit items one at a time through
//! [`add`](BatchDispatcher::add) and suspend until their own result is
//! available. A single background worker accumulates the queue and
//! dispatches it through a pluggable [`BatchSink`] when either the batch
//! size is reached or the oldest queued item has waited out the time
//! budget. Because the worker awaits each dispatch inline, at most one
//! dispatch is in flight per dispatcher; items arriving meanwhile buffer
//! in the channel and form the next batch.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

use crate::{AppError, Result};

const QUEUE_CAPACITY: usize = 256;

/// Destination for accumulated batches.
///
/// `dispatch` must produce exactly one result per input item, in input
/// order. A shorter or longer result vector is treated as a sink failure
/// for the whole batch.
pub trait BatchSink<T, R>: Send + Sync + 'static {
    /// Process one batch, returning one result per item in order.
    fn dispatch(&self, items: Vec<T>) -> BoxFuture<'static, Result<Vec<R>>>;
}

impl<T, R, F> BatchSink<T, R> for F
where
    F: Fn(Vec<T>) -> BoxFuture<'static, Result<Vec<R>>> + Send + Sync + 'static,
{
    fn dispatch(&self, items: Vec<T>) -> BoxFuture<'static, Result<Vec<R>>> {
        self(items)
    }
}

enum Command<T, R> {
    Item(T, oneshot::Sender<Result<R>>),
    Flush(oneshot::Sender<usize>),
}

enum Step<T, R> {
    Cmd(Command<T, R>),
    TimerFired,
    Closed,
}

/// Handle for submitting items to a running dispatcher.
///
/// Cheap to clone; dropping every handle closes the queue, after which
/// the worker drains whatever is still queued and exits.
pub struct BatchDispatcher<T, R> {
    tx: mpsc::Sender<Command<T, R>>,
}

impl<T, R> Clone for BatchDispatcher<T, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Join handle for the background worker task.
pub struct BatchDispatcherRuntime {
    handle: JoinHandle<()>,
}

impl BatchDispatcherRuntime {
    /// Await the worker's completion after all dispatcher handles have
    /// been dropped (or a final [`BatchDispatcher::flush`] was issued).
    pub async fn await_completion(self) {
        let _ = self.handle.await;
    }
}

impl<T, R> BatchDispatcher<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Start a dispatcher with the given sink, batch size, and wait budget.
    #[must_use]
    pub fn start(
        sink: Arc<dyn BatchSink<T, R>>,
        batch_size: usize,
        max_wait: Duration,
    ) -> (Self, BatchDispatcherRuntime) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(run_worker(rx, sink, batch_size.max(1), max_wait));
        (Self { tx }, BatchDispatcherRuntime { handle })
    }

    /// Submit one item and suspend until its result is available.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SinkFailure` when the batch this item landed in
    /// failed as a whole, or `AppError::Internal` when the dispatcher has
    /// shut down.
    pub async fn add(&self, item: T) -> Result<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Item(item, reply_tx))
            .await
            .map_err(|_| AppError::Internal("batch dispatcher is closed".into()))?;

        reply_rx
            .await
            .map_err(|_| AppError::Internal("batch dispatcher dropped the item".into()))?
    }

    /// Force an out-of-cycle dispatch of whatever is queued.
    ///
    /// Used at shutdown to avoid stranding waiters. Returns the number of
    /// items dispatched (zero when the queue was empty).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` when the dispatcher has shut down.
    pub async fn flush(&self) -> Result<usize> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .await
            .map_err(|_| AppError::Internal("batch dispatcher is closed".into()))?;

        done_rx
            .await
            .map_err(|_| AppError::Internal("batch dispatcher dropped the flush".into()))
    }
}

/// Worker loop: accumulate, then dispatch on size, deadline, flush, or close.
async fn run_worker<T: 'static, R: 'static>(
    mut rx: mpsc::Receiver<Command<T, R>>,
    sink: Arc<dyn BatchSink<T, R>>,
    batch_size: usize,
    max_wait: Duration,
) {
    let mut queue: Vec<(T, oneshot::Sender<Result<R>>)> = Vec::new();
    // Valid only while the queue is non-empty: when the oldest queued
    // item runs out of wait budget.
    let mut deadline = Instant::now();

    loop {
        let step = if queue.is_empty() {
            match rx.recv().await {
                Some(cmd) => Step::Cmd(cmd),
                None => Step::Closed,
            }
        } else {
            tokio::select! {
                maybe = rx.recv() => maybe.map_or(Step::Closed, Step::Cmd),
                () = sleep_until(deadline) => Step::TimerFired,
            }
        };

        match step {
            Step::Cmd(Command::Item(item, reply)) => {
                if queue.is_empty() {
                    deadline = Instant::now() + max_wait;
                }
                queue.push((item, reply));
                if queue.len() >= batch_size {
                    dispatch_batch(sink.as_ref(), &mut queue).await;
                }
            }
            Step::Cmd(Command::Flush(done)) => {
                let count = queue.len();
                if count > 0 {
                    dispatch_batch(sink.as_ref(), &mut queue).await;
                }
                let _ = done.send(count);
            }
            Step::TimerFired => {
                dispatch_batch(sink.as_ref(), &mut queue).await;
            }
            Step::Closed => {
                if !queue.is_empty() {
                    dispatch_batch(sink.as_ref(), &mut queue).await;
                }
                debug!("batch dispatcher worker exiting");
                return;
            }
        }
    }
}

/// Hand the accumulated batch to the sink and resolve every waiter.
///
/// On sink failure (or a result/item count mismatch) every caller in the
/// batch receives the same `SinkFailure`; no partial success is assumed.
async fn dispatch_batch<T: 'static, R: 'static>(
    sink: &dyn BatchSink<T, R>,
    queue: &mut Vec<(T, oneshot::Sender<Result<R>>)>,
) {
    let batch = std::mem::take(queue);
    let (items, replies): (Vec<T>, Vec<oneshot::Sender<Result<R>>>) = batch.into_iter().unzip();
    let count = replies.len();
    debug!(count, "dispatching batch");

    match sink.dispatch(items).await {
        Ok(results) if results.len() == count => {
            for (reply, result) in replies.into_iter().zip(results) {
                let _ = reply.send(Ok(result));
            }
        }
        Ok(results) => {
            let msg = format!("sink returned {} results for {count} items", results.len());
            for reply in replies {
                let _ = reply.send(Err(AppError::SinkFailure(msg.clone())));
            }
        }
        Err(err) => {
            let msg = err.to_string();
            for reply in replies {
                let _ = reply.send(Err(AppError::SinkFailure(msg.clone())));
            }
        }
    }
}
