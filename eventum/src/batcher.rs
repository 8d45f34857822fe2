use flume::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, trace};

use crate::{Error, StreamItem};

/// Accumulates items into size-bounded batches and delivers them to a
/// bounded inter-stage queue.
///
/// A batch is flushed when it reaches `size` elements, or when the oldest
/// element in the current batch has been waiting longer than `timeout`
/// (whichever comes first). The queue send is performed while the internal
/// buffer is locked, so batches leave in a consistent snapshot and in
/// order; a full downstream queue blocks the producer, which is the
/// pipeline's backpressure path.
///
/// The batcher has an explicit lifecycle: construct it with [Batcher::new],
/// feed it through [Batcher::add], and consume it with [Batcher::close],
/// which stops the timer and performs the final flush. Drivers call
/// `close` on every exit path so no accepted item is left behind.
pub struct Batcher<T> {
    shared: Arc<Shared<T>>,
    timer: Option<JoinHandle<()>>,
}

struct Shared<T> {
    size: usize,
    timeout: Duration,
    tx: Sender<StreamItem<T>>,
    buf: Mutex<Buffer<T>>,
    wakeup: tokio::sync::Notify,
    closed: AtomicBool,
}

struct Buffer<T> {
    items: Vec<T>,
    oldest: Option<Instant>,
}

impl<T> Buffer<T> {
    fn take(&mut self) -> Vec<T> {
        self.oldest = None;
        std::mem::take(&mut self.items)
    }
}

impl<T: Send + 'static> Batcher<T> {
    /// Creates a batcher delivering batches of at most `size` elements to
    /// `tx`, flushing partial batches once their oldest element is older
    /// than `timeout`.
    pub fn new(size: usize, timeout: Duration, tx: Sender<StreamItem<T>>) -> Self {
        let shared = Arc::new(Shared {
            size: size.max(1),
            timeout,
            tx,
            buf: Mutex::new(Buffer {
                items: Vec::new(),
                oldest: None,
            }),
            wakeup: tokio::sync::Notify::new(),
            closed: AtomicBool::new(false),
        });

        let timer = tokio::spawn(run_timer(Arc::clone(&shared)));

        Batcher {
            shared,
            timer: Some(timer),
        }
    }

    /// Appends `item` to the current batch, flushing immediately when the
    /// batch reaches its configured size.
    pub async fn add(&self, item: T) -> Result<(), Error> {
        let mut buf = self.shared.buf.lock().await;
        if buf.items.is_empty() {
            buf.oldest = Some(Instant::now());
            self.shared.wakeup.notify_one();
        }
        buf.items.push(item);
        if buf.items.len() >= self.shared.size {
            let batch = buf.take();
            trace!(len = batch.len(), "flushing full batch");
            self.shared.wakeup.notify_one();
            self.shared
                .tx
                .send_async(StreamItem::Batch(batch))
                .await
                .map_err(|e| Error::UnableToSendToChannel(format!("{e}")))?;
        }
        Ok(())
    }

    /// Delivers the current batch if it is non-empty; no-op otherwise.
    pub async fn flush(&self) -> Result<(), Error> {
        let mut buf = self.shared.buf.lock().await;
        if buf.items.is_empty() {
            return Ok(());
        }
        let batch = buf.take();
        trace!(len = batch.len(), "flushing batch");
        self.shared.wakeup.notify_one();
        self.shared
            .tx
            .send_async(StreamItem::Batch(batch))
            .await
            .map_err(|e| Error::UnableToSendToChannel(format!("{e}")))
    }

    /// Stops the flush timer and delivers any remaining items as a final
    /// batch.
    pub async fn close(mut self) -> Result<(), Error> {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.wakeup.notify_one();
        if let Some(timer) = self.timer.take() {
            let _ = timer.await;
        }
        self.flush().await
    }
}

impl<T> Drop for Batcher<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Flushes a non-empty buffer once its oldest element exceeds the timeout.
///
/// The task recomputes its deadline whenever the buffer state changes and
/// exits when the batcher is closed or the queue disconnects. An empty
/// buffer is never flushed.
async fn run_timer<T: Send>(shared: Arc<Shared<T>>) {
    loop {
        if shared.closed.load(Ordering::Acquire) {
            return;
        }

        let deadline = {
            let buf = shared.buf.lock().await;
            buf.oldest.map(|oldest| oldest + shared.timeout)
        };

        match deadline {
            None => shared.wakeup.notified().await,
            Some(deadline) => {
                tokio::select! {
                    _ = sleep_until(deadline) => {
                        let mut buf = shared.buf.lock().await;
                        let expired = buf
                            .oldest
                            .map(|oldest| oldest.elapsed() >= shared.timeout)
                            .unwrap_or(false);
                        if expired {
                            let batch = buf.take();
                            trace!(len = batch.len(), "flushing batch on timeout");
                            if shared.tx.send_async(StreamItem::Batch(batch)).await.is_err() {
                                debug!("queue disconnected, stopping batch timer");
                                return;
                            }
                        }
                    }
                    _ = shared.wakeup.notified() => {}
                }
            }
        }
    }
}
