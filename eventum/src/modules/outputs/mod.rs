use crate::config::{ExecutionType, ParsedRegisteredItem};
use crate::{DoneSignal, Error, OutputPlugin, StreamItem};
use flume::Receiver;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod file;
pub mod format;
pub mod stdout;

pub(crate) type BoxedOutput = Box<dyn OutputPlugin + Send + Sync>;

pub(crate) fn register_plugins() -> Result<(), Error> {
    stdout::register_stdout()?;
    file::register_file()?;
    Ok(())
}

/// Runs the output stage: construct and open every configured sink, fan
/// each event batch out to all of them concurrently, and close them on the
/// end-of-stream sentinel.
///
/// The processed-events counter is incremented by the full batch length
/// after all sinks have returned; it measures ingress to the output stage,
/// not per-sink success.
pub(crate) async fn run_output(
    items: Vec<(String, ParsedRegisteredItem)>,
    rx: Receiver<StreamItem<String>>,
    processed_events: Arc<AtomicU64>,
    done: DoneSignal,
) -> Result<(), Error> {
    let result = drive_output(items, rx, processed_events).await;

    if let Err(e) = &result {
        error!(error = format!("{e}"), "output stage failed");
    }
    done.set();
    result
}

async fn drive_output(
    items: Vec<(String, ParsedRegisteredItem)>,
    rx: Receiver<StreamItem<String>>,
    processed_events: Arc<AtomicU64>,
) -> Result<(), Error> {
    let kinds = items
        .iter()
        .map(|(kind, _)| format!("\"{kind}\""))
        .collect::<Vec<String>>()
        .join(", ");
    info!(plugins = kinds, "initializing output plugins");

    let mut plugins: Vec<(String, BoxedOutput)> = Vec::with_capacity(items.len());
    for (kind, item) in items {
        match (item.creator)(item.config).await {
            Ok(ExecutionType::Output(o)) => plugins.push((kind, o)),
            Ok(_) => {
                error!("invalid execution type for output");
                return Err(Error::Validation("invalid execution type".into()));
            }
            Err(e) => {
                error!(
                    plugin = kind,
                    error = format!("{e}"),
                    "failed to initialize output plugin"
                );
                return Err(e);
            }
        }
    }

    info!("output plugins are successfully initialized");

    open_outputs(&mut plugins).await?;
    process_batches(&mut plugins, &rx, &processed_events).await;
    close_outputs(&mut plugins).await;

    debug!("stopping output plugins");
    Ok(())
}

/// Opens all sinks concurrently. When any open fails, the sinks that did
/// open are closed before the first error is returned.
async fn open_outputs(plugins: &mut [(String, BoxedOutput)]) -> Result<(), Error> {
    let results: Vec<Result<(), Error>> =
        join_all(plugins.iter_mut().map(|(kind, plugin)| async move {
            plugin.open().await.map_err(|e| {
                error!(
                    plugin = kind.as_str(),
                    error = format!("{e}"),
                    "failed to open output plugin"
                );
                e
            })
        }))
        .await;

    if !results.iter().any(Result::is_err) {
        return Ok(());
    }

    let closeable = plugins
        .iter_mut()
        .zip(results.iter())
        .filter(|(_, result)| result.is_ok())
        .map(|((kind, plugin), _)| async move {
            if let Err(e) = plugin.close().await {
                error!(
                    plugin = kind.as_str(),
                    error = format!("{e}"),
                    "failed to close output plugin"
                );
            }
        });
    let _ = join_all(closeable).await;

    Err(results
        .into_iter()
        .find_map(Result::err)
        .unwrap_or(Error::OutputError("failed to open output plugins".into())))
}

/// Dequeues event batches until the sentinel arrives or the queue
/// disconnects, fanning each batch out to every sink concurrently.
async fn process_batches(
    plugins: &mut [(String, BoxedOutput)],
    rx: &Receiver<StreamItem<String>>,
    processed_events: &AtomicU64,
) {
    loop {
        match rx.recv_async().await {
            Ok(StreamItem::Batch(events)) => {
                let _ = join_all(
                    plugins
                        .iter_mut()
                        .map(|(kind, plugin)| write_batch(kind, plugin, &events)),
                )
                .await;
                let _ = processed_events.fetch_add(events.len() as u64, Ordering::Relaxed);
            }
            Ok(StreamItem::EndOfStream) => {
                debug!("end of event stream");
                return;
            }
            Err(_) => {
                debug!("event queue disconnected");
                return;
            }
        }
    }
}

/// Writes one batch to one sink, using the single-event path for batches of
/// size one. Write failures do not fail the stage: one failing sink must
/// not block the others.
async fn write_batch(kind: &str, plugin: &mut BoxedOutput, events: &[String]) {
    let batch_size = events.len();
    let result = if batch_size == 1 {
        plugin.write(&events[0]).await
    } else {
        plugin.write_many(events).await
    };

    match result {
        // an errored write counts the batch as complete; no partial-write
        // comparison is made against an undefined count
        Err(e) => error!(
            plugin = kind,
            error = format!("{e}"),
            "output plugin failed to write events"
        ),
        Ok(count) if count < batch_size => warn!(
            plugin = kind,
            written = count,
            batch_size,
            "output plugin wrote fewer events than the batch size"
        ),
        Ok(_) => {}
    }
}

/// Closes all sinks concurrently, best-effort.
async fn close_outputs(plugins: &mut [(String, BoxedOutput)]) {
    let _ = join_all(plugins.iter_mut().map(|(kind, plugin)| async move {
        if let Err(e) = plugin.close().await {
            error!(
                plugin = kind.as_str(),
                error = format!("{e}"),
                "failed to close output plugin"
            );
        }
    }))
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn push(&self, call: impl Into<String>) {
            self.calls.lock().expect("recorder lock").push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("recorder lock").clone()
        }
    }

    struct MockOutput {
        recorder: Recorder,
        fail_open: bool,
        fail_write: bool,
        short_write: bool,
    }

    impl MockOutput {
        fn boxed(recorder: Recorder) -> BoxedOutput {
            Box::new(MockOutput {
                recorder,
                fail_open: false,
                fail_write: false,
                short_write: false,
            })
        }
    }

    #[async_trait]
    impl OutputPlugin for MockOutput {
        async fn open(&mut self) -> Result<(), Error> {
            if self.fail_open {
                return Err(Error::OutputError("open failed".into()));
            }
            self.recorder.push("open");
            Ok(())
        }

        async fn write(&mut self, event: &str) -> Result<usize, Error> {
            if self.fail_write {
                return Err(Error::OutputError("write failed".into()));
            }
            self.recorder.push(format!("write:{event}"));
            Ok(1)
        }

        async fn write_many(&mut self, events: &[String]) -> Result<usize, Error> {
            if self.fail_write {
                return Err(Error::OutputError("write failed".into()));
            }
            self.recorder.push(format!("write_many:{}", events.len()));
            if self.short_write {
                return Ok(events.len() - 1);
            }
            Ok(events.len())
        }

        async fn close(&mut self) -> Result<(), Error> {
            self.recorder.push("close");
            Ok(())
        }
    }

    fn batch(events: &[&str]) -> StreamItem<String> {
        StreamItem::Batch(events.iter().map(|e| e.to_string()).collect())
    }

    #[tokio::test]
    async fn test_single_event_batch_uses_write_path() {
        let recorder = Recorder::default();
        let mut plugins = vec![("mock".to_string(), MockOutput::boxed(recorder.clone()))];
        let (tx, rx) = flume::bounded(10);
        let counter = AtomicU64::new(0);

        tx.send(batch(&["one"])).unwrap();
        tx.send(batch(&["two", "three"])).unwrap();
        tx.send(StreamItem::EndOfStream).unwrap();

        process_batches(&mut plugins, &rx, &counter).await;

        assert_eq!(recorder.calls(), vec!["write:one", "write_many:2"]);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_all_plugins() {
        let first = Recorder::default();
        let second = Recorder::default();
        let mut plugins = vec![
            ("first".to_string(), MockOutput::boxed(first.clone())),
            ("second".to_string(), MockOutput::boxed(second.clone())),
        ];
        let (tx, rx) = flume::bounded(10);
        let counter = AtomicU64::new(0);

        tx.send(batch(&["a", "b"])).unwrap();
        tx.send(StreamItem::EndOfStream).unwrap();

        process_batches(&mut plugins, &rx, &counter).await;

        assert_eq!(first.calls(), vec!["write_many:2"]);
        assert_eq!(second.calls(), vec!["write_many:2"]);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others_or_counter() {
        let healthy = Recorder::default();
        let mut plugins = vec![
            (
                "failing".to_string(),
                Box::new(MockOutput {
                    recorder: Recorder::default(),
                    fail_open: false,
                    fail_write: true,
                    short_write: false,
                }) as BoxedOutput,
            ),
            ("healthy".to_string(), MockOutput::boxed(healthy.clone())),
        ];
        let (tx, rx) = flume::bounded(10);
        let counter = AtomicU64::new(0);

        tx.send(batch(&["a", "b", "c"])).unwrap();
        tx.send(StreamItem::EndOfStream).unwrap();

        process_batches(&mut plugins, &rx, &counter).await;

        assert_eq!(healthy.calls(), vec!["write_many:3"]);
        // ingress semantics: the counter tracks batch length, not write success
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_short_write_is_not_an_error() {
        let recorder = Recorder::default();
        let mut plugins = vec![(
            "short".to_string(),
            Box::new(MockOutput {
                recorder: recorder.clone(),
                fail_open: false,
                fail_write: false,
                short_write: true,
            }) as BoxedOutput,
        )];
        let (tx, rx) = flume::bounded(10);
        let counter = AtomicU64::new(0);

        tx.send(batch(&["a", "b"])).unwrap();
        tx.send(batch(&["c", "d"])).unwrap();
        tx.send(StreamItem::EndOfStream).unwrap();

        process_batches(&mut plugins, &rx, &counter).await;

        // processing continued past the short write
        assert_eq!(recorder.calls(), vec!["write_many:2", "write_many:2"]);
        assert_eq!(counter.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_open_failure_closes_opened_plugins() {
        let opened = Recorder::default();
        let mut plugins = vec![
            ("opened".to_string(), MockOutput::boxed(opened.clone())),
            (
                "failing".to_string(),
                Box::new(MockOutput {
                    recorder: Recorder::default(),
                    fail_open: true,
                    fail_write: false,
                    short_write: false,
                }) as BoxedOutput,
            ),
        ];

        let result = open_outputs(&mut plugins).await;

        assert!(matches!(result, Err(Error::OutputError(_))));
        assert_eq!(opened.calls(), vec!["open", "close"]);
    }

    #[tokio::test]
    async fn test_close_outputs_closes_every_plugin() {
        let first = Recorder::default();
        let second = Recorder::default();
        let mut plugins = vec![
            ("first".to_string(), MockOutput::boxed(first.clone())),
            ("second".to_string(), MockOutput::boxed(second.clone())),
        ];

        close_outputs(&mut plugins).await;

        assert_eq!(first.calls(), vec!["close"]);
        assert_eq!(second.calls(), vec!["close"]);
    }

    #[tokio::test]
    async fn test_run_output_sets_done_on_failure() {
        let done = DoneSignal::new();
        let (tx, rx) = flume::bounded(1);
        drop(tx);

        // unknown options make the stdout plugin fail construction
        let config: serde_yaml::Value = serde_yaml::from_str("format: bogus").unwrap();
        let items = vec![(
            "stdout".to_string(),
            ParsedRegisteredItem {
                creator: stdout::create_stdout,
                config,
            },
        )];

        let result = run_output(items, rx, Arc::new(AtomicU64::new(0)), done.clone()).await;

        assert!(result.is_err());
        assert!(done.is_set());
    }
}
