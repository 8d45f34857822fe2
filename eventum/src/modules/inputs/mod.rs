use crate::config::{ExecutionType, ParsedRegisteredItem};
use crate::{Batcher, DoneSignal, Error, Settings, StreamItem, TimeMode, Timestamp};
use flume::Sender;
use tracing::{debug, error, info};

pub mod timer;
pub mod timestamps;

pub(crate) fn register_plugins() -> Result<(), Error> {
    timer::register_timer()?;
    timestamps::register_timestamps()?;
    Ok(())
}

/// Runs the input stage: construct the configured plugin, drive it in the
/// requested time mode through a batcher sinking into the timestamp queue,
/// and terminate.
///
/// Every exit path, success or failure, flushes the batcher, sends exactly
/// one end-of-stream sentinel, and sets the done signal, so the event stage
/// always terminates cleanly.
pub(crate) async fn run_input(
    item: ParsedRegisteredItem,
    time_mode: TimeMode,
    tx: Sender<StreamItem<Timestamp>>,
    done: DoneSignal,
    settings: Settings,
) -> Result<(), Error> {
    let result = drive_input(item, time_mode, tx.clone(), settings).await;

    if let Err(e) = &result {
        error!(error = format!("{e}"), "input stage failed");
    }
    if tx.send_async(StreamItem::EndOfStream).await.is_err() {
        debug!("timestamp queue disconnected before end of stream");
    }
    done.set();
    result
}

async fn drive_input(
    item: ParsedRegisteredItem,
    time_mode: TimeMode,
    tx: Sender<StreamItem<Timestamp>>,
    settings: Settings,
) -> Result<(), Error> {
    info!("initializing input plugin");

    let mut plugin = match (item.creator)(item.config).await? {
        ExecutionType::Input(i) => i,
        _ => {
            error!("invalid execution type for input");
            return Err(Error::Validation("invalid execution type".into()));
        }
    };

    info!("input plugin is successfully initialized");

    let batcher = Batcher::new(
        settings.events_batch_size,
        settings.events_batch_timeout,
        tx,
    );

    let run_result = match time_mode {
        TimeMode::Live => plugin.live(&batcher).await,
        TimeMode::Sample => plugin.sample(&batcher).await,
    };

    // final flush happens even when the plugin failed mid-stream
    let close_result = batcher.close().await;

    debug!("stopping input plugin");
    run_result.and(close_result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn parsed_item(creator: crate::config::Callback, conf: &str) -> ParsedRegisteredItem {
        let config: Value = serde_yaml::from_str(conf).unwrap();
        ParsedRegisteredItem { creator, config }
    }

    fn small_batches() -> Settings {
        Settings {
            events_batch_size: 2,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_sample_run_emits_batches_then_sentinel() {
        let (tx, rx) = flume::bounded(10);
        let done = DoneSignal::new();
        let item = parsed_item(
            timestamps::create_timestamps,
            "timestamps:
  - 2024-01-01T00:00:00Z
  - 2024-01-01T00:00:01Z
  - 2024-01-01T00:00:02Z",
        );

        run_input(item, TimeMode::Sample, tx, done.clone(), small_batches())
            .await
            .unwrap();

        let mut seen = Vec::new();
        let mut sentinels = 0;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                StreamItem::Batch(batch) => {
                    assert!(batch.len() <= 2);
                    seen.extend(batch);
                }
                StreamItem::EndOfStream => sentinels += 1,
            }
        }

        let expected: Vec<Timestamp> = vec![
            "2024-01-01T00:00:00Z".parse().unwrap(),
            "2024-01-01T00:00:01Z".parse().unwrap(),
            "2024-01-01T00:00:02Z".parse().unwrap(),
        ];
        assert_eq!(seen, expected);
        assert_eq!(sentinels, 1);
        assert!(done.is_set());
    }

    #[tokio::test]
    async fn test_empty_sample_still_sends_sentinel() {
        let (tx, rx) = flume::bounded(10);
        let done = DoneSignal::new();
        let item = parsed_item(timestamps::create_timestamps, "timestamps: []");

        run_input(item, TimeMode::Sample, tx, done.clone(), small_batches())
            .await
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), StreamItem::EndOfStream);
        assert!(rx.try_recv().is_err());
        assert!(done.is_set());
    }

    #[tokio::test]
    async fn test_unsupported_mode_fails_with_sentinel() {
        let (tx, rx) = flume::bounded(10);
        let done = DoneSignal::new();
        let item = parsed_item(timer::create_timer, "interval: 10ms");

        let result = run_input(item, TimeMode::Sample, tx, done.clone(), small_batches()).await;

        assert!(matches!(
            result,
            Err(Error::UnsupportedTimeMode(TimeMode::Sample))
        ));
        assert_eq!(rx.try_recv().unwrap(), StreamItem::EndOfStream);
        assert!(done.is_set());
    }

    #[tokio::test]
    async fn test_configuration_error_fails_with_sentinel() {
        let (tx, rx) = flume::bounded(10);
        let done = DoneSignal::new();
        // unsorted sample is rejected at plugin construction
        let item = parsed_item(
            timestamps::create_timestamps,
            "timestamps:
  - 2024-01-01T00:00:01Z
  - 2024-01-01T00:00:00Z",
        );

        let result = run_input(item, TimeMode::Sample, tx, done.clone(), small_batches()).await;

        assert!(matches!(result, Err(Error::ConfigFailedValidation(_))));
        assert_eq!(rx.try_recv().unwrap(), StreamItem::EndOfStream);
        assert!(done.is_set());
    }

    #[tokio::test]
    async fn test_live_timer_emits_bounded_count() {
        let (tx, rx) = flume::bounded(10);
        let done = DoneSignal::new();
        let item = parsed_item(timer::create_timer, "interval: 1ms\ncount: 3");

        run_input(item, TimeMode::Live, tx, done.clone(), small_batches())
            .await
            .unwrap();

        let mut seen = 0;
        let mut sentinels = 0;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                StreamItem::Batch(batch) => seen += batch.len(),
                StreamItem::EndOfStream => sentinels += 1,
            }
        }
        assert_eq!(seen, 3);
        assert_eq!(sentinels, 1);
        assert!(done.is_set());
    }
}
