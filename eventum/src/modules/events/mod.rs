use crate::config::{ExecutionType, ParsedRegisteredItem};
use crate::{Batcher, DoneSignal, Error, Settings, StreamItem, Timestamp};
use flume::{Receiver, Sender};
use tracing::{debug, error, info};

pub mod template;

pub(crate) fn register_plugins() -> Result<(), Error> {
    template::register_template()?;
    Ok(())
}

/// Runs the event stage: render every timestamp batch into events and feed
/// them through a batcher into the event queue.
///
/// A fresh batcher is opened per timestamp batch and closed (flushing)
/// before the next dequeue, so events derived from an earlier timestamp are
/// always enqueued before events derived from a later one. Every exit path
/// sends exactly one end-of-stream sentinel and sets the done signal.
pub(crate) async fn run_event(
    item: ParsedRegisteredItem,
    rx: Receiver<StreamItem<Timestamp>>,
    tx: Sender<StreamItem<String>>,
    done: DoneSignal,
    settings: Settings,
) -> Result<(), Error> {
    let result = drive_event(item, rx, tx.clone(), settings).await;

    if let Err(e) = &result {
        error!(error = format!("{e}"), "event stage failed");
    }
    if tx.send_async(StreamItem::EndOfStream).await.is_err() {
        debug!("event queue disconnected before end of stream");
    }
    done.set();
    result
}

async fn drive_event(
    item: ParsedRegisteredItem,
    rx: Receiver<StreamItem<Timestamp>>,
    tx: Sender<StreamItem<String>>,
    settings: Settings,
) -> Result<(), Error> {
    info!("initializing event plugin");

    let mut plugin = match (item.creator)(item.config).await? {
        ExecutionType::Event(p) => p,
        _ => {
            error!("invalid execution type for event");
            return Err(Error::Validation("invalid execution type".into()));
        }
    };

    info!("event plugin is successfully initialized");

    loop {
        let msg = match rx.recv_async().await {
            Ok(msg) => msg,
            Err(_) => {
                debug!("timestamp queue disconnected");
                return Ok(());
            }
        };

        let timestamps = match msg {
            StreamItem::EndOfStream => {
                debug!("end of timestamp stream");
                return Ok(());
            }
            StreamItem::Batch(batch) => batch,
        };

        let batcher = Batcher::new(
            settings.output_batch_size,
            settings.output_batch_timeout,
            tx.clone(),
        );

        let mut render_result = Ok(());
        'render: for timestamp in timestamps {
            let events = match plugin.render(timestamp).await {
                Ok(events) => events,
                Err(e) => {
                    render_result = Err(e);
                    break 'render;
                }
            };
            for event in events {
                if let Err(e) = batcher.add(event).await {
                    render_result = Err(e);
                    break 'render;
                }
            }
        }

        // close the batcher before the next dequeue on every path so
        // already-rendered events are delivered in order
        let close_result = batcher.close().await;
        render_result.and(close_result)?;
    }
}
