//! Synthetic event generation pipeline written in Rust
//!
//! Provides a library for generating streams of timestamped, templated
//! events from a declarative yaml based configuration and writing them
//! to one or more output sinks.
//!
//! A pipeline is three stages connected by bounded queues: an input
//! plugin emits timestamps, an event plugin renders each timestamp into
//! zero or more events, and the output stage fans every event batch out
//! to all configured sinks concurrently.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Duration;

/// Contains configuration and plugin registration primitives for plugin development
pub mod config;
pub use batcher::Batcher;
pub use runtime::Runtime;
pub use settings::{Settings, SettingsOverlay};
mod batcher;
pub(crate) mod modules;
mod runtime;
mod settings;

/// Deserialize a duration from a string like "10s", "5m", "500ms", etc.
pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration::parse(&s).map_err(serde::de::Error::custom)
}

/// Deserialize an optional duration from a string like "10s", "5m", "1h", etc.
pub(crate) fn deserialize_optional_duration<'de, D>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        Some(s) => parse_duration::parse(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// A single point of the generated time stream.
///
/// Timestamps carry microsecond resolution and are emitted by input
/// plugins in non-decreasing order.
pub type Timestamp = DateTime<Utc>;

/// An ordered group of timestamps carried as a single queue message.
pub type TimestampBatch = Vec<Timestamp>;

/// An ordered group of rendered events carried as a single queue message.
pub type EventBatch = Vec<String>;

/// TimeMode selects how the input plugin is driven.
///
/// [TimeMode::Live] emits timestamps in wall-clock time for an unbounded
/// duration, [TimeMode::Sample] replays a bounded, pre-computable sequence
/// and returns when it is exhausted. Plugins may support one or both modes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    /// Emit timestamps in real time, indefinitely
    Live,
    /// Emit a finite, pre-computed sequence of timestamps
    Sample,
}

impl fmt::Display for TimeMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TimeMode::Live => write!(f, "live"),
            TimeMode::Sample => write!(f, "sample"),
        }
    }
}

/// Message carried on an inter-stage queue: either a batch of payloads or
/// the end-of-stream sentinel.
///
/// Exactly one [StreamItem::EndOfStream] is sent per queue over the
/// lifetime of a run, by the upstream stage's terminator, on every exit
/// path including failure. Downstream stages terminate cleanly when they
/// dequeue it.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamItem<T> {
    /// An ordered, non-empty, size-bounded group of payloads
    Batch(Vec<T>),
    /// No more data will arrive on this queue
    EndOfStream,
}

/// One-shot latch set by a stage on exit and observed by the supervisor.
///
/// Initially unset; [DoneSignal::set] is called once when the stage
/// terminates (success or failure) and the latch is never cleared.
#[derive(Clone, Default)]
pub struct DoneSignal {
    inner: Arc<DoneSignalInner>,
}

#[derive(Default)]
struct DoneSignalInner {
    flag: AtomicBool,
    notify: Notify,
}

impl DoneSignal {
    /// Creates a new, unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the stage as done. Idempotent.
    pub fn set(&self) {
        self.inner.flag.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Returns whether the stage has exited.
    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Waits until the stage has exited. Returns immediately if it already has.
    pub async fn wait(&self) {
        while !self.is_set() {
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            // register before the flag check so a concurrent set() is not missed
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Input plugin trait producing the stream of timestamps for the pipeline.
///
/// Implementations emit timestamps in non-decreasing order through
/// [Batcher::add] on the provided batcher, which groups them and applies
/// backpressure from the downstream queue. At least one of the two time
/// modes must be implemented; the default bodies return
/// [Error::UnsupportedTimeMode] for the other.
#[async_trait]
pub trait InputPlugin {
    /// Emit timestamps in real time, indefinitely. Returns only on plugin
    /// error or when the configured pattern is exhausted.
    async fn live(&mut self, out: &Batcher<Timestamp>) -> Result<(), Error> {
        let _ = out;
        Err(Error::UnsupportedTimeMode(TimeMode::Live))
    }

    /// Emit a bounded, pre-computable sequence of timestamps and return
    /// when it is exhausted.
    async fn sample(&mut self, out: &Batcher<Timestamp>) -> Result<(), Error> {
        let _ = out;
        Err(Error::UnsupportedTimeMode(TimeMode::Sample))
    }
}

/// Event plugin trait rendering timestamps into event payloads.
#[async_trait]
pub trait EventPlugin {
    /// Render a single timestamp into an ordered sequence of zero or more
    /// events. Implementations may hold internal state across calls; the
    /// state is private to the event stage.
    async fn render(&mut self, timestamp: Timestamp) -> Result<Vec<String>, Error>;
}

/// Output plugin trait writing event batches to a sink.
///
/// The returned counts report how many events were actually written;
/// writing fewer events than requested is not an error and is surfaced
/// as a warning by the output stage.
#[async_trait]
pub trait OutputPlugin {
    /// Initialize the sink before any batch is written.
    async fn open(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Write a single event, returning the number written (0 or 1).
    async fn write(&mut self, event: &str) -> Result<usize, Error>;

    /// Write a batch of events, returning the number written.
    async fn write_many(&mut self, events: &[String]) -> Result<usize, Error>;

    /// Release the sink after the last batch has been written.
    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Enum to capture errors occurred through the pipeline.
///
/// Uses `thiserror` for ergonomic error handling with proper `std::error::Error` implementation.
/// Errors that wrap other errors use `#[source]` or `#[from]` for proper error chaining.
#[derive(Debug, Error)]
pub enum Error {
    /// Yaml parsing errors found within the declarative language provided
    #[error("Unable to serialize YAML object")]
    UnableToSerializeYamlObject(
        #[from]
        #[source]
        serde_yaml::Error,
    ),

    /// JSON serialization is primarily utilized as a preparser to passing the declarative
    /// language to the given plugin by utilizing jsonschema to validate the input.
    #[error("Unable to serialize JSON object")]
    UnableToSerializeJsonObject(
        #[from]
        #[source]
        serde_json::Error,
    ),

    /// Validation errors discovered while checking the shape of the pipeline configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provided jsonschema configuration for a plugin is incorrect
    #[error("Invalid validation schema: {0}")]
    InvalidValidationSchema(String),

    /// Configuration provided to a plugin is invalid
    #[error("Configuration validation failed: {0}")]
    ConfigFailedValidation(String),

    /// Plugin kind is not registered with the runtime
    #[error("Configuration item not found: {0}")]
    ConfigurationItemNotFound(String),

    /// A plugin of the same family (input, event, output) has already been registered
    /// under this kind
    #[error("Duplicate registered name: {0}")]
    DuplicateRegisteredName(String),

    /// Unable to secure internal registry lock
    #[error("Internal server error: unable to secure lock")]
    UnableToSecureLock,

    /// A plugin failed to load a document from the content repository
    #[error("Failed to read content: {0}")]
    ContentRead(String),

    /// The configured input plugin does not implement the requested time mode
    #[error("Input plugin does not support \"{0}\" mode")]
    UnsupportedTimeMode(TimeMode),

    /// Error encountered while driving an input plugin
    #[error("Input error: {0}")]
    InputError(String),

    /// Event plugin failed to render a timestamp into events
    #[error("Event render error: {0}")]
    EventError(String),

    /// Error encountered while opening, writing to, or closing an output plugin
    #[error("Output error: {0}")]
    OutputError(String),

    /// Unanticipated error with the processing pipeline due to a failure of
    /// internal libraries or utilized plugins
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Failure to send to an inter-stage queue
    #[error("Pipeline processing error: {0}")]
    UnableToSendToChannel(String),

    /// Failure to receive from an inter-stage queue
    #[error("Channel receive error")]
    RecvChannelError(
        #[from]
        #[source]
        flume::RecvError,
    ),
}
