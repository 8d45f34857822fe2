use serde::Deserialize;
use std::env;
use tokio::time::Duration;
use tracing::warn;

/// Process-wide pipeline tunables, read once at startup.
///
/// Resolution order: built-in defaults, then `EVENTUM_*` environment
/// variables, then the optional `settings` section of the pipeline
/// configuration. Batch sizes and the queue capacity are clamped to at
/// least 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Maximum number of timestamps per batch on the input queue
    pub events_batch_size: usize,
    /// Maximum age of the oldest timestamp in a pending input batch
    pub events_batch_timeout: Duration,
    /// Maximum number of events per batch on the output queue
    pub output_batch_size: usize,
    /// Maximum age of the oldest event in a pending output batch
    pub output_batch_timeout: Duration,
    /// Capacity of each bounded inter-stage queue, in batches
    pub queue_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            events_batch_size: 10_000,
            events_batch_timeout: Duration::from_secs(1),
            output_batch_size: 10_000,
            output_batch_timeout: Duration::from_secs(1),
            queue_capacity: 100,
        }
    }
}

impl Settings {
    /// Reads settings from the environment on top of the defaults.
    ///
    /// Recognized variables: `EVENTUM_EVENTS_BATCH_SIZE`,
    /// `EVENTUM_EVENTS_BATCH_TIMEOUT`, `EVENTUM_OUTPUT_BATCH_SIZE`,
    /// `EVENTUM_OUTPUT_BATCH_TIMEOUT`, and `EVENTUM_QUEUE_CAPACITY`.
    /// Durations use human-friendly strings such as `500ms` or `10s`.
    /// Invalid values are logged and ignored.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        if let Some(v) = env_usize("EVENTUM_EVENTS_BATCH_SIZE") {
            settings.events_batch_size = v.max(1);
        }
        if let Some(v) = env_duration("EVENTUM_EVENTS_BATCH_TIMEOUT") {
            settings.events_batch_timeout = v;
        }
        if let Some(v) = env_usize("EVENTUM_OUTPUT_BATCH_SIZE") {
            settings.output_batch_size = v.max(1);
        }
        if let Some(v) = env_duration("EVENTUM_OUTPUT_BATCH_TIMEOUT") {
            settings.output_batch_timeout = v;
        }
        if let Some(v) = env_usize("EVENTUM_QUEUE_CAPACITY") {
            settings.queue_capacity = v.max(1);
        }
        settings
    }

    /// Applies the `settings` section of a pipeline configuration on top
    /// of these settings.
    pub fn merge(mut self, overlay: &SettingsOverlay) -> Self {
        if let Some(v) = overlay.events_batch_size {
            self.events_batch_size = v.max(1);
        }
        if let Some(v) = overlay.events_batch_timeout {
            self.events_batch_timeout = v;
        }
        if let Some(v) = overlay.output_batch_size {
            self.output_batch_size = v.max(1);
        }
        if let Some(v) = overlay.output_batch_timeout {
            self.output_batch_timeout = v;
        }
        if let Some(v) = overlay.queue_capacity {
            self.queue_capacity = v.max(1);
        }
        self
    }
}

/// Optional per-document overrides for [Settings].
///
/// # Example Configuration
///
/// ```yaml
/// settings:
///   output_batch_size: 500
///   output_batch_timeout: 500ms
/// ```
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SettingsOverlay {
    /// Maximum number of timestamps per batch on the input queue
    pub events_batch_size: Option<usize>,
    /// Maximum age of the oldest timestamp in a pending input batch
    #[serde(default, deserialize_with = "crate::deserialize_optional_duration")]
    pub events_batch_timeout: Option<Duration>,
    /// Maximum number of events per batch on the output queue
    pub output_batch_size: Option<usize>,
    /// Maximum age of the oldest event in a pending output batch
    #[serde(default, deserialize_with = "crate::deserialize_optional_duration")]
    pub output_batch_timeout: Option<Duration>,
    /// Capacity of each bounded inter-stage queue, in batches
    pub queue_capacity: Option<usize>,
}

fn env_usize(key: &str) -> Option<usize> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, value = raw, error = format!("{e}"), "ignoring invalid setting");
            None
        }
    }
}

fn env_duration(key: &str) -> Option<Duration> {
    let raw = env::var(key).ok()?;
    match parse_duration::parse(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, value = raw, error = format!("{e}"), "ignoring invalid setting");
            None
        }
    }
}
