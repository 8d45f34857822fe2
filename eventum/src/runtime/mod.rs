use flume::bounded;
use once_cell::sync::Lazy;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::task::JoinError;
use tracing::{debug, info, trace};

use crate::config::{Config, ParsedConfig};
use crate::modules::{events, inputs, outputs, register_plugins};
use crate::{DoneSignal, Error, Settings};

static REGISTER: Once = Once::new();
/// Stores any error that occurred during plugin registration
static REGISTER_ERROR: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Represents a single event generation pipeline Runtime to run
///
/// The runtime owns the supervisor side of the pipeline contract: it wires
/// the two bounded queues, the processed-events counter, and the per-stage
/// done signals, spawns the three stage tasks, and reports the aggregate
/// result.
pub struct Runtime {
    config: ParsedConfig,
    processed_events: Arc<AtomicU64>,
}

impl Runtime {
    /// The function takes the raw configuration of the pipeline, registers
    /// the built-in plugins, validates the configuration and returns the
    /// Runtime to run.
    /// ```
    /// use eventum::Runtime;
    ///
    /// let conf_str = r#"time_mode: sample
    ///input:
    ///  timestamps:
    ///    timestamps:
    ///      - 2024-01-01T00:00:00Z
    ///event:
    ///  template:
    ///    templates:
    ///      - '{{timestamp}}'
    ///outputs:
    ///  stdout: {}"#;
    /// # tokio_test::block_on(async {
    /// let runtime = Runtime::from_config(conf_str).await.unwrap();
    /// # })
    /// ```
    pub async fn from_config(config: &str) -> Result<Self, Error> {
        REGISTER.call_once(|| {
            if let Err(e) = register_plugins() {
                if let Ok(mut err) = REGISTER_ERROR.lock() {
                    *err = Some(format!("{e}"));
                }
            }
        });

        // Check if registration failed
        if let Ok(err_lock) = REGISTER_ERROR.lock() {
            if let Some(ref e) = *err_lock {
                return Err(Error::ExecutionError(format!(
                    "Plugin registration failed: {e}"
                )));
            }
        }
        trace!("plugins registered");

        let conf: Config = Config::from_str(config)?;
        let parsed_conf = conf.validate().await?;

        debug!("Runtime is ready");
        Ok(Runtime {
            config: parsed_conf,
            processed_events: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The function sets the pipeline label used in log lines.
    pub fn set_label(&mut self, label: Option<String>) -> Result<(), Error> {
        self.config.label = label;
        Ok(())
    }

    /// The function returns the current label assigned to the pipeline
    pub fn get_label(&self) -> Option<String> {
        self.config.label.clone()
    }

    /// Replaces the effective settings resolved during configuration
    /// validation.
    pub fn set_settings(&mut self, settings: Settings) -> Result<(), Error> {
        self.config.settings = settings;
        Ok(())
    }

    /// Returns the effective settings of this pipeline.
    pub fn settings(&self) -> Settings {
        self.config.settings
    }

    /// Returns the number of events that have reached the output stage so
    /// far. Monotonic; readable while the pipeline is running and after it
    /// has finished.
    pub fn processed_events(&self) -> u64 {
        self.processed_events.load(Ordering::Relaxed)
    }

    /// The function runs the pipeline until the input plugin is exhausted
    /// or a stage fails.
    ///
    /// An interrupt (ctrl-c) stops all stages immediately and returns
    /// success; queues may be left non-drained. When the output stage
    /// fails, the upstream stages are torn down since nothing will drain
    /// their queues; when an upstream stage fails, its sentinel lets the
    /// downstream stages drain before the failure is reported.
    /// ```no_run
    /// # use eventum::Runtime;
    /// # let conf_str = r#"time_mode: sample
    /// # input:
    /// #   timestamps:
    /// #     timestamps:
    /// #       - 2024-01-01T00:00:00Z
    /// # event:
    /// #   template:
    /// #     templates:
    /// #       - '{{timestamp}}'
    /// # outputs:
    /// #   stdout: {}"#;
    /// # tokio_test::block_on(async {
    /// # let runtime = Runtime::from_config(conf_str).await.unwrap();
    /// runtime.run().await.unwrap();
    /// println!("{} events processed", runtime.processed_events());
    /// # })
    /// ```
    pub async fn run(&self) -> Result<(), Error> {
        let settings = self.config.settings;

        let (timestamp_tx, timestamp_rx) = bounded(settings.queue_capacity);
        let (event_tx, event_rx) = bounded(settings.queue_capacity);

        let input_done = DoneSignal::new();
        let event_done = DoneSignal::new();
        let output_done = DoneSignal::new();

        let input_handle = tokio::spawn(inputs::run_input(
            self.config.input.clone(),
            self.config.time_mode,
            timestamp_tx,
            input_done.clone(),
            settings,
        ));
        let event_handle = tokio::spawn(events::run_event(
            self.config.event.clone(),
            timestamp_rx,
            event_tx,
            event_done.clone(),
            settings,
        ));
        let mut output_handle = tokio::spawn(outputs::run_output(
            self.config.outputs.clone(),
            event_rx,
            Arc::clone(&self.processed_events),
            output_done.clone(),
        ));

        info!(
            label = self.config.label,
            time_mode = format!("{}", self.config.time_mode),
            "pipeline started"
        );

        // The output stage finishes last on every graceful path: upstream
        // failures propagate to it through the sentinel protocol.
        let output_result = tokio::select! {
            res = &mut output_handle => join_result(res),
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, stopping stages without draining");
                input_handle.abort();
                event_handle.abort();
                output_handle.abort();
                let _ = input_handle.await;
                let _ = event_handle.await;
                let _ = output_handle.await;
                return Ok(());
            }
        };

        if output_result.is_err() {
            // nothing drains the queues anymore; upstream stages may be
            // blocked on a full queue
            event_handle.abort();
            input_handle.abort();
        }

        let event_result = join_result(event_handle.await);
        if event_result.is_err() {
            input_handle.abort();
        }
        let input_result = join_result(input_handle.await);

        trace!(
            input_done = input_done.is_set(),
            event_done = event_done.is_set(),
            output_done = output_done.is_set(),
            "stage done signals observed"
        );
        info!(
            processed_events = self.processed_events(),
            "pipeline finished"
        );

        input_result.and(event_result).and(output_result)
    }
}

/// Maps a stage join result to the stage's outcome. A cancelled stage was
/// aborted deliberately by the supervisor and is not itself a failure.
fn join_result(res: Result<Result<(), Error>, JoinError>) -> Result<(), Error> {
    match res {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(Error::ExecutionError(format!("{e}"))),
    }
}
