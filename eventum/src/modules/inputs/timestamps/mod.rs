use crate::config::register_plugin;
use crate::config::ItemType;
use crate::config::{ConfigSpec, ExecutionType};
use crate::{Batcher, Error, InputPlugin, Timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventum_macros::eventum_registration_func;
use serde::Deserialize;
use serde_yaml::Value;
use std::fs::read_to_string;
use tokio::time::sleep;

#[derive(Deserialize, Default)]
struct TimestampsInputConfig {
    #[serde(default)]
    timestamps: Vec<DateTime<Utc>>,
    source: Option<String>,
}

/// TimestampsInput replays an explicit, non-decreasing list of timestamps.
///
/// The list is given inline, loaded from a `source` file with one RFC 3339
/// timestamp per line, or both (file entries follow the inline ones). In
/// sample mode the list is emitted as fast as the pipeline accepts it; in
/// live mode emission of each timestamp waits until its wall-clock moment,
/// with past timestamps emitted immediately.
/// ```yaml
/// time_mode: sample
/// input:
///   timestamps:
///     timestamps:
///       - 2024-01-01T00:00:00Z
///       - 2024-01-01T00:00:01Z
///     source: patterns/new-year.txt
/// ```
pub struct TimestampsInput {
    timestamps: Vec<Timestamp>,
}

#[async_trait]
impl InputPlugin for TimestampsInput {
    async fn live(&mut self, out: &Batcher<Timestamp>) -> Result<(), Error> {
        for ts in &self.timestamps {
            let now = Utc::now();
            if *ts > now {
                let wait = (*ts - now)
                    .to_std()
                    .map_err(|e| Error::InputError(format!("{e}")))?;
                sleep(wait).await;
            }
            out.add(*ts).await?;
        }
        Ok(())
    }

    async fn sample(&mut self, out: &Batcher<Timestamp>) -> Result<(), Error> {
        for ts in &self.timestamps {
            out.add(*ts).await?;
        }
        Ok(())
    }
}

#[eventum_registration_func]
pub(crate) fn create_timestamps(conf: Value) -> Result<ExecutionType, Error> {
    let c: TimestampsInputConfig = serde_yaml::from_value(conf)?;

    let mut timestamps = c.timestamps;
    if let Some(source) = &c.source {
        let content = read_to_string(source)
            .map_err(|e| Error::ContentRead(format!("{source}: {e}")))?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let ts = DateTime::parse_from_rfc3339(line).map_err(|e| {
                Error::ConfigFailedValidation(format!("invalid timestamp \"{line}\": {e}"))
            })?;
            timestamps.push(ts.with_timezone(&Utc));
        }
    }

    if timestamps.windows(2).any(|w| w[0] > w[1]) {
        return Err(Error::ConfigFailedValidation(
            "timestamps must be in non-decreasing order".into(),
        ));
    }

    Ok(ExecutionType::Input(Box::new(TimestampsInput {
        timestamps,
    })))
}

pub(super) fn register_timestamps() -> Result<(), Error> {
    let config = "type: object
properties:
  timestamps:
    type: array
    items:
      type: string
  source:
    type: string";
    let conf_spec = ConfigSpec::from_schema(config)?;

    register_plugin(
        "timestamps".into(),
        ItemType::Input,
        conf_spec,
        create_timestamps,
    )
}
