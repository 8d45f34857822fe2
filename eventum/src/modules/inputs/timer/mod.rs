use crate::config::register_plugin;
use crate::config::ItemType;
use crate::config::{ConfigSpec, ExecutionType};
use crate::{Batcher, Error, InputPlugin, Timestamp};
use async_trait::async_trait;
use chrono::Utc;
use eventum_macros::eventum_registration_func;
use serde::Deserialize;
use serde_yaml::Value;
use tokio::time::{sleep, Duration};

#[derive(Deserialize)]
struct TimerInputConfig {
    #[serde(deserialize_with = "crate::deserialize_duration")]
    interval: Duration,
    count: Option<u64>,
}

/// TimerInput emits the current wall-clock time on a fixed interval.
///
/// Live only. With `count` unset the plugin runs until the pipeline is
/// interrupted.
/// ```yaml
/// time_mode: live
/// input:
///   timer:
///     interval: 1s
///     count: 100
/// ```
pub struct TimerInput {
    interval: Duration,
    count: Option<u64>,
}

#[async_trait]
impl InputPlugin for TimerInput {
    async fn live(&mut self, out: &Batcher<Timestamp>) -> Result<(), Error> {
        let mut emitted: u64 = 0;
        loop {
            if let Some(count) = self.count {
                if emitted >= count {
                    return Ok(());
                }
            }
            sleep(self.interval).await;
            out.add(Utc::now()).await?;
            emitted += 1;
        }
    }
}

#[eventum_registration_func]
pub(crate) fn create_timer(conf: Value) -> Result<ExecutionType, Error> {
    let c: TimerInputConfig = serde_yaml::from_value(conf)?;
    if c.interval.is_zero() {
        return Err(Error::ConfigFailedValidation(
            "interval must be greater than zero".into(),
        ));
    }

    Ok(ExecutionType::Input(Box::new(TimerInput {
        interval: c.interval,
        count: c.count,
    })))
}

pub(super) fn register_timer() -> Result<(), Error> {
    let config = "type: object
properties:
  interval:
    type: string
  count:
    type: number
required:
- interval";
    let conf_spec = ConfigSpec::from_schema(config)?;

    register_plugin("timer".into(), ItemType::Input, conf_spec, create_timer)
}
