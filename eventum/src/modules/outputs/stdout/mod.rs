use crate::config::register_plugin;
use crate::config::ItemType;
use crate::config::{ConfigSpec, ExecutionType};
use crate::{Error, OutputPlugin};
use async_trait::async_trait;
use eventum_macros::eventum_registration_func;
use serde::Deserialize;
use serde_yaml::Value;
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};

use super::format::OutputFormat;

#[derive(Deserialize, Default)]
struct StdoutOutputConfig {
    #[serde(default)]
    format: OutputFormat,
}

/// StdoutOutput writes events to the standard output stream, one line per
/// event.
/// ```yaml
/// outputs:
///   stdout:
///     format: plain
/// ```
pub struct StdoutOutput {
    format: OutputFormat,
    writer: Option<BufWriter<Stdout>>,
}

impl StdoutOutput {
    fn writer(&mut self) -> Result<&mut BufWriter<Stdout>, Error> {
        self.writer
            .as_mut()
            .ok_or(Error::OutputError("stdout output is not open".into()))
    }
}

#[async_trait]
impl OutputPlugin for StdoutOutput {
    async fn open(&mut self) -> Result<(), Error> {
        self.writer = Some(BufWriter::new(tokio::io::stdout()));
        Ok(())
    }

    async fn write(&mut self, event: &str) -> Result<usize, Error> {
        let line = self.format.format_event(event)?;
        let writer = self.writer()?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::OutputError(format!("{e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::OutputError(format!("{e}")))?;
        Ok(1)
    }

    async fn write_many(&mut self, events: &[String]) -> Result<usize, Error> {
        let mut lines = String::new();
        for event in events {
            lines.push_str(&self.format.format_event(event)?);
        }
        let writer = self.writer()?;
        writer
            .write_all(lines.as_bytes())
            .await
            .map_err(|e| Error::OutputError(format!("{e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::OutputError(format!("{e}")))?;
        Ok(events.len())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .await
                .map_err(|e| Error::OutputError(format!("{e}")))?;
        }
        self.writer = None;
        Ok(())
    }
}

#[eventum_registration_func]
pub(crate) fn create_stdout(conf: Value) -> Result<ExecutionType, Error> {
    let c: StdoutOutputConfig = serde_yaml::from_value(conf)?;
    Ok(ExecutionType::Output(Box::new(StdoutOutput {
        format: c.format,
        writer: None,
    })))
}

pub(super) fn register_stdout() -> Result<(), Error> {
    let config = "type: object
properties:
  format:
    type: string";
    let conf_spec = ConfigSpec::from_schema(config)?;

    register_plugin("stdout".into(), ItemType::Output, conf_spec, create_stdout)
}
