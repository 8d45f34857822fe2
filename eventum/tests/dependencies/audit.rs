use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use std::fs;

use eventum::config::register_plugin;
use eventum::config::ItemType;
use eventum::config::{ConfigSpec, ExecutionType};
use eventum::{Error, OutputPlugin};
use eventum_macros::eventum_registration_func;

#[derive(Deserialize, Default)]
struct AuditSpec {
    open_marker: Option<String>,
    close_marker: Option<String>,
    #[serde(default)]
    fail_open: bool,
}

/// Discards events while recording lifecycle transitions to marker files,
/// so tests can observe open/close ordering from outside the pipeline.
pub struct Audit {
    open_marker: Option<String>,
    close_marker: Option<String>,
    fail_open: bool,
}

#[async_trait]
impl OutputPlugin for Audit {
    async fn open(&mut self) -> Result<(), Error> {
        if self.fail_open {
            return Err(Error::OutputError("audit plugin configured to fail".into()));
        }
        if let Some(marker) = &self.open_marker {
            fs::write(marker, "open").map_err(|e| Error::OutputError(format!("{e}")))?;
        }
        Ok(())
    }

    async fn write(&mut self, _event: &str) -> Result<usize, Error> {
        Ok(1)
    }

    async fn write_many(&mut self, events: &[String]) -> Result<usize, Error> {
        Ok(events.len())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if let Some(marker) = &self.close_marker {
            fs::write(marker, "close").map_err(|e| Error::OutputError(format!("{e}")))?;
        }
        Ok(())
    }
}

#[eventum_registration_func]
fn create_audit(conf: Value) -> Result<ExecutionType, Error> {
    let g: AuditSpec = serde_yaml::from_value(conf)?;
    Ok(ExecutionType::Output(Box::new(Audit {
        open_marker: g.open_marker,
        close_marker: g.close_marker,
        fail_open: g.fail_open,
    })))
}

pub fn register_audit() -> Result<(), Error> {
    let config = "type: object
properties:
  open_marker:
    type: string
  close_marker:
    type: string
  fail_open:
    type: boolean";
    let conf_spec = ConfigSpec::from_schema(config)?;

    register_plugin("audit".into(), ItemType::Output, conf_spec, create_audit)
}
