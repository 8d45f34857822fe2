use crate::config::register_plugin;
use crate::config::ItemType;
use crate::config::{ConfigSpec, ExecutionType};
use crate::{Error, OutputPlugin};
use async_trait::async_trait;
use eventum_macros::eventum_registration_func;
use serde::Deserialize;
use serde_yaml::Value;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use super::format::OutputFormat;

#[derive(Deserialize)]
struct FileOutputConfig {
    path: String,
    #[serde(default)]
    format: OutputFormat,
}

/// FileOutput appends events to a file, one line per event. The file is
/// created when it does not exist.
/// ```yaml
/// outputs:
///   file:
///     path: events.log
///     format: json-lines
/// ```
pub struct FileOutput {
    path: PathBuf,
    format: OutputFormat,
    writer: Option<BufWriter<File>>,
}

impl FileOutput {
    fn writer(&mut self) -> Result<&mut BufWriter<File>, Error> {
        self.writer.as_mut().ok_or(Error::OutputError(format!(
            "file output {} is not open",
            self.path.display()
        )))
    }
}

#[async_trait]
impl OutputPlugin for FileOutput {
    async fn open(&mut self) -> Result<(), Error> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::OutputError(format!("{}: {e}", self.path.display())))?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    async fn write(&mut self, event: &str) -> Result<usize, Error> {
        let line = self.format.format_event(event)?;
        let path = self.path.clone();
        let writer = self.writer()?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::OutputError(format!("{}: {e}", path.display())))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::OutputError(format!("{}: {e}", path.display())))?;
        Ok(1)
    }

    async fn write_many(&mut self, events: &[String]) -> Result<usize, Error> {
        let mut lines = String::new();
        for event in events {
            lines.push_str(&self.format.format_event(event)?);
        }
        let path = self.path.clone();
        let writer = self.writer()?;
        writer
            .write_all(lines.as_bytes())
            .await
            .map_err(|e| Error::OutputError(format!("{}: {e}", path.display())))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::OutputError(format!("{}: {e}", path.display())))?;
        Ok(events.len())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .await
                .map_err(|e| Error::OutputError(format!("{}: {e}", self.path.display())))?;
        }
        self.writer = None;
        Ok(())
    }
}

#[eventum_registration_func]
pub(crate) fn create_file(conf: Value) -> Result<ExecutionType, Error> {
    let c: FileOutputConfig = serde_yaml::from_value(conf)?;
    if c.path.is_empty() {
        return Err(Error::ConfigFailedValidation("path must not be empty".into()));
    }

    Ok(ExecutionType::Output(Box::new(FileOutput {
        path: PathBuf::from(c.path),
        format: c.format,
        writer: None,
    })))
}

pub(super) fn register_file() -> Result<(), Error> {
    let config = "type: object
properties:
  path:
    type: string
  format:
    type: string
required:
- path";
    let conf_spec = ConfigSpec::from_schema(config)?;

    register_plugin("file".into(), ItemType::Output, conf_spec, create_file)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_plugin() {
        register_file().unwrap()
    }

    async fn plugin_for(path: &std::path::Path, format: &str) -> Box<dyn OutputPlugin + Send + Sync> {
        let conf: Value =
            serde_yaml::from_str(&format!("path: {}\nformat: {format}", path.display())).unwrap();
        match create_file(conf).await.unwrap() {
            ExecutionType::Output(o) => o,
            _ => panic!("expected output plugin"),
        }
    }

    #[tokio::test]
    async fn missing_path_is_rejected() {
        let conf: Value = serde_yaml::from_str("format: plain").unwrap();
        let result = create_file(conf).await;
        assert!(matches!(result, Err(Error::UnableToSerializeYamlObject(_))));
    }

    #[tokio::test]
    async fn open_fails_for_unreachable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-subdir").join("events.log");
        let mut plugin = plugin_for(&path, "plain").await;

        let result = plugin.open().await;
        assert!(matches!(result, Err(Error::OutputError(_))));
    }

    #[tokio::test]
    async fn appends_lines_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let mut plugin = plugin_for(&path, "plain").await;

        plugin.open().await.unwrap();
        assert_eq!(plugin.write("first").await.unwrap(), 1);
        let batch = vec!["second".to_string(), "third".to_string()];
        assert_eq!(plugin.write_many(&batch).await.unwrap(), 2);
        plugin.close().await.unwrap();

        // reopening appends rather than truncating
        let mut plugin = plugin_for(&path, "plain").await;
        plugin.open().await.unwrap();
        assert_eq!(plugin.write("fourth").await.unwrap(), 1);
        plugin.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\nthird\nfourth\n");
    }

    #[tokio::test]
    async fn json_lines_format_escapes_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut plugin = plugin_for(&path, "json-lines").await;

        plugin.open().await.unwrap();
        let batch = vec!["with \"quotes\"".to_string()];
        assert_eq!(plugin.write_many(&batch).await.unwrap(), 1);
        plugin.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "\"with \\\"quotes\\\"\"\n");
    }
}
