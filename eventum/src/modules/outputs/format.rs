use crate::Error;
use serde::Deserialize;

/// Serialization format applied by output plugins when writing events.
#[derive(Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// One event per line, written verbatim
    #[default]
    Plain,
    /// One JSON-encoded string per line
    JsonLines,
}

impl OutputFormat {
    /// Renders a single event as one output line, including the trailing
    /// newline.
    pub(crate) fn format_event(&self, event: &str) -> Result<String, Error> {
        match self {
            OutputFormat::Plain => Ok(format!("{event}\n")),
            OutputFormat::JsonLines => {
                let line = serde_json::to_string(event)?;
                Ok(format!("{line}\n"))
            }
        }
    }
}
