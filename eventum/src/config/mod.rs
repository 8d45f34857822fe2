use indexmap::IndexMap;
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, trace};

use core::future::Future;
use std::pin::Pin;

use crate::{EventPlugin, InputPlugin, OutputPlugin, Settings, TimeMode};

use super::Error;

mod registration;
mod validate;
pub use registration::register_plugin;
pub(crate) use validate::parse_configuration_entry;
pub(crate) use validate::parse_configuration_item;

/// Callback provides the pinned async function that will create the plugin
/// being supplied to the eventum runtime
pub type Callback = fn(Value) -> Pin<Box<dyn Future<Output = Result<ExecutionType, Error>> + Send>>;

/// Plugin family utilized for registration of eventum plugins
#[derive(PartialEq, Eq, Hash, Clone)]
pub enum ItemType {
    /// [crate::InputPlugin] trait enum variant
    Input,
    /// [crate::EventPlugin] trait enum variant
    Event,
    /// [crate::OutputPlugin] trait enum variant
    Output,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ItemType::Input => "input",
            ItemType::Event => "event",
            ItemType::Output => "output",
        };
        write!(f, "{}", msg)
    }
}

/// Enum for holding the implementation of the plugin trait to be driven by
/// its stage
pub enum ExecutionType {
    /// [crate::InputPlugin] trait enum variant
    Input(Box<dyn InputPlugin + Send + Sync>),
    /// [crate::EventPlugin] trait enum variant
    Event(Box<dyn EventPlugin + Send + Sync>),
    /// [crate::OutputPlugin] trait enum variant
    Output(Box<dyn OutputPlugin + Send + Sync>),
}

static ENV: Lazy<RwLock<HashMap<ItemType, HashMap<String, RegisteredItem>>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    #[allow(unused_results)]
    m.insert(ItemType::Input, HashMap::new());
    #[allow(unused_results)]
    m.insert(ItemType::Event, HashMap::new());
    #[allow(unused_results)]
    m.insert(ItemType::Output, HashMap::new());
    RwLock::new(m)
});

/// Registered plugin constructor and its configuration schema
#[derive(Clone)]
pub(crate) struct RegisteredItem {
    pub creator: Callback,
    pub format: ConfigSpec,
}

/// Execution placeholder of the plugin to be used during processing
#[derive(Clone)]
pub(crate) struct ParsedRegisteredItem {
    pub creator: Callback,
    pub config: Value,
}

/// Unparsed configuration item used prior to validation
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct Item {
    pub label: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Unparsed eventum pipeline configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Optional string label for the pipeline
    pub label: Option<String>,
    /// Whether the input plugin replays a finite sample or runs live
    pub time_mode: TimeMode,
    /// Optional overrides for the process-wide [Settings]
    #[serde(default)]
    pub settings: Option<crate::SettingsOverlay>,
    /// Input configuration following the [crate::InputPlugin] trait; exactly one entry
    #[allow(private_interfaces)]
    pub input: Item,
    /// Event configuration following the [crate::EventPlugin] trait; exactly one entry
    #[allow(private_interfaces)]
    pub event: Item,
    /// Output configuration following the [crate::OutputPlugin] trait; one or
    /// more entries, fanned out in declaration order
    pub outputs: IndexMap<String, Value>,
}

impl FromStr for Config {
    type Err = Error;
    fn from_str(conf: &str) -> Result<Self, Self::Err> {
        let config: Config = serde_yaml::from_str(conf)?;
        Ok(config)
    }
}

impl Config {
    /// Validates that the configuration object has valid and registered
    /// input, event, and output plugins and resolves the effective
    /// [Settings]. Plugins must be registered prior to calling validate;
    /// this is automatically done when using [crate::Runtime].
    pub async fn validate(self) -> Result<ParsedConfig, Error> {
        if self.input.extra.len() != 1 {
            error!("input must contain exactly one entry");
            return Err(Error::Validation(
                "input must contain exactly one entry".into(),
            ));
        };

        if self.event.extra.len() != 1 {
            error!("event must contain exactly one entry");
            return Err(Error::Validation(
                "event must contain exactly one entry".into(),
            ));
        };

        if self.outputs.is_empty() {
            error!("outputs must contain at least one entry");
            return Err(Error::Validation(
                "outputs must contain at least one entry".into(),
            ));
        };

        let input = parse_configuration_item(ItemType::Input, &self.input.extra).await?;
        let event = parse_configuration_item(ItemType::Event, &self.event.extra).await?;

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for (kind, conf) in &self.outputs {
            let item = parse_configuration_entry(ItemType::Output, kind, conf)?;
            outputs.push((kind.clone(), item));
        }

        let settings = match &self.settings {
            Some(overlay) => Settings::from_env().merge(overlay),
            None => Settings::from_env(),
        };

        let label = self.label.clone();
        debug!("configuration is valid");

        Ok(ParsedConfig {
            label,
            time_mode: self.time_mode,
            input,
            event,
            outputs,
            settings,
        })
    }
}

/// Parsed and validated eventum pipeline configuration
#[derive(Clone)]
pub struct ParsedConfig {
    /// Optional string label for the pipeline
    pub label: Option<String>,
    /// Whether the input plugin replays a finite sample or runs live
    pub time_mode: TimeMode,
    /// Effective process-wide settings for this pipeline
    pub settings: Settings,
    /// Input configuration following the [crate::InputPlugin] trait
    #[allow(private_interfaces)]
    pub input: ParsedRegisteredItem,
    /// Event configuration following the [crate::EventPlugin] trait
    #[allow(private_interfaces)]
    pub event: ParsedRegisteredItem,
    /// Output configurations following the [crate::OutputPlugin] trait, in
    /// fan-out order
    #[allow(private_interfaces)]
    pub outputs: Vec<(String, ParsedRegisteredItem)>,
}

/// Plugin configuration validation snippet
///
/// Uses `Arc` internally to make cloning cheap without re-parsing the schema.
pub struct ConfigSpec {
    raw_schema: String,
    schema: Arc<JSONSchema>,
}

impl std::fmt::Debug for ConfigSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSpec")
            .field("raw_schema", &self.raw_schema)
            .finish()
    }
}

impl Clone for ConfigSpec {
    fn clone(&self) -> Self {
        ConfigSpec {
            raw_schema: self.raw_schema.clone(),
            schema: Arc::clone(&self.schema),
        }
    }
}

impl ConfigSpec {
    /// Creates a snippet validation logic from the provided schema.  The schema is
    /// jsonschema format, in yaml.  Rather than using yamlschema validation directly
    /// this is converted to json and used with the jsonschema library.
    /// For the following input format:
    /// ```yaml
    /// path: events.log
    /// format: plain
    /// ```
    ///
    /// The following code would provide the code validation snippet.
    /// ```
    /// # use eventum::config::ConfigSpec;
    /// let conf_str = r#"properties:
    ///   path:
    ///     type: string
    ///   format:
    ///     type: string"#;
    ///
    /// let config = ConfigSpec::from_schema(&conf_str).unwrap();
    /// ```
    pub fn from_schema(conf: &str) -> Result<Self, Error> {
        let v: Value = serde_yaml::from_str(conf)?;
        let intermediate = serde_json::to_string(&v)?;
        let f: serde_json::Value = serde_json::from_str(&intermediate)?;

        let schema: JSONSchema = match JSONSchema::options().with_draft(Draft::Draft7).compile(&f) {
            Ok(js) => js,
            Err(e) => return Err(Error::InvalidValidationSchema(format!("{e}"))),
        };

        trace!("json schema is valid");

        Ok(ConfigSpec {
            raw_schema: conf.into(),
            schema: Arc::new(schema),
        })
    }

    /// Validates the configuration str against the validation schema provided to establish the
    /// ConfigSpec
    ///
    /// The following code would provide the code validation snippet.
    /// ```
    /// # use eventum::config::ConfigSpec;
    /// # let schema_str = r#"properties:
    /// #   path:
    /// #     type: string
    /// #   format:
    /// #     type: string"#;
    /// # let config = ConfigSpec::from_schema(&schema_str).unwrap();
    /// let config_str = r#"path: events.log
    /// format: plain"#;
    /// config.validate(config_str).unwrap();
    /// ```
    pub fn validate(&self, content: &str) -> Result<(), Error> {
        let v: Value = serde_yaml::from_str(content)?;
        let intermediate = serde_json::to_string(&v)?;
        let f: serde_json::Value = serde_json::from_str(&intermediate)?;
        let result = self.schema.validate(&f);
        if let Err(errors) = result {
            let errs: Vec<String> = errors.into_iter().map(|i| format!("{}", i)).collect();
            error!(
                number_of_failures = errs.len(),
                errors = errs.join(" "),
                "validation failed"
            );
            return Err(Error::ConfigFailedValidation(errs.join(" ")));
        };
        Ok(())
    }
}
