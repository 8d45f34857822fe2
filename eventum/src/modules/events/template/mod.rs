use crate::config::register_plugin;
use crate::config::ItemType;
use crate::config::{ConfigSpec, ExecutionType};
use crate::{Error, EventPlugin, Timestamp};
use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::SecondsFormat;
use eventum_macros::eventum_registration_func;
use handlebars::Handlebars;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs::read_to_string;

#[derive(Deserialize, Default)]
struct TemplateEventConfig {
    #[serde(default)]
    templates: Vec<String>,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    params: HashMap<String, Value>,
    timestamp_format: Option<String>,
}

/// TemplateEvent renders each timestamp through a list of handlebars
/// templates, producing one event per template in declaration order.
///
/// Templates are given inline through `templates` or loaded from files
/// through `sources` (file templates follow the inline ones). The rendered
/// timestamp is available as `{{timestamp}}`; entries of the optional
/// `params` mapping are available under their own names. Templates are
/// rendered in strict mode, so referencing an unknown variable is a render
/// error.
/// ```yaml
/// event:
///   template:
///     templates:
///       - '{{timestamp}} login from {{host}}'
///     params:
///       host: example.com
///     timestamp_format: '%Y-%m-%dT%H:%M:%S%.6fZ'
/// ```
pub struct TemplateEvent {
    registry: Handlebars<'static>,
    template_names: Vec<String>,
    params: Map<String, JsonValue>,
    timestamp_format: Option<String>,
}

impl TemplateEvent {
    fn render_timestamp(&self, timestamp: Timestamp) -> String {
        match &self.timestamp_format {
            Some(fmt) => timestamp.format(fmt).to_string(),
            None => timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

#[async_trait]
impl EventPlugin for TemplateEvent {
    async fn render(&mut self, timestamp: Timestamp) -> Result<Vec<String>, Error> {
        let mut context = self.params.clone();
        let previous = context.insert(
            "timestamp".into(),
            JsonValue::String(self.render_timestamp(timestamp)),
        );
        debug_assert!(previous.is_none());

        let mut events = Vec::with_capacity(self.template_names.len());
        for name in &self.template_names {
            let event = self
                .registry
                .render(name, &context)
                .map_err(|e| Error::EventError(format!("{e}")))?;
            events.push(event);
        }
        Ok(events)
    }
}

#[eventum_registration_func]
pub(crate) fn create_template(conf: Value) -> Result<ExecutionType, Error> {
    let c: TemplateEventConfig = serde_yaml::from_value(conf)?;

    if let Some(fmt) = &c.timestamp_format {
        if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
            return Err(Error::ConfigFailedValidation(format!(
                "invalid timestamp format \"{fmt}\""
            )));
        }
    }

    let mut params = Map::new();
    for (key, value) in &c.params {
        if key == "timestamp" {
            return Err(Error::ConfigFailedValidation(
                "\"timestamp\" is a reserved template variable".into(),
            ));
        }
        let _ = params.insert(key.clone(), serde_json::to_value(value)?);
    }

    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);

    let mut contents = c.templates;
    for source in &c.sources {
        let content = read_to_string(source)
            .map_err(|e| Error::ContentRead(format!("{source}: {e}")))?;
        contents.push(content);
    }

    let mut template_names = Vec::with_capacity(contents.len());
    for (i, content) in contents.iter().enumerate() {
        let name = format!("template_{i}");
        registry
            .register_template_string(&name, content)
            .map_err(|e| Error::ConfigFailedValidation(format!("invalid template: {e}")))?;
        template_names.push(name);
    }

    Ok(ExecutionType::Event(Box::new(TemplateEvent {
        registry,
        template_names,
        params,
        timestamp_format: c.timestamp_format,
    })))
}

pub(super) fn register_template() -> Result<(), Error> {
    let config = "type: object
properties:
  templates:
    type: array
    items:
      type: string
  sources:
    type: array
    items:
      type: string
  params:
    type: object
  timestamp_format:
    type: string";
    let conf_spec = ConfigSpec::from_schema(config)?;

    register_plugin(
        "template".into(),
        ItemType::Event,
        conf_spec,
        create_template,
    )
}
