use super::{ItemType, ParsedRegisteredItem, RegisteredItem, ENV};
use crate::Error;
use serde_yaml::Value;
use std::collections::HashMap;
use tracing::trace;

/// The function takes the raw hashmap configuration item, looks up the
/// registered plugin, validates the plugin options against the registered
/// schema, and returns the [ParsedRegisteredItem] carrying the constructor
/// to be used by the owning stage.
pub(crate) async fn parse_configuration_item(
    itype: ItemType,
    map: &HashMap<String, Value>,
) -> Result<ParsedRegisteredItem, Error> {
    let keys: Vec<String> = map.keys().cloned().collect();
    let first_key = keys.first().ok_or(Error::ConfigFailedValidation(format!(
        "unable to determine {} key",
        itype
    )))?;

    let content = map
        .get(first_key)
        .ok_or(Error::ConfigFailedValidation(format!(
            "unable to validate {} key {}",
            itype, first_key
        )))?;

    parse_configuration_entry(itype, first_key, content)
}

/// Resolves and validates a single `(kind, options)` configuration entry.
pub(crate) fn parse_configuration_entry(
    itype: ItemType,
    kind: &str,
    content: &Value,
) -> Result<ParsedRegisteredItem, Error> {
    trace!("validating item {} of type {}", kind, itype);
    let item = get_item(&itype, kind)?;

    let content_str = serde_yaml::to_string(content)?;
    item.format.validate(&content_str)?;
    trace!("Format for {} validated", kind);
    Ok(ParsedRegisteredItem {
        creator: item.creator,
        config: content.clone(),
    })
}

fn get_item(itype: &ItemType, key: &str) -> Result<RegisteredItem, Error> {
    match ENV.read() {
        Ok(lock) => {
            match lock.get(itype) {
                Some(i) => {
                    if let Some(item) = i.get(key) {
                        return Ok(item.clone());
                    }
                }
                None => return Err(Error::UnableToSecureLock),
            };
        }
        Err(_) => return Err(Error::UnableToSecureLock),
    };
    Err(Error::ConfigurationItemNotFound(key.into()))
}
