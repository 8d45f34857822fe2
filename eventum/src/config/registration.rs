use super::{Callback, ConfigSpec, ItemType, RegisteredItem, ENV};
use crate::Error;
use std::collections::hash_map::Entry;
use tracing::{debug, error};

/// Registers a plugin constructor under the given kind within its family.
///
/// Plugins must be registered before the configuration referencing them is
/// validated; the built-in plugins are registered automatically when using
/// [crate::Runtime]. Registering the same kind twice within one family is
/// an error.
/// ```
/// use async_trait::async_trait;
/// use eventum::config::{register_plugin, ConfigSpec, ExecutionType, ItemType};
/// use eventum::{Error, OutputPlugin};
/// use eventum_macros::eventum_registration_func;
/// use serde_yaml::Value;
///
/// struct Discard {}
///
/// #[async_trait]
/// impl OutputPlugin for Discard {
///     async fn write(&mut self, _event: &str) -> Result<usize, Error> {
///         Ok(1)
///     }
///
///     async fn write_many(&mut self, events: &[String]) -> Result<usize, Error> {
///         Ok(events.len())
///     }
/// }
///
/// #[eventum_registration_func]
/// fn create_discard(_conf: Value) -> Result<ExecutionType, Error> {
///     Ok(ExecutionType::Output(Box::new(Discard {})))
/// }
///
/// let conf_spec = ConfigSpec::from_schema("type: object").unwrap();
/// register_plugin("discard".into(), ItemType::Output, conf_spec, create_discard).unwrap();
/// ```
pub fn register_plugin(
    name: String,
    itype: ItemType,
    format: ConfigSpec,
    creator: Callback,
) -> Result<(), Error> {
    let mut registry = ENV.write().map_err(|_| {
        error!("plugin registry lock is poisoned");
        Error::UnableToSecureLock
    })?;
    let family = registry.get_mut(&itype).ok_or(Error::UnableToSecureLock)?;

    match family.entry(name) {
        Entry::Occupied(entry) => {
            error!(
                kind = entry.key().as_str(),
                family = %itype,
                "plugin kind is already taken in this family"
            );
            Err(Error::DuplicateRegisteredName(entry.key().clone()))
        }
        Entry::Vacant(entry) => {
            debug!(kind = entry.key().as_str(), family = %itype, "registered plugin");
            let _ = entry.insert(RegisteredItem { creator, format });
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::ExecutionType;
    use eventum_macros::eventum_registration_func;
    use serde_yaml::Value;

    struct Discard {}

    #[async_trait::async_trait]
    impl crate::OutputPlugin for Discard {
        async fn write(&mut self, _event: &str) -> Result<usize, Error> {
            Ok(1)
        }

        async fn write_many(&mut self, events: &[String]) -> Result<usize, Error> {
            Ok(events.len())
        }
    }

    #[eventum_registration_func]
    fn create_discard(_conf: Value) -> Result<ExecutionType, Error> {
        Ok(ExecutionType::Output(Box::new(Discard {})))
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let conf_spec = ConfigSpec::from_schema("type: object").unwrap();
        register_plugin(
            "duplicate_discard".into(),
            ItemType::Output,
            conf_spec.clone(),
            create_discard,
        )
        .unwrap();

        let result = register_plugin(
            "duplicate_discard".into(),
            ItemType::Output,
            conf_spec,
            create_discard,
        );
        assert!(matches!(result, Err(Error::DuplicateRegisteredName(_))));
    }

    #[test]
    fn same_kind_in_different_families_is_allowed() {
        let conf_spec = ConfigSpec::from_schema("type: object").unwrap();
        register_plugin(
            "family_scoped".into(),
            ItemType::Output,
            conf_spec.clone(),
            create_discard,
        )
        .unwrap();

        register_plugin(
            "family_scoped".into(),
            ItemType::Input,
            conf_spec,
            create_discard,
        )
        .unwrap();
    }
}
