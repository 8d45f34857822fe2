use crate::Error;

pub mod events;
pub mod inputs;
pub mod outputs;

pub(crate) fn register_plugins() -> Result<(), Error> {
    inputs::register_plugins()?;
    events::register_plugins()?;
    outputs::register_plugins()?;

    Ok(())
}
