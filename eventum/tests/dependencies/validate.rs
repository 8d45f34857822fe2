use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use eventum::config::register_plugin;
use eventum::config::ItemType;
use eventum::config::{ConfigSpec, ExecutionType};
use eventum::{Error, OutputPlugin};
use eventum_macros::eventum_registration_func;

#[derive(Deserialize, Serialize)]
struct ValidateSpec {
    expected: Vec<String>,
    expected_batches: Option<Vec<usize>>,
}

pub struct Validate {
    expected: Vec<String>,
    expected_batches: Option<Vec<usize>>,
    batches: Vec<usize>,
    count: usize,
    opened: bool,
}

impl Validate {
    fn check(&mut self, event: &str) {
        if self.count > self.expected.len() - 1 {
            panic!("Received an extra event")
        };
        if self.expected[self.count] != event {
            panic!(
                "Received unexpected event.  \n\tExpected {}, \n\treceived {}",
                self.expected[self.count], event
            );
        };

        self.count += 1;
    }
}

#[async_trait]
impl OutputPlugin for Validate {
    async fn open(&mut self) -> Result<(), Error> {
        self.opened = true;
        Ok(())
    }

    async fn write(&mut self, event: &str) -> Result<usize, Error> {
        assert!(self.opened, "write before open");
        self.check(event);
        self.batches.push(1);
        Ok(1)
    }

    async fn write_many(&mut self, events: &[String]) -> Result<usize, Error> {
        assert!(self.opened, "write_many before open");
        for event in events {
            self.check(event);
        }
        self.batches.push(events.len());
        Ok(events.len())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if self.count != self.expected.len() {
            panic!(
                "received {} events: expected {}",
                self.count,
                self.expected.len()
            );
        };
        if let Some(expected_batches) = &self.expected_batches {
            if &self.batches != expected_batches {
                panic!(
                    "received batch sizes {:?}: expected {:?}",
                    self.batches, expected_batches
                );
            }
        };
        Ok(())
    }
}

#[eventum_registration_func]
fn create_validator(conf: Value) -> Result<ExecutionType, Error> {
    let g: ValidateSpec = serde_yaml::from_value(conf)?;
    Ok(ExecutionType::Output(Box::new(Validate {
        expected: g.expected,
        expected_batches: g.expected_batches,
        batches: Vec::new(),
        count: 0,
        opened: false,
    })))
}

pub fn register_validate() -> Result<(), Error> {
    let config = "type: object
properties:
  expected:
    type: array
    items:
      type: string
  expected_batches:
    type: array
    items:
      type: number";
    let conf_spec = ConfigSpec::from_schema(config)?;

    register_plugin(
        "validate".into(),
        ItemType::Output,
        conf_spec,
        create_validator,
    )
}
