use clap::Parser;
use serde_json::Value;

use super::ToolCommand;
use crate::context::HookContext;
use crate::error::{Error, Result};
use crate::output::{Output, OutputArgs};

/// Print application configuration.
///
/// With a key, prints that setting; without one, prints every setting that
/// has a value.
#[derive(Debug, Parser)]
#[command(name = "config-get")]
pub struct ConfigGet {
    /// Print all keys, including those without a value
    #[arg(short = 'a', long)]
    all: bool,

    #[command(flatten)]
    output: OutputArgs,

    /// The setting to print
    #[arg(value_name = "KEY")]
    keys: Vec<String>,
}

impl ToolCommand for ConfigGet {
    fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()> {
        let config = ctx.config();
        match self.keys.as_slice() {
            [] => {
                let settings: serde_json::Map<String, Value> = config
                    .iter()
                    .filter(|(_, value)| self.all || !value.is_null())
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                self.output.print(out, &settings)
            }
            [key] => {
                let value = config.get(key).unwrap_or(&Value::Null);
                self.output.print(out, value)
            }
            [_, rest @ ..] => Err(Error::Usage(format!("unrecognized args: {rest:?}"))),
        }
    }
}
