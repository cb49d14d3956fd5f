use clap::{Parser, ValueEnum};
use tracing::{debug, error, info, trace, warn};

use super::ToolCommand;
use crate::context::HookContext;
use crate::error::Result;
use crate::output::Output;

/// Severity of a `hook-log` message.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    /// Trace.
    Trace,
    /// Debug.
    Debug,
    /// Info.
    #[default]
    Info,
    /// Warning.
    #[value(alias = "warn")]
    Warning,
    /// Error.
    Error,
}

/// Write a message to the agent log.
#[derive(Debug, Parser)]
#[command(name = "hook-log")]
pub struct HookLog {
    /// Severity of the message
    #[arg(short = 'l', long = "log-level", value_enum, default_value_t)]
    level: LogLevel,

    /// The message
    #[arg(value_name = "MESSAGE", required = true)]
    message: Vec<String>,
}

impl ToolCommand for HookLog {
    fn run(self, ctx: &mut HookContext, _out: &mut Output) -> Result<()> {
        let message = self.message.join(" ");
        let unit = ctx.unit();
        let hook = ctx.hook();
        match self.level {
            LogLevel::Trace => trace!(target: "hook", %unit, %hook, "{message}"),
            LogLevel::Debug => debug!(target: "hook", %unit, %hook, "{message}"),
            LogLevel::Info => info!(target: "hook", %unit, %hook, "{message}"),
            LogLevel::Warning => warn!(target: "hook", %unit, %hook, "{message}"),
            LogLevel::Error => error!(target: "hook", %unit, %hook, "{message}"),
        }
        Ok(())
    }
}
