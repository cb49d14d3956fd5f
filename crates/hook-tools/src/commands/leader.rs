use clap::Parser;

use super::{ToolCommand, parse_assignments, single_key};
use crate::context::{HookContext, check_key};
use crate::error::{Error, Result};
use crate::output::{Output, OutputArgs};

/// Print whether the unit is the application leader.
#[derive(Debug, Parser)]
#[command(name = "is-leader")]
pub struct IsLeader {
    #[command(flatten)]
    output: OutputArgs,
}

impl ToolCommand for IsLeader {
    fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()> {
        self.output.print(out, &ctx.is_leader())
    }
}

/// Print application leader settings.
#[derive(Debug, Parser)]
#[command(name = "leader-get")]
pub struct LeaderGet {
    #[command(flatten)]
    output: OutputArgs,

    /// Setting to print, or `-` for all
    #[arg(value_name = "KEY")]
    key: Option<String>,
}

impl ToolCommand for LeaderGet {
    fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()> {
        let settings = ctx.leader_settings();
        match single_key(self.key.as_deref()) {
            Some(key) => self.output.print(out, &settings.get(key)),
            None => self.output.print(out, &settings),
        }
    }
}

/// Write application leader settings. Only the leader may do so.
#[derive(Debug, Parser)]
#[command(name = "leader-set")]
pub struct LeaderSet {
    /// Settings to write; an empty value deletes the key
    #[arg(value_name = "KEY=VALUE", required = true)]
    settings: Vec<String>,
}

impl ToolCommand for LeaderSet {
    fn run(self, ctx: &mut HookContext, _out: &mut Output) -> Result<()> {
        if !ctx.is_leader() {
            return Err(Error::NotLeader);
        }
        let assignments = parse_assignments(&self.settings)?;
        for (key, _) in &assignments {
            check_key(key)?;
        }
        for (key, value) in assignments {
            ctx.set_leader_setting(key, value)?;
        }
        Ok(())
    }
}
