use clap::Parser;
use uniter_model::{StatusInfo, WorkloadStatus};

use super::ToolCommand;
use crate::context::HookContext;
use crate::error::Result;
use crate::output::{Output, OutputArgs};

/// Print the unit's workload status.
#[derive(Debug, Parser)]
#[command(name = "status-get")]
pub struct StatusGet {
    /// Print the status message too
    #[arg(long)]
    include_data: bool,

    #[command(flatten)]
    output: OutputArgs,
}

impl ToolCommand for StatusGet {
    fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()> {
        let status = ctx.workload_status();
        if self.include_data {
            self.output.print(out, status)
        } else {
            self.output.print(out, &status.status)
        }
    }
}

/// Set the unit's workload status.
#[derive(Debug, Parser)]
#[command(name = "status-set")]
pub struct StatusSet {
    /// One of maintenance, blocked, waiting or active
    #[arg(value_name = "STATUS")]
    status: WorkloadStatus,

    /// Message shown alongside the status
    #[arg(value_name = "MESSAGE")]
    message: Option<String>,
}

impl ToolCommand for StatusSet {
    fn run(self, ctx: &mut HookContext, _out: &mut Output) -> Result<()> {
        ctx.set_workload_status(StatusInfo::new(
            self.status,
            self.message.unwrap_or_default(),
        ));
        Ok(())
    }
}
