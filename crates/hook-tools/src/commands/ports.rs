use clap::Parser;
use uniter_model::PortRange;

use super::ToolCommand;
use crate::context::HookContext;
use crate::error::Result;
use crate::output::{Output, OutputArgs};

/// Open a port range on the unit's machine.
#[derive(Debug, Parser)]
#[command(name = "open-port")]
pub struct OpenPort {
    /// `<port>[/<protocol>]`, `<from>-<to>[/<protocol>]` or `icmp`
    #[arg(value_name = "PORTS")]
    range: PortRange,
}

impl ToolCommand for OpenPort {
    fn run(self, ctx: &mut HookContext, _out: &mut Output) -> Result<()> {
        ctx.open_port(self.range)
    }
}

/// Close a port range on the unit's machine.
#[derive(Debug, Parser)]
#[command(name = "close-port")]
pub struct ClosePort {
    /// `<port>[/<protocol>]`, `<from>-<to>[/<protocol>]` or `icmp`
    #[arg(value_name = "PORTS")]
    range: PortRange,
}

impl ToolCommand for ClosePort {
    fn run(self, ctx: &mut HookContext, _out: &mut Output) -> Result<()> {
        ctx.close_port(self.range);
        Ok(())
    }
}

/// List the port ranges the unit has open, including this hook's changes.
#[derive(Debug, Parser)]
#[command(name = "opened-ports")]
pub struct OpenedPorts {
    #[command(flatten)]
    output: OutputArgs,
}

impl ToolCommand for OpenedPorts {
    fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()> {
        let ports: Vec<String> = ctx
            .opened_ports()
            .iter()
            .map(ToString::to_string)
            .collect();
        self.output.print(out, &ports)
    }
}
