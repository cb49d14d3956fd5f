use async_trait::async_trait;
use tracing::{debug, warn};
use uniter_hook_tool_rpc::{ToolHandler, ToolRequest, ToolResponse};

use crate::commands::Tool;
use crate::error::{Error, Result};
use crate::output::Output;
use crate::slot::ContextSlot;

/// Dispatches hook-tool requests to the context held in a [`ContextSlot`].
#[derive(Clone, Debug)]
pub struct ToolRegistry {
    slot: ContextSlot,
}

impl ToolRegistry {
    /// A registry running tools against `slot`.
    #[must_use]
    pub const fn new(slot: ContextSlot) -> Self {
        Self { slot }
    }

    fn run(&self, tool: Tool, request: &ToolRequest) -> Result<Vec<u8>> {
        let out = self.slot.with(&request.context_id, |ctx| {
            let mut out = Output::default();
            tool.run(ctx, &mut out).map(|()| out)
        })??;
        out.finish(&request.dir)
    }
}

#[async_trait]
impl ToolHandler for ToolRegistry {
    async fn handle(&self, request: ToolRequest) -> ToolResponse {
        let result =
            Tool::parse(&request.command, &request.args).and_then(|tool| self.run(tool, &request));

        let response = match result {
            Ok(stdout) => ToolResponse::success(stdout),
            Err(Error::Clap(e)) => clap_response(&e),
            Err(e) => {
                warn!(request = %request.id, command = %request.command, "hook tool failed: {e}");
                ToolResponse::failure(e.exit_code(), e)
            }
        };
        debug!(
            request = %request.id,
            command = %request.command,
            code = response.code,
            "hook tool finished"
        );
        response
    }
}

/// Help goes to stdout with exit 0; usage errors to stderr.
fn clap_response(e: &clap::Error) -> ToolResponse {
    let rendered = e.render().to_string().into_bytes();
    let (stdout, stderr) = if e.use_stderr() {
        (Vec::new(), rendered)
    } else {
        (rendered, Vec::new())
    };
    ToolResponse {
        code: e.exit_code(),
        stdout,
        stderr,
    }
}
