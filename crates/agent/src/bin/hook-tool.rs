//! The binary behind every hook tool. Invoked through a link named after the
//! tool, or as `hook-tool <tool> [args...]`; forwards the call to the agent
//! serving the running hook.
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::env;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use uniter_agent::HOOK_TOOL_BIN;
use uniter_hook_tool_rpc::{HookToolClient, ToolRequest};

fn fail(message: &str) -> ExitCode {
    eprintln!("error: {message}");
    ExitCode::FAILURE
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let mut args = env::args();
    let invoked = args
        .next()
        .as_deref()
        .and_then(|arg0| Path::new(arg0).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let command = if invoked == HOOK_TOOL_BIN {
        match args.next() {
            Some(command) => command,
            None => return fail("usage: hook-tool <command> [args...]"),
        }
    } else {
        invoked
    };

    let (Ok(socket), Ok(context_id)) = (env::var("UNITER_AGENT_SOCKET"), env::var("UNITER_CONTEXT_ID"))
    else {
        return fail(&format!("{command} must be run from a hook"));
    };
    let dir = match env::current_dir() {
        Ok(dir) => dir,
        Err(e) => return fail(&format!("cannot read working directory: {e}")),
    };

    let request = ToolRequest::new(context_id, command, args.collect(), dir);
    let response = match HookToolClient::new(socket).request(&request).await {
        Ok(response) => response,
        Err(e) => return fail(&e.to_string()),
    };

    if let Err(e) = write_output(io::stdout().lock(), &response.stdout) {
        return fail(&format!("cannot write output: {e}"));
    }
    if write_output(io::stderr().lock(), &response.stderr).is_err() {
        return ExitCode::FAILURE;
    }
    ExitCode::from(u8::try_from(response.code).unwrap_or(1))
}

/// Writes `bytes` to `out`. A reader that went away is the caller's business.
fn write_output(mut out: impl Write, bytes: &[u8]) -> io::Result<()> {
    match out.write_all(bytes).and_then(|()| out.flush()) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        result => result,
    }
}
