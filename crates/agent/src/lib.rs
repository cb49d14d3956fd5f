//! Support for running a unit agent against a local model fixture.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::Path;

use tracing::debug;
use uniter_hook_tools::Tool;

/// Name of the binary every hook tool links to.
pub const HOOK_TOOL_BIN: &str = "hook-tool";

/// Points a link for every hook tool in `dir` at `binary`, replacing links
/// left by an earlier run.
///
/// # Errors
///
/// Fails if the directory or a link cannot be created.
pub fn install_tools(dir: &Path, binary: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    for name in Tool::NAMES {
        let link = dir.join(name);
        match fs::remove_file(&link) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        symlink(binary, &link)?;
        debug!(tool = name, "installed hook tool");
    }
    Ok(())
}
