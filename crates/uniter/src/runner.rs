//! Spawning hook executables and waiting for them.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, warn};

/// Lines of output kept for the error detail of a failed hook.
const TAIL_LINES: usize = 20;

const SPAWN_ATTEMPTS: u32 = 10;

/// How long output readers may outlive the hook, e.g. when it leaves a
/// background process holding its stdout.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How a hook process ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HookOutcome {
    /// Exited 0.
    Succeeded,

    /// The charm does not implement the hook.
    Missing,

    /// Could not be started or exited non-zero; carries the exit detail and
    /// the tail of its output.
    Failed(String),

    /// Terminated because the agent is shutting down.
    Cancelled,
}

/// A hook executable with its environment.
#[derive(Clone, Debug)]
pub struct HookCommand {
    /// Path of the executable.
    pub executable: PathBuf,

    /// Environment variables, on top of a clean environment.
    pub env: BTreeMap<String, String>,

    /// Working directory.
    pub working_dir: PathBuf,
}

impl HookCommand {
    /// Runs `executable` in `working_dir`.
    pub fn new(executable: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            env: BTreeMap::new(),
            working_dir: working_dir.into(),
        }
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn name(&self) -> String {
        self.executable
            .file_name()
            .map_or_else(String::new, |name| name.to_string_lossy().into_owned())
    }
}

type Tail = Arc<Mutex<VecDeque<String>>>;

/// Runs one hook at a time to completion.
#[derive(Clone, Debug)]
pub struct HookRunner {
    grace: Duration,
}

impl HookRunner {
    /// A runner that gives a cancelled hook `grace` to exit after SIGTERM
    /// before killing it.
    #[must_use]
    pub const fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Runs `command` and waits for it, or for `shutdown`.
    pub async fn run(&self, command: &HookCommand, shutdown: &CancellationToken) -> HookOutcome {
        let hook = command.name();

        match tokio::fs::metadata(&command.executable).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(%hook, "hook not implemented by charm");
                return HookOutcome::Missing;
            }
            _ => {}
        }

        let mut cmd = Command::new(&command.executable);
        cmd.env_clear()
            .envs(&command.env)
            .current_dir(&command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match spawn(&mut cmd).await {
            Ok(child) => child,
            Err(e) => {
                error!(%hook, "cannot start hook: {e}");
                return HookOutcome::Failed(format!("cannot start hook: {e}"));
            }
        };
        let pid = child.id();
        debug!(%hook, ?pid, "hook started");

        let tail: Tail = Arc::default();
        let readers = TaskTracker::new();
        if let Some(stdout) = child.stdout.take() {
            readers.spawn(
                forward(stdout, hook.clone(), false, Arc::clone(&tail)).in_current_span(),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            readers.spawn(
                forward(stderr, hook.clone(), true, Arc::clone(&tail)).in_current_span(),
            );
        }
        readers.close();

        let status = tokio::select! {
            status = child.wait() => status,
            () = shutdown.cancelled() => {
                info!(%hook, "shutdown requested, terminating hook");
                self.terminate(&mut child, pid).await;
                drain(&readers).await;
                return HookOutcome::Cancelled;
            }
        };
        drain(&readers).await;

        match status {
            Ok(status) if status.success() => {
                info!(%hook, "hook succeeded");
                HookOutcome::Succeeded
            }
            Ok(status) => {
                warn!(%hook, %status, "hook failed");
                HookOutcome::Failed(detail(status, &tail.lock()))
            }
            Err(e) => HookOutcome::Failed(format!("cannot wait for hook: {e}")),
        }
    }

    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        if let Some(raw) = pid.and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(e) = signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
                warn!(pid = raw, "cannot send SIGTERM to hook: {e}");
            }
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => info!(%status, "hook terminated"),
            Ok(Err(e)) => error!("cannot wait for hook: {e}"),
            Err(_) => {
                error!("timeout waiting for hook to exit, killing");
                if let Err(e) = child.kill().await {
                    error!("cannot kill hook: {e}");
                }
            }
        }
    }
}

/// Spawns `cmd`, retrying while the executable is still open for writing.
async fn spawn(cmd: &mut Command) -> io::Result<Child> {
    let mut attempt = 1;
    loop {
        match cmd.spawn() {
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) && attempt < SPAWN_ATTEMPTS => {
                debug!(attempt, "hook executable busy, retrying");
                tokio::time::sleep(Duration::from_millis(10)).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Logs `reader` line by line until the hook closes it. Bytes that are not
/// UTF-8 are replaced rather than ending the read, which would leave the
/// hook writing to a closed pipe.
async fn forward<R: AsyncRead + Unpin>(reader: R, hook: String, stderr: bool, tail: Tail) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(%hook, "cannot read hook output: {e}");
                break;
            }
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        let line = String::from_utf8_lossy(&buf).into_owned();

        if stderr {
            warn!(%hook, "stderr: {line}");
        } else {
            info!(%hook, "{line}");
        }

        let mut tail = tail.lock();
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

async fn drain(readers: &TaskTracker) {
    if tokio::time::timeout(DRAIN_TIMEOUT, readers.wait())
        .await
        .is_err()
    {
        debug!("hook output still open after exit");
    }
}

fn detail(status: ExitStatus, tail: &VecDeque<String>) -> String {
    let mut detail = status.to_string();
    for line in tail {
        detail.push('\n');
        detail.push_str(line);
    }
    detail
}

/// Path of the hook called `name` in `charm_dir`.
#[must_use]
pub fn hook_path(charm_dir: &Path, name: &str) -> PathBuf {
    charm_dir.join("hooks").join(name)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use tracing_test::traced_test;

    use super::*;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn runner() -> HookRunner {
        HookRunner::new(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_success_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let path = script(
            dir.path(),
            "install",
            &format!("echo \"$UNITER_HOOK_NAME in $(pwd)\" > {}", out.display()),
        );

        let command = HookCommand::new(path, dir.path()).with_env("UNITER_HOOK_NAME", "install");
        let outcome = runner().run(&command, &CancellationToken::new()).await;

        assert_eq!(outcome, HookOutcome::Succeeded);
        let written = fs::read_to_string(out).unwrap();
        assert!(written.starts_with("install in "), "{written}");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_output_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "stop", "echo stopping; echo careful >&2");

        let command = HookCommand::new(path, dir.path());
        let outcome = runner().run(&command, &CancellationToken::new()).await;

        assert_eq!(outcome, HookOutcome::Succeeded);
        assert!(logs_contain("stopping"));
        assert!(logs_contain("stderr: careful"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_output_that_is_not_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(
            dir.path(),
            "install",
            "printf 'bad \\377 byte\\n'; sleep 0.3\n\
             i=0; while [ $i -lt 2000 ]; do echo line $i; i=$((i+1)); done\n\
             exit 0",
        );
        let command = HookCommand::new(path, dir.path()).with_env("PATH", "/usr/bin:/bin");

        let outcome = runner().run(&command, &CancellationToken::new()).await;

        assert_eq!(outcome, HookOutcome::Succeeded);
        assert!(logs_contain("bad \u{fffd} byte"));
        assert!(logs_contain("line 1999"));
    }

    #[tokio::test]
    async fn test_missing_hook() {
        let dir = tempfile::tempdir().unwrap();
        let command = HookCommand::new(dir.path().join("start"), dir.path());
        let outcome = runner().run(&command, &CancellationToken::new()).await;
        assert_eq!(outcome, HookOutcome::Missing);
    }

    #[tokio::test]
    async fn test_failure_keeps_output_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(
            dir.path(),
            "start",
            "i=0; while [ $i -lt 30 ]; do echo line $i; i=$((i+1)); done; echo oops; exit 3",
        );

        let command = HookCommand::new(path, dir.path());
        let HookOutcome::Failed(detail) = runner().run(&command, &CancellationToken::new()).await
        else {
            panic!("expected failure");
        };

        assert!(detail.starts_with("exit status: 3"), "{detail}");
        assert!(detail.contains("oops"), "{detail}");
        assert!(!detail.contains("line 0\n"), "{detail}");
        assert_eq!(detail.lines().count(), TAIL_LINES + 1);
    }

    #[tokio::test]
    async fn test_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stop");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let command = HookCommand::new(path, dir.path());
        let outcome = runner().run(&command, &CancellationToken::new()).await;
        assert!(
            matches!(&outcome, HookOutcome::Failed(detail) if detail.starts_with("cannot start hook")),
            "{outcome:?}"
        );
    }

    #[tokio::test]
    async fn test_cancellation_terminates_hook() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "config-changed", "exec sleep 30");
        let command = HookCommand::new(path, dir.path()).with_env("PATH", "/usr/bin:/bin");

        let shutdown = CancellationToken::new();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = runner().run(&command, &shutdown).await;
        assert_eq!(outcome, HookOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
