//! Hooks calling the real hook-tool binary against a running agent.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uniter::{Phase, Uniter, UniterConfig};
use uniter_agent::install_tools;
use uniter_model::{PortRange, RelationId, RetryPolicy, UnitName, WorkloadStatus};
use uniter_model_memory::{MemoryModel, settings};

const HOOK_TOOL: &str = env!("CARGO_BIN_EXE_hook-tool");
const DB: RelationId = RelationId(4);

struct Agent {
    dir: TempDir,
    model: MemoryModel,
}

impl Agent {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("charm/hooks")).unwrap();
        let model = MemoryModel::new(UnitName::new("wordpress/0").unwrap());
        model.set_config("title", serde_json::json!("blog"));
        Self { dir, model }
    }

    fn log(&self) -> PathBuf {
        self.dir.path().join("hooks.log")
    }

    fn logged(&self) -> Vec<String> {
        fs::read_to_string(self.log())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Writes a hook; `{log}` and `{hook_tool}` are substituted.
    fn hook(&self, name: &str, body: &str) {
        let path = self.dir.path().join("charm/hooks").join(name);
        let body = body
            .replace("{log}", &self.log().display().to_string())
            .replace("{hook_tool}", HOOK_TOOL);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn start(&self) -> Running {
        let config = UniterConfig {
            retry: RetryPolicy::immediate(3),
            hook_grace: Duration::from_secs(1),
            ..UniterConfig::new(self.dir.path().join("charm"), self.dir.path().join("data"))
        };
        install_tools(&config.tools_dir, Path::new(HOOK_TOOL)).unwrap();

        let uniter = Uniter::new(self.model.clone(), config).unwrap();
        let phase = uniter.phase();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(uniter.run(shutdown.clone()));
        Running {
            phase,
            shutdown,
            handle,
        }
    }
}

struct Running {
    phase: watch::Receiver<Phase>,
    shutdown: CancellationToken,
    handle: JoinHandle<uniter::Result<Phase>>,
}

impl Running {
    async fn wait_for(&self, what: &str, mut condition: impl FnMut(Phase) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        while !condition(*self.phase.borrow()) {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hooks_change_the_model_through_tools() {
    let agent = Agent::new();
    agent.model.set_leader(true);
    agent.model.add_relation(DB, "db");
    agent.model.join(
        DB,
        &UnitName::new("mysql/0").unwrap(),
        settings([("host", "10.0.0.1")]),
    );

    agent.hook("install", "set -e\nstatus-set maintenance installing");
    agent.hook(
        "config-changed",
        "set -e\ntitle=$(config-get title)\nstatus-set active \"serving $title\"\nopen-port 80/tcp",
    );
    agent.hook("leader-elected", "set -e\nleader-set token=abc");
    agent.hook("db-relation-joined", "set -e\nrelation-set user=wordpress");
    agent.hook(
        "db-relation-changed",
        "set -e\necho \"host $(relation-get host)\" >> {log}\necho \"members $(relation-list --format json)\" >> {log}",
    );

    let running = agent.start();
    running
        .wait_for("relation hooks", |phase| {
            phase == Phase::Idle && agent.logged().len() == 2
        })
        .await;

    assert_eq!(agent.logged(), ["host 10.0.0.1", "members [\"mysql/0\"]"]);
    let status = agent.model.current_workload_status();
    assert_eq!(status.status, WorkloadStatus::Active);
    assert_eq!(status.message, "serving blog");
    assert_eq!(
        agent.model.current_ports().into_iter().collect::<Vec<_>>(),
        ["80/tcp".parse::<PortRange>().unwrap()]
    );
    assert_eq!(
        agent.model.current_leader_settings().get("token").map(String::as_str),
        Some("abc")
    );
    let own = agent
        .model
        .current_relation_settings(DB, &UnitName::new("wordpress/0").unwrap());
    assert_eq!(own.value.get("user").map(String::as_str), Some("wordpress"));

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tool_exit_codes_and_direct_invocation() {
    let agent = Agent::new();
    agent.hook(
        "install",
        "is-leader >> {log}\n\
         status-set bogus 2>/dev/null; echo \"status-set $?\" >> {log}\n\
         relation-get -r db:9 - mysql/0 2>/dev/null; echo \"relation-get $?\" >> {log}\n\
         {hook_tool} config-get title >> {log}",
    );

    let running = agent.start();
    running
        .wait_for("install", |phase| phase == Phase::Idle && agent.logged().len() == 4)
        .await;

    assert_eq!(
        agent.logged(),
        ["False", "status-set 2", "relation-get 1", "blog"]
    );
    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_hook_discards_tool_changes() {
    let agent = Agent::new();
    agent.model.add_relation(DB, "db");
    agent.model.join(DB, &UnitName::new("mysql/0").unwrap(), settings([]));
    agent.hook(
        "db-relation-joined",
        "relation-set user=wordpress
status-set active almost
open-port 443/tcp
exit 1",
    );

    let running = agent.start();
    running
        .wait_for("hook failure", |phase| phase == Phase::AwaitingResolution)
        .await;

    let status = agent.model.current_workload_status();
    assert_eq!(status.status, WorkloadStatus::Error);
    assert_eq!(status.message, "hook failed: \"db-relation-joined\"");
    assert!(agent.model.current_ports().is_empty());
    assert!(
        agent
            .model
            .workload_status_history()
            .iter()
            .all(|status| status.message != "almost")
    );
    let own = agent
        .model
        .current_relation_settings(DB, &UnitName::new("wordpress/0").unwrap());
    assert!(own.value.is_empty());

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unavailable_model_delays_commit() {
    let agent = Agent::new();
    agent.hook("install", "set -e\nstatus-set maintenance installing");
    agent.model.fail_next_writes(20);

    let running = agent.start();
    running
        .wait_for("install to commit", |phase| phase == Phase::Idle)
        .await;

    let status = agent.model.current_workload_status();
    assert_eq!(status.status, WorkloadStatus::Maintenance);
    assert_eq!(status.message, "installing");
    assert!(
        agent
            .model
            .workload_status_history()
            .iter()
            .all(|status| status.status != WorkloadStatus::Error)
    );

    running.stop().await;
}

#[test]
fn test_tool_outside_hook_fails() {
    let output = std::process::Command::new(HOOK_TOOL)
        .arg("is-leader")
        .env_remove("UNITER_AGENT_SOCKET")
        .env_remove("UNITER_CONTEXT_ID")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(
        String::from_utf8_lossy(&output.stderr),
        "error: is-leader must be run from a hook\n"
    );
}
