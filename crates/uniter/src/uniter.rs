//! The per-unit control loop.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uniter_hook_tool_rpc::{HookToolServer, ServerConfig};
use uniter_hook_tools::{ContextSlot, HookContext, ToolRegistry};
use uniter_model::{
    AgentStatus, ChangeStream, HookInfo, Life, Model, ModelError, RetryPolicy, StatusInfo,
    UnitName, UnitSnapshot, WorkloadStatus,
};
use uniter_state::{LocalState, OperationState, OperationStatus, StateDir};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::operation::record;
use crate::resolver::{Decision, Resolver, ResolverInput, ResolverPolicy};
use crate::runner::{HookCommand, HookOutcome, HookRunner, hook_path};

/// `PATH` given to hooks after the tools directory.
pub const DEFAULT_HOOK_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// What the control loop is doing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    /// Nothing to do until the model changes.
    Idle,

    /// Reading the model and choosing the next operation.
    Selecting,

    /// A hook is running.
    RunningHook,

    /// A hook failed and the operator has not resolved it.
    AwaitingResolution,

    /// Running teardown hooks.
    Dying,

    /// The unit is dead; the loop has stopped.
    Dead,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Selecting => "selecting",
            Self::RunningHook => "running-hook",
            Self::AwaitingResolution => "awaiting-resolution",
            Self::Dying => "dying",
            Self::Dead => "dead",
        })
    }
}

/// Where a unit keeps its files and how it runs hooks.
#[derive(Clone, Debug)]
pub struct UniterConfig {
    /// The deployed charm; hooks live in `hooks/`.
    pub charm_dir: PathBuf,

    /// Agent data: `state/`, `run/` and `tools/` live here.
    pub data_dir: PathBuf,

    /// Directory of hook-tool links, prepended to the hooks' `PATH`.
    pub tools_dir: PathBuf,

    /// `PATH` after the tools directory.
    pub hook_path: String,

    /// Backoff for transient model failures.
    pub retry: RetryPolicy,

    /// Hook ordering knobs.
    pub policy: ResolverPolicy,

    /// Time a hook gets to exit after SIGTERM on shutdown.
    pub hook_grace: Duration,
}

impl UniterConfig {
    /// Defaults for a charm in `charm_dir` and agent data in `data_dir`.
    pub fn new(charm_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            charm_dir: charm_dir.into(),
            tools_dir: data_dir.join("tools"),
            data_dir,
            hook_path: DEFAULT_HOOK_PATH.to_string(),
            retry: RetryPolicy::default(),
            policy: ResolverPolicy::default(),
            hook_grace: Duration::from_secs(10),
        }
    }

    /// Directory of the durable state.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    /// Socket of the hook-tool server.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.data_dir.join("run").join("agent.socket")
    }
}

#[derive(Debug, Eq, PartialEq)]
enum Executed {
    Done,
    Cancelled,
}

/// Runs one unit's hooks, one at a time, until the unit is dead or the
/// agent shuts down.
pub struct Uniter<M: Model> {
    model: M,
    config: UniterConfig,
    state: StateDir,
    local: LocalState,
    resolver: Resolver,
    runner: HookRunner,
    slot: ContextSlot,
    phase: watch::Sender<Phase>,
}

impl<M: Model> fmt::Debug for Uniter<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uniter")
            .field("unit", self.model.unit())
            .field("config", &self.config)
            .field("local", &self.local)
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl<M: Model> Uniter<M> {
    /// Opens the unit's state under `config.data_dir`.
    ///
    /// # Errors
    ///
    /// Fails if existing state cannot be read.
    pub fn new(model: M, config: UniterConfig) -> Result<Self> {
        let state = StateDir::open(config.state_dir())?;
        let local = state.local.read()?;
        let (phase, _) = watch::channel(Phase::Selecting);

        Ok(Self {
            resolver: Resolver::new(config.policy),
            runner: HookRunner::new(config.hook_grace),
            model,
            config,
            state,
            local,
            slot: ContextSlot::new(),
            phase,
        })
    }

    /// Follows the loop's phase.
    #[must_use]
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// The slot hook contexts are opened in.
    #[must_use]
    pub const fn slot(&self) -> &ContextSlot {
        &self.slot
    }

    /// The unit this loop runs for.
    #[must_use]
    pub fn unit(&self) -> &UnitName {
        self.model.unit()
    }

    /// Runs until the unit is dead or `shutdown` fires, returning the final
    /// phase. A hook interrupted by shutdown is left in flight and runs again
    /// on the next start.
    ///
    /// # Errors
    ///
    /// Fails on local state errors, violated invariants and model errors
    /// retrying cannot fix.
    #[instrument(skip_all, fields(unit = %self.model.unit()))]
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<Phase> {
        info!("uniter started");
        let result = self.run_loop(&shutdown).await;
        match &result {
            Ok(phase) => info!(%phase, "uniter stopped"),
            Err(e) if e.is_invariant() => error!("invariant violated: {e}"),
            Err(e) => error!("uniter failed: {e}"),
        }
        result
    }

    async fn run_loop(&mut self, shutdown: &CancellationToken) -> Result<Phase> {
        let model = self.model.clone();
        let Some(mut changes) = retrying(&self.config.retry, shutdown, "watch", || model.watch())
            .await?
        else {
            return Ok(self.current_phase());
        };

        loop {
            if shutdown.is_cancelled() {
                return Ok(self.current_phase());
            }
            self.set_phase(Phase::Selecting);

            let Some(snapshot) =
                retrying(&self.config.retry, shutdown, "snapshot", || model.snapshot()).await?
            else {
                return Ok(self.current_phase());
            };
            let dying = snapshot.life != Life::Alive;
            if dying {
                self.set_phase(Phase::Dying);
            }
            self.state.relations.sync(&snapshot, dying);

            let operation = self.state.operation.read()?;
            if let Some(completed) = operation
                .as_ref()
                .filter(|operation| operation.status == OperationStatus::Completed)
            {
                info!(hook = %completed.hook, "finishing hook completed before restart");
                self.finish(completed, true)?;
                continue;
            }

            let decision = self.resolver.next(&ResolverInput {
                snapshot: &snapshot,
                local: &self.local,
                relations: &self.state.relations,
                operation: operation.as_ref(),
            });

            match decision {
                Decision::Run(operation) => {
                    if self.execute(operation, &snapshot, shutdown).await? == Executed::Cancelled {
                        return Ok(self.current_phase());
                    }
                }
                Decision::Skip(operation) => self.skip(&operation, shutdown).await?,
                Decision::Terminate => {
                    info!("teardown complete");
                    if retrying(&self.config.retry, shutdown, "ensure dead", || {
                        model.ensure_dead()
                    })
                    .await?
                    .is_none()
                    {
                        return Ok(self.current_phase());
                    }
                    self.set_phase(Phase::Dead);
                    return Ok(Phase::Dead);
                }
                Decision::Idle => {
                    self.report_agent_status(AgentStatus::Idle, "").await;
                    self.set_phase(Phase::Idle);
                    if !wait(&mut changes, shutdown).await? {
                        return Ok(self.current_phase());
                    }
                }
                Decision::AwaitResolution => {
                    self.set_phase(Phase::AwaitingResolution);
                    if !wait(&mut changes, shutdown).await? {
                        return Ok(self.current_phase());
                    }
                }
            }
        }
    }

    #[instrument(skip_all, fields(hook = %operation.hook))]
    async fn execute(
        &mut self,
        operation: OperationState,
        snapshot: &UnitSnapshot,
        shutdown: &CancellationToken,
    ) -> Result<Executed> {
        let retried = operation.error.is_some();
        self.state.operation.write(&operation)?;

        // One retry request runs the hook once; a new failure waits again.
        if retried {
            let model = &self.model;
            if retrying(&self.config.retry, shutdown, "clear resolved", || {
                model.clear_resolved()
            })
            .await?
            .is_none()
            {
                return Ok(Executed::Cancelled);
            }
        }

        let hook_name = operation.hook.name();
        let context_id = Uuid::new_v4().to_string();
        let members: Vec<UnitName> = operation
            .hook
            .relation_id
            .and_then(|id| self.state.relations.relation(id))
            .map(|relation| relation.joined_members().cloned().collect())
            .unwrap_or_default();

        let model = &self.model;
        let Some(context) = retrying(&self.config.retry, shutdown, "hook context", || {
            HookContext::build(
                model,
                context_id.clone(),
                operation.hook.clone(),
                snapshot,
                members.clone(),
            )
        })
        .await?
        else {
            return Ok(Executed::Cancelled);
        };

        self.slot.open(context)?;
        let server = match HookToolServer::bind(
            self.config.socket_path(),
            context_id.clone(),
            ToolRegistry::new(self.slot.clone()),
            ServerConfig::default(),
        ) {
            Ok(server) => server,
            Err(e) => {
                if let Some(context) = self.slot.take() {
                    context.discard();
                }
                return Err(e.into());
            }
        };
        let server_shutdown = shutdown.child_token();
        let server_task = tokio::spawn(server.serve(server_shutdown.clone()));

        self.state
            .operation
            .write(&operation.with_status(OperationStatus::InFlight))?;
        self.set_phase(Phase::RunningHook);
        self.report_agent_status(AgentStatus::Executing, &format!("running {hook_name} hook"))
            .await;

        let command = self.hook_command(&operation.hook, &hook_name, &context_id);
        let outcome = self.runner.run(&command, shutdown).await;

        server_shutdown.cancel();
        match server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("hook tool server failed: {e}"),
            Err(e) => warn!("hook tool server task failed: {e}"),
        }
        let context = self.slot.take().ok_or(uniter_hook_tools::Error::ContextClosed)?;

        match outcome {
            HookOutcome::Cancelled => {
                context.discard();
                info!("hook interrupted, it will run again on restart");
                Ok(Executed::Cancelled)
            }
            HookOutcome::Failed(detail) => {
                context.discard();
                self.fail(&operation, detail, shutdown).await?;
                Ok(Executed::Done)
            }
            HookOutcome::Succeeded | HookOutcome::Missing => {
                let model = &self.model;
                let retry = &self.config.retry;
                let committed =
                    retry_transient(retry, shutdown, "commit", || context.commit(model, retry)).await;
                match committed {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        context.discard();
                        self.fail(&operation, format!("cannot commit hook changes: {e}"), shutdown)
                            .await?;
                        return Ok(Executed::Done);
                    }
                    None => {
                        context.discard();
                        info!("commit interrupted, the hook will run again on restart");
                        return Ok(Executed::Cancelled);
                    }
                }

                let completed = operation.with_status(OperationStatus::Completed);
                self.state.operation.write(&completed)?;
                self.finish(&completed, false)?;

                if retried && context.changes().workload_status.is_none() {
                    self.restore_status(&operation, shutdown).await?;
                }
                Ok(Executed::Done)
            }
        }
    }

    /// Records a failed hook and waits for the operator.
    async fn fail(
        &mut self,
        operation: &OperationState,
        detail: String,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let hook_name = operation.hook.name();
        error!(hook = %hook_name, "hook failed: {detail}");

        let model = self.model.clone();
        let saved = match &operation.workload_status {
            Some(status) => Some(status.clone()),
            None => {
                retrying(&self.config.retry, shutdown, "workload status", || {
                    model.workload_status()
                })
                .await?
            }
        };

        let mut failed = operation.with_status(OperationStatus::Error);
        failed.error = Some(detail.clone());
        failed.workload_status = saved;
        self.state.operation.write(&failed)?;

        let status = StatusInfo::new(WorkloadStatus::Error, format!("hook failed: \"{hook_name}\""));
        retrying(&self.config.retry, shutdown, "set workload status", || {
            model.set_workload_status(&status)
        })
        .await?;
        self.report_agent_status(AgentStatus::Error, &detail).await;
        Ok(())
    }

    /// Marks a failed hook done without running it.
    #[instrument(skip_all, fields(hook = %operation.hook))]
    async fn skip(&mut self, operation: &OperationState, shutdown: &CancellationToken) -> Result<()> {
        info!("skipping hook");
        self.finish(operation, false)?;
        self.resolve(operation, shutdown).await
    }

    /// Clears the operator's resolution request and restores the workload
    /// status from before the failure.
    async fn resolve(&self, operation: &OperationState, shutdown: &CancellationToken) -> Result<()> {
        let model = &self.model;
        if retrying(&self.config.retry, shutdown, "clear resolved", || {
            model.clear_resolved()
        })
        .await?
        .is_none()
        {
            return Ok(());
        }
        self.restore_status(operation, shutdown).await
    }

    async fn restore_status(
        &self,
        operation: &OperationState,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let Some(status) = &operation.workload_status else {
            return Ok(());
        };
        debug!(status = %status.status, "restoring workload status");
        let model = &self.model;
        retrying(&self.config.retry, shutdown, "set workload status", || {
            model.set_workload_status(status)
        })
        .await?;
        Ok(())
    }

    /// Applies local bookkeeping for a done operation and clears it. When
    /// `resumed`, bookkeeping that already happened before a restart is
    /// tolerated.
    fn finish(&mut self, operation: &OperationState, resumed: bool) -> Result<()> {
        match record(operation, &mut self.local, &mut self.state.relations) {
            Ok(()) => {}
            Err(e @ uniter_state::Error::Invariant(_)) if resumed => {
                warn!(hook = %operation.hook, "hook already recorded: {e}");
            }
            Err(e) => return Err(e.into()),
        }
        self.state.local.write(&self.local)?;
        self.state.operation.clear()?;
        Ok(())
    }

    fn hook_command(&self, hook: &HookInfo, name: &str, context_id: &str) -> HookCommand {
        let charm_dir = &self.config.charm_dir;
        let mut command = HookCommand::new(hook_path(charm_dir, name), charm_dir)
            .with_env("UNITER_UNIT_NAME", self.model.unit().as_str())
            .with_env("UNITER_HOOK_NAME", name)
            .with_env("UNITER_CONTEXT_ID", context_id)
            .with_env(
                "UNITER_AGENT_SOCKET",
                self.config.socket_path().to_string_lossy(),
            )
            .with_env("UNITER_CHARM_DIR", charm_dir.to_string_lossy())
            .with_env(
                "PATH",
                format!(
                    "{}:{}",
                    self.config.tools_dir.to_string_lossy(),
                    self.config.hook_path
                ),
            );

        if let (Some(endpoint), Some(id)) = (&hook.endpoint, hook.relation_id) {
            command = command
                .with_env("UNITER_RELATION", endpoint.as_str())
                .with_env("UNITER_RELATION_ID", format!("{endpoint}:{id}"));
        }
        if let Some(unit) = &hook.remote_unit {
            command = command.with_env("UNITER_REMOTE_UNIT", unit.as_str());
        }
        if let Some(storage) = &hook.storage_id {
            command = command.with_env("UNITER_STORAGE_ID", storage.as_str());
        }
        command
    }

    async fn report_agent_status(&self, status: AgentStatus, message: &str) {
        if let Err(e) = self.model.set_agent_status(status, message).await {
            warn!(%status, "cannot report agent status: {e}");
        }
    }

    fn current_phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(from = %previous, to = %phase, "phase changed");
        }
    }
}

/// Calls `f` until it succeeds or fails permanently, backing off on
/// transient errors for as long as it takes. Returns `None` if `shutdown`
/// fires first.
async fn retry_transient<T, E, F, Fut>(
    retry: &RetryPolicy,
    shutdown: &CancellationToken,
    what: &str,
    mut f: F,
) -> Option<std::result::Result<T, E>>
where
    E: ModelError,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut attempt: u32 = 1;
    loop {
        let result = tokio::select! {
            () = shutdown.cancelled() => return None,
            result = f() => result,
        };
        match result {
            Err(e) if e.is_transient() => {
                let delay = retry.backoff(attempt);
                warn!(attempt, ?delay, "{what} failed, retrying: {e}");
                tokio::select! {
                    () = shutdown.cancelled() => return None,
                    () = tokio::time::sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
            result => return Some(result),
        }
    }
}

/// Like [`retry_transient`], with permanent failures as loop errors.
async fn retrying<T, E, F, Fut>(
    retry: &RetryPolicy,
    shutdown: &CancellationToken,
    what: &str,
    f: F,
) -> Result<Option<T>>
where
    E: ModelError,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    match retry_transient(retry, shutdown, what, f).await {
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(e)) => Err(Error::model(e)),
        None => Ok(None),
    }
}

/// Waits for a model change, coalescing any already queued. Returns `false`
/// on shutdown.
async fn wait(changes: &mut ChangeStream, shutdown: &CancellationToken) -> Result<bool> {
    tokio::select! {
        () = shutdown.cancelled() => Ok(false),
        change = changes.next() => match change {
            Some(change) => {
                debug!(?change, "model changed");
                while let Some(Some(_)) = changes.next().now_or_never() {}
                Ok(true)
            }
            None => Err(Error::WatchClosed),
        },
    }
}
