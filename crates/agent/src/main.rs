//! Runs one unit's agent against a model described by a fixture file.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uniter::{ResolverPolicy, Uniter, UniterConfig};
use uniter_agent::{HOOK_TOOL_BIN, install_tools};
use uniter_model::UnitName;
use uniter_model_memory::MemoryModel;

/// Agent errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The model fixture could not be loaded.
    #[error(transparent)]
    Fixture(#[from] uniter_model_memory::Error),

    /// An IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] io::Error),

    /// The control loop failed.
    #[error(transparent)]
    Uniter(#[from] uniter::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Name of the unit to run, e.g. `wordpress/0`
    #[arg(long, env = "UNITER_UNIT")]
    unit: UnitName,

    /// Directory the charm is deployed in
    #[arg(long, env = "UNITER_CHARM_DIR")]
    charm_dir: PathBuf,

    /// Directory for agent state, sockets and tool links
    #[arg(long, default_value = "/var/lib/uniter", env = "UNITER_DATA_DIR")]
    data_dir: PathBuf,

    /// YAML file describing the model the unit runs against
    #[arg(long, env = "UNITER_FIXTURE")]
    fixture: PathBuf,

    /// The hook-tool binary; defaults to the one next to this executable
    #[arg(long, env = "UNITER_HOOK_TOOL")]
    hook_tool: Option<PathBuf>,

    /// Seconds a hook gets to exit after SIGTERM on shutdown
    #[arg(long, default_value_t = 10, env = "UNITER_HOOK_GRACE")]
    hook_grace: u64,

    /// Run leadership hooks after owed relation hooks
    #[arg(long, env = "UNITER_LEADERSHIP_AFTER_RELATIONS")]
    leadership_after_relations: bool,

    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, default_value = "info", env = "UNITER_LOG")]
    log: String,
}

fn hook_tool_binary(args: &Args) -> Result<PathBuf, Error> {
    if let Some(path) = &args.hook_tool {
        return Ok(path.clone());
    }
    let exe = env::current_exe().map_err(|e| Error::Io("cannot locate agent executable", e))?;
    Ok(exe.with_file_name(HOOK_TOOL_BIN))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let model = MemoryModel::from_fixture_file(&args.fixture, args.unit.clone())?;
    let config = UniterConfig {
        hook_grace: Duration::from_secs(args.hook_grace),
        policy: ResolverPolicy {
            leadership_before_relations: !args.leadership_after_relations,
        },
        ..UniterConfig::new(&args.charm_dir, &args.data_dir)
    };
    install_tools(&config.tools_dir, &hook_tool_binary(&args)?)
        .map_err(|e| Error::Io("cannot install hook tools", e))?;

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
                info!("received interrupt signal");
            }
        }

        info!("shutting down");
        signal_shutdown.cancel();
    });

    let phase = Uniter::new(model, config)?.run(shutdown).await?;
    info!(%phase, "agent stopped");
    Ok(())
}
