//! Unix socket server answering hook-tool requests for one hook execution.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Error, Result, WireError};
use crate::message::{ErrorInfo, ToolRequest, ToolResponse};
use crate::wire::{MAX_MESSAGE_SIZE, Message, MessageCodec};

/// Configuration for the hook-tool server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a connection may sit idle before it is dropped.
    pub idle_timeout: Duration,
    /// Largest request payload accepted.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Trait for answering hook-tool requests.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Runs one tool invocation. Tool failures are reported through the
    /// response's exit code, never as an error.
    async fn handle(&self, request: ToolRequest) -> ToolResponse;
}

/// A bound hook-tool server.
///
/// The socket exists as soon as [`bind`](Self::bind) returns, so the hook
/// process can be spawned before [`serve`](Self::serve) is polled.
pub struct HookToolServer<H: ToolHandler> {
    path: PathBuf,
    listener: UnixListener,
    context_id: Arc<str>,
    handler: Arc<H>,
    config: ServerConfig,
}

impl<H: ToolHandler> HookToolServer<H> {
    /// Binds a server to `path` accepting only requests for `context_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created.
    pub fn bind(
        path: impl Into<PathBuf>,
        context_id: impl Into<String>,
        handler: H,
        config: ServerConfig,
    ) -> Result<Self> {
        let path = path.into();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::Io("failed to create socket directory", e))?;
        }
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io("failed to remove stale socket", e)),
        }

        let listener =
            UnixListener::bind(&path).map_err(|e| Error::Io("failed to bind unix listener", e))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::Io("failed to restrict socket permissions", e))?;

        Ok(Self {
            path,
            listener,
            context_id: context_id.into().into(),
            handler: Arc::new(handler),
            config,
        })
    }

    /// Path of the socket.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serves requests until `shutdown` fires, then waits for open
    /// connections to finish and removes the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket file cannot be removed.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            path,
            listener,
            context_id,
            handler,
            config,
        } = self;

        debug!("hook tool server listening");
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("hook tool server shutdown requested");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let handler = Arc::clone(&handler);
                            let context_id = Arc::clone(&context_id);
                            let config = config.clone();
                            let shutdown = shutdown.clone();
                            tracker.spawn(async move {
                                if let Err(e) = handle_connection(
                                    stream,
                                    &context_id,
                                    handler,
                                    &config,
                                    shutdown,
                                )
                                .await
                                {
                                    warn!("hook tool connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("failed to accept connection: {e}");
                        }
                    }
                }
            }
        }

        drop(listener);
        tracker.close();
        tracker.wait().await;

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io("failed to remove socket", e)),
        }

        info!("hook tool server stopped");
        Ok(())
    }
}

async fn handle_connection<H: ToolHandler>(
    stream: UnixStream,
    context_id: &str,
    handler: Arc<H>,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut framed = Framed::new(stream, MessageCodec::new(config.max_message_size));

    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = timeout(config.idle_timeout, framed.next()) => next,
        };

        let (reply, last) = match next {
            Ok(Some(Ok(Message::Request(request)))) => {
                (answer(request, context_id, handler.as_ref()).await, false)
            }
            Ok(Some(Ok(Message::Close)) | None) => {
                debug!("connection closed by client");
                break;
            }
            Ok(Some(Ok(other))) => {
                warn!("unexpected {} message", other.kind());
                let message = format!("unexpected {} message", other.kind());
                (reject("UNEXPECTED_MESSAGE", message), false)
            }
            // Framed yields nothing after a decode error.
            Ok(Some(Err(WireError::Decode(e)))) => (reject("BAD_REQUEST", e), true),
            Ok(Some(Err(e))) => return Err(e.into()),
            Err(_) => {
                warn!("hook tool connection idle for {:?}", config.idle_timeout);
                break;
            }
        };

        framed.send(reply).await?;
        if last {
            break;
        }
    }

    Ok(())
}

async fn answer<H: ToolHandler>(request: ToolRequest, context_id: &str, handler: &H) -> Message {
    if request.context_id != context_id {
        warn!(
            id = %request.id,
            command = %request.command,
            "rejecting request for foreign context"
        );
        return reject(
            "BAD_CONTEXT",
            format!("context {:?} is not running", request.context_id),
        );
    }

    debug!(id = %request.id, command = %request.command, args = ?request.args, "running hook tool");
    Message::Response(handler.handle(request).await)
}

fn reject(code: &str, message: String) -> Message {
    Message::Rejected(ErrorInfo {
        code: code.to_string(),
        message,
    })
}
