//! Client side of the hook-tool socket, used by the `hook-tool` binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{ToolRequest, ToolResponse};
use crate::wire::{Message, MessageCodec};

/// Default time to wait for a response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Sends single requests to a hook-tool server.
#[derive(Debug, Clone)]
pub struct HookToolClient {
    path: PathBuf,
    timeout: Duration,
}

impl HookToolClient {
    /// A client for the server listening on `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets how long to wait for the response.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Path of the server socket.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sends `request` on a fresh connection and waits for the response.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached, refuses the request
    /// or does not answer in time.
    pub async fn request(&self, request: &ToolRequest) -> Result<ToolResponse> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|e| Error::Io("failed to connect to agent socket", e))?;
        let mut framed = Framed::new(stream, MessageCodec::default());

        framed.send(Message::Request(request.clone())).await?;

        let result = match timeout(self.timeout, framed.next()).await {
            Ok(Some(Ok(Message::Response(response)))) => Ok(response),
            Ok(Some(Ok(Message::Rejected(info)))) => Err(Error::Rejected {
                code: info.code,
                message: info.message,
            }),
            Ok(Some(Ok(other))) => Err(Error::UnexpectedMessage(other.kind())),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => return Err(Error::ConnectionClosed),
            Err(_) => return Err(Error::Timeout(self.timeout)),
        };

        if let Err(e) = framed.send(Message::Close).await {
            debug!("failed to send close message: {e}");
        }

        result
    }
}
