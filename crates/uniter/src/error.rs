use thiserror::Error;
use uniter_model::ModelError;

/// Result type for the control loop.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop the control loop.
#[derive(Debug, Error)]
pub enum Error {
    /// Local state could not be read or written, or an invariant broke.
    #[error(transparent)]
    State(#[from] uniter_state::Error),

    /// The hook context could not be installed.
    #[error(transparent)]
    Tools(#[from] uniter_hook_tools::Error),

    /// The hook-tool server could not be started.
    #[error(transparent)]
    Rpc(#[from] uniter_hook_tool_rpc::Error),

    /// The model failed in a way retrying cannot fix.
    #[error("model error: {0}")]
    Model(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The model stopped delivering change notifications.
    #[error("model change stream closed")]
    WatchClosed,
}

impl Error {
    /// Wraps a model error.
    pub fn model<E: ModelError>(error: E) -> Self {
        Self::Model(Box::new(error))
    }

    /// Whether the error is a violated state invariant.
    #[must_use]
    pub const fn is_invariant(&self) -> bool {
        matches!(self, Self::State(uniter_state::Error::Invariant(_)))
    }
}
