use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::context::HookContext;
use crate::error::{Error, Result};

/// Holds the one live [`HookContext`] while its hook runs.
///
/// The control loop opens the slot before spawning a hook and takes the
/// context back when the hook exits; from then on every tool call fails with
/// [`Error::ContextClosed`].
#[derive(Clone, Debug, Default)]
pub struct ContextSlot {
    inner: Arc<Mutex<Option<HookContext>>>,
}

impl ContextSlot {
    /// An empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `context` available to hook tools.
    ///
    /// # Errors
    ///
    /// Fails if another context is still open.
    pub fn open(&self, context: HookContext) -> Result<()> {
        let mut slot = self.inner.lock();
        if let Some(current) = slot.as_ref() {
            return Err(Error::ContextBusy(current.id().to_string()));
        }
        debug!(context = %context.id(), hook = %context.hook(), "context opened");
        *slot = Some(context);
        Ok(())
    }

    /// Closes the slot, returning the context it held.
    pub fn take(&self) -> Option<HookContext> {
        let context = self.inner.lock().take();
        if let Some(context) = &context {
            debug!(context = %context.id(), "context closed");
        }
        context
    }

    /// Whether a context is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Runs `f` against the open context if its id is `context_id`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ContextClosed`] if no such context is open.
    pub fn with<R>(&self, context_id: &str, f: impl FnOnce(&mut HookContext) -> R) -> Result<R> {
        let mut slot = self.inner.lock();
        match slot.as_mut() {
            Some(context) if context.id() == context_id => Ok(f(context)),
            _ => Err(Error::ContextClosed),
        }
    }
}
