//! The unit agent: decides which hook a unit runs next, runs it with a hook
//! context served to its tools, and records the outcome durably.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod operation;
mod resolver;
mod runner;
mod uniter;

pub use error::{Error, Result};
pub use operation::record;
pub use resolver::{Decision, Resolver, ResolverInput, ResolverPolicy};
pub use runner::{HookCommand, HookOutcome, HookRunner, hook_path};
pub use uniter::{DEFAULT_HOOK_PATH, Phase, Uniter, UniterConfig};
