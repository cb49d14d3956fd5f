//! The tools a hook process calls to read and change its unit's view of the
//! model, and the context those tools run against.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod commands;
mod context;
mod error;
mod handler;
mod output;
mod slot;

pub use commands::{Tool, ToolCommand};
pub use context::{ContextCall, ContextChanges, ContextRelation, HookContext};
pub use error::{Error, Result};
pub use handler::ToolRegistry;
pub use output::{Format, Output, OutputArgs};
pub use slot::ContextSlot;
