//! Local socket protocol between hook-tool processes and the agent.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod error;
mod message;
mod server;
mod wire;

pub use client::{DEFAULT_TIMEOUT, HookToolClient};
pub use error::{Error, Result, WireError};
pub use message::{ErrorInfo, ToolRequest, ToolResponse};
pub use server::{HookToolServer, ServerConfig, ToolHandler};
pub use wire::{HEADER_LEN, MAX_MESSAGE_SIZE, Message, MessageCodec};
