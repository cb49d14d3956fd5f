//! The hook tools, each a `clap` parser with a `run` against the context.

mod config;
mod leader;
mod log;
mod ports;
mod relation;
mod status;
mod storage;

pub use config::ConfigGet;
pub use leader::{IsLeader, LeaderGet, LeaderSet};
pub use log::{HookLog, LogLevel};
pub use ports::{ClosePort, OpenPort, OpenedPorts};
pub use relation::{RelationGet, RelationIds, RelationList, RelationSet};
pub use status::{StatusGet, StatusSet};
pub use storage::{StorageGet, StorageList};

use clap::Parser;

use crate::context::HookContext;
use crate::error::{Error, Result};
use crate::output::Output;

/// A hook tool.
pub trait ToolCommand: Parser {
    /// Runs the tool against `ctx`, writing results to `out`.
    ///
    /// # Errors
    ///
    /// Returns the error reported to the calling process.
    fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()>;
}

macro_rules! tools {
    ($($name:literal => $variant:ident,)*) => {
        /// Every hook tool, parsed and ready to run.
        #[derive(Debug)]
        pub enum Tool {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant($variant),
            )*
        }

        impl Tool {
            /// Names of every tool.
            pub const NAMES: &'static [&'static str] = &[$($name),*];

            /// Parses the arguments of the tool called `name`.
            ///
            /// # Errors
            ///
            /// Fails with [`Error::UnknownCommand`] for an unknown name and
            /// [`Error::Clap`] for help requests and bad arguments.
            pub fn parse(name: &str, args: &[String]) -> Result<Self> {
                let argv = std::iter::once(name).chain(args.iter().map(String::as_str));
                match name {
                    $(
                        $name => Ok(Self::$variant($variant::try_parse_from(argv)?)),
                    )*
                    other => Err(Error::UnknownCommand(other.to_string())),
                }
            }

            /// Runs the tool.
            ///
            /// # Errors
            ///
            /// Returns the error reported to the calling process.
            pub fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()> {
                match self {
                    $(
                        Self::$variant(tool) => tool.run(ctx, out),
                    )*
                }
            }
        }
    };
}

tools! {
    "config-get" => ConfigGet,
    "relation-get" => RelationGet,
    "relation-set" => RelationSet,
    "relation-list" => RelationList,
    "relation-ids" => RelationIds,
    "status-get" => StatusGet,
    "status-set" => StatusSet,
    "open-port" => OpenPort,
    "close-port" => ClosePort,
    "opened-ports" => OpenedPorts,
    "is-leader" => IsLeader,
    "leader-get" => LeaderGet,
    "leader-set" => LeaderSet,
    "storage-list" => StorageList,
    "storage-get" => StorageGet,
    "hook-log" => HookLog,
}

/// Splits `key=value` arguments, rejecting the lot if any is malformed.
fn parse_assignments(args: &[String]) -> Result<Vec<(&str, &str)>> {
    args.iter()
        .map(|arg| {
            arg.split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| Error::Usage(format!("expected \"key=value\", got {arg:?}")))
        })
        .collect()
}

/// A key argument where `-` means every key.
fn single_key(key: Option<&str>) -> Option<&str> {
    key.filter(|key| *key != "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignments() {
        let args = vec!["a=1".to_string(), "b=".to_string(), "c=x=y".to_string()];
        assert_eq!(
            parse_assignments(&args).unwrap(),
            [("a", "1"), ("b", ""), ("c", "x=y")]
        );

        let bad = vec!["a=1".to_string(), "oops".to_string()];
        assert!(matches!(parse_assignments(&bad), Err(Error::Usage(_))));
        assert!(matches!(
            parse_assignments(&["=1".to_string()]),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn test_every_tool_parses_help() {
        for name in Tool::NAMES {
            match Tool::parse(name, &["--help".to_string()]) {
                Err(Error::Clap(e)) => assert_eq!(e.exit_code(), 0, "{name}"),
                other => panic!("{name}: expected help, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_tool() {
        assert!(matches!(
            Tool::parse("juju-reboot", &[]),
            Err(Error::UnknownCommand(_))
        ));
    }
}
