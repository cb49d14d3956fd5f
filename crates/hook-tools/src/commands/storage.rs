use clap::Parser;
use serde::Serialize;
use uniter_model::StorageId;

use super::ToolCommand;
use crate::context::HookContext;
use crate::error::{Error, Result};
use crate::output::{Output, OutputArgs};

/// List storage instances attached to the unit.
#[derive(Debug, Parser)]
#[command(name = "storage-list")]
pub struct StorageList {
    #[command(flatten)]
    output: OutputArgs,

    /// Only list instances of this storage
    #[arg(value_name = "NAME")]
    name: Option<String>,
}

impl ToolCommand for StorageList {
    fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()> {
        let ids: Vec<&str> = ctx
            .storage_ids(self.name.as_deref())
            .map(StorageId::as_str)
            .collect();
        self.output.print(out, &ids)
    }
}

/// Print attributes of a storage instance.
#[derive(Debug, Parser)]
#[command(name = "storage-get")]
pub struct StorageGet {
    /// Storage instance, defaulting to the hook's own
    #[arg(short = 's', value_name = "ID")]
    storage: Option<StorageId>,

    #[command(flatten)]
    output: OutputArgs,

    /// `kind` or `location`; all attributes when omitted
    #[arg(value_name = "KEY")]
    key: Option<String>,
}

#[derive(Serialize)]
struct Attributes<'a> {
    kind: String,
    location: &'a std::path::Path,
}

impl ToolCommand for StorageGet {
    fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()> {
        let (_, storage) = ctx.storage(self.storage.as_ref())?;
        match self.key.as_deref() {
            None => self.output.print(
                out,
                &Attributes {
                    kind: storage.kind.to_string(),
                    location: &storage.location,
                },
            ),
            Some("kind") => self.output.print(out, &storage.kind.to_string()),
            Some("location") => self.output.print(out, &storage.location),
            Some(other) => Err(Error::Usage(format!("invalid storage attribute {other:?}"))),
        }
    }
}
