use clap::Parser;
use uniter_model::{RelationId, UnitName};

use super::{ToolCommand, parse_assignments, single_key};
use crate::context::{HookContext, check_key};
use crate::error::{Error, Result};
use crate::output::{Output, OutputArgs};

/// Print settings a unit published in a relation.
#[derive(Debug, Parser)]
#[command(name = "relation-get")]
pub struct RelationGet {
    /// Relation id, defaulting to the hook's relation
    #[arg(short = 'r', long = "relation", value_name = "ID")]
    relation: Option<RelationId>,

    #[command(flatten)]
    output: OutputArgs,

    /// Setting to print, or `-` for all
    #[arg(value_name = "KEY")]
    key: Option<String>,

    /// Unit whose settings to print, defaulting to the remote unit
    #[arg(value_name = "UNIT")]
    unit: Option<UnitName>,
}

impl ToolCommand for RelationGet {
    fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()> {
        let unit = self
            .unit
            .as_ref()
            .or_else(|| ctx.remote_unit())
            .ok_or_else(|| Error::Usage("no unit id specified".to_string()))?;
        let settings = ctx.relation_settings(self.relation, unit)?;

        match single_key(self.key.as_deref()) {
            Some(key) => self.output.print(out, &settings.get(key)),
            None => self.output.print(out, &settings),
        }
    }
}

/// Write this unit's settings in a relation. An empty value deletes the key.
#[derive(Debug, Parser)]
#[command(name = "relation-set")]
pub struct RelationSet {
    /// Relation id, defaulting to the hook's relation
    #[arg(short = 'r', long = "relation", value_name = "ID")]
    relation: Option<RelationId>,

    /// Settings to write
    #[arg(value_name = "KEY=VALUE", required = true)]
    settings: Vec<String>,
}

impl ToolCommand for RelationSet {
    fn run(self, ctx: &mut HookContext, _out: &mut Output) -> Result<()> {
        let relation_id = ctx.relation(self.relation)?.id();
        let assignments = parse_assignments(&self.settings)?;
        for (key, _) in &assignments {
            check_key(key)?;
        }
        for (key, value) in assignments {
            ctx.set_relation_setting(Some(relation_id), key, value)?;
        }
        Ok(())
    }
}

/// List the remote units in a relation.
#[derive(Debug, Parser)]
#[command(name = "relation-list")]
pub struct RelationList {
    /// Relation id, defaulting to the hook's relation
    #[arg(short = 'r', long = "relation", value_name = "ID")]
    relation: Option<RelationId>,

    #[command(flatten)]
    output: OutputArgs,
}

impl ToolCommand for RelationList {
    fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()> {
        let members: Vec<&str> = ctx
            .relation(self.relation)?
            .members()
            .iter()
            .map(UnitName::as_str)
            .collect();
        self.output.print(out, &members)
    }
}

/// List the relation ids of an endpoint.
#[derive(Debug, Parser)]
#[command(name = "relation-ids")]
pub struct RelationIds {
    #[command(flatten)]
    output: OutputArgs,

    /// Endpoint name, defaulting to the hook's relation endpoint
    #[arg(value_name = "ENDPOINT")]
    endpoint: Option<String>,
}

impl ToolCommand for RelationIds {
    fn run(self, ctx: &mut HookContext, out: &mut Output) -> Result<()> {
        let endpoint = match self.endpoint {
            Some(endpoint) => endpoint,
            None => ctx
                .hook()
                .endpoint
                .clone()
                .ok_or_else(|| Error::Usage("no endpoint specified".to_string()))?,
        };

        let ids: Vec<String> = ctx
            .relation_ids(&endpoint)
            .iter()
            .map(|id| format!("{endpoint}:{id}"))
            .collect();
        self.output.print(out, &ids)
    }
}
