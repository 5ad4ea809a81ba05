use std::collections::BTreeMap;

use crate::config::Pipeline;
use crate::error::{Error, ErrorKind, Result};
use crate::targets::{Operation, TargetKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroup {
    /// Name as written in the recipe.
    pub name: String,
    pub kind: TargetKind,
    pub ops: Vec<Operation>,
}

impl TargetGroup {
    pub fn step_id(&self, op: Operation) -> String {
        format!("{}.{}", self.name, op)
    }
}

/// Fully resolved pipeline. Building one validates every target and
/// operation name, so nothing runs unless the whole recipe is understood.
#[derive(Debug, Default)]
pub struct Plan {
    groups: Vec<TargetGroup>,
}

impl Plan {
    pub fn from_pipeline(pipeline: &Pipeline) -> Result<Self> {
        let mut plan = Plan::default();
        for entry in pipeline.entries() {
            let kind = TargetKind::from_name(&entry.target)?;
            let ops = parse_ops(&entry.ops)
                .map_err(|e| e.context(format!("target '{}'", entry.target)))?;
            plan.add(TargetGroup {
                name: entry.target.trim().to_string(),
                kind,
                ops,
            })?;
        }
        Ok(plan)
    }

    pub fn add(&mut self, group: TargetGroup) -> Result<()> {
        if let Some(existing) = self.groups.iter().find(|g| g.kind == group.kind) {
            return Err(Error::new(
                ErrorKind::Recipe,
                format!(
                    "targets '{}' and '{}' both configure {}",
                    existing.name, group.name, group.kind
                ),
            ));
        }
        self.groups.push(group);
        Ok(())
    }

    pub fn groups(&self) -> &[TargetGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn runs(&self, op: Operation) -> bool {
        self.groups.iter().any(|g| g.ops.contains(&op))
    }

    pub fn step_count(&self) -> usize {
        self.groups.iter().map(|g| g.ops.len()).sum()
    }

    /// Step ids in execution order.
    pub fn ordered(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|g| g.ops.iter().map(move |op| g.step_id(*op)))
            .collect()
    }

    pub fn ops_per_kind(&self) -> BTreeMap<&'static str, usize> {
        let mut out = BTreeMap::new();
        for g in &self.groups {
            *out.entry(g.kind.canonical_name()).or_default() += g.ops.len();
        }
        out
    }
}

/// Splits `"init, proxy"` into operations. Whitespace is ignored; empty
/// segments are rejected like any other unknown name.
pub fn parse_ops(raw: &str) -> Result<Vec<Operation>> {
    raw.split(',')
        .map(|seg| {
            let name: String = seg.chars().filter(|c| !c.is_whitespace()).collect();
            Operation::from_name(&name)
        })
        .collect()
}
