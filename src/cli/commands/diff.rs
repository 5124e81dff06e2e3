//! Diff command - compare two topologies
//!
//! Lists added, deleted and changed services and prints the service
//! config diff of every changed one.

use super::CommandContext;
use crate::error::{read_to_string, Result};
use crate::topology::diff::diff_deploy_configs;
use crate::topology::{parse_topology, DeployConfig, DiffSummary, DiffType};
use clap::Parser;
use colored::{Color, Colorize};
use std::path::PathBuf;

/// Arguments for the diff command
#[derive(Parser, Debug, Clone)]
pub struct DiffArgs {
    /// Topology before the change
    pub old: PathBuf,

    /// Topology after the change
    pub new: PathBuf,
}

fn parse_or_empty(text: &str) -> Result<Vec<DeployConfig>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(parse_topology(text)?)
}

impl DiffArgs {
    /// Execute the diff command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let old_text = read_to_string(&self.old)?;
        let new_text = read_to_string(&self.new)?;
        let old = parse_or_empty(&old_text)?;
        let new = parse_or_empty(&new_text)?;
        let diffs = diff_deploy_configs(&old, &new);
        let summary = DiffSummary::between(&old, &new);

        if !summary.has_changes() {
            ctx.output.success("No changes");
            return Ok(0);
        }

        let use_color = ctx.output.use_color();
        let rows: Vec<Vec<String>> = diffs
            .iter()
            .map(|diff| {
                let (mark, color) = match diff.diff_type {
                    DiffType::Add => ("+", Color::Green),
                    DiffType::Delete => ("-", Color::Red),
                    DiffType::Change => ("~", Color::Yellow),
                };
                let mark = if use_color {
                    mark.color(color).to_string()
                } else {
                    mark.to_string()
                };
                vec![
                    mark,
                    diff.diff_type.to_string(),
                    diff.deploy_config.id().to_string(),
                    diff.deploy_config.host().to_string(),
                ]
            })
            .collect();
        ctx.output.table(&["", "TYPE", "ID", "HOST"], &rows);

        for (id, text) in &summary.changes {
            ctx.output.section(id);
            ctx.output.unified_diff(text);
        }

        println!(
            "\n{} added, {} deleted, {} changed, {} unchanged",
            summary.added, summary.deleted, summary.changed, summary.unchanged
        );
        Ok(0)
    }
}
