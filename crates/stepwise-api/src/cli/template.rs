//! Template CLI subcommands.
//!
//! Import from YAML, list (owner plus shared, best performers first), show,
//! export back to YAML, and delete.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use stepwise_types::workflow::{SHARED_OWNER, WorkflowTemplate};

use crate::state::AppState;

/// Template subcommands.
#[derive(Subcommand)]
pub enum TemplateCommand {
    /// Import a template from a YAML file.
    Import {
        /// Path to the YAML file.
        file: PathBuf,

        /// Owner namespace to import into (`__shared__` for everyone).
        #[arg(long, env = "STEPWISE_OWNER", default_value = "default")]
        owner: String,
    },

    /// List templates visible to an owner.
    #[command(alias = "ls")]
    List {
        #[arg(long, env = "STEPWISE_OWNER", default_value = "default")]
        owner: String,
    },

    /// Show a template's steps and statistics.
    Show {
        /// Template id.
        id: String,

        #[arg(long, env = "STEPWISE_OWNER", default_value = "default")]
        owner: String,
    },

    /// Print a template as YAML.
    Export {
        /// Template id.
        id: String,

        #[arg(long, env = "STEPWISE_OWNER", default_value = "default")]
        owner: String,
    },

    /// Delete a template from the owner namespace.
    #[command(alias = "rm")]
    Delete {
        /// Template id.
        id: String,

        #[arg(long, env = "STEPWISE_OWNER", default_value = "default")]
        owner: String,
    },
}

/// Handle a template subcommand.
pub async fn handle_template_command(cmd: TemplateCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        TemplateCommand::Import { file, owner } => import_template(state, &file, &owner, json).await,
        TemplateCommand::List { owner } => list_templates(state, &owner, json).await,
        TemplateCommand::Show { id, owner } => show_template(state, &id, &owner, json).await,
        TemplateCommand::Export { id, owner } => export_template(state, &id, &owner).await,
        TemplateCommand::Delete { id, owner } => delete_template(state, &id, &owner, json).await,
    }
}

async fn import_template(state: &AppState, file: &Path, owner: &str, json: bool) -> Result<()> {
    let yaml = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let template = state
        .templates()
        .import_yaml(&yaml, owner)
        .await
        .with_context(|| format!("Failed to import {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&template)?);
    } else {
        println!();
        println!(
            "  {} Imported '{}' ({} steps) as {}",
            style("ok").green(),
            style(&template.name).cyan(),
            template.steps.len(),
            style(&template.id).dim(),
        );
        println!();
    }
    Ok(())
}

async fn list_templates(state: &AppState, owner: &str, json: bool) -> Result<()> {
    let templates = state.templates().list(owner).await?;

    if json {
        let result = serde_json::json!({
            "owner": owner,
            "templates": templates,
            "count": templates.len(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if templates.is_empty() {
        println!();
        println!(
            "  {} No templates for '{}'.",
            style("i").blue().bold(),
            style(owner).cyan(),
        );
        println!("     Import one with: stepwise template import <file.yaml> --owner {owner}");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("Id").fg(Color::White),
        Cell::new("Steps").fg(Color::White),
        Cell::new("Runs").fg(Color::White),
        Cell::new("Success").fg(Color::White),
        Cell::new("Avg").fg(Color::White),
        Cell::new("Scope").fg(Color::White),
    ]);

    for t in &templates {
        let scope = if t.owner == SHARED_OWNER { "shared" } else { "own" };
        table.add_row(vec![
            Cell::new(&t.name).fg(Color::Cyan),
            Cell::new(&t.id).fg(Color::DarkGrey),
            Cell::new(t.steps.len()),
            Cell::new(t.stats.total_executions),
            Cell::new(format!("{:.0}%", t.stats.success_rate * 100.0)).fg(success_color(t)),
            Cell::new(format!("{:.1}s", t.stats.average_duration_secs)),
            Cell::new(scope),
        ]);
    }

    println!();
    println!("  Templates for '{}' ({})", style(owner).cyan(), templates.len());
    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn success_color(template: &WorkflowTemplate) -> Color {
    match template.stats.total_executions {
        0 => Color::DarkGrey,
        _ if template.stats.success_rate >= 0.8 => Color::Green,
        _ if template.stats.success_rate >= 0.5 => Color::Yellow,
        _ => Color::Red,
    }
}

async fn show_template(state: &AppState, id: &str, owner: &str, json: bool) -> Result<()> {
    let template = state
        .templates()
        .load(id, owner)
        .await
        .with_context(|| format!("Template '{id}' not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&template)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style(&template.name).cyan().bold(),
        style(format!("v{}", template.version)).dim(),
    );
    if let Some(description) = &template.description {
        println!("  {description}");
    }
    println!(
        "  {} runs, {:.0}% success, {:.1}s average",
        template.stats.total_executions,
        template.stats.success_rate * 100.0,
        template.stats.average_duration_secs,
    );
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("Step").fg(Color::White),
        Cell::new("Capability").fg(Color::White),
        Cell::new("Depends on").fg(Color::White),
        Cell::new("Input").fg(Color::White),
    ]);
    for (i, step) in template.steps.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&step.id).fg(Color::Cyan),
            Cell::new(format!("{}/{}", step.tool, step.capability)),
            Cell::new(step.depends_on.join(", ")),
            Cell::new(preview_json(&step.input, 60)).fg(Color::DarkGrey),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}

async fn export_template(state: &AppState, id: &str, owner: &str) -> Result<()> {
    let template = state
        .templates()
        .load(id, owner)
        .await
        .with_context(|| format!("Template '{id}' not found"))?;
    print!("{}", state.templates().export_yaml(&template)?);
    Ok(())
}

async fn delete_template(state: &AppState, id: &str, owner: &str, json: bool) -> Result<()> {
    let removed = state.templates().delete(id, owner).await?;

    if json {
        let result = serde_json::json!({
            "deleted": removed,
            "id": id,
            "owner": owner,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    if removed {
        println!("  {} Deleted template {}", style("ok").green(), style(id).cyan());
    } else {
        println!(
            "  {} No template {} in '{}'",
            style("i").blue().bold(),
            style(id).cyan(),
            owner,
        );
    }
    println!();
    Ok(())
}

/// Compact single-line JSON, cut to `max` characters.
pub(crate) fn preview_json(value: &serde_json::Value, max: usize) -> String {
    let text = value.to_string();
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text
    }
}
