//! `stepwise preview`: dry-run a template against the echo registry.
//!
//! Every step "succeeds" by echoing its input, so the output shows how each
//! step's input binds (substitution, placeholders, conditions) without
//! calling real tools. Template statistics are left untouched.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use stepwise_types::workflow::{ExecutionStatus, StepStatus};

use crate::cli::template::preview_json;
use crate::state::AppState;

/// Parse `--input`; only JSON objects are accepted.
pub fn parse_input(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--input is not valid JSON")?;
    if !value.is_object() {
        bail!("--input must be a JSON object, got {value}");
    }
    Ok(value)
}

pub async fn preview(state: &AppState, id: &str, input: &str, owner: &str, json: bool) -> Result<()> {
    let input = parse_input(input)?;
    let template = state
        .templates()
        .load(id, owner)
        .await
        .with_context(|| format!("Template '{id}' not found"))?;

    let run = state.engine.dry_run(&template, owner, input).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    println!();
    println!(
        "  Preview of '{}' for '{}'",
        style(&template.name).cyan().bold(),
        style(owner).cyan(),
    );
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Step").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Bound input").fg(Color::White),
    ]);
    for (step, record) in template.steps.iter().zip(&run.steps) {
        let (label, color) = match record.status {
            StepStatus::Completed => ("bound", Color::Green),
            StepStatus::Skipped => ("skipped", Color::DarkGrey),
            StepStatus::Failed => ("failed", Color::Red),
            StepStatus::Pending | StepStatus::Running => ("not reached", Color::DarkGrey),
        };
        let bound = record
            .resolved_input
            .as_ref()
            .map(|v| preview_json(v, 80))
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&step.id).fg(Color::Cyan),
            Cell::new(label).fg(color),
            Cell::new(bound),
        ]);
    }
    println!("{table}");

    if run.status != ExecutionStatus::Completed {
        if let Some(error) = &run.error {
            println!();
            println!(
                "  {} {} at step '{}': {}",
                style("!").red().bold(),
                error.kind,
                error.step_id.as_deref().unwrap_or("-"),
                error.message,
            );
        }
    }
    println!();
    Ok(())
}
