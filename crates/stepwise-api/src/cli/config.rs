//! `stepwise config`: print the effective engine configuration.

use anyhow::Result;
use console::style;
use stepwise_infra::config::CONFIG_FILE;

use crate::state::AppState;

pub fn show_config(state: &AppState, json: bool) -> Result<()> {
    let config = state.engine.config();

    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    let row = |name: &str, value: String| {
        println!("  {:<24} {}", style(name).dim(), value);
    };

    println!();
    println!(
        "  Engine configuration ({})",
        style(state.data_dir.join(CONFIG_FILE).display()).cyan()
    );
    println!();
    row("max_attempts", config.max_attempts.to_string());
    row("confidence_threshold", config.confidence_threshold.to_string());
    row("step_timeout_secs", config.step_timeout_secs.to_string());
    row("oracle_timeout_secs", config.oracle_timeout_secs.to_string());
    row("history_capacity", config.history_capacity.to_string());
    row("summary_byte_budget", config.summary_byte_budget.to_string());
    row("summary_priority_fields", config.summary_priority_fields.join(", "));
    row("strict_disambiguation", config.strict_disambiguation.to_string());
    row("auto_promote", config.auto_promote.to_string());
    println!();
    Ok(())
}
