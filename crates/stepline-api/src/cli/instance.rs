//! CLI commands for inspecting workflow instances.

use anyhow::{Context, Result, anyhow};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use stepline_core::repository::instance::InstanceFilter;
use stepline_core::workflow::status::StatusError;
use stepline_types::workflow::{InstanceStatus, InstanceView};

use crate::state::AppState;

/// Show one instance.
pub async fn show_status(state: &AppState, instance_id: &str, json: bool) -> Result<()> {
    let view = match state.status_service.status(instance_id).await {
        Ok(view) => view,
        Err(StatusError::NotFound(_)) => {
            return Err(anyhow!("Workflow instance '{instance_id}' not found"));
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Instance").bold(),
        style(&view.instance_id).cyan()
    );
    println!();
    println!("  Workflow:  {}", view.definition_type);
    println!("  Status:    {}", styled_status(view.status));
    if let Some(checkpoint) = &view.checkpoint {
        println!(
            "  Last step: {} (#{}, {})",
            checkpoint.step_name,
            checkpoint.step_index,
            checkpoint.completed_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(wake_at) = view.wake_at {
        println!("  Wakes at:  {}", wake_at.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("  Created:   {}", view.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed_at) = view.completed_at {
        println!("  Finished:  {}", completed_at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = &view.error {
        println!("  Error:     {}", style(error).red());
    }
    if let Some(result) = &view.result {
        println!();
        println!("  {}", style("── Result ──").dim());
        for line in serde_json::to_string_pretty(result)?.lines() {
            println!("  {line}");
        }
    }
    println!();
    Ok(())
}

/// List recent instances, newest first.
pub async fn list_instances(
    state: &AppState,
    status: Option<&str>,
    workflow: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let status = status
        .map(|s| s.parse::<InstanceStatus>().map_err(|e| anyhow!(e)))
        .transpose()?;
    let filter = InstanceFilter {
        status,
        definition_type: workflow.map(str::to_string),
        limit,
    };

    let instances = state
        .status_service
        .list(&filter)
        .await
        .context("Failed to list workflow instances")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!();
        println!("  No workflow instances found.");
        println!();
        return Ok(());
    }

    println!();
    println!("{}", instance_table(&instances));
    println!();
    println!(
        "  {} instance{}",
        instances.len(),
        if instances.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

fn instance_table(instances: &[InstanceView]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Instance ID").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Status"),
            Cell::new("Last Step"),
            Cell::new("Created"),
        ]);

    for view in instances {
        let last_step = view
            .checkpoint
            .as_ref()
            .map(|c| c.step_name.clone())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(&view.instance_id),
            Cell::new(&view.definition_type),
            status_cell(view.status),
            Cell::new(last_step),
            Cell::new(view.created_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }
    table
}

fn status_cell(status: InstanceStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        InstanceStatus::Completed => cell.fg(Color::Green),
        InstanceStatus::Failed => cell.fg(Color::Red),
        InstanceStatus::Sleeping => cell.fg(Color::Blue),
        InstanceStatus::Running => cell.fg(Color::Yellow),
        InstanceStatus::Queued => cell,
    }
}

fn styled_status(status: InstanceStatus) -> console::StyledObject<&'static str> {
    let text = style(status.as_str());
    match status {
        InstanceStatus::Completed => text.green(),
        InstanceStatus::Failed => text.red(),
        InstanceStatus::Sleeping => text.blue(),
        InstanceStatus::Running => text.yellow(),
        InstanceStatus::Queued => text.dim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn view(id: &str, status: InstanceStatus) -> InstanceView {
        let now = Utc::now();
        InstanceView {
            instance_id: id.to_string(),
            definition_type: "ExampleWorkflow".to_string(),
            status,
            result: None,
            error: None,
            checkpoint: None,
            wake_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn table_lists_every_instance() {
        let rendered = instance_table(&[
            view("wf-a", InstanceStatus::Sleeping),
            view("wf-b", InstanceStatus::Failed),
        ])
        .to_string();
        assert!(rendered.contains("wf-a"));
        assert!(rendered.contains("sleeping"));
        assert!(rendered.contains("wf-b"));
        assert!(rendered.contains("failed"));
    }
}
