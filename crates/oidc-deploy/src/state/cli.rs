//! Tabular views of the state database

use super::db::DbPool;
use super::queries::{get_live_resources, list_runs};
use anyhow::Result;
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

/// Print the most recent runs of a stack
pub async fn print_history(pool: &DbPool, stack: &str, limit: u32) -> Result<()> {
    let runs = list_runs(pool, stack, limit).await?;

    if runs.is_empty() {
        println!("No recorded runs for stack '{stack}'");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Run"),
            Cell::new("Command"),
            Cell::new("Status"),
            Cell::new("Started"),
            Cell::new("Account"),
            Cell::new("Region"),
            Cell::new("Summary"),
        ]);

    for run in runs {
        table.add_row(vec![
            Cell::new(&run.run_id),
            Cell::new(&run.command),
            Cell::new(run.status.as_str()),
            Cell::new(run.started_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(&run.account_id),
            Cell::new(&run.region),
            Cell::new(run.summary.as_deref().unwrap_or("-")),
        ]);
    }

    println!("{table}");

    Ok(())
}

/// Print every live resource the engine tracks for a stack
pub async fn print_resources(pool: &DbPool, stack: &str) -> Result<()> {
    let resources = get_live_resources(pool, stack).await?;

    if resources.is_empty() {
        println!("No tracked resources for stack '{stack}'");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Resource"),
            Cell::new("Provider ID"),
            Cell::new("Applied"),
        ]);

    for resource in resources {
        table.add_row(vec![
            Cell::new(resource.id().to_string()),
            Cell::new(&resource.provider_id),
            Cell::new(resource.applied_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    println!("{table}");

    Ok(())
}
