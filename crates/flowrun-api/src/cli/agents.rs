//! `flowrun agents` -- list registered agents, optionally probing health.

use std::collections::HashMap;

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

pub async fn list_agents(state: &AppState, check: bool, json: bool) -> Result<()> {
    let registry = state.engine.registry();
    let health: HashMap<String, bool> = if check {
        registry.sweep_health().await.into_iter().collect()
    } else {
        HashMap::new()
    };
    let agents = registry.list();

    if json {
        let out: Vec<_> = agents
            .iter()
            .map(|a| {
                serde_json::json!({
                    "name": a.name,
                    "description": a.metadata.description,
                    "capabilities": a.metadata.capabilities,
                    "required_config": a.metadata.required_config,
                    "consecutive_failures": a.consecutive_failures,
                    "healthy": health.get(&a.name),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if agents.is_empty() {
        println!();
        println!("  No agents configured.");
        println!(
            "  Add one under {} in {}",
            style("[[agents]]").dim(),
            style(state.data_dir.join("config.toml").display()).dim()
        );
        println!();
        return Ok(());
    }

    let mut header = vec![
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("Description"),
        Cell::new("Capabilities"),
        Cell::new("Required config"),
    ];
    if check {
        header.push(Cell::new("Health"));
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);

    for agent in &agents {
        let mut row = vec![
            Cell::new(&agent.name),
            Cell::new(agent.metadata.description.as_deref().unwrap_or("-")),
            Cell::new(agent.metadata.capabilities.join(", ")),
            Cell::new(agent.metadata.required_config.join(", ")),
        ];
        if check {
            row.push(match health.get(&agent.name) {
                Some(true) => Cell::new("healthy").fg(Color::Green),
                Some(false) => Cell::new(format!(
                    "unhealthy ({} in a row)",
                    agent.consecutive_failures
                ))
                .fg(Color::Red),
                None => Cell::new("-"),
            });
        }
        table.add_row(row);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
