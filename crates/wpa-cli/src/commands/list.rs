use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use serde::Serialize;
use std::collections::BTreeMap;
use wpa_core::Orchestrator;
use wpa_engine::{ContainerState, ContainerSummary};
use wpa_schema::{parse_container_name, EnvironmentId};

#[derive(Debug, Serialize)]
struct EnvironmentRow {
    env_id: EnvironmentId,
    state: &'static str,
    /// Container suffix (role) -> container.
    containers: BTreeMap<String, ContainerSummary>,
}

/// Overall state of an environment from its containers' states.
fn summarize(containers: &BTreeMap<String, ContainerSummary>) -> &'static str {
    let running = containers
        .values()
        .filter(|c| c.state == ContainerState::Running)
        .count();
    if running == 0 {
        "stopped"
    } else if running == containers.len() {
        "running"
    } else {
        "partial"
    }
}

fn group(summaries: Vec<ContainerSummary>) -> Vec<EnvironmentRow> {
    let mut by_env: BTreeMap<EnvironmentId, BTreeMap<String, ContainerSummary>> = BTreeMap::new();
    for summary in summaries {
        if let Some(parsed) = parse_container_name(&summary.name) {
            by_env
                .entry(parsed.env_id)
                .or_default()
                .insert(parsed.suffix, summary);
        }
    }
    by_env
        .into_iter()
        .map(|(env_id, containers)| EnvironmentRow {
            state: summarize(&containers),
            env_id,
            containers,
        })
        .collect()
}

pub fn run(orchestrator: &Orchestrator, json: bool) -> Result<u8, String> {
    let summaries = orchestrator
        .engine()
        .list_containers()
        .map_err(|e| format!("engine error: {e}"))?;
    let rows = group(summaries);

    if json {
        println!("{}", json_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("no environments found");
    } else {
        println!("{:<24} {:<10} CONTAINERS", "ENV_ID", "STATE");
        for row in &rows {
            let roles: Vec<&str> = row.containers.keys().map(String::as_str).collect();
            // Pad before colouring so escape codes do not break alignment.
            let state = colorize_state(&format!("{:<10}", row.state));
            println!("{:<24} {state} {}", row.env_id.to_string(), roles.join(","));
        }
    }
    Ok(EXIT_SUCCESS)
}
