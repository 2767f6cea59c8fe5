pub mod create;
pub mod destroy;
pub mod destroy_all;
pub mod doctor;
pub mod fingerprint;
pub mod list;

use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use wpa_core::CoreError;
use wpa_schema::{parse_config_file, NormalizedConfig};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_ENGINE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

/// Optional spinner: none in JSON mode.
pub fn progress(json: bool, msg: &str) -> Option<ProgressBar> {
    if json {
        None
    } else {
        Some(spinner(msg))
    }
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "running" => Style::new().green().apply_to(state).to_string(),
        "partial" | "restarting" | "paused" => Style::new().yellow().apply_to(state).to_string(),
        "created" => Style::new().cyan().apply_to(state).to_string(),
        "exited" | "dead" => Style::new().dim().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

/// Render a core error for the user. Engine failures inside a pipeline step
/// lead with the engine error so they map to the engine exit code.
pub fn describe(err: &CoreError) -> String {
    match (err.failed_step(), err.root_cause()) {
        (Some(step), root @ CoreError::Engine(_)) => format!("{root} (during {step})"),
        _ => err.to_string(),
    }
}

pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("configuration error:") || msg.starts_with("settings error:") {
        EXIT_CONFIG_ERROR
    } else if msg.starts_with("engine error:") {
        EXIT_ENGINE_ERROR
    } else {
        EXIT_FAILURE
    }
}

/// Parse and normalize a suite file. Relative paths inside it resolve
/// against the file's directory.
pub fn load_suite(path: &Path) -> Result<NormalizedConfig, String> {
    let config = parse_config_file(path).map_err(|e| CoreError::from(e).to_string())?;
    let base_dir = path
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| Path::new(".").to_path_buf());
    config
        .normalize(&base_dir)
        .map_err(|e| CoreError::from(e).to_string())
}
