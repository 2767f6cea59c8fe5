use super::{json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use wpa_core::OrchestratorSettings;
use wpa_engine::{check_engine_prereqs, select_engine};

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn pass(name: &'static str, message: String) -> Self {
        Self {
            name,
            status: "pass",
            message,
        }
    }

    fn fail(name: &'static str, message: String) -> Self {
        Self {
            name,
            status: "fail",
            message,
        }
    }

    fn info(name: &'static str, message: String) -> Self {
        Self {
            name,
            status: "info",
            message,
        }
    }
}

pub fn run(settings: &OrchestratorSettings, json: bool) -> Result<u8, String> {
    let mut checks = vec![Check::info(
        "settings",
        format!(
            "engine '{}', database wait {}s, poll every {}ms",
            settings.engine, settings.default_db_wait_seconds, settings.poll_interval_ms
        ),
    )];

    match select_engine(&settings.engine) {
        Ok(engine) => {
            let missing = check_engine_prereqs(engine.name());
            if missing.is_empty() {
                checks.push(Check::pass(
                    "engine",
                    format!("container engine '{}' is usable", engine.name()),
                ));
            } else {
                for m in missing {
                    checks.push(Check::fail("engine", m.to_string().trim().to_owned()));
                }
            }
        }
        Err(e) => checks.push(Check::fail("engine", e.to_string())),
    }

    let healthy = checks.iter().all(|c| c.status != "fail");
    if json {
        let payload = serde_json::json!({
            "healthy": healthy,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("wpa doctor\n");
        for check in &checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if healthy {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if healthy { EXIT_SUCCESS } else { EXIT_FAILURE })
}
