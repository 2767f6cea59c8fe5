use super::{describe, json_pretty, progress, spin_fail, spin_ok, EXIT_SUCCESS};
use wpa_core::Orchestrator;
use wpa_schema::EnvironmentId;

pub fn run(orchestrator: &Orchestrator, env_id: &str, json: bool) -> Result<u8, String> {
    let id = EnvironmentId::parse(env_id).map_err(|e| format!("configuration error: {e}"))?;

    let pb = progress(json, &format!("destroying environment {id}..."));
    if let Err(e) = orchestrator.destroy(&id) {
        if let Some(ref pb) = pb {
            spin_fail(pb, &format!("failed to destroy {id}"));
        }
        return Err(describe(&e));
    }
    if let Some(ref pb) = pb {
        spin_ok(pb, &format!("destroyed environment {id}"));
    }

    if json {
        let payload = serde_json::json!({
            "env_id": id,
            "status": "destroyed",
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
