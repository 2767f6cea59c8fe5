use super::{describe, json_pretty, progress, spin_fail, spin_ok, EXIT_SUCCESS};
use wpa_core::Orchestrator;

pub fn run(orchestrator: &Orchestrator, json: bool) -> Result<u8, String> {
    let pb = progress(json, "destroying all environments...");
    let destroyed = match orchestrator.destroy_all() {
        Ok(ids) => ids,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "destroy-all failed");
            }
            return Err(describe(&e));
        }
    };
    if let Some(ref pb) = pb {
        spin_ok(pb, &format!("destroyed {} environment(s)", destroyed.len()));
    }

    if json {
        let payload = serde_json::json!({ "destroyed": destroyed });
        println!("{}", json_pretty(&payload)?);
    } else {
        for id in &destroyed {
            println!("  {id}");
        }
    }
    Ok(EXIT_SUCCESS)
}
