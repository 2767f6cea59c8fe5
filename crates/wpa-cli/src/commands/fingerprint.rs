use super::{json_pretty, load_suite, EXIT_SUCCESS};
use std::path::Path;
use wpa_schema::compute_fingerprint;

pub fn run(config: &Path, json: bool) -> Result<u8, String> {
    let normalized = load_suite(config)?;
    let fingerprint =
        compute_fingerprint(&normalized).map_err(|e| format!("serialization error: {e}"))?;

    if json {
        let payload = serde_json::json!({
            "config": config,
            "fingerprint": fingerprint,
            "short": fingerprint.short(),
            "normalized": normalized,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{fingerprint}");
    }
    Ok(EXIT_SUCCESS)
}
