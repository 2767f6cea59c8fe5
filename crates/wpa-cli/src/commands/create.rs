use super::{describe, json_pretty, load_suite, progress, spin_fail, spin_ok, EXIT_SUCCESS};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use wpa_core::{CreateOptions, Environment, LifecycleState, Orchestrator};
use wpa_schema::{EnvironmentId, Role};

pub struct CreateRequest<'a> {
    pub config: &'a Path,
    pub cache: bool,
    pub skip_cache: bool,
    pub env_id: Option<&'a str>,
    pub db_wait: Option<u64>,
    pub keep: bool,
    pub command: &'a [String],
}

pub fn run(
    orchestrator: &Arc<Orchestrator>,
    request: &CreateRequest<'_>,
    json: bool,
) -> Result<u8, String> {
    let config = load_suite(request.config)?;
    let environment_id = request
        .env_id
        .map(EnvironmentId::parse)
        .transpose()
        .map_err(|e| format!("configuration error: {e}"))?;
    let options = CreateOptions {
        cache_environment: request.cache,
        skip_cache: request.skip_cache,
        environment_id,
        db_wait_seconds: request.db_wait,
    };

    let pb = progress(json, "provisioning environment...");
    let env = match orchestrator.create(config, options) {
        Ok(env) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("environment {} ready", env.id()));
            }
            env
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "provisioning failed");
            }
            return Err(describe(&e));
        }
    };

    // Captured before cleanup clears them.
    let network = env.network();
    let containers = env.containers();
    if !json {
        print_summary(&env);
    }

    let mut code = EXIT_SUCCESS;
    if !request.command.is_empty() {
        code = run_command(&env, request.command)?;
    }

    // Cache-eligible environments outlive the run so the next --cache can reuse them.
    let kept = if request.keep || env.cache_eligible() {
        orchestrator.release(env.id());
        true
    } else {
        let pb = progress(json, "cleaning up...");
        orchestrator.shutdown();
        let gone = env.lifecycle() == LifecycleState::Destroyed;
        if let Some(ref pb) = pb {
            if gone {
                spin_ok(pb, &format!("environment {} destroyed", env.id()));
            } else {
                spin_ok(pb, &format!("environment {} kept for reuse", env.id()));
            }
        }
        !gone
    };

    if json {
        let report = env.report();
        let payload = serde_json::json!({
            "env_id": env.id(),
            "fingerprint": env.fingerprint(),
            "strategy": report.as_ref().map(|r| r.strategy),
            "steps": report.as_ref().map(|r| r.completed.clone()),
            "network": network,
            "containers": containers,
            "cacheable": env.cache_eligible(),
            "kept": kept,
            "command_exit_code": (!request.command.is_empty()).then_some(code),
        });
        println!("{}", json_pretty(&payload)?);
    } else if kept {
        println!("destroy it with: wpa destroy {}", env.id());
    }
    Ok(code)
}

fn print_summary(env: &Environment) {
    if let Some(report) = env.report() {
        println!(
            "{} ({}, {} steps)",
            env.id(),
            report.strategy,
            report.completed.len()
        );
    }
    if let Some(network) = env.network() {
        println!("  network  {network}");
    }
    for (role, handle) in env.containers() {
        println!("  {:<8} {}", role.suffix(), handle.name);
    }
}

/// Run the user's command on the host with the environment described in
/// `WPA_*` variables. Returns its exit status.
fn run_command(env: &Environment, command: &[String]) -> Result<u8, String> {
    let Some((program, args)) = command.split_first() else {
        return Ok(EXIT_SUCCESS);
    };
    let mut cmd = Command::new(program);
    cmd.args(args).env("WPA_ENV_ID", env.id().as_str());
    if let Some(config) = env.config() {
        cmd.env("WPA_SITE_HOST", &config.site_host);
    }
    if let Some(network) = env.network() {
        cmd.env("WPA_NETWORK", network);
    }
    for role in Role::ALL {
        let var = format!("WPA_{}_CONTAINER", role.suffix().to_uppercase());
        cmd.env(var, env.container_name(role));
    }

    let status = cmd
        .status()
        .map_err(|e| format!("failed to run '{program}': {e}"))?;
    match status.code() {
        Some(code) => Ok(u8::try_from(code).unwrap_or(1)),
        // Killed by a signal.
        None => Ok(1),
    }
}
