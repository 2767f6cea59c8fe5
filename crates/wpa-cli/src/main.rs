mod commands;

use clap::{Parser, Subcommand};
use commands::exit_code_for;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use wpa_core::{Orchestrator, OrchestratorSettings};

#[derive(Debug, Parser)]
#[command(
    name = "wpa",
    version,
    about = "Disposable container environments for browser-driven acceptance tests"
)]
struct Cli {
    /// Container engine: docker, podman or mock. Overrides the settings file.
    #[arg(long, global = true)]
    engine: Option<String>,

    /// Settings file (default: $WPA_SETTINGS or ~/.config/wpa/settings.toml).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision an environment from a suite configuration.
    Create {
        /// Path to the suite configuration file.
        #[arg(default_value = "wpa.toml")]
        config: PathBuf,
        /// Reuse a matching running environment, and keep this one running
        /// for later runs.
        #[arg(long, default_value_t = false)]
        cache: bool,
        /// Build from scratch even when a cached environment matches.
        #[arg(long, default_value_t = false)]
        skip_cache: bool,
        /// Environment id to use instead of a generated one.
        #[arg(long)]
        env_id: Option<String>,
        /// Seconds to wait for the database (overrides the suite setting).
        #[arg(long)]
        db_wait: Option<u64>,
        /// Leave the environment running after wpa exits.
        #[arg(long, default_value_t = false)]
        keep: bool,
        /// Command to run once the environment is ready (after --).
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Destroy an environment by id, whichever process created it.
    Destroy {
        /// Environment id.
        env_id: String,
    },
    /// Destroy every environment found on the container engine.
    DestroyAll,
    /// List environments found on the container engine.
    List,
    /// Print the cache fingerprint of a suite configuration.
    Fingerprint {
        /// Path to the suite configuration file.
        #[arg(default_value = "wpa.toml")]
        config: PathBuf,
    },
    /// Check that the configured container engine is usable.
    Doctor,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("WPA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn run(cli: Cli) -> Result<u8, String> {
    let json = cli.json;
    let mut settings = load_settings(cli.settings.as_deref())?;
    if let Some(engine) = cli.engine {
        settings.engine = engine;
    }

    match cli.command {
        Commands::Create {
            config,
            cache,
            skip_cache,
            env_id,
            db_wait,
            keep,
            command,
        } => {
            let orchestrator = connect(settings)?;
            let request = commands::create::CreateRequest {
                config: &config,
                cache,
                skip_cache,
                env_id: env_id.as_deref(),
                db_wait,
                keep,
                command: &command,
            };
            commands::create::run(&orchestrator, &request, json)
        }
        Commands::Destroy { env_id } => {
            let orchestrator = connect(settings)?;
            commands::destroy::run(&orchestrator, &env_id, json)
        }
        Commands::DestroyAll => {
            let orchestrator = connect(settings)?;
            commands::destroy_all::run(&orchestrator, json)
        }
        Commands::List => {
            let orchestrator = connect(settings)?;
            commands::list::run(&orchestrator, json)
        }
        Commands::Fingerprint { config } => commands::fingerprint::run(&config, json),
        Commands::Doctor => commands::doctor::run(&settings, json),
    }
}

fn load_settings(path: Option<&Path>) -> Result<OrchestratorSettings, String> {
    let loaded = match path {
        Some(p) => OrchestratorSettings::load(p),
        None => OrchestratorSettings::load_default(),
    };
    loaded.map_err(|e| format!("settings error: {e}"))
}

fn connect(settings: OrchestratorSettings) -> Result<Arc<Orchestrator>, String> {
    let engine =
        wpa_engine::select_engine(&settings.engine).map_err(|e| format!("engine error: {e}"))?;
    if std::env::var("WPA_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = wpa_engine::check_engine_prereqs(&settings.engine);
        if !missing.is_empty() {
            return Err(format!(
                "engine error: {}",
                wpa_engine::format_missing(&missing)
            ));
        }
    }
    tracing::debug!("using container engine '{}'", engine.name());
    Ok(Orchestrator::new(Arc::from(engine), settings))
}
