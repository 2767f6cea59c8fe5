use std::fmt;
use std::process::{Command, Stdio};

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn daemon_reachable(program: &str) -> bool {
    Command::new(program)
        .arg("info")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn install_hint(program: &str) -> &'static str {
    match program {
        "podman" => "zypper install podman | apt install podman | dnf install podman | pacman -S podman",
        _ => "see https://docs.docker.com/engine/install/",
    }
}

/// Check that the named engine CLI is installed and can reach its daemon.
/// Returns a list of missing items. Empty list means all prerequisites are met.
/// The in-memory `mock` engine has no prerequisites.
pub fn check_engine_prereqs(program: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    if program == "mock" {
        return missing;
    }

    if !command_exists(program) {
        missing.push(MissingPrereq {
            name: program.to_owned(),
            purpose: "container engine CLI",
            install_hint: install_hint(program),
        });
    } else if !daemon_reachable(program) {
        missing.push(MissingPrereq {
            name: format!("{program} daemon"),
            purpose: "running containers",
            install_hint: "start the engine service, or check that your user may access its socket",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nwpa needs a working container engine to provision test environments.");
    msg
}
