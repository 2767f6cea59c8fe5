use crate::backend::{
    ContainerEngine, ContainerHandle, ContainerSpec, ContainerState, ContainerSummary, ExecOutput,
};
use crate::EngineError;
use std::io::Write;
use std::process::{Command, Output, Stdio};
use tracing::debug;

const STOP_TIMEOUT_SECS: &str = "5";
const PS_FORMAT: &str = "{{.ID}}\t{{.Names}}\t{{.Image}}\t{{.State}}";

/// Engine backend driving the `docker` or `podman` command line.
///
/// Both CLIs accept the same subset of commands used here, so one
/// implementation serves either program.
pub struct CliEngine {
    program: String,
}

impl CliEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn docker() -> Self {
        Self::new("docker")
    }

    pub fn podman() -> Self {
        Self::new("podman")
    }

    fn spawn_error(&self, e: std::io::Error) -> EngineError {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::Unavailable(self.program.clone())
        } else {
            EngineError::Io(e)
        }
    }

    fn run(&self, operation: &str, target: &str, args: &[&str]) -> Result<Output, EngineError> {
        debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_failure(
                operation,
                target,
                &String::from_utf8_lossy(&output.stderr),
            ))
        }
    }
}

/// Map a failed CLI invocation onto the engine error taxonomy.
fn classify_failure(operation: &str, target: &str, stderr: &str) -> EngineError {
    let lower = stderr.to_ascii_lowercase();
    // Only missing containers and networks count; a missing image or
    // manifest is a real failure.
    let missing_network = lower.contains("network") && lower.contains("not found");
    if lower.contains("no such container")
        || lower.contains("no such network")
        || lower.contains("no container with name")
        || (missing_network && !lower.contains("manifest"))
    {
        EngineError::NotFound(target.to_owned())
    } else if lower.contains("already in use") || lower.contains("already exists") {
        EngineError::Conflict(target.to_owned())
    } else {
        EngineError::Rejected {
            operation: format!("{operation} {target}"),
            reason: stderr.trim().to_owned(),
        }
    }
}

/// Parse `ps` output produced with [`PS_FORMAT`].
fn parse_ps_output(stdout: &str) -> Result<Vec<ContainerSummary>, EngineError> {
    let mut out = Vec::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 4 {
            return Err(EngineError::Parse(format!("unexpected ps line: '{line}'")));
        }
        // Docker joins multiple names with commas; the first is the primary.
        let name = fields[1].split(',').next().unwrap_or_default().trim();
        out.push(ContainerSummary {
            id: fields[0].trim().to_owned(),
            name: name.to_owned(),
            image: fields[2].trim().to_owned(),
            state: ContainerState::from_engine(fields[3]),
        });
    }
    Ok(out)
}

fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_owned(), "--name".to_owned(), spec.name.clone()];
    if let Some(network) = &spec.network {
        args.push("--network".to_owned());
        args.push(network.clone());
        for alias in &spec.aliases {
            args.push("--network-alias".to_owned());
            args.push(alias.clone());
        }
    }
    for (key, value) in &spec.env {
        args.push("-e".to_owned());
        args.push(format!("{key}={value}"));
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_owned());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

impl ContainerEngine for CliEngine {
    fn name(&self) -> &str {
        &self.program
    }

    fn available(&self) -> bool {
        Command::new(&self.program)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        let output = self.run("list", "containers", &["ps", "-a", "--no-trunc", "--format", PS_FORMAT])?;
        parse_ps_output(&String::from_utf8_lossy(&output.stdout))
    }

    fn create_network(&self, name: &str) -> Result<(), EngineError> {
        self.run(
            "create network",
            name,
            &["network", "create", "--label", "wpa.managed=true", name],
        )?;
        Ok(())
    }

    fn remove_network(&self, name: &str) -> Result<(), EngineError> {
        self.run("remove network", name, &["network", "rm", name])?;
        Ok(())
    }

    fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        self.run("pull", reference, &["pull", reference])?;
        Ok(())
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError> {
        let args = create_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run("create container", &spec.name, &arg_refs)?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if id.is_empty() {
            return Err(EngineError::Parse(format!(
                "no container id printed for '{}'",
                spec.name
            )));
        }
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    fn start_container(&self, name: &str) -> Result<(), EngineError> {
        self.run("start", name, &["start", name])?;
        Ok(())
    }

    fn stop_container(&self, name: &str) -> Result<(), EngineError> {
        self.run("stop", name, &["stop", "-t", STOP_TIMEOUT_SECS, name])?;
        Ok(())
    }

    fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        self.run("remove", name, &["rm", "-f", "-v", name])?;
        Ok(())
    }

    fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput, EngineError> {
        debug!("{} exec {container} {}", self.program, command.join(" "));
        let output = Command::new(&self.program)
            .arg("exec")
            .arg(container)
            .args(command)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lower = stderr.to_ascii_lowercase();
            if lower.contains("no such container") || lower.contains("no container with name") {
                return Err(EngineError::NotFound(container.to_owned()));
            }
            if lower.contains("is not running") {
                return Err(EngineError::Rejected {
                    operation: format!("exec {container}"),
                    reason: stderr.trim().to_owned(),
                });
            }
        }

        Ok(ExecOutput {
            code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn copy_into(
        &self,
        container: &str,
        dest_dir: &str,
        archive: &[u8],
    ) -> Result<(), EngineError> {
        let mkdir = self.exec(container, &["mkdir".to_owned(), "-p".to_owned(), dest_dir.to_owned()])?;
        if !mkdir.success() {
            return Err(EngineError::Rejected {
                operation: format!("mkdir {dest_dir} in {container}"),
                reason: mkdir.stderr_lossy().trim().to_owned(),
            });
        }

        let target = format!("{container}:{dest_dir}");
        debug!("{} cp - {target} ({} bytes)", self.program, archive.len());
        let mut child = Command::new(&self.program)
            .args(["cp", "-", &target])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(archive)?;
        }
        let output = child.wait_with_output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(classify_failure(
                "copy into",
                container,
                &String::from_utf8_lossy(&output.stderr),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn parses_ps_lines() {
        let out = "abc123\tmyenv-wpa-app\twp:latest\trunning\n\
                   def456\tother-app,alias\tnginx\texited\n\n";
        let parsed = parse_ps_output(out).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "myenv-wpa-app");
        assert_eq!(parsed[0].state, ContainerState::Running);
        assert_eq!(parsed[1].name, "other-app");
        assert_eq!(parsed[1].state, ContainerState::Exited);
    }

    #[test]
    fn rejects_malformed_ps_line() {
        assert!(matches!(
            parse_ps_output("only-two\tfields\n"),
            Err(EngineError::Parse(_))
        ));
    }

    #[test]
    fn classifies_cli_failures() {
        assert!(classify_failure("remove", "x", "Error: No such container: x").is_not_found());
        assert!(classify_failure("remove network", "n", "Error: No such network: n").is_not_found());
        assert!(matches!(
            classify_failure("create network", "n", "network with name n already exists"),
            EngineError::Conflict(_)
        ));
        assert!(matches!(
            classify_failure("pull", "img", "denied: requested access to the resource is denied"),
            EngineError::Rejected { .. }
        ));
        assert!(classify_failure(
            "remove network",
            "n",
            "Error response from daemon: network n not found"
        )
        .is_not_found());
        assert!(classify_failure(
            "remove",
            "x",
            "Error: no container with name or ID \"x\" found: no such container"
        )
        .is_not_found());
    }

    #[test]
    fn missing_images_are_not_treated_as_missing_containers() {
        for stderr in [
            "Error response from daemon: manifest for wordpress:nope not found: manifest unknown",
            "Error: initializing source docker://wordpress:nope: reading manifest nope: not found",
            "Error: image not found",
        ] {
            assert!(
                matches!(
                    classify_failure("pull", "wordpress:nope", stderr),
                    EngineError::Rejected { .. }
                ),
                "{stderr}"
            );
        }
    }

    #[test]
    fn builds_create_arguments() {
        let spec = ContainerSpec {
            name: "e-wpa-db".to_owned(),
            image: "mysql:5.7".to_owned(),
            network: Some("e-wpa-network".to_owned()),
            aliases: vec!["db".to_owned()],
            env: BTreeMap::from([("MYSQL_DATABASE".to_owned(), "wp".to_owned())]),
            labels: BTreeMap::from([("wpa.role".to_owned(), "db".to_owned())]),
            command: vec!["--default-authentication-plugin=mysql_native_password".to_owned()],
        };
        let args = create_args(&spec);
        assert_eq!(
            args,
            vec![
                "create",
                "--name",
                "e-wpa-db",
                "--network",
                "e-wpa-network",
                "--network-alias",
                "db",
                "-e",
                "MYSQL_DATABASE=wp",
                "--label",
                "wpa.role=db",
                "mysql:5.7",
                "--default-authentication-plugin=mysql_native_password",
            ]
        );
    }

    #[test]
    fn missing_program_is_unavailable() {
        let engine = CliEngine::new("wpa-definitely-not-installed");
        assert!(!engine.available());
        assert!(matches!(
            engine.list_containers(),
            Err(EngineError::Unavailable(_))
        ));
    }
}
