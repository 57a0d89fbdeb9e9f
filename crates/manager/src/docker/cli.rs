//! Docker CLI — binary discovery, command construction, error types.

use std::ffi::OsStr;
use std::process::Output;

use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum DockerError {
    #[error("container runtime unavailable after {0} attempts")]
    RuntimeUnavailable(u32),
    #[error("image pull failed for {image}: {detail}")]
    ImagePullFailed { image: String, detail: String },
    #[error("container run failed for {name}: {detail}")]
    RunFailed { name: String, detail: String },
    #[error("container stop failed for {name}: {detail}")]
    StopFailed { name: String, detail: String },
    #[error("container restart failed for {name}: {detail}")]
    RestartFailed { name: String, detail: String },
    #[error("container inspect failed for {name}: {detail}")]
    InspectFailed { name: String, detail: String },
    #[error("runtime info probe failed: {0}")]
    InfoFailed(String),
    #[error("failed to invoke container runtime: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("unparsable runtime output: {0}")]
    Malformed(String),
}

/// Runtime-specific environment forwarded to every CLI invocation when set.
const FORWARDED_VARS: &[&str] = &["DOCKER_HOST", "DOCKER_TLS_VERIFY", "DOCKER_CERT_PATH"];

/// Handle on the container runtime CLI. Stateless: every operation spawns a
/// fresh process with the assembled `PATH` and forwarded daemon variables.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    search_path: String,
}

impl DockerCli {
    pub fn new() -> Self {
        // DOCKER_PATH overrides the binary itself, not the search path.
        let binary = std::env::var("DOCKER_PATH").unwrap_or_else(|_| "docker".to_string());
        Self {
            binary,
            search_path: assemble_search_path(std::env::var("PATH").ok().as_deref()),
        }
    }

    pub(super) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env("PATH", &self.search_path);
        for var in FORWARDED_VARS {
            if let Ok(value) = std::env::var(var) {
                cmd.env(var, value);
            }
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run a subcommand to completion and capture its output.
    pub(super) async fn output<I, S>(&self, args: I) -> Result<Output, DockerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.command().args(args).output().await?;
        Ok(output)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the `PATH` handed to the CLI: platform-default install locations
/// ahead of whatever the process inherited.
fn assemble_search_path(inherited: Option<&str>) -> String {
    let separator = if cfg!(windows) { ';' } else { ':' };
    let mut parts: Vec<&str> = platform_locations().to_vec();
    if let Some(path) = inherited {
        if !path.is_empty() {
            parts.push(path);
        }
    }
    parts.join(&separator.to_string())
}

fn platform_locations() -> &'static [&'static str] {
    if cfg!(windows) {
        &["C:\\Program Files\\Docker\\Docker\\resources\\bin"]
    } else if cfg!(target_os = "macos") {
        &[
            "/usr/local/bin",
            "/opt/homebrew/bin",
            "/Applications/Docker.app/Contents/Resources/bin",
        ]
    } else {
        &["/usr/bin", "/usr/local/bin", "/snap/bin"]
    }
}

pub(super) fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// The runtime reports a missing container with this phrase on stop/restart;
/// callers treat it as already-gone rather than a failure.
pub(super) fn is_no_such_container(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("no such container")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_path_prefixes_platform_locations() {
        let assembled = assemble_search_path(Some("/home/user/bin"));
        let first = platform_locations()[0];
        assert!(assembled.starts_with(first));
        assert!(assembled.ends_with("/home/user/bin"));
    }

    #[test]
    fn test_search_path_without_inherited() {
        let assembled = assemble_search_path(None);
        let separator = if cfg!(windows) { ';' } else { ':' };
        let expected = platform_locations().join(&separator.to_string());
        assert_eq!(assembled, expected);
    }

    #[test]
    fn test_no_such_container_detection() {
        assert!(is_no_such_container(
            "Error response from daemon: No such container: bx-10222"
        ));
        assert!(is_no_such_container("error: no such container: x"));
        assert!(!is_no_such_container("permission denied"));
        assert!(!is_no_such_container(""));
    }
}
