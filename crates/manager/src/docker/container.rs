//! Container lifecycle — run, stop, restart, kill.

use tracing::debug;

use super::cli::{is_no_such_container, stderr_of, DockerCli, DockerError};

/// Ports the browser image exposes internally; `run` binds each of them to
/// the slot's external port.
pub const INTERNAL_APP_PORT: u16 = 8080;
pub const INTERNAL_DEBUGGER_PORT: u16 = 19222;
pub const INTERNAL_VNC_PORT: u16 = 15900;

/// Everything `run` needs to launch one slot's container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub name: String,
    pub image: String,
    /// Environment passed with `-e K=V`, in insertion order.
    pub env: Vec<(String, String)>,
    /// `host -> container` port bindings passed with `-p HOST:CONTAINER`.
    pub ports: Vec<(u16, u16)>,
    /// Extra flags inserted verbatim ahead of `--name`.
    pub extra_args: Vec<String>,
}

impl RunRequest {
    /// CLI argument vector: `run -d --pull never --rm <extra> --name <name>
    /// -e K=V… -p HOST:CONTAINER… <image>`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--pull".into(),
            "never".into(),
            "--rm".into(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push("--name".into());
        args.push(self.name.clone());
        for (key, value) in &self.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        for (host, container) in &self.ports {
            args.push("-p".into());
            args.push(format!("{}:{}", host, container));
        }
        args.push(self.image.clone());
        args
    }
}

impl DockerCli {
    /// Launch a detached, auto-remove container for one slot.
    pub async fn run(&self, request: &RunRequest) -> Result<(), DockerError> {
        let output = self.output(request.to_args()).await?;
        if output.status.success() {
            debug!("launched container {}", request.name);
            Ok(())
        } else {
            Err(DockerError::RunFailed {
                name: request.name.clone(),
                detail: stderr_of(&output),
            })
        }
    }

    /// Stop a container. A container the runtime no longer knows about
    /// counts as stopped.
    pub async fn stop(&self, name: &str) -> Result<(), DockerError> {
        let output = self.output(["stop", name]).await?;
        let stderr = stderr_of(&output);
        if output.status.success() || is_no_such_container(&stderr) {
            Ok(())
        } else {
            Err(DockerError::StopFailed {
                name: name.to_string(),
                detail: stderr,
            })
        }
    }

    /// Restart a container in place, keeping its identity and bindings.
    pub async fn restart(&self, name: &str) -> Result<(), DockerError> {
        let output = self.output(["restart", name]).await?;
        let stderr = stderr_of(&output);
        if output.status.success() || is_no_such_container(&stderr) {
            Ok(())
        } else {
            Err(DockerError::RestartFailed {
                name: name.to_string(),
                detail: stderr,
            })
        }
    }

    /// Kill a container outright. Used as a pre-emptive sweep before init;
    /// a missing container is not an error.
    pub async fn kill(&self, name: &str) -> Result<(), DockerError> {
        let output = self.output(["kill", name]).await?;
        let stderr = stderr_of(&output);
        if output.status.success() || is_no_such_container(&stderr) {
            Ok(())
        } else {
            Err(DockerError::StopFailed {
                name: name.to_string(),
                detail: stderr,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_shape() {
        let request = RunRequest {
            name: "bx-10222".to_string(),
            image: "browser-node:latest".to_string(),
            env: vec![
                ("XVFB_RESOLUTION".to_string(), "1280x720".to_string()),
                ("VNC_PASSWORD".to_string(), "secret".to_string()),
            ],
            ports: vec![(7070, 8080), (10222, 19222), (15900, 15900)],
            extra_args: vec!["--shm-size=2g".to_string()],
        };

        let expected: Vec<String> = [
            "run",
            "-d",
            "--pull",
            "never",
            "--rm",
            "--shm-size=2g",
            "--name",
            "bx-10222",
            "-e",
            "XVFB_RESOLUTION=1280x720",
            "-e",
            "VNC_PASSWORD=secret",
            "-p",
            "7070:8080",
            "-p",
            "10222:19222",
            "-p",
            "15900:15900",
            "browser-node:latest",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(request.to_args(), expected);
    }

    #[test]
    fn test_run_args_minimal() {
        let request = RunRequest {
            name: "bx-1".to_string(),
            image: "img".to_string(),
            ..RunRequest::default()
        };
        assert_eq!(
            request.to_args(),
            vec!["run", "-d", "--pull", "never", "--rm", "--name", "bx-1", "img"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }
}
