//! Image and daemon probes — pull, info.

use super::cli::{stderr_of, DockerCli, DockerError};

impl DockerCli {
    /// Pull the browser image. No retries: a pull that fails once is
    /// reported straight back to init.
    pub async fn pull_image(&self, image: &str) -> Result<(), DockerError> {
        let output = self.output(["pull", image]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DockerError::ImagePullFailed {
                image: image.to_string(),
                detail: stderr_of(&output),
            })
        }
    }

    /// Probe the daemon. Success means the runtime is reachable and
    /// answering; everything else is reported as a failed probe.
    pub async fn info(&self) -> Result<(), DockerError> {
        let output = self.output(["info"]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DockerError::InfoFailed(stderr_of(&output)))
        }
    }
}
