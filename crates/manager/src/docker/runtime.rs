//! Runtime trait — abstract interface over the container CLI.
//!
//! The pool is written against this trait. `live.rs` provides the real
//! CLI-backed implementation; `fake.rs` provides a deterministic test
//! double. Object-safe thanks to boxed futures, so it can live inside the
//! pool as `Arc<dyn ContainerRuntime>`.

use std::time::Duration;

use futures_util::future::BoxFuture;
use tracing::{debug, info};

use super::cli::DockerError;
use super::container::RunRequest;
use super::inventory::{ContainerDetails, PsRow};

pub trait ContainerRuntime: Send + Sync {
    fn info(&self) -> BoxFuture<'_, Result<(), DockerError>>;

    fn pull_image<'a>(&'a self, image: &'a str) -> BoxFuture<'a, Result<(), DockerError>>;

    fn run<'a>(&'a self, request: &'a RunRequest) -> BoxFuture<'a, Result<(), DockerError>>;

    fn stop<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DockerError>>;

    fn restart<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DockerError>>;

    fn kill<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DockerError>>;

    fn list_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, DockerError>>;

    fn ps_rows(&self) -> BoxFuture<'_, Result<Vec<PsRow>, DockerError>>;

    fn inspect<'a>(&'a self, name: &'a str)
        -> BoxFuture<'a, Result<ContainerDetails, DockerError>>;
}

const AVAILABILITY_ATTEMPTS: u32 = 50;
const AVAILABILITY_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
const AVAILABILITY_ATTEMPT_INTERVAL: Duration = Duration::from_secs(5);

/// Probe the runtime until it answers. Bounded: 50 attempts with a
/// 5-second per-attempt timeout and 5 seconds between attempts, so a dead
/// daemon fails init after roughly eight minutes rather than hanging it.
pub async fn ensure_available(runtime: &dyn ContainerRuntime) -> Result<(), DockerError> {
    for attempt in 1..=AVAILABILITY_ATTEMPTS {
        match tokio::time::timeout(AVAILABILITY_ATTEMPT_TIMEOUT, runtime.info()).await {
            Ok(Ok(())) => {
                if attempt > 1 {
                    info!("container runtime became available on attempt {}", attempt);
                }
                return Ok(());
            }
            Ok(Err(e)) => debug!(
                "runtime probe failed (attempt {}/{}): {}",
                attempt, AVAILABILITY_ATTEMPTS, e
            ),
            Err(_) => debug!(
                "runtime probe timed out (attempt {}/{})",
                attempt, AVAILABILITY_ATTEMPTS
            ),
        }
        tokio::time::sleep(AVAILABILITY_ATTEMPT_INTERVAL).await;
    }
    Err(DockerError::RuntimeUnavailable(AVAILABILITY_ATTEMPTS))
}

#[cfg(test)]
mod tests {
    use super::super::fake::FakeRuntime;
    use super::*;

    #[tokio::test]
    async fn test_ensure_available_immediate() {
        let runtime = FakeRuntime::new();
        assert!(ensure_available(&runtime).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_available_after_transient_failures() {
        let runtime = FakeRuntime::new();
        runtime.set_info_failures(3).await;
        assert!(ensure_available(&runtime).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_available_exhausts() {
        let runtime = FakeRuntime::new();
        runtime.set_info_failures(u32::MAX).await;
        let result = ensure_available(&runtime).await;
        assert!(matches!(result, Err(DockerError::RuntimeUnavailable(50))));
    }
}
