//! Live — implements `ContainerRuntime` for the real `DockerCli`.

use futures_util::future::BoxFuture;

use super::cli::{DockerCli, DockerError};
use super::container::RunRequest;
use super::inventory::{ContainerDetails, PsRow};
use super::runtime::ContainerRuntime;

impl ContainerRuntime for DockerCli {
    fn info(&self) -> BoxFuture<'_, Result<(), DockerError>> {
        Box::pin(self.info())
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> BoxFuture<'a, Result<(), DockerError>> {
        Box::pin(self.pull_image(image))
    }

    fn run<'a>(&'a self, request: &'a RunRequest) -> BoxFuture<'a, Result<(), DockerError>> {
        Box::pin(self.run(request))
    }

    fn stop<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DockerError>> {
        Box::pin(self.stop(name))
    }

    fn restart<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DockerError>> {
        Box::pin(self.restart(name))
    }

    fn kill<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DockerError>> {
        Box::pin(self.kill(name))
    }

    fn list_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, DockerError>> {
        Box::pin(self.list_by_prefix(prefix))
    }

    fn ps_rows(&self) -> BoxFuture<'_, Result<Vec<PsRow>, DockerError>> {
        Box::pin(self.ps_rows())
    }

    fn inspect<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ContainerDetails, DockerError>> {
        Box::pin(self.inspect(name))
    }
}
