//! Fake — test double for the container runtime.
//!
//! Provides a deterministic [`FakeRuntime`] that implements
//! [`ContainerRuntime`] using in-memory state. Useful for unit-testing the
//! pool without a container daemon: it records every lifecycle command it
//! receives and can be primed to fail probes or runs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::Mutex;

use super::cli::DockerError;
use super::container::RunRequest;
use super::inventory::{ContainerDetails, PsRow};
use super::runtime::ContainerRuntime;

/// A canned container in the fake store.
#[derive(Clone, Debug)]
pub struct FakeContainer {
    pub details: ContainerDetails,
    pub image: String,
    pub ports_column: String,
}

#[derive(Default)]
struct Inner {
    containers: HashMap<String, FakeContainer>,
    /// Remaining `run` failures per container name.
    run_failures: HashMap<String, u32>,
    /// Remaining `info` probe failures.
    info_failures: u32,
    /// Lifecycle commands in arrival order, e.g. `"run bx-10222"`.
    commands: Vec<String>,
}

pub struct FakeRuntime {
    inner: Mutex<Inner>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Seed a pre-existing container, as discovery would find it.
    pub async fn add_container(
        &self,
        name: &str,
        created_at: DateTime<Utc>,
        ports_column: &str,
    ) {
        let container = FakeContainer {
            details: ContainerDetails {
                name: name.to_string(),
                created_at: Some(created_at),
                running: true,
                labels: HashMap::new(),
                host_ports: HashMap::new(),
            },
            image: "fake-image:latest".to_string(),
            ports_column: ports_column.to_string(),
        };
        self.inner
            .lock()
            .await
            .containers
            .insert(name.to_string(), container);
    }

    /// Make the next `count` runs of `name` fail before succeeding.
    pub async fn fail_next_runs(&self, name: &str, count: u32) {
        self.inner
            .lock()
            .await
            .run_failures
            .insert(name.to_string(), count);
    }

    /// Make the next `count` info probes fail.
    pub async fn set_info_failures(&self, count: u32) {
        self.inner.lock().await.info_failures = count;
    }

    pub async fn commands(&self) -> Vec<String> {
        self.inner.lock().await.commands.clone()
    }

    pub async fn command_count(&self, command: &str) -> usize {
        self.inner
            .lock()
            .await
            .commands
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.lock().await.containers.contains_key(name)
    }

    pub async fn container(&self, name: &str) -> Option<FakeContainer> {
        self.inner.lock().await.containers.get(name).cloned()
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for FakeRuntime {
    fn info(&self) -> BoxFuture<'_, Result<(), DockerError>> {
        Box::pin(async {
            let mut state = self.inner.lock().await;
            if state.info_failures > 0 {
                state.info_failures = state.info_failures.saturating_sub(1);
                return Err(DockerError::InfoFailed("daemon not ready".to_string()));
            }
            Ok(())
        })
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> BoxFuture<'a, Result<(), DockerError>> {
        Box::pin(async move {
            self.inner
                .lock()
                .await
                .commands
                .push(format!("pull {}", image));
            Ok(())
        })
    }

    fn run<'a>(&'a self, request: &'a RunRequest) -> BoxFuture<'a, Result<(), DockerError>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.commands.push(format!("run {}", request.name));

            if let Some(remaining) = state.run_failures.get_mut(&request.name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(DockerError::RunFailed {
                        name: request.name.clone(),
                        detail: "injected failure".to_string(),
                    });
                }
            }

            let host_ports = request
                .ports
                .iter()
                .map(|(host, container)| (*container, *host))
                .collect();
            let container = FakeContainer {
                details: ContainerDetails {
                    name: request.name.clone(),
                    created_at: Some(Utc::now()),
                    running: true,
                    labels: HashMap::new(),
                    host_ports,
                },
                image: request.image.clone(),
                ports_column: request
                    .ports
                    .iter()
                    .map(|(host, container)| format!("0.0.0.0:{}->{}/tcp", host, container))
                    .collect::<Vec<_>>()
                    .join(", "),
            };
            state.containers.insert(request.name.clone(), container);
            Ok(())
        })
    }

    fn stop<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DockerError>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.commands.push(format!("stop {}", name));
            // A container the runtime no longer knows about counts as
            // stopped, matching the CLI layer's already-gone handling.
            state.containers.remove(name);
            Ok(())
        })
    }

    fn restart<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DockerError>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.commands.push(format!("restart {}", name));
            if let Some(container) = state.containers.get_mut(name) {
                container.details.running = true;
            }
            Ok(())
        })
    }

    fn kill<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DockerError>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.commands.push(format!("kill {}", name));
            state.containers.remove(name);
            Ok(())
        })
    }

    fn list_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, DockerError>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            let mut names: Vec<String> = state
                .containers
                .keys()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect();
            names.sort();
            Ok(names)
        })
    }

    fn ps_rows(&self) -> BoxFuture<'_, Result<Vec<PsRow>, DockerError>> {
        Box::pin(async {
            let state = self.inner.lock().await;
            let mut rows: Vec<PsRow> = state
                .containers
                .values()
                .map(|c| PsRow {
                    name: c.details.name.clone(),
                    image: c.image.clone(),
                    state: if c.details.running {
                        "running".to_string()
                    } else {
                        "exited".to_string()
                    },
                    ports_column: c.ports_column.clone(),
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(rows)
        })
    }

    fn inspect<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ContainerDetails, DockerError>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            state
                .containers
                .get(name)
                .map(|c| c.details.clone())
                .ok_or_else(|| DockerError::InspectFailed {
                    name: name.to_string(),
                    detail: "no such container".to_string(),
                })
        })
    }
}
