//! Container runtime driver — a stateless wrapper around the local
//! container-runtime CLI, plus the trait seam the pool is written against.
//!
//! Domain methods live in sibling modules (`container`, `image`,
//! `inventory`) which add `impl DockerCli` blocks.

pub mod cli;
pub mod container;
pub mod fake;
pub mod image;
pub mod inventory;
pub mod live;
pub mod runtime;

pub use cli::{DockerCli, DockerError};
pub use container::RunRequest;
pub use runtime::{ensure_available, ContainerRuntime};
