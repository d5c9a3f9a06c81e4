//! Provisioning, inspection and teardown of compose-based test environments.
//!
//! An [`EnvironmentDescriptor`] names the manifests, the project namespace, the working
//! directory and the environment overlay. An [`Environment`] drives the composition tool and
//! the container runtime through a [`CommandRunner`], waits for health checks, answers
//! metadata queries and guarantees teardown.
//!
//! ```no_run
//! use std::time::Duration;
//! use testbed::{Environment, EnvironmentDescriptor};
//!
//! let descriptor = EnvironmentDescriptor::new("perf1", "/srv/perf")
//!     .manifest("compose.yml")
//!     .env("IMAGE_TAG", "latest");
//! let env = Environment::new(&descriptor);
//! if env.up(Duration::from_secs(300)) {
//!     let port = env.service_mapped_port("web", 80);
//!     println!("web is on {port}");
//! }
//! env.down();
//! env.clean_up();
//! ```

mod cleanup;
pub mod config;
pub mod descriptor;
pub mod environment;
pub mod error;
pub mod exec;
pub mod health;
mod lifecycle;
mod logs;
mod query;

#[cfg(test)]
mod mock;

pub use descriptor::EnvironmentDescriptor;
pub use environment::{Environment, Settings, Toolchain};
pub use error::{DumpError, ExecutionError, TestbedError};
pub use exec::{run_lines, run_status, CommandResult, CommandRunner, Invocation, ProcessRunner};
pub use health::HealthState;
