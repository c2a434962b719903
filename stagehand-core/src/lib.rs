//! stagehand core library
//!
//! Programmable multi-stage OCI image construction on top of buildah: each
//! build stage names a Rust callback that runs inside the mounted
//! filesystem namespace of the stage's container, and stages hand
//! artifacts to each other as tar archives. A pipeline is a configuration
//! tree plus callbacks; the orchestrator does the rest.

pub mod artifact;
pub mod builder;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod process;
pub mod stage;

// Re-export commonly used items
pub use builder::{global, Params, BUILDER_PROGRAM};
pub use config::{Callback, Config, Value};
pub use error::{Result, StagehandError};
pub use orchestrator::{run, run_or_exit, run_with_args, MOUNT_ENV};
pub use plan::{plan, BuildOrder};
pub use stage::Stage;
