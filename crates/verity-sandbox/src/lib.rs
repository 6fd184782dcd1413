pub mod builtins;
pub mod config;
pub mod sandbox;
pub mod snapshot;

pub use config::SandboxConfig;
pub use sandbox::{Budget, Execution, RunOutcome, Sandbox, SandboxError, SandboxInstance};
