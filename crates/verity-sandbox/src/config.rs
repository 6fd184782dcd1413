/// Sandbox configuration: fuel metering, wall-clock budget, recursion depth.
use serde::{Deserialize, Serialize};

/// Configuration for concrete runs.
///
/// Every run is isolated from the next: module globals are restored after
/// each call, and a run that exhausts any budget is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Fuel budget per call: one unit per flow node and per evaluated expression.
    pub fuel_per_call: u64,
    /// Wall-clock budget per call in milliseconds.
    pub wall_ms: u64,
    /// Maximum nesting of user-function calls before `RecursionError`.
    /// The interpreter stack grows on demand, so this may match the
    /// 1000-frame limit programs are usually written against.
    pub max_call_depth: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            fuel_per_call: 200_000,
            wall_ms: 1_000,
            max_call_depth: 1_000,
        }
    }
}
