//! Test-suite generation for a module: analysis, concolic exploration of each
//! function, and materialization of the confirmed cases.

pub mod analytics;
pub mod campaign;
pub mod limits;
pub mod suite;

pub use analytics::{source_fingerprint, GenerationSummary};
pub use campaign::{generate, generate_for, GenerateError, Generation};
pub use limits::{ConfigError, GenerationConfig, LimitViolation};
pub use suite::{FunctionSuite, Oracle, Provenance, Region, RegionKind, TestCase, TestSuite};
