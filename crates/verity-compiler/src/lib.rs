pub mod compile;
pub mod consteval;
pub mod graph;
pub mod hints;
pub mod signature;
pub mod validate;

pub use compile::{
    analyze, analyze_with, AnalysisError, AnalyzedModule, AnalyzerConfig, CompiledFunction,
};
