use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};
use verity_compiler::{analyze_with, AnalysisError, AnalyzedModule};
use verity_explore::{explore_function, ExplorationReport, ExploreError};

use crate::analytics::GenerationSummary;
use crate::limits::{ConfigError, GenerationConfig, LimitViolation};
use crate::suite::{FunctionSuite, TestSuite};

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Limit exceeded: {0}")]
    Limit(#[from] LimitViolation),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Exploration error: {0}")]
    Explore(#[from] ExploreError),
}

/// Everything one generation run produced.
#[derive(Debug, Clone)]
pub struct Generation {
    pub suite: TestSuite,
    pub reports: Vec<ExplorationReport>,
    pub summary: GenerationSummary,
    pub analysis_errors: Vec<AnalysisError>,
}

/// Generate suites for every analyzable function of `source`, in source order.
pub fn generate(source: &str, config: &GenerationConfig) -> Result<Generation, GenerateError> {
    let module = prepare(source, config)?;
    let names: Vec<String> = module.functions.iter().map(|f| f.name.clone()).collect();
    run(source, module, &names, config)
}

/// Generate suites for the named functions only, in the order given.
pub fn generate_for(
    source: &str,
    names: &[&str],
    config: &GenerationConfig,
) -> Result<Generation, GenerateError> {
    let module = prepare(source, config)?;
    for name in names {
        if module.function(name).is_none() {
            return Err(AnalysisError::UnknownFunction {
                name: name.to_string(),
            }
            .into());
        }
    }
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    run(source, module, &names, config)
}

fn prepare(source: &str, config: &GenerationConfig) -> Result<Arc<AnalyzedModule>, GenerateError> {
    config.validate()?;
    config.check_source(source)?;
    let module = analyze_with(source, &config.analyzer);
    if module.functions.is_empty() {
        if let Some(first) = module.errors.first() {
            return Err(first.clone().into());
        }
    }
    Ok(Arc::new(module))
}

fn run(
    source: &str,
    module: Arc<AnalyzedModule>,
    names: &[String],
    config: &GenerationConfig,
) -> Result<Generation, GenerateError> {
    let started = Instant::now();
    let explore = |name: &String| {
        explore_function(
            Arc::clone(&module),
            name,
            &config.explore,
            &config.solver,
            &config.sandbox,
        )
    };
    let reports: Vec<ExplorationReport> = if config.parallel_functions {
        names.par_iter().map(explore).collect::<Result<_, _>>()?
    } else {
        names.iter().map(explore).collect::<Result<_, _>>()?
    };

    let suite = TestSuite {
        functions: reports.iter().map(FunctionSuite::materialize).collect(),
    };
    for function in &suite.functions {
        if function.duplicates > 0 {
            warn!(
                function = %function.function,
                duplicates = function.duplicates,
                "collapsed duplicate cases"
            );
        }
    }
    let analysis_errors = module.errors.clone();
    let summary = GenerationSummary::build(
        source,
        &reports,
        &suite,
        analysis_errors.iter().map(|e| e.to_string()).collect(),
    );
    info!(
        functions = suite.functions.len(),
        cases = suite.len(),
        coverage = summary.totals.coverage,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "generated test suite"
    );
    Ok(Generation {
        suite,
        reports,
        summary,
        analysis_errors,
    })
}
