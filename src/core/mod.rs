//! Formula analysis engine: scanning, classification, dependency graphs,
//! cycle detection, safe evaluation and validation

pub mod analyzer;
pub mod batch;
pub mod categories;
pub mod cycles;
pub mod evaluator;
pub mod graph;
pub mod integration;
pub mod meanings;
pub mod scanner;
pub mod session;
pub mod validation;

pub use analyzer::{check_syntax, FormulaMetadata, FormulaType, SyntaxError};
pub use batch::{analyze_batch, BatchAnalysis};
pub use categories::{categorize, FormulaCategory};
pub use cycles::{detect_cycles, Cycle};
pub use evaluator::{evaluate_formula, ConditionalMode, EvalContext, EvalError, EvalOutcome};
pub use graph::{Dependency, DependencyEdge, DependencyGraph, EdgeKind};
pub use integration::{Advisory, IntegrationIndex, MatchSource, ParameterName};
pub use meanings::{data_groups, parameter_meanings, DataGroup};
pub use session::{AnalysisSession, DocumentAnalysis, FormulaRecord};
pub use validation::{validate, ValidationResult};
