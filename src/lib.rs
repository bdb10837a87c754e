//! calcgraph - formula analysis for spreadsheet-style calculation documents
//!
//! This library takes loaded workbooks (sheets of addressed cells holding
//! literal values or formulas) and turns them into a structured model:
//! classified formulas, a cross-cell and cross-sheet dependency graph, cycle
//! diagnostics and results from a sandboxed evaluator.
//!
//! # Features
//!
//! - Reference extraction and formula classification with complexity scores
//! - Dependency graphs (petgraph) with cross-sheet and cross-document edges
//! - Complete circular reference reporting
//! - Safe evaluation over a closed function set; missing references are flagged
//! - Parallel batch analysis with an advisory parameter index
//! - Advisory label meanings and engineering data groups
//! - JSON/YAML export with a re-importable formula map
//!
//! # Example
//!
//! ```no_run
//! use calcgraph::config::AnalyzerConfig;
//! use calcgraph::core::AnalysisSession;
//! use calcgraph::parser::parse_document;
//! use std::path::Path;
//!
//! let document = parse_document(Path::new("bridge.yaml"))?;
//! let config = AnalyzerConfig::default();
//! let analysis = AnalysisSession::new(&document, &config).run();
//!
//! println!("Formulas: {}", analysis.records().len());
//! println!("Cycles: {}", analysis.cycles().len());
//! # Ok::<(), calcgraph::error::CalcGraphError>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod export;
pub mod parser;
pub mod types;

// Re-export commonly used types
pub use config::AnalyzerConfig;
pub use error::{CalcGraphError, CalcGraphResult};
pub use types::{CellAddress, Document, DocumentId, Literal, QualifiedAddress, RawCell, SheetId};
