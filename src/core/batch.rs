//! Many documents at once
//!
//! Documents are analyzed in parallel, each in its own session; the only
//! cross-document step runs afterwards on the collected results.

use super::graph::DependencyGraph;
use super::integration::IntegrationIndex;
use super::session::{AnalysisSession, DocumentAnalysis};
use crate::config::AnalyzerConfig;
use crate::types::Document;
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct BatchAnalysis<'a> {
    pub documents: Vec<DocumentAnalysis<'a>>,
    pub integration: IntegrationIndex,
    /// Per-document graphs plus advisory cross-document edges
    pub integration_graph: DependencyGraph,
}

impl<'a> BatchAnalysis<'a> {
    pub fn document(&self, id: &str) -> Option<&DocumentAnalysis<'a>> {
        self.documents.iter().find(|d| d.document().id().as_str() == id)
    }
}

/// Analyze every document, then link them through shared parameters.
/// Results keep the input order.
pub fn analyze_batch<'a>(documents: &'a [Document], config: &AnalyzerConfig) -> BatchAnalysis<'a> {
    let analyses: Vec<DocumentAnalysis<'a>> = documents
        .par_iter()
        .map(|document| AnalysisSession::new(document, config).run())
        .collect();

    let integration = IntegrationIndex::build(&analyses, config);
    let integration_graph =
        DependencyGraph::integration(analyses.iter().map(DocumentAnalysis::graph), &integration);

    tracing::info!(
        documents = analyses.len(),
        integration_points = integration.len(),
        edges = integration_graph.edge_count(),
        "batch analysis complete"
    );

    BatchAnalysis {
        documents: analyses,
        integration,
        integration_graph,
    }
}
