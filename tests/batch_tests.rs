//! Parallel batch analysis and cross-document integration

use calcgraph::core::{analyze_batch, EdgeKind, MatchSource, ParameterName};
use calcgraph::export::{import_formula_map, MasterFormulaMapping};
use calcgraph::{AnalyzerConfig, Document, DocumentId, Literal, QualifiedAddress, RawCell};
use pretty_assertions::assert_eq;

fn qa(s: &str) -> QualifiedAddress {
    s.parse().unwrap()
}

fn hydraulics() -> Document {
    Document::from_raw(
        DocumentId::new("hydraulics"),
        vec!["Sheet1".to_string()],
        vec![
            RawCell::value("Sheet1", "A1", "Span length (m)"),
            RawCell::value("Sheet1", "B1", 24.0),
            RawCell::value("Sheet1", "A2", "Design discharge"),
            RawCell::value("Sheet1", "B2", 310.0),
        ],
    )
    .unwrap()
}

fn superstructure() -> Document {
    Document::from_raw(
        DocumentId::new("superstructure"),
        vec!["Sheet1".to_string()],
        vec![
            RawCell::value("Sheet1", "A1", "Effective span length"),
            RawCell::formula("Sheet1", "B1", "=24-0.5"),
            RawCell::value("Sheet1", "A2", "Moment"),
            RawCell::formula("Sheet1", "B2", "=B1^2/8"),
        ],
    )
    .unwrap()
}

#[test]
fn test_batch_keeps_order_and_isolates_documents() {
    let docs = vec![hydraulics(), superstructure()];
    let config = AnalyzerConfig::default();
    let batch = analyze_batch(&docs, &config);

    let ids: Vec<_> = batch
        .documents
        .iter()
        .map(|a| a.document().id().as_str())
        .collect();
    assert_eq!(ids, vec!["hydraulics", "superstructure"]);

    let sup = batch.document("superstructure").unwrap();
    match sup.resolve(&qa("superstructure#Sheet1!B2")) {
        Some(Literal::Number(moment)) => assert!((moment - 69.03125).abs() < 1e-9),
        other => panic!("expected a number, got {:?}", other),
    }
    // Same address in the other document is unrelated
    assert_eq!(
        batch
            .document("hydraulics")
            .unwrap()
            .resolve(&qa("hydraulics#Sheet1!B2")),
        Some(Literal::Number(310.0))
    );
}

#[test]
fn test_integration_index_links_shared_parameter() {
    let docs = vec![hydraulics(), superstructure()];
    let config = AnalyzerConfig::default();
    let batch = analyze_batch(&docs, &config);

    let span = batch.integration.get(ParameterName::SpanLength).unwrap();
    let locations: Vec<_> = span.iter().map(|a| a.value.clone()).collect();
    assert_eq!(
        locations,
        vec![qa("hydraulics#Sheet1!B1"), qa("superstructure#Sheet1!B1")]
    );
    assert!(span.iter().all(|a| a.source == MatchSource::Neighbor));

    // Discharge appears once only
    assert!(batch.integration.get(ParameterName::Discharge).is_none());

    // The formula-holding candidate links to the other document
    let edges = batch.integration_graph.edges();
    let integration: Vec<_> = edges
        .iter()
        .filter(|e| matches!(e.kind, EdgeKind::Integration(_)))
        .collect();
    assert_eq!(integration.len(), 1);
    assert_eq!(integration[0].from, qa("superstructure#Sheet1!B1"));
    assert_eq!(integration[0].to, qa("hydraulics#Sheet1!B1"));
    assert_eq!(
        integration[0].kind,
        EdgeKind::Integration(ParameterName::SpanLength)
    );
}

#[test]
fn test_master_mapping() {
    let docs = vec![hydraulics(), superstructure()];
    let config = AnalyzerConfig::default();
    let batch = analyze_batch(&docs, &config);

    let mapping = MasterFormulaMapping::from_batch(&batch);
    assert_eq!(mapping.total_formulas, 2);
    assert_eq!(mapping.integration_edges.len(), 1);

    let imported = import_formula_map(&mapping.to_json_string().unwrap()).unwrap();
    assert_eq!(imported.len(), 2);
    assert_eq!(imported[&qa("superstructure#Sheet1!B2")], "=B1^2/8");
}

#[test]
fn test_empty_batch() {
    let config = AnalyzerConfig::default();
    let batch = analyze_batch(&[], &config);
    assert!(batch.documents.is_empty());
    assert!(batch.integration.is_empty());
    assert_eq!(batch.integration_graph.node_count(), 0);
}
