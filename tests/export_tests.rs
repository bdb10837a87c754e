//! Export files and formula map re-import

use calcgraph::core::AnalysisSession;
use calcgraph::export::{import_formula_map, DocumentExport};
use calcgraph::parser::{parse_document, YamlWorkbook, WorkbookSource};
use calcgraph::AnalyzerConfig;
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

const CULVERT: &str = r#"
document: culvert
sheets:
  Hydraulics:
    A1: Discharge
    B1: 42.5
    A2: Velocity
    B2: 2.1
    A3: Waterway area
    B3: "=B1/B2"
  Checks:
    A1: Area check
    B1: '=IF(Hydraulics!B3>20,"OK","REVISE")'
"#;

#[test]
fn test_json_export_round_trip() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("culvert.yaml");
    fs::write(&input, CULVERT).unwrap();

    let doc = parse_document(&input).unwrap();
    let config = AnalyzerConfig::default();
    let analysis = AnalysisSession::new(&doc, &config).run();

    let output = dir.path().join("culvert_formulas.json");
    DocumentExport::from_analysis(&analysis)
        .write_json(&output)
        .unwrap();

    let json = fs::read_to_string(&output).unwrap();
    let imported = import_formula_map(&json).unwrap();
    assert_eq!(imported, analysis.formula_map());
    assert_eq!(imported.len(), 2);
}

#[test]
fn test_export_records_cross_sheet_summary() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("culvert.yaml");
    fs::write(&input, CULVERT).unwrap();

    let doc = YamlWorkbook::new(&input).load().unwrap();
    let config = AnalyzerConfig::default();
    let analysis = AnalysisSession::new(&doc, &config).run();
    let export = DocumentExport::from_analysis(&analysis);

    let json: serde_json::Value =
        serde_json::from_str(&export.to_json_string().unwrap()).unwrap();
    assert_eq!(json["metadata"]["document"], "culvert");
    assert_eq!(json["metadata"]["total_sheets"], 2);
    assert_eq!(
        json["sheet_dependencies"]["Checks"],
        serde_json::json!(["Hydraulics"])
    );
    assert_eq!(
        json["evaluations"]["culvert#Checks!B1"]["value"],
        "OK"
    );
    assert_eq!(json["cycles"], serde_json::json!([]));
    assert_eq!(
        json["categories"]["culvert#Hydraulics!B3"][0]["value"],
        "geometric"
    );
    assert_eq!(
        json["parameter_meanings"]["culvert#Hydraulics!A1"]["value"],
        "Design Discharge (cumecs)"
    );
    assert_eq!(
        json["data_groups"]["hydraulic"][1]["value"],
        "culvert#Hydraulics!A2"
    );
}

#[test]
fn test_yaml_export_written() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("culvert.yaml");
    fs::write(&input, CULVERT).unwrap();

    let doc = parse_document(&input).unwrap();
    let config = AnalyzerConfig::default();
    let analysis = AnalysisSession::new(&doc, &config).run();

    let output = dir.path().join("culvert_formulas.yaml");
    DocumentExport::from_analysis(&analysis)
        .write_yaml(&output)
        .unwrap();
    let written = fs::read_to_string(&output).unwrap();
    assert!(written.contains("culvert#Hydraulics!B3"));
    assert!(written.contains("export_date"));
}
