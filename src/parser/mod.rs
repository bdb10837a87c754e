//! Workbook loading
//!
//! Decoding real spreadsheet files is left to the caller: anything that can
//! produce a [`Document`] implements [`WorkbookSource`]. The crate ships a
//! YAML cell listing, mostly for fixtures:
//!
//! ```yaml
//! document: bridge
//! sheets:
//!   Sheet1:
//!     A2: Span length
//!     B2: 10.5
//!     B4: "=B2*B3"
//!     B5:
//!       formula: "=B4/2"
//!       value: 27.3
//! ```
//!
//! Sheets and cells keep their file order. Strings starting with `=` are
//! formulas.

use crate::error::{CalcGraphError, CalcGraphResult};
use crate::types::{Document, DocumentId, Literal, RawCell};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Anything that yields a loaded document
pub trait WorkbookSource {
    fn load(&self) -> CalcGraphResult<Document>;
}

/// Cells already decoded by the caller
#[derive(Debug, Clone)]
pub struct MemoryWorkbook {
    pub id: DocumentId,
    pub sheet_names: Vec<String>,
    pub cells: Vec<RawCell>,
}

impl WorkbookSource for MemoryWorkbook {
    fn load(&self) -> CalcGraphResult<Document> {
        Document::from_raw(
            self.id.clone(),
            self.sheet_names.clone(),
            self.cells.clone(),
        )
    }
}

/// A YAML cell listing on disk
#[derive(Debug, Clone)]
pub struct YamlWorkbook {
    path: PathBuf,
}

impl YamlWorkbook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkbookSource for YamlWorkbook {
    fn load(&self) -> CalcGraphResult<Document> {
        parse_document(&self.path)
    }
}

/// Load a YAML cell listing.
///
/// Without a `document` key the file stem becomes the document id.
///
/// # Example
/// ```no_run
/// use calcgraph::parser::parse_document;
/// use std::path::Path;
///
/// let document = parse_document(Path::new("bridge.yaml"))?;
/// println!("Sheets: {}", document.sheet_names().len());
/// # Ok::<(), calcgraph::error::CalcGraphError>(())
/// ```
pub fn parse_document(path: &Path) -> CalcGraphResult<Document> {
    let content = std::fs::read_to_string(path)?;
    let fallback_id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("workbook");
    let document = parse_document_str(&content, fallback_id)?;

    tracing::debug!(
        path = %path.display(),
        document = %document.id(),
        cells = document.cells().len(),
        "loaded workbook"
    );
    Ok(document)
}

/// Parse a YAML cell listing held in memory
pub fn parse_document_str(content: &str, fallback_id: &str) -> CalcGraphResult<Document> {
    let yaml: Value = serde_yaml::from_str(content)?;
    let root = yaml
        .as_mapping()
        .ok_or_else(|| CalcGraphError::Load("workbook must be a mapping".to_string()))?;

    let id = match root.get("document") {
        Some(Value::String(id)) => id.clone(),
        Some(other) => {
            return Err(CalcGraphError::Load(format!(
                "'document' must be a string, got {}",
                type_name(other)
            )))
        }
        None => fallback_id.to_string(),
    };

    let sheets = match root.get("sheets") {
        Some(Value::Mapping(sheets)) => sheets,
        Some(Value::Null) | None => {
            return Err(CalcGraphError::Load("workbook has no 'sheets'".to_string()))
        }
        Some(other) => {
            return Err(CalcGraphError::Load(format!(
                "'sheets' must be a mapping, got {}",
                type_name(other)
            )))
        }
    };

    let mut sheet_names = Vec::new();
    let mut cells = Vec::new();
    for (name, sheet) in sheets {
        let name = key_string(name)?;
        match sheet {
            Value::Mapping(map) => parse_sheet(&name, map, &mut cells)?,
            Value::Null => {}
            other => {
                return Err(CalcGraphError::Load(format!(
                    "sheet '{}' must be a mapping, got {}",
                    name,
                    type_name(other)
                )))
            }
        }
        sheet_names.push(name);
    }

    Document::from_raw(DocumentId::new(id), sheet_names, cells)
}

fn parse_sheet(sheet: &str, map: &Mapping, cells: &mut Vec<RawCell>) -> CalcGraphResult<()> {
    for (address, value) in map {
        let address = key_string(address)?;
        let cell = match value {
            Value::Mapping(cell) => {
                let formula = cell
                    .get("formula")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let value = match cell.get("value") {
                    Some(v) => literal(sheet, &address, v)?,
                    None => None,
                };
                RawCell {
                    sheet_name: sheet.to_string(),
                    address,
                    is_formula_cell: formula.is_some(),
                    value,
                    formula,
                }
            }
            scalar => RawCell {
                sheet_name: sheet.to_string(),
                value: literal(sheet, &address, scalar)?,
                address,
                formula: None,
                is_formula_cell: false,
            },
        };
        cells.push(cell);
    }
    Ok(())
}

fn literal(sheet: &str, address: &str, value: &Value) -> CalcGraphResult<Option<Literal>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(Literal::Boolean(*b))),
        Value::Number(n) => n
            .as_f64()
            .map(|n| Some(Literal::Number(n)))
            .ok_or_else(|| CalcGraphError::Load(format!("{}!{}: number out of range", sheet, address))),
        Value::String(s) => Ok(Some(Literal::Text(s.clone()))),
        other => Err(CalcGraphError::Load(format!(
            "{}!{}: unsupported cell value of type {}",
            sheet,
            address,
            type_name(other)
        ))),
    }
}

/// Mapping keys may come through as numbers (`1: ...`) or strings
fn key_string(key: &Value) -> CalcGraphResult<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(CalcGraphError::Load(format!(
            "keys must be strings, got {}",
            type_name(other)
        ))),
    }
}

fn type_name(val: &Value) -> &'static str {
    match val {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "array",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CellAddress, SheetId};
    use std::io::Write;

    const BRIDGE: &str = r#"
document: bridge
sheets:
  Sheet1:
    A2: Span length
    B2: 10.5
    B3: 5.2
    B4: "=B2*B3"
    B5:
      formula: "=B4/2"
      value: 27.3
  Sheet2:
    B6: "=Sheet1!B2*2"
  Notes:
"#;

    #[test]
    fn test_parse_cells_in_order() {
        let doc = parse_document_str(BRIDGE, "unused").unwrap();
        assert_eq!(doc.id().as_str(), "bridge");
        assert_eq!(
            doc.sheet_names(),
            &[
                SheetId::new("Sheet1"),
                SheetId::new("Sheet2"),
                SheetId::new("Notes")
            ]
        );
        assert_eq!(doc.cells().len(), 6);
        assert_eq!(doc.formula_cells().count(), 3);

        let b5 = doc
            .get(&SheetId::new("Sheet1"), &CellAddress::new(2, 5))
            .unwrap();
        assert_eq!(b5.formula.as_deref(), Some("=B4/2"));
        assert_eq!(b5.value, Some(Literal::Number(27.3)));
    }

    #[test]
    fn test_fallback_id_and_missing_sheets() {
        let doc = parse_document_str("sheets:\n  S1:\n    A1: 1\n", "calc").unwrap();
        assert_eq!(doc.id().as_str(), "calc");

        let err = parse_document_str("document: x\n", "calc").unwrap_err();
        assert!(matches!(err, CalcGraphError::Load(_)));
    }

    #[test]
    fn test_rejects_sequence_values() {
        let err = parse_document_str("sheets:\n  S1:\n    A1: [1, 2]\n", "calc").unwrap_err();
        assert!(err.to_string().contains("unsupported cell value"));
    }

    #[test]
    fn test_rejects_bad_address() {
        let err = parse_document_str("sheets:\n  S1:\n    A0: 1\n", "calc").unwrap_err();
        assert!(matches!(err, CalcGraphError::InvalidAddress(_)));
    }

    #[test]
    fn test_yaml_workbook_source() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "sheets:\n  Sheet1:\n    A1: 3\n").unwrap();
        let source = YamlWorkbook::new(file.path());
        let doc = source.load().unwrap();
        let stem = file.path().file_stem().unwrap().to_str().unwrap();
        assert_eq!(doc.id().as_str(), stem);
        assert_eq!(doc.cells().len(), 1);
    }

    #[test]
    fn test_memory_workbook_source() {
        let source = MemoryWorkbook {
            id: DocumentId::new("mem"),
            sheet_names: vec!["Sheet1".to_string()],
            cells: vec![RawCell::formula("Sheet1", "A1", "=1+1")],
        };
        let doc = source.load().unwrap();
        assert_eq!(doc.formula_cells().count(), 1);
    }
}
