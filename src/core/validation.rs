//! Per-formula validation

use super::analyzer::SyntaxError;
use super::cycles::{cycle_members, Cycle};
use super::session::FormulaRecord;
use crate::types::{CellAddress, Document, QualifiedAddress, SheetId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of validating every formula of one document.
///
/// Each formula lands in exactly one of `valid_formulas`, `error_formulas`
/// or `warning_formulas`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub total_formulas: usize,
    pub valid_formulas: BTreeSet<QualifiedAddress>,
    pub error_formulas: BTreeSet<QualifiedAddress>,
    pub warning_formulas: BTreeSet<QualifiedAddress>,
    pub syntax_errors: BTreeMap<QualifiedAddress, SyntaxError>,
    pub missing_references: BTreeMap<QualifiedAddress, Vec<QualifiedAddress>>,
    pub cycles: Vec<Cycle>,
}

impl ValidationResult {
    /// Share of formulas that validated cleanly, 0.0 for an empty document
    pub fn validation_rate(&self) -> f64 {
        if self.total_formulas == 0 {
            return 0.0;
        }
        self.valid_formulas.len() as f64 / self.total_formulas as f64
    }

    pub fn is_clean(&self) -> bool {
        self.error_formulas.is_empty() && self.warning_formulas.is_empty()
    }
}

/// Classify each formula: syntax errors first, then cycle membership, then
/// references to cells the document does not hold.
pub fn validate(document: &Document, records: &[FormulaRecord], cycles: &[Cycle]) -> ValidationResult {
    let on_cycle = cycle_members(cycles);
    let mut result = ValidationResult {
        total_formulas: records.len(),
        cycles: cycles.to_vec(),
        ..Default::default()
    };

    for record in records {
        let address = record.address.clone();

        if let Err(err) = &record.syntax {
            tracing::warn!(formula = %address, error = %err, "syntax error");
            result.syntax_errors.insert(address.clone(), err.clone());
            result.error_formulas.insert(address);
            continue;
        }

        if on_cycle.contains(&address) {
            result.error_formulas.insert(address);
            continue;
        }

        let missing = missing_references(document, record);
        if !missing.is_empty() {
            result.warning_formulas.insert(address.clone());
            result.missing_references.insert(address, missing);
            continue;
        }

        result.valid_formulas.insert(address);
    }

    result
}

/// Single-cell references that point at no cell of the document, plus the
/// corners of ranges on sheets the document does not declare. Absent cells
/// inside a range on a known sheet are blanks, not missing.
fn missing_references(document: &Document, record: &FormulaRecord) -> Vec<QualifiedAddress> {
    let Some(metadata) = &record.metadata else {
        return Vec::new();
    };
    let unknown_sheet = |name: &str, cell: CellAddress| {
        QualifiedAddress::new(document.id().clone(), SheetId::new(name), cell)
    };

    let cells = metadata.referenced_cells.iter().filter_map(|reference| {
        let sheet = match &reference.sheet {
            None => Some(record.address.sheet.clone()),
            Some(name) => document.resolve_sheet(name).cloned(),
        };
        match sheet {
            Some(sheet) if document.contains(&sheet, &reference.address) => None,
            Some(sheet) => Some(document.qualify(&sheet, reference.address)),
            None => Some(unknown_sheet(
                reference.sheet.as_deref().unwrap_or_default(),
                reference.address,
            )),
        }
    });
    let corners = metadata
        .referenced_ranges
        .iter()
        .flat_map(|range| range.corners())
        .filter_map(|corner| match &corner.sheet {
            Some(name) if document.resolve_sheet(name).is_none() => {
                Some(unknown_sheet(name, corner.address))
            }
            _ => None,
        });

    let mut missing: Vec<QualifiedAddress> = cells.chain(corners).collect();
    missing.dedup();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentId, RawCell};

    fn document(cells: Vec<RawCell>) -> Document {
        Document::from_raw(
            DocumentId::new("doc"),
            vec!["Sheet1".to_string(), "Sheet2".to_string()],
            cells,
        )
        .unwrap()
    }

    fn records(doc: &Document) -> Vec<FormulaRecord> {
        doc.formula_cells()
            .map(|cell| FormulaRecord::from_cell(doc, cell))
            .collect()
    }

    #[test]
    fn test_classification_order() {
        let doc = document(vec![
            RawCell::value("Sheet1", "A1", 2.0),
            RawCell::formula("Sheet1", "B1", "=A1*2"),
            RawCell::formula("Sheet1", "C1", "=SUM(A1"),
            RawCell::formula("Sheet1", "D1", "=Z99+1"),
            RawCell::formula("Sheet1", "E1", "=Nowhere!A1"),
        ]);
        let result = validate(&doc, &records(&doc), &[]);

        assert_eq!(result.total_formulas, 4);
        assert_eq!(result.valid_formulas.len(), 1);
        assert_eq!(result.error_formulas.len(), 1);
        assert_eq!(result.warning_formulas.len(), 2);
        assert!(matches!(
            result.syntax_errors.values().next(),
            Some(SyntaxError::UnbalancedParentheses { .. })
        ));
        let d1: QualifiedAddress = "doc#Sheet1!D1".parse().unwrap();
        let z99: QualifiedAddress = "doc#Sheet1!Z99".parse().unwrap();
        assert_eq!(result.missing_references[&d1], vec![z99]);
        assert_eq!(result.validation_rate(), 0.25);
        assert!(!result.is_clean());
    }

    #[test]
    fn test_empty_document_rate() {
        let doc = document(vec![]);
        let result = validate(&doc, &[], &[]);
        assert_eq!(result.validation_rate(), 0.0);
        assert!(result.is_clean());
    }

    #[test]
    fn test_range_on_unknown_sheet_warns() {
        let doc = document(vec![
            RawCell::formula("Sheet1", "A1", "=SUM(Nowhere!B1:B3)"),
            RawCell::formula("Sheet1", "A2", "=SUM(Sheet2!B1:B3)"),
        ]);
        let result = validate(&doc, &records(&doc), &[]);

        let a1: QualifiedAddress = "doc#Sheet1!A1".parse().unwrap();
        let a2: QualifiedAddress = "doc#Sheet1!A2".parse().unwrap();
        assert_eq!(result.warning_formulas, BTreeSet::from([a1.clone()]));
        assert_eq!(result.valid_formulas, BTreeSet::from([a2]));
        let missing: Vec<String> = result.missing_references[&a1]
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(missing, vec!["doc#Nowhere!B1", "doc#Nowhere!B3"]);
    }
}
