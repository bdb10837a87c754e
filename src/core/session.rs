//! One analysis pass over one document
//!
//! A session owns everything it derives (metadata, graph, cycles, results),
//! so independent documents can be analyzed side by side without sharing
//! state.

use super::analyzer::{check_syntax, FormulaMetadata, SyntaxError};
use super::categories::{categorize, FormulaCategory};
use super::cycles::{cycle_members, detect_cycles, Cycle};
use super::evaluator::{evaluate_formula, EvalContext, EvalError, EvalOutcome};
use super::graph::DependencyGraph;
use super::integration::Advisory;
use super::meanings::{data_groups, parameter_meanings, DataGroup};
use super::validation::{validate, ValidationResult};
use crate::config::AnalyzerConfig;
use crate::types::{Cell, Document, Literal, QualifiedAddress, SheetId};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, HashMap};

/// A formula cell with everything derived from its text
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaRecord {
    pub address: QualifiedAddress,
    pub formula: String,
    /// `None` when the text lacks the `=` marker
    pub metadata: Option<FormulaMetadata>,
    pub syntax: Result<(), SyntaxError>,
    /// Text label on the same row, left of the formula
    pub label: Option<String>,
}

impl FormulaRecord {
    pub fn new(address: QualifiedAddress, formula: String, label: Option<String>) -> Self {
        let metadata = FormulaMetadata::analyze(&formula);
        let syntax = check_syntax(&formula);
        Self {
            address,
            formula,
            metadata,
            syntax,
            label,
        }
    }

    pub fn from_cell(document: &Document, cell: &Cell) -> Self {
        Self::new(
            document.qualify(&cell.sheet, cell.address),
            cell.formula.clone().unwrap_or_default(),
            document
                .label_for(&cell.sheet, &cell.address)
                .map(str::to_string),
        )
    }
}

pub struct AnalysisSession<'a, 'c> {
    document: &'a Document,
    config: &'c AnalyzerConfig,
}

impl<'a, 'c> AnalysisSession<'a, 'c> {
    pub fn new(document: &'a Document, config: &'c AnalyzerConfig) -> Self {
        Self { document, config }
    }

    /// Analyze, graph, validate, then evaluate every formula dependencies-first
    pub fn run(self) -> DocumentAnalysis<'a> {
        let document = self.document;

        let records: Vec<FormulaRecord> = document
            .formula_cells()
            .map(|cell| FormulaRecord::from_cell(document, cell))
            .collect();
        for record in &records {
            if let Some(metadata) = &record.metadata {
                tracing::debug!(
                    formula = %record.address,
                    kind = %metadata.formula_type,
                    score = metadata.complexity_score,
                    "analyzed"
                );
            }
        }

        let graph = DependencyGraph::build(
            document.id(),
            document.sheet_names(),
            records
                .iter()
                .filter_map(|r| r.metadata.as_ref().map(|m| (&r.address, m))),
        );
        let cycles = detect_cycles(&graph);
        let validation = validate(document, &records, &cycles);
        let (evaluations, context) = self.evaluate(&records, &cycles);

        let categories = records
            .iter()
            .map(|r| (r.address.clone(), categorize(r, self.config)))
            .filter(|(_, tags)| !tags.is_empty())
            .collect();

        tracing::info!(
            document = %document.id(),
            formulas = records.len(),
            valid = validation.valid_formulas.len(),
            errors = validation.error_formulas.len(),
            warnings = validation.warning_formulas.len(),
            cycles = cycles.len(),
            "analysis complete"
        );

        DocumentAnalysis {
            document,
            records,
            graph,
            cycles,
            validation,
            evaluations,
            context,
            categories,
        }
    }

    fn evaluate(&self, records: &[FormulaRecord], cycles: &[Cycle]) -> (Evaluations, EvalContext) {
        let document = self.document;
        let first_sheet = document
            .sheet_names()
            .first()
            .cloned()
            .unwrap_or_else(|| SheetId::new("Sheet1"));
        let mut ctx = EvalContext::new(document.id().clone(), first_sheet)
            .with_fallback(self.config.fallback_value)
            .with_sheets(document.sheet_names().iter().cloned());

        for cell in document.cells().iter().filter(|c| !c.is_formula()) {
            if let Some(value) = &cell.value {
                ctx.insert(document.qualify(&cell.sheet, cell.address), value.clone());
            }
        }

        // Formula cells stay unreadable until their own evaluation succeeds
        for record in records {
            ctx.mark_unresolved(record.address.clone());
        }

        let mut evaluations = Evaluations::new();

        for address in cycle_members(cycles) {
            evaluations.insert(
                address.clone(),
                Err(EvalError::UnresolvedReference(address.to_string())),
            );
        }
        for record in records {
            if let Err(err) = &record.syntax {
                evaluations.insert(
                    record.address.clone(),
                    Err(EvalError::MalformedExpression(err.to_string())),
                );
            }
        }

        for record in evaluation_order(document, records) {
            if evaluations.contains_key(&record.address) {
                continue;
            }
            ctx.set_current_sheet(record.address.sheet.clone());
            let result = evaluate_formula(&record.formula, &ctx, self.config.conditional_mode);
            match &result {
                Ok(outcome) => ctx.insert(record.address.clone(), outcome.value.clone()),
                Err(err) => {
                    tracing::debug!(formula = %record.address, error = %err, "evaluation failed");
                    ctx.mark_unresolved(record.address.clone());
                }
            }
            evaluations.insert(record.address.clone(), result);
        }

        (evaluations, ctx)
    }
}

/// Formulas ordered dependencies-first.
///
/// Unlike the reported graph, which keeps only range corners, the ordering
/// graph links a formula to every formula cell inside the ranges it reads.
fn evaluation_order<'r>(document: &Document, records: &'r [FormulaRecord]) -> Vec<&'r FormulaRecord> {
    let mut order_graph: DiGraph<usize, ()> = DiGraph::with_capacity(records.len(), 0);
    let nodes: Vec<_> = (0..records.len()).map(|i| order_graph.add_node(i)).collect();
    let by_address: HashMap<&QualifiedAddress, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (&r.address, i))
        .collect();

    for (i, record) in records.iter().enumerate() {
        let Some(metadata) = &record.metadata else {
            continue;
        };
        let sheet_of = |name: &Option<String>| match name {
            None => Some(record.address.sheet.clone()),
            Some(name) => document.resolve_sheet(name).cloned(),
        };

        for reference in &metadata.referenced_cells {
            let Some(sheet) = sheet_of(&reference.sheet) else {
                continue;
            };
            let target = document.qualify(&sheet, reference.address);
            if let Some(&j) = by_address.get(&target) {
                order_graph.update_edge(nodes[i], nodes[j], ());
            }
        }
        for range in &metadata.referenced_ranges {
            let Some(sheet) = sheet_of(&range.sheet) else {
                continue;
            };
            for (j, other) in records.iter().enumerate() {
                if other.address.sheet == sheet && range.contains(&other.address.cell) {
                    order_graph.update_edge(nodes[i], nodes[j], ());
                }
            }
        }
    }

    // tarjan_scc yields components dependencies-first for formula -> reference edges
    tarjan_scc(&order_graph)
        .into_iter()
        .flatten()
        .map(|node| &records[order_graph[node]])
        .collect()
}

pub type Evaluations = BTreeMap<QualifiedAddress, Result<EvalOutcome, EvalError>>;

/// Everything derived from one document
#[derive(Debug, Clone)]
pub struct DocumentAnalysis<'a> {
    document: &'a Document,
    records: Vec<FormulaRecord>,
    graph: DependencyGraph,
    cycles: Vec<Cycle>,
    validation: ValidationResult,
    evaluations: Evaluations,
    context: EvalContext,
    categories: BTreeMap<QualifiedAddress, Vec<Advisory<FormulaCategory>>>,
}

impl<'a> DocumentAnalysis<'a> {
    pub fn document(&self) -> &'a Document {
        self.document
    }

    /// Formula records in document order
    pub fn records(&self) -> &[FormulaRecord] {
        &self.records
    }

    pub fn record(&self, address: &QualifiedAddress) -> Option<&FormulaRecord> {
        self.records.iter().find(|r| &r.address == address)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }

    pub fn evaluations(&self) -> &Evaluations {
        &self.evaluations
    }

    pub fn evaluation(&self, address: &QualifiedAddress) -> Option<&Result<EvalOutcome, EvalError>> {
        self.evaluations.get(address)
    }

    /// The value of a cell: its literal, or its formula's result when that
    /// evaluated successfully.
    pub fn resolve(&self, address: &QualifiedAddress) -> Option<Literal> {
        self.context.get(address).cloned()
    }

    /// Formulas whose text or row label contains any of `keywords`
    pub fn formulas_referencing(&self, keywords: &[&str]) -> Vec<&FormulaRecord> {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        self.records
            .iter()
            .filter(|record| {
                let formula = record.formula.to_lowercase();
                let label = record.label.as_deref().unwrap_or_default().to_lowercase();
                keywords
                    .iter()
                    .any(|kw| formula.contains(kw.as_str()) || label.contains(kw.as_str()))
            })
            .collect()
    }

    /// Flat key → formula text
    pub fn formula_map(&self) -> BTreeMap<QualifiedAddress, String> {
        self.records
            .iter()
            .map(|r| (r.address.clone(), r.formula.clone()))
            .collect()
    }

    /// Advisory discipline tags, only for formulas that matched something
    pub fn categories(&self) -> &BTreeMap<QualifiedAddress, Vec<Advisory<FormulaCategory>>> {
        &self.categories
    }

    /// Physical meaning of labelled text cells
    pub fn parameter_meanings(&self) -> BTreeMap<QualifiedAddress, Advisory<&'static str>> {
        parameter_meanings(self.document)
    }

    /// Labelled text cells grouped by engineering data group
    pub fn data_groups(&self) -> BTreeMap<DataGroup, Vec<Advisory<QualifiedAddress>>> {
        data_groups(self.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentId, RawCell};

    fn qa(s: &str) -> QualifiedAddress {
        s.parse().unwrap()
    }

    fn beam() -> Document {
        Document::from_raw(
            DocumentId::new("beam"),
            vec!["Sheet1".to_string()],
            vec![
                RawCell::value("Sheet1", "A2", "Span length"),
                RawCell::value("Sheet1", "B2", 10.5),
                RawCell::value("Sheet1", "A3", "Load"),
                RawCell::value("Sheet1", "B3", 5.2),
                RawCell::value("Sheet1", "A4", "Bending moment"),
                RawCell::formula("Sheet1", "B4", "=B2*B3"),
                RawCell::formula("Sheet1", "B5", r#"=IF(B4>50,"OK","Check")"#),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_evaluates_in_dependency_order() {
        let doc = beam();
        let config = AnalyzerConfig::default();
        let analysis = AnalysisSession::new(&doc, &config).run();

        assert_eq!(
            analysis.resolve(&qa("beam#Sheet1!B4")),
            Some(Literal::Number(10.5 * 5.2))
        );
        assert_eq!(
            analysis.resolve(&qa("beam#Sheet1!B5")),
            Some(Literal::Text("OK".to_string()))
        );
        assert_eq!(analysis.validation().valid_formulas.len(), 2);
        assert!(analysis.cycles().is_empty());
    }

    #[test]
    fn test_formulas_referencing_label_and_text() {
        let doc = beam();
        let config = AnalyzerConfig::default();
        let analysis = AnalysisSession::new(&doc, &config).run();

        let moment: Vec<_> = analysis
            .formulas_referencing(&["MOMENT"])
            .into_iter()
            .map(|r| r.address.to_string())
            .collect();
        assert_eq!(moment, vec!["beam#Sheet1!B4"]);

        let by_text = analysis.formulas_referencing(&["b4>50"]);
        assert_eq!(by_text.len(), 1);
        assert!(analysis.formulas_referencing(&["scour"]).is_empty());
    }

    #[test]
    fn test_categories_and_formula_map() {
        let doc = beam();
        let config = AnalyzerConfig::default();
        let analysis = AnalysisSession::new(&doc, &config).run();

        let tags = &analysis.categories()[&qa("beam#Sheet1!B4")];
        assert_eq!(tags[0].value, FormulaCategory::Structural);
        assert_eq!(analysis.formula_map().len(), 2);
        assert_eq!(analysis.formula_map()[&qa("beam#Sheet1!B4")], "=B2*B3");
    }

    #[test]
    fn test_syntax_error_dependents_are_unresolved() {
        let doc = Document::from_raw(
            DocumentId::new("doc"),
            vec!["Sheet1".to_string()],
            vec![
                RawCell::formula("Sheet1", "A1", "=SUM(1,2"),
                RawCell::formula("Sheet1", "A2", "=A1*2"),
            ],
        )
        .unwrap();
        let config = AnalyzerConfig::default();
        let analysis = AnalysisSession::new(&doc, &config).run();

        assert!(matches!(
            analysis.evaluation(&qa("doc#Sheet1!A1")),
            Some(Err(EvalError::MalformedExpression(_)))
        ));
        assert_eq!(
            analysis.evaluation(&qa("doc#Sheet1!A2")),
            Some(&Err(EvalError::UnresolvedReference(
                "doc#Sheet1!A1".to_string()
            )))
        );
        assert_eq!(analysis.resolve(&qa("doc#Sheet1!A2")), None);
    }
}
