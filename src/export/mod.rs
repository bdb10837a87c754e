//! Serializable analysis records
//!
//! Addresses are written as flat `document#Sheet!A1` keys, so a formula map
//! written here can be read back with [`import_formula_map`].

use crate::core::{
    Advisory, BatchAnalysis, DataGroup, DependencyEdge, DocumentAnalysis, EdgeKind, EvalError,
    FormulaCategory, FormulaMetadata, IntegrationIndex, ValidationResult,
};
use crate::error::CalcGraphResult;
use crate::types::{DocumentId, Literal, QualifiedAddress, SheetId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportMetadata {
    pub document: DocumentId,
    /// RFC 3339 timestamp
    pub export_date: String,
    pub total_sheets: usize,
    pub sheet_names: Vec<SheetId>,
    pub total_formulas: usize,
}

/// How one formula evaluated
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationRecord {
    Value {
        value: Literal,
        /// References that fell back to the default value
        #[serde(skip_serializing_if = "BTreeSet::is_empty")]
        defaulted: BTreeSet<QualifiedAddress>,
    },
    Error {
        error: EvalError,
    },
}

/// Everything known about one document, ready for JSON or YAML
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentExport {
    pub metadata: ExportMetadata,
    pub formulas: BTreeMap<QualifiedAddress, String>,
    pub analysis: BTreeMap<QualifiedAddress, FormulaMetadata>,
    pub validation: ValidationResult,
    pub dependencies: Vec<DependencyEdge>,
    pub sheet_dependencies: BTreeMap<SheetId, BTreeSet<SheetId>>,
    pub cycles: Vec<Vec<QualifiedAddress>>,
    pub evaluations: BTreeMap<QualifiedAddress, EvaluationRecord>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<QualifiedAddress, Vec<Advisory<FormulaCategory>>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameter_meanings: BTreeMap<QualifiedAddress, Advisory<&'static str>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data_groups: BTreeMap<DataGroup, Vec<Advisory<QualifiedAddress>>>,
}

impl DocumentExport {
    pub fn from_analysis(analysis: &DocumentAnalysis<'_>) -> Self {
        let document = analysis.document();

        let evaluations = analysis
            .evaluations()
            .iter()
            .map(|(address, result)| {
                let record = match result {
                    Ok(outcome) => EvaluationRecord::Value {
                        value: outcome.value.clone(),
                        defaulted: outcome.defaulted.clone(),
                    },
                    Err(error) => EvaluationRecord::Error {
                        error: error.clone(),
                    },
                };
                (address.clone(), record)
            })
            .collect();

        Self {
            metadata: ExportMetadata {
                document: document.id().clone(),
                export_date: chrono::Utc::now().to_rfc3339(),
                total_sheets: document.sheet_names().len(),
                sheet_names: document.sheet_names().to_vec(),
                total_formulas: analysis.records().len(),
            },
            formulas: analysis.formula_map(),
            analysis: analysis
                .records()
                .iter()
                .filter_map(|r| r.metadata.clone().map(|m| (r.address.clone(), m)))
                .collect(),
            validation: analysis.validation().clone(),
            dependencies: analysis.graph().edges(),
            sheet_dependencies: analysis.graph().sheet_dependencies(),
            cycles: analysis
                .cycles()
                .iter()
                .map(|c| c.path().to_vec())
                .collect(),
            evaluations,
            categories: analysis.categories().clone(),
            parameter_meanings: analysis.parameter_meanings(),
            data_groups: analysis.data_groups(),
        }
    }

    pub fn to_json_string(&self) -> CalcGraphResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml_string(&self) -> CalcGraphResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn write_json(&self, path: &Path) -> CalcGraphResult<()> {
        write_file(path, self.to_json_string()?)
    }

    pub fn write_yaml(&self, path: &Path) -> CalcGraphResult<()> {
        write_file(path, self.to_yaml_string()?)
    }
}

/// Formulas and integration points across a whole batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MasterFormulaMapping {
    pub generated_at: String,
    pub documents: Vec<DocumentId>,
    pub total_formulas: usize,
    pub formulas: BTreeMap<QualifiedAddress, String>,
    pub integration_points: IntegrationIndex,
    /// Advisory cross-document edges only
    pub integration_edges: Vec<DependencyEdge>,
}

impl MasterFormulaMapping {
    pub fn from_batch(batch: &BatchAnalysis<'_>) -> Self {
        let formulas: BTreeMap<_, _> = batch
            .documents
            .iter()
            .flat_map(|analysis| analysis.formula_map())
            .collect();

        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            documents: batch
                .documents
                .iter()
                .map(|a| a.document().id().clone())
                .collect(),
            total_formulas: formulas.len(),
            formulas,
            integration_points: batch.integration.clone(),
            integration_edges: batch
                .integration_graph
                .edges()
                .into_iter()
                .filter(|e| matches!(e.kind, EdgeKind::Integration(_)))
                .collect(),
        }
    }

    pub fn to_json_string(&self) -> CalcGraphResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> CalcGraphResult<()> {
        write_file(path, self.to_json_string()?)
    }
}

#[derive(Deserialize)]
struct FormulaMapRecord {
    formulas: BTreeMap<QualifiedAddress, String>,
}

/// Read the formula map back out of an exported JSON record.
/// Both [`DocumentExport`] and [`MasterFormulaMapping`] output are accepted.
pub fn import_formula_map(json: &str) -> CalcGraphResult<BTreeMap<QualifiedAddress, String>> {
    let record: FormulaMapRecord = serde_json::from_str(json)?;
    Ok(record.formulas)
}

fn write_file(path: &Path, content: String) -> CalcGraphResult<()> {
    fs::write(path, content)?;
    tracing::info!(path = %path.display(), "export written");
    Ok(())
}
