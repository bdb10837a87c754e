//! Cross-document parameter index
//!
//! Documents never share addresses, so they are linked by what their labels
//! say. Every match is an [`Advisory`]: a hint carrying the keyword that
//! produced it, never an authoritative dependency.

use super::session::DocumentAnalysis;
use crate::config::AnalyzerConfig;
use crate::types::{Literal, QualifiedAddress};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Engineering parameters shared between calculation documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterName {
    SpanLength,
    BridgeWidth,
    DesignLoad,
    ConcreteGrade,
    SteelGrade,
    #[serde(rename = "hfl")]
    HighFloodLevel,
    Discharge,
    BearingCapacity,
    UnitWeight,
}

impl ParameterName {
    pub const ALL: [ParameterName; 9] = [
        ParameterName::SpanLength,
        ParameterName::BridgeWidth,
        ParameterName::DesignLoad,
        ParameterName::ConcreteGrade,
        ParameterName::SteelGrade,
        ParameterName::HighFloodLevel,
        ParameterName::Discharge,
        ParameterName::BearingCapacity,
        ParameterName::UnitWeight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterName::SpanLength => "span_length",
            ParameterName::BridgeWidth => "bridge_width",
            ParameterName::DesignLoad => "design_load",
            ParameterName::ConcreteGrade => "concrete_grade",
            ParameterName::SteelGrade => "steel_grade",
            ParameterName::HighFloodLevel => "hfl",
            ParameterName::Discharge => "discharge",
            ParameterName::BearingCapacity => "bearing_capacity",
            ParameterName::UnitWeight => "unit_weight",
        }
    }

    /// Label fragments that name this parameter, lowercase
    pub fn default_keywords(&self) -> &'static [&'static str] {
        match self {
            ParameterName::SpanLength => &["span length", "effective span"],
            ParameterName::BridgeWidth => &["bridge width", "total width"],
            ParameterName::DesignLoad => &["design load"],
            ParameterName::ConcreteGrade => &["concrete grade"],
            ParameterName::SteelGrade => &["steel grade"],
            ParameterName::HighFloodLevel => &["hfl", "high flood level"],
            ParameterName::Discharge => &["discharge"],
            ParameterName::BearingCapacity => &["bearing capacity", "safe bearing"],
            ParameterName::UnitWeight => &["unit weight", "soil density"],
        }
    }
}

impl fmt::Display for ParameterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a keyword match was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    FormulaText,
    Label,
    CellText,
    /// The value cell to the right of a matching label
    Neighbor,
}

/// A keyword-derived hint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Advisory<T> {
    pub value: T,
    pub matched_keyword: String,
    pub source: MatchSource,
}

impl<T> Advisory<T> {
    pub fn new(value: T, matched_keyword: impl Into<String>, source: MatchSource) -> Self {
        Self {
            value,
            matched_keyword: matched_keyword.into(),
            source,
        }
    }
}

/// First keyword (lowercase) contained in `text`, case-insensitively
pub(crate) fn match_keyword<'k>(text: &str, keywords: &'k [String]) -> Option<&'k str> {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .map(String::as_str)
        .find(|kw| !kw.is_empty() && haystack.contains(&kw.to_lowercase()))
}

/// Parameter → candidate cells across documents
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct IntegrationIndex {
    points: BTreeMap<ParameterName, Vec<Advisory<QualifiedAddress>>>,
}

impl IntegrationIndex {
    /// Scan every text cell of every analysis for parameter keywords.
    /// Parameters seen in only one location are dropped.
    pub fn build(analyses: &[DocumentAnalysis<'_>], config: &AnalyzerConfig) -> Self {
        let mut points: BTreeMap<ParameterName, Vec<Advisory<QualifiedAddress>>> = BTreeMap::new();

        for analysis in analyses {
            let document = analysis.document();
            for cell in document.cells().iter().filter(|c| !c.is_formula()) {
                let Some(text) = cell.value.as_ref().and_then(Literal::as_text) else {
                    continue;
                };

                for (parameter, keywords) in &config.parameter_keywords {
                    let Some(keyword) = match_keyword(text, keywords) else {
                        continue;
                    };
                    let neighbor = cell.address.right();
                    let advisory = if document.contains(&cell.sheet, &neighbor) {
                        Advisory::new(
                            document.qualify(&cell.sheet, neighbor),
                            keyword,
                            MatchSource::Neighbor,
                        )
                    } else {
                        Advisory::new(
                            document.qualify(&cell.sheet, cell.address),
                            keyword,
                            MatchSource::CellText,
                        )
                    };
                    let entry = points.entry(*parameter).or_default();
                    if !entry.iter().any(|a| a.value == advisory.value) {
                        entry.push(advisory);
                    }
                }
            }
        }

        points.retain(|parameter, candidates| {
            let shared = candidates.len() > 1;
            if shared {
                tracing::debug!(%parameter, locations = candidates.len(), "integration point");
            }
            shared
        });

        Self { points }
    }

    pub fn get(&self, parameter: ParameterName) -> Option<&[Advisory<QualifiedAddress>]> {
        self.points.get(&parameter).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParameterName, &Vec<Advisory<QualifiedAddress>>)> {
        self.points.iter()
    }

    pub fn parameters(&self) -> impl Iterator<Item = ParameterName> + '_ {
        self.points.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
