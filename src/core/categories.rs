//! Advisory engineering-discipline tags for formulas

use super::integration::{match_keyword, Advisory, MatchSource};
use super::session::FormulaRecord;
use crate::config::AnalyzerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaCategory {
    Structural,
    Hydraulic,
    Geotechnical,
    Material,
    Geometric,
}

impl FormulaCategory {
    pub const ALL: [FormulaCategory; 5] = [
        FormulaCategory::Structural,
        FormulaCategory::Hydraulic,
        FormulaCategory::Geotechnical,
        FormulaCategory::Material,
        FormulaCategory::Geometric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormulaCategory::Structural => "structural",
            FormulaCategory::Hydraulic => "hydraulic",
            FormulaCategory::Geotechnical => "geotechnical",
            FormulaCategory::Material => "material",
            FormulaCategory::Geometric => "geometric",
        }
    }

    pub fn default_keywords(&self) -> &'static [&'static str] {
        match self {
            FormulaCategory::Structural => {
                &["moment", "shear", "deflection", "stress", "reinforcement"]
            }
            FormulaCategory::Hydraulic => &["discharge", "velocity", "afflux", "scour", "regime"],
            FormulaCategory::Geotechnical => {
                &["bearing", "settlement", "earth pressure", "stability"]
            }
            FormulaCategory::Material => &["concrete", "steel", "grade", "density", "unit weight"],
            FormulaCategory::Geometric => &["span", "width", "length", "depth", "height", "area"],
        }
    }
}

impl fmt::Display for FormulaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag a formula by keyword over its row label, then its text.
/// At most one advisory per category.
pub fn categorize(record: &FormulaRecord, config: &AnalyzerConfig) -> Vec<Advisory<FormulaCategory>> {
    let mut tags = Vec::new();

    for (category, keywords) in &config.category_keywords {
        let by_label = record
            .label
            .as_deref()
            .and_then(|label| match_keyword(label, keywords))
            .map(|kw| (kw, MatchSource::Label));
        let hit = by_label.or_else(|| {
            match_keyword(&record.formula, keywords).map(|kw| (kw, MatchSource::FormulaText))
        });

        if let Some((keyword, source)) = hit {
            tags.push(Advisory::new(*category, keyword, source));
        }
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(formula: &str, label: Option<&str>) -> FormulaRecord {
        FormulaRecord::new(
            "doc#Sheet1!C2".parse().unwrap(),
            formula.to_string(),
            label.map(str::to_string),
        )
    }

    #[test]
    fn test_label_match() {
        let config = AnalyzerConfig::default();
        let tags = categorize(&record("=B2*B3", Some("Bending moment (kNm)")), &config);
        assert_eq!(
            tags,
            vec![Advisory::new(
                FormulaCategory::Structural,
                "moment",
                MatchSource::Label
            )]
        );
    }

    #[test]
    fn test_no_match_is_empty() {
        let config = AnalyzerConfig::default();
        assert!(categorize(&record("=A1+1", Some("Total")), &config).is_empty());
        assert!(categorize(&record("=A1+1", None), &config).is_empty());
    }

    #[test]
    fn test_several_categories() {
        let config = AnalyzerConfig::default();
        let tags = categorize(&record("=B2*B3", Some("Scour depth")), &config);
        let categories: Vec<_> = tags.iter().map(|t| t.value).collect();
        assert_eq!(
            categories,
            vec![FormulaCategory::Hydraulic, FormulaCategory::Geometric]
        );
    }
}
