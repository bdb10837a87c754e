//! Analyzer configuration
//!
//! Every field has a default, so a config file only needs the keys it changes.
//! Keyword maps are merged entry by entry: a listed parameter or category
//! replaces its default keywords and the rest keep theirs.
//!
//! ```yaml
//! conditional_mode: short_circuit
//! fallback_value: 0
//! parameter_keywords:
//!   span_length: ["span length", "effective span"]
//! ```

use crate::core::categories::FormulaCategory;
use crate::core::evaluator::ConditionalMode;
use crate::core::integration::ParameterName;
use crate::error::{CalcGraphError, CalcGraphResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// How IF treats its unselected branch
    pub conditional_mode: ConditionalMode,
    /// Value used for references missing from the document
    pub fallback_value: f64,
    pub parameter_keywords: BTreeMap<ParameterName, Vec<String>>,
    pub category_keywords: BTreeMap<FormulaCategory, Vec<String>>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            conditional_mode: ConditionalMode::default(),
            fallback_value: 0.0,
            parameter_keywords: ParameterName::ALL
                .into_iter()
                .map(|p| (p, to_owned(p.default_keywords())))
                .collect(),
            category_keywords: FormulaCategory::ALL
                .into_iter()
                .map(|c| (c, to_owned(c.default_keywords())))
                .collect(),
        }
    }
}

fn to_owned(keywords: &[&str]) -> Vec<String> {
    keywords.iter().map(|kw| kw.to_string()).collect()
}

impl AnalyzerConfig {
    pub fn from_yaml_str(yaml: &str) -> CalcGraphResult<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.fill_default_keywords();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> CalcGraphResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    fn fill_default_keywords(&mut self) {
        for parameter in ParameterName::ALL {
            self.parameter_keywords
                .entry(parameter)
                .or_insert_with(|| to_owned(parameter.default_keywords()));
        }
        for category in FormulaCategory::ALL {
            self.category_keywords
                .entry(category)
                .or_insert_with(|| to_owned(category.default_keywords()));
        }
    }

    fn validate(&self) -> CalcGraphResult<()> {
        if !self.fallback_value.is_finite() {
            return Err(CalcGraphError::Config(format!(
                "fallback_value must be finite, got {}",
                self.fallback_value
            )));
        }
        let empty = self
            .parameter_keywords
            .iter()
            .flat_map(|(p, kws)| kws.iter().map(move |kw| (p.as_str(), kw)))
            .chain(
                self.category_keywords
                    .iter()
                    .flat_map(|(c, kws)| kws.iter().map(move |kw| (c.as_str(), kw))),
            )
            .find(|(_, kw)| kw.trim().is_empty());
        if let Some((owner, _)) = empty {
            return Err(CalcGraphError::Config(format!(
                "empty keyword for '{}'",
                owner
            )));
        }
        Ok(())
    }
}
