//! Formula metadata and classification

use super::scanner::{scan, FormulaTokens};
use crate::types::{CellReference, Operator, RangeReference};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Coarse formula classification used by reports to group formulas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaType {
    Simple,
    Function,
    ComplexReference,
    ComplexArithmetic,
}

impl fmt::Display for FormulaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FormulaType::Simple => "simple",
            FormulaType::Function => "function",
            FormulaType::ComplexReference => "complex_reference",
            FormulaType::ComplexArithmetic => "complex_arithmetic",
        };
        f.write_str(name)
    }
}

/// Structured description of one formula
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaMetadata {
    pub raw: String,
    #[serde(serialize_with = "serialize_display_set")]
    pub referenced_cells: BTreeSet<CellReference>,
    #[serde(serialize_with = "serialize_display_set")]
    pub referenced_ranges: BTreeSet<RangeReference>,
    pub functions: BTreeSet<String>,
    pub operators: BTreeSet<Operator>,
    pub constants: Vec<f64>,
    pub formula_type: FormulaType,
    pub complexity_score: usize,
}

impl FormulaMetadata {
    /// Analyze formula text. Text without the leading `=` is a literal and yields `None`.
    pub fn analyze(formula: &str) -> Option<Self> {
        formula
            .starts_with('=')
            .then(|| Self::from_tokens(formula, scan(formula)))
    }

    pub fn from_tokens(raw: &str, tokens: FormulaTokens) -> Self {
        let referenced_cells: BTreeSet<_> = tokens.cells.into_iter().collect();
        let referenced_ranges: BTreeSet<_> = tokens.ranges.into_iter().collect();
        let functions: BTreeSet<_> = tokens.functions.into_iter().collect();
        let operators: BTreeSet<_> = tokens.operators.into_iter().collect();

        let formula_type = if !functions.is_empty() {
            FormulaType::Function
        } else if referenced_cells.len() > 5 || !referenced_ranges.is_empty() {
            FormulaType::ComplexReference
        } else if operators.len() > 3 {
            FormulaType::ComplexArithmetic
        } else {
            FormulaType::Simple
        };

        let complexity_score = referenced_cells.len()
            + 2 * referenced_ranges.len()
            + 3 * functions.len()
            + operators.len();

        Self {
            raw: raw.to_string(),
            referenced_cells,
            referenced_ranges,
            functions,
            operators,
            constants: tokens.constants,
            formula_type,
            complexity_score,
        }
    }

    pub fn reference_count(&self) -> usize {
        self.referenced_cells.len() + self.referenced_ranges.len()
    }
}

fn serialize_display_set<T, S>(set: &BTreeSet<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: fmt::Display,
    S: serde::Serializer,
{
    serializer.collect_seq(set.iter().map(ToString::to_string))
}

/// Why a formula failed the syntax check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyntaxError {
    #[error("formula does not start with '='")]
    MissingMarker,
    #[error("unbalanced parentheses at position {position}")]
    UnbalancedParentheses { position: usize },
    #[error("unterminated quote starting at position {position}")]
    UnterminatedQuote { position: usize },
    #[error("disallowed character '{character}' at position {position}")]
    DisallowedCharacter { character: char, position: usize },
}

/// Punctuation accepted outside quotes, besides ASCII alphanumerics and whitespace
const ALLOWED_PUNCTUATION: &str = "+-*/^().,!:<>=&$_";

/// Check delimiters and characters. Positions are character offsets into `formula`.
pub fn check_syntax(formula: &str) -> Result<(), SyntaxError> {
    if !formula.starts_with('=') {
        return Err(SyntaxError::MissingMarker);
    }

    let mut depth_stack = Vec::new();
    let mut chars = formula.chars().enumerate().skip(1).peekable();

    while let Some((position, c)) = chars.next() {
        match c {
            '"' | '\'' => {
                // Doubled quote escapes itself inside the literal
                let mut closed = false;
                while let Some((_, inner)) = chars.next() {
                    if inner == c {
                        if chars.peek().map(|(_, next)| *next) == Some(c) {
                            chars.next();
                        } else {
                            closed = true;
                            break;
                        }
                    }
                }
                if !closed {
                    return Err(SyntaxError::UnterminatedQuote { position });
                }
            }
            '(' => depth_stack.push(position),
            ')' => {
                if depth_stack.pop().is_none() {
                    return Err(SyntaxError::UnbalancedParentheses { position });
                }
            }
            c if c.is_ascii_alphanumeric() || c.is_whitespace() => {}
            c if ALLOWED_PUNCTUATION.contains(c) => {}
            character => {
                return Err(SyntaxError::DisallowedCharacter {
                    character,
                    position,
                })
            }
        }
    }

    match depth_stack.pop() {
        Some(position) => Err(SyntaxError::UnbalancedParentheses { position }),
        None => Ok(()),
    }
}
