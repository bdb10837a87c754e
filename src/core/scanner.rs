//! Reference scanner
//!
//! A sequential pattern scan over formula text (not a grammar). Recognized
//! reference spans are blanked out of a working copy before the next pattern
//! runs, so the corners of `A1:B4` are never counted again as lone cells.
//! Scanning never fails: fragments that match nothing are simply dropped.

use crate::types::{CellAddress, CellReference, Operator, RangeReference};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// `"..."` string literals, with `""` as an escaped quote
static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r#""(?:[^"]|"")*""#).unwrap());

/// `Sheet1!A1`, `'My Sheet'!$A$1:$B$4`
static QUALIFIED_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:'((?:[^']|'')+)'|([A-Za-z_][A-Za-z0-9_.]*))!(\$?[A-Z]{1,3}\$?\d+)(?::(\$?[A-Z]{1,3}\$?\d+))?\b",
    )
    .unwrap()
});

/// `A1:B4`
static RANGE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?\b([A-Z]{1,3}\$?\d+):\$?([A-Z]{1,3}\$?\d+)\b").unwrap());

/// `A1`, `$AB$12`
static CELL_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$?\b([A-Z]{1,3}\$?\d+)\b").unwrap());

/// Function heads, operators, numbers and leftover identifiers, left to right.
/// One alternation keeps `1E-5` a number instead of `1`, `E`, `-`, `5`.
static TAIL_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<func>[A-Za-z_][A-Za-z0-9_.]*)\s*\(|(?P<num>(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)|(?P<op><=|>=|<>|[-+*/^&<>=])|(?P<ident>[A-Za-z_][A-Za-z0-9_.]*)",
    )
    .unwrap()
});

/// Raw token lists extracted from one formula, before classification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaTokens {
    /// Single-cell references, bare and qualified
    pub cells: Vec<CellReference>,
    /// Range references, bare and qualified
    pub ranges: Vec<RangeReference>,
    /// Function names, uppercased
    pub functions: Vec<String>,
    pub operators: Vec<Operator>,
    pub constants: Vec<f64>,
}

impl FormulaTokens {
    pub fn has_references(&self) -> bool {
        !self.cells.is_empty() || !self.ranges.is_empty()
    }
}

/// Scan a formula. A leading `=` marker is stripped if present.
pub fn scan(formula: &str) -> FormulaTokens {
    let body = formula.strip_prefix('=').unwrap_or(formula);
    let mut tokens = FormulaTokens::default();

    let mut work = mask_all(body, &STRING_LITERAL);

    // Qualified references
    let mut spans = Vec::new();
    for caps in QUALIFIED_REF.captures_iter(&work) {
        let sheet = caps
            .get(1)
            .map(|m| m.as_str().replace("''", "'"))
            .or_else(|| caps.get(2).map(|m| m.as_str().to_string()));
        let (Some(sheet), Some(start)) = (sheet, parse_cell(&caps, 3)) else {
            continue;
        };
        match caps.get(4) {
            Some(_) => {
                if let Some(end) = parse_cell(&caps, 4) {
                    tokens.ranges.push(RangeReference {
                        sheet: Some(sheet),
                        start,
                        end,
                    });
                }
            }
            None => tokens.cells.push(CellReference::qualified(sheet, start)),
        }
        if let Some(m) = caps.get(0) {
            spans.push(m.range());
        }
    }
    mask_spans(&mut work, &spans);

    // Bare ranges
    let mut spans = Vec::new();
    for caps in RANGE_REF.captures_iter(&work) {
        if let (Some(start), Some(end)) = (parse_cell(&caps, 1), parse_cell(&caps, 2)) {
            tokens.ranges.push(RangeReference {
                sheet: None,
                start,
                end,
            });
        }
        if let Some(m) = caps.get(0) {
            spans.push(m.range());
        }
    }
    mask_spans(&mut work, &spans);

    // Bare cells
    let mut spans = Vec::new();
    for caps in CELL_REF.captures_iter(&work) {
        let Some(m) = caps.get(0) else { continue };
        // `LOG10(` is a function head, not a cell
        if work[m.end()..].trim_start().starts_with('(') {
            continue;
        }
        if let Some(address) = parse_cell(&caps, 1) {
            tokens.cells.push(CellReference::local(address));
        }
        spans.push(m.range());
    }
    mask_spans(&mut work, &spans);

    for caps in TAIL_TOKENS.captures_iter(&work) {
        if let Some(name) = caps.name("func") {
            tokens.functions.push(name.as_str().to_uppercase());
        } else if let Some(num) = caps.name("num") {
            if let Ok(n) = num.as_str().parse::<f64>() {
                tokens.constants.push(n);
            }
        } else if let Some(op) = caps.name("op") {
            if let Some(op) = Operator::from_symbol(op.as_str()) {
                tokens.operators.push(op);
            }
        }
    }

    tokens
}

fn parse_cell(caps: &Captures<'_>, group: usize) -> Option<CellAddress> {
    caps.get(group).and_then(|m| m.as_str().parse().ok())
}

fn mask_all(text: &str, pattern: &Regex) -> String {
    let spans: Vec<_> = pattern.find_iter(text).map(|m| m.range()).collect();
    let mut work = text.to_string();
    mask_spans(&mut work, &spans);
    work
}

/// Blank out byte spans with spaces, keeping every other offset stable
fn mask_spans(work: &mut String, spans: &[std::ops::Range<usize>]) {
    for span in spans {
        let blank = " ".repeat(span.len());
        work.replace_range(span.clone(), &blank);
    }
}
