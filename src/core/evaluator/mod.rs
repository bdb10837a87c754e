//! Safe formula evaluator
//!
//! Formula text is tokenized and parsed into a typed AST, then interpreted
//! over a closed set of operators and functions. References are read from an
//! [`EvalContext`]; nothing else in the host is reachable.

mod functions;
pub mod parser;
pub mod tokenizer;

pub use functions::Function;
pub use parser::{parse_formula, Expr, UnaryOperator};

use crate::types::{
    CellAddress, CellReference, DocumentId, Literal, Operator, QualifiedAddress, RangeReference,
    SheetId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// How IF treats the branch it does not select
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalMode {
    /// Both branches are evaluated before the condition is applied; an error
    /// in either branch is the result.
    #[default]
    Eager,
    /// Only the selected branch is evaluated.
    ShortCircuit,
}

/// Typed evaluation failure, always returned as a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EvalError {
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),
    #[error("unsupported function: {0}")]
    UnsupportedFunction(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("malformed expression: {0}")]
    MalformedExpression(String),
}

impl EvalError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        EvalError::MalformedExpression(message.into())
    }
}

/// Intermediate value; arrays only exist as function arguments
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Number(f64),
    Text(String),
    Boolean(bool),
    Array(Vec<Value>),
}

impl Value {
    fn to_number(&self) -> Result<f64, EvalError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| EvalError::malformed(format!("expected a number, found \"{}\"", s))),
            Value::Array(_) => Err(EvalError::malformed("range used where a number is expected")),
        }
    }

    fn to_bool(&self) -> Result<bool, EvalError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
            Value::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
            Value::Text(s) => Err(EvalError::malformed(format!(
                "expected a logical value, found \"{}\"",
                s
            ))),
            Value::Array(_) => Err(EvalError::malformed("range used where a logical is expected")),
        }
    }

    fn to_text(&self) -> Result<String, EvalError> {
        match self {
            Value::Array(_) => Err(EvalError::malformed("range used where text is expected")),
            other => Ok(other.clone().into_literal()?.to_string()),
        }
    }

    fn into_literal(self) -> Result<Literal, EvalError> {
        match self {
            Value::Number(n) if !n.is_finite() => {
                Err(EvalError::malformed("result is not a finite number"))
            }
            Value::Number(n) => Ok(Literal::Number(n)),
            Value::Text(s) => Ok(Literal::Text(s)),
            Value::Boolean(b) => Ok(Literal::Boolean(b)),
            Value::Array(_) => Err(EvalError::malformed("range used outside a function")),
        }
    }
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Number(n) => Value::Number(*n),
            Literal::Text(s) => Value::Text(s.clone()),
            Literal::Boolean(b) => Value::Boolean(*b),
        }
    }
}

/// Resolved cell values visible to one evaluation pass
#[derive(Debug, Clone)]
pub struct EvalContext {
    document: DocumentId,
    sheet: SheetId,
    sheets: Vec<SheetId>,
    values: HashMap<QualifiedAddress, Literal>,
    unresolved: HashSet<QualifiedAddress>,
    fallback: f64,
}

impl EvalContext {
    /// Empty context; bare references resolve to `document#sheet`
    pub fn new(document: DocumentId, sheet: SheetId) -> Self {
        Self {
            document,
            sheets: vec![sheet.clone()],
            sheet,
            values: HashMap::new(),
            unresolved: HashSet::new(),
            fallback: 0.0,
        }
    }

    /// Context for a standalone sheet (document id `workbook`)
    pub fn for_sheet(sheet: &str) -> Self {
        Self::new(DocumentId::new("workbook"), SheetId::new(sheet))
    }

    pub fn with_fallback(mut self, fallback: f64) -> Self {
        self.fallback = fallback;
        self
    }

    /// Declare the sheets qualified references may name
    pub fn with_sheets(mut self, sheets: impl IntoIterator<Item = SheetId>) -> Self {
        for sheet in sheets {
            if !self.sheets.contains(&sheet) {
                self.sheets.push(sheet);
            }
        }
        self
    }

    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    pub fn sheet(&self) -> &SheetId {
        &self.sheet
    }

    /// Switch the sheet bare references resolve against
    pub fn set_current_sheet(&mut self, sheet: SheetId) {
        if !self.sheets.contains(&sheet) {
            self.sheets.push(sheet.clone());
        }
        self.sheet = sheet;
    }

    pub fn insert(&mut self, address: QualifiedAddress, value: Literal) {
        self.unresolved.remove(&address);
        self.values.insert(address, value);
    }

    /// Insert by reference text (`B3` or `Sheet2!B3`), relative to the current sheet.
    /// A sheet named here becomes known to the context.
    pub fn set(&mut self, reference: &str, value: impl Into<Literal>) -> crate::CalcGraphResult<()> {
        let address = match reference.rsplit_once('!') {
            Some((sheet, cell)) => {
                let sheet = self.sheet_named(sheet.trim_matches('\''));
                if !self.sheets.contains(&sheet) {
                    self.sheets.push(sheet.clone());
                }
                QualifiedAddress::new(self.document.clone(), sheet, cell.parse()?)
            }
            None => self.local(reference.parse()?),
        };
        self.insert(address, value.into());
        Ok(())
    }

    /// Mark a cell whose value must not be read (cycle member, failed formula)
    pub fn mark_unresolved(&mut self, address: QualifiedAddress) {
        self.values.remove(&address);
        self.unresolved.insert(address);
    }

    pub fn get(&self, address: &QualifiedAddress) -> Option<&Literal> {
        self.values.get(address)
    }

    pub fn is_unresolved(&self, address: &QualifiedAddress) -> bool {
        self.unresolved.contains(address)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn local(&self, cell: CellAddress) -> QualifiedAddress {
        QualifiedAddress::new(self.document.clone(), self.sheet.clone(), cell)
    }

    fn knows_sheet(&self, name: &str) -> bool {
        self.sheets
            .iter()
            .any(|s| s.as_str().eq_ignore_ascii_case(name))
    }

    fn sheet_named(&self, name: &str) -> SheetId {
        self.sheets
            .iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| SheetId::new(name))
    }

    fn qualify(&self, reference: &CellReference) -> QualifiedAddress {
        match &reference.sheet {
            Some(sheet) => QualifiedAddress::new(
                self.document.clone(),
                self.sheet_named(sheet),
                reference.address,
            ),
            None => self.local(reference.address),
        }
    }
}

/// A successful evaluation plus the references that fell back to the default
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalOutcome {
    pub value: Literal,
    pub defaulted: BTreeSet<QualifiedAddress>,
}

impl EvalOutcome {
    /// True when at least one reference was missing and the fallback was used
    pub fn is_defaulted(&self) -> bool {
        !self.defaulted.is_empty()
    }
}

/// Evaluate formula text against a context.
///
/// Unsupported functions are rejected before anything is evaluated.
pub fn evaluate_formula(
    formula: &str,
    ctx: &EvalContext,
    mode: ConditionalMode,
) -> Result<EvalOutcome, EvalError> {
    let expr = parse_formula(formula).map_err(|e| EvalError::malformed(e.to_string()))?;
    evaluate_expr(&expr, ctx, mode)
}

/// Evaluate an already parsed expression
pub fn evaluate_expr(
    expr: &Expr,
    ctx: &EvalContext,
    mode: ConditionalMode,
) -> Result<EvalOutcome, EvalError> {
    if let Some(name) = expr
        .function_names()
        .into_iter()
        .find(|name| Function::from_name(name).is_none())
    {
        return Err(EvalError::UnsupportedFunction(name.to_string()));
    }

    let mut evaluator = Evaluator {
        ctx,
        mode,
        defaulted: BTreeSet::new(),
    };
    let value = evaluator.eval(expr)?.into_literal()?;

    Ok(EvalOutcome {
        value,
        defaulted: evaluator.defaulted,
    })
}

pub(crate) struct Evaluator<'a> {
    ctx: &'a EvalContext,
    mode: ConditionalMode,
    defaulted: BTreeSet<QualifiedAddress>,
}

impl Evaluator<'_> {
    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Text(s) => Ok(Value::Text(s.clone())),
            Expr::Boolean(b) => Ok(Value::Boolean(*b)),
            Expr::Reference(reference) => self.resolve_cell(reference),
            Expr::Range(range) => self.resolve_range(range),
            Expr::FunctionCall { name, args } => {
                let function = Function::from_name(name)
                    .ok_or_else(|| EvalError::UnsupportedFunction(name.clone()))?;
                self.call(function, args)
            }
            Expr::BinaryOp { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary_op(*op, &left, &right)
            }
            Expr::UnaryOp { op, operand } => {
                let n = self.eval(operand)?.to_number()?;
                Ok(Value::Number(match op {
                    UnaryOperator::Neg => -n,
                    UnaryOperator::Plus => n,
                }))
            }
        }
    }

    pub(crate) fn mode(&self) -> ConditionalMode {
        self.mode
    }

    fn resolve_cell(&mut self, reference: &CellReference) -> Result<Value, EvalError> {
        let address = self.ctx.qualify(reference);
        if self.ctx.is_unresolved(&address) {
            return Err(EvalError::UnresolvedReference(address.to_string()));
        }
        match self.ctx.get(&address) {
            Some(literal) => Ok(Value::from(literal)),
            None => {
                tracing::debug!(%address, "reference missing from context, using fallback");
                self.defaulted.insert(address);
                Ok(Value::Number(self.ctx.fallback))
            }
        }
    }

    /// Cells of the rectangle that exist in the context, row by row.
    /// Absent cells are blanks and are skipped. A range on an undeclared
    /// sheet is empty and its corners count as defaulted.
    fn resolve_range(&mut self, range: &RangeReference) -> Result<Value, EvalError> {
        let ctx = self.ctx;
        let corners = range.corners();
        if let Some(name) = &range.sheet {
            if !ctx.knows_sheet(name) {
                for corner in &corners {
                    let address = ctx.qualify(corner);
                    tracing::debug!(%address, "range on unknown sheet");
                    self.defaulted.insert(address);
                }
                return Ok(Value::Array(Vec::new()));
            }
        }
        let sheet = ctx.qualify(&corners[0]).sheet;
        let in_range = |address: &QualifiedAddress| {
            address.document == ctx.document
                && address.sheet == sheet
                && range.contains(&address.cell)
        };

        if let Some(blocked) = ctx.unresolved.iter().filter(|a| in_range(a)).min() {
            return Err(EvalError::UnresolvedReference(blocked.to_string()));
        }

        let mut cells: Vec<_> = ctx
            .values
            .iter()
            .filter(|(address, _)| in_range(address))
            .collect();
        cells.sort_by_key(|(address, _)| (address.cell.row, address.cell.column));

        Ok(Value::Array(
            cells.into_iter().map(|(_, literal)| Value::from(literal)).collect(),
        ))
    }
}

fn binary_op(op: Operator, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        Operator::Add => Ok(Value::Number(left.to_number()? + right.to_number()?)),
        Operator::Sub => Ok(Value::Number(left.to_number()? - right.to_number()?)),
        Operator::Mul => Ok(Value::Number(left.to_number()? * right.to_number()?)),
        Operator::Div => {
            let divisor = right.to_number()?;
            if divisor == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Value::Number(left.to_number()? / divisor))
            }
        }
        Operator::Pow => {
            let result = left.to_number()?.powf(right.to_number()?);
            if result.is_nan() {
                Err(EvalError::malformed("power has no real result"))
            } else {
                Ok(Value::Number(result))
            }
        }
        Operator::Concat => Ok(Value::Text(format!(
            "{}{}",
            left.to_text()?,
            right.to_text()?
        ))),
        Operator::Eq => Ok(Value::Boolean(compare(left, right)?.is_eq())),
        Operator::Ne => Ok(Value::Boolean(compare(left, right)?.is_ne())),
        Operator::Lt => Ok(Value::Boolean(compare(left, right)?.is_lt())),
        Operator::Gt => Ok(Value::Boolean(compare(left, right)?.is_gt())),
        Operator::Le => Ok(Value::Boolean(compare(left, right)?.is_le())),
        Operator::Ge => Ok(Value::Boolean(compare(left, right)?.is_ge())),
    }
}

/// Numbers compare numerically (with a small tolerance), anything else
/// compares as case-insensitive text.
fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering, EvalError> {
    use std::cmp::Ordering;

    let numeric = |v: &Value| match v {
        Value::Number(_) | Value::Boolean(_) => v.to_number().ok(),
        _ => None,
    };
    if let (Some(l), Some(r)) = (numeric(left), numeric(right)) {
        if (l - r).abs() < 1e-10 {
            return Ok(Ordering::Equal);
        }
        return Ok(l.partial_cmp(&r).unwrap_or(Ordering::Equal));
    }
    let l = left.to_text()?.to_lowercase();
    let r = right.to_text()?.to_lowercase();
    Ok(l.cmp(&r))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(formula: &str, ctx: &EvalContext) -> Result<EvalOutcome, EvalError> {
        evaluate_formula(formula, ctx, ConditionalMode::Eager)
    }

    fn number(formula: &str, ctx: &EvalContext) -> f64 {
        match eval(formula, ctx).unwrap().value {
            Literal::Number(n) => n,
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        let ctx = EvalContext::for_sheet("Sheet1");
        assert_eq!(number("=2+3*4", &ctx), 14.0);
        assert_eq!(number("=(2+3)*4", &ctx), 20.0);
        assert_eq!(number("=-2^2", &ctx), 4.0);
        assert_eq!(number("=10/4", &ctx), 2.5);
    }

    #[test]
    fn test_references_read_context() {
        let mut ctx = EvalContext::for_sheet("Sheet1");
        ctx.set("B2", 10.5).unwrap();
        ctx.set("B3", 5.2).unwrap();
        let outcome = eval("=B2*B3", &ctx).unwrap();
        assert_eq!(outcome.value, Literal::Number(10.5 * 5.2));
        assert!(!outcome.is_defaulted());
    }

    #[test]
    fn test_missing_reference_is_flagged() {
        let ctx = EvalContext::for_sheet("Sheet1");
        let outcome = eval("=Z9+1", &ctx).unwrap();
        assert_eq!(outcome.value, Literal::Number(1.0));
        assert!(outcome.is_defaulted());
        assert_eq!(
            outcome.defaulted.iter().next().unwrap().to_string(),
            "workbook#Sheet1!Z9"
        );
    }

    #[test]
    fn test_custom_fallback_value() {
        let ctx = EvalContext::for_sheet("Sheet1").with_fallback(-1.0);
        assert_eq!(number("=A1*3", &ctx), -3.0);
    }

    #[test]
    fn test_unresolved_reference() {
        let mut ctx = EvalContext::for_sheet("Sheet1");
        ctx.mark_unresolved("workbook#Sheet1!A1".parse().unwrap());
        assert_eq!(
            eval("=A1+1", &ctx),
            Err(EvalError::UnresolvedReference(
                "workbook#Sheet1!A1".to_string()
            ))
        );
        assert!(matches!(
            eval("=SUM(A1:A3)", &ctx),
            Err(EvalError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_qualified_reference_is_case_insensitive() {
        let mut ctx = EvalContext::for_sheet("Sheet2").with_sheets([SheetId::new("Sheet1")]);
        ctx.set("Sheet1!B15", 4.0).unwrap();
        assert_eq!(number("=sheet1!B15*2", &ctx), 8.0);
    }

    #[test]
    fn test_division_by_zero() {
        let ctx = EvalContext::for_sheet("Sheet1");
        assert_eq!(eval("=1/0", &ctx), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_text_concat_and_compare() {
        let mut ctx = EvalContext::for_sheet("Sheet1");
        ctx.set("A1", "m").unwrap();
        assert_eq!(
            eval("=\"Span \"&A1", &ctx).unwrap().value,
            Literal::Text("Span m".to_string())
        );
        assert_eq!(
            eval("=\"ok\"=\"OK\"", &ctx).unwrap().value,
            Literal::Boolean(true)
        );
    }

    #[test]
    fn test_text_in_arithmetic_is_malformed() {
        let mut ctx = EvalContext::for_sheet("Sheet1");
        ctx.set("A1", "Parameter").unwrap();
        assert!(matches!(
            eval("=A1*2", &ctx),
            Err(EvalError::MalformedExpression(_))
        ));
    }

    #[test]
    fn test_bare_range_result_is_malformed() {
        let ctx = EvalContext::for_sheet("Sheet1");
        assert!(matches!(
            eval("=A1:A3", &ctx),
            Err(EvalError::MalformedExpression(_))
        ));
    }

    #[test]
    fn test_parse_failure_is_malformed() {
        let ctx = EvalContext::for_sheet("Sheet1");
        assert!(matches!(
            eval("=SUM(1,", &ctx),
            Err(EvalError::MalformedExpression(_))
        ));
    }

    #[test]
    fn test_range_on_unknown_sheet_is_defaulted() {
        let ctx = EvalContext::for_sheet("Sheet1");
        let outcome = eval("=SUM(Nowhere!B1:B3)", &ctx).unwrap();
        assert_eq!(outcome.value, Literal::Number(0.0));
        let defaulted: Vec<String> = outcome.defaulted.iter().map(|a| a.to_string()).collect();
        assert_eq!(
            defaulted,
            vec!["workbook#Nowhere!B1", "workbook#Nowhere!B3"]
        );
    }

    #[test]
    fn test_sheet_named_by_set_is_known() {
        let mut ctx = EvalContext::for_sheet("Sheet1");
        ctx.set("Loads!A1", 4.0).unwrap();
        let outcome = eval("=SUM(loads!A1:A2)", &ctx).unwrap();
        assert_eq!(outcome.value, Literal::Number(4.0));
        assert!(!outcome.is_defaulted());
    }

    #[test]
    fn test_pending_cell_inside_range_blocks_it() {
        let mut ctx = EvalContext::for_sheet("Sheet1");
        ctx.set("A1", 1.0).unwrap();
        ctx.mark_unresolved("workbook#Sheet1!A3".parse().unwrap());
        assert_eq!(
            eval("=SUM(A1:A5)", &ctx),
            Err(EvalError::UnresolvedReference("workbook#Sheet1!A3".to_string()))
        );
    }

    #[test]
    fn test_deep_nesting_is_malformed_not_fatal() {
        let ctx = EvalContext::for_sheet("Sheet1");
        let deep = format!("={}1{}", "(".repeat(1000), ")".repeat(1000));
        assert!(matches!(
            eval(&deep, &ctx),
            Err(EvalError::MalformedExpression(_))
        ));
    }
}
