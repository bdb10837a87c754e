//! The closed function library

use super::{ConditionalMode, EvalError, Evaluator, Expr, Value};
use std::f64::consts::PI;

/// Every function a formula may call. Anything else is rejected up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Sum,
    Average,
    Max,
    Min,
    Sqrt,
    Abs,
    Round,
    If,
    And,
    Or,
    Power,
    Exp,
    Ln,
    Log,
    Sin,
    Cos,
    Tan,
    Pi,
}

impl Function {
    pub const ALL: [Function; 18] = [
        Function::Sum,
        Function::Average,
        Function::Max,
        Function::Min,
        Function::Sqrt,
        Function::Abs,
        Function::Round,
        Function::If,
        Function::And,
        Function::Or,
        Function::Power,
        Function::Exp,
        Function::Ln,
        Function::Log,
        Function::Sin,
        Function::Cos,
        Function::Tan,
        Function::Pi,
    ];

    /// Case-insensitive lookup
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Sum => "SUM",
            Function::Average => "AVERAGE",
            Function::Max => "MAX",
            Function::Min => "MIN",
            Function::Sqrt => "SQRT",
            Function::Abs => "ABS",
            Function::Round => "ROUND",
            Function::If => "IF",
            Function::And => "AND",
            Function::Or => "OR",
            Function::Power => "POWER",
            Function::Exp => "EXP",
            Function::Ln => "LN",
            Function::Log => "LOG",
            Function::Sin => "SIN",
            Function::Cos => "COS",
            Function::Tan => "TAN",
            Function::Pi => "PI",
        }
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Evaluator<'_> {
    pub(super) fn call(&mut self, function: Function, args: &[Expr]) -> Result<Value, EvalError> {
        let name = function.name();
        match function {
            // ═══════════════════════════════════════════════════════════════════
            // AGGREGATES
            // ═══════════════════════════════════════════════════════════════════
            Function::Sum => {
                let values = self.collect_numeric_values(args)?;
                // sum() over nothing yields -0.0
                Ok(Value::Number(values.iter().fold(0.0, |acc, n| acc + n)))
            }
            Function::Average => {
                let values = self.collect_numeric_values(args)?;
                if values.is_empty() {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(Value::Number(values.iter().sum::<f64>() / values.len() as f64))
            }
            Function::Max => {
                let values = self.collect_numeric_values(args)?;
                Ok(Value::Number(
                    values.into_iter().reduce(f64::max).unwrap_or(0.0),
                ))
            }
            Function::Min => {
                let values = self.collect_numeric_values(args)?;
                Ok(Value::Number(
                    values.into_iter().reduce(f64::min).unwrap_or(0.0),
                ))
            }

            // ═══════════════════════════════════════════════════════════════════
            // MATH
            // ═══════════════════════════════════════════════════════════════════
            Function::Sqrt => {
                let n = self.unary_number(name, args)?;
                if n < 0.0 {
                    return Err(EvalError::malformed("SQRT of negative number"));
                }
                Ok(Value::Number(n.sqrt()))
            }
            Function::Abs => Ok(Value::Number(self.unary_number(name, args)?.abs())),
            Function::Round => {
                require_args_range(name, args, 1, 2)?;
                let n = self.number(&args[0])?;
                let digits = match args.get(1) {
                    Some(arg) => self.number(arg)? as i32,
                    None => 0,
                };
                let multiplier = 10_f64.powi(digits);
                Ok(Value::Number((n * multiplier).round() / multiplier))
            }
            Function::Power => {
                require_args(name, args, 2)?;
                let base = self.number(&args[0])?;
                let exp = self.number(&args[1])?;
                let result = base.powf(exp);
                if result.is_nan() {
                    return Err(EvalError::malformed("POWER has no real result"));
                }
                Ok(Value::Number(result))
            }
            Function::Exp => Ok(Value::Number(self.unary_number(name, args)?.exp())),
            Function::Ln => {
                let n = self.unary_number(name, args)?;
                if n <= 0.0 {
                    return Err(EvalError::malformed("LN of non-positive number"));
                }
                Ok(Value::Number(n.ln()))
            }
            Function::Log => {
                require_args_range(name, args, 1, 2)?;
                let n = self.number(&args[0])?;
                let base = match args.get(1) {
                    Some(arg) => self.number(arg)?,
                    None => 10.0,
                };
                if n <= 0.0 {
                    return Err(EvalError::malformed("LOG of non-positive number"));
                }
                if base <= 0.0 || base == 1.0 {
                    return Err(EvalError::malformed("LOG base must be positive and not 1"));
                }
                if base == 10.0 {
                    return Ok(Value::Number(n.log10()));
                }
                Ok(Value::Number(n.ln() / base.ln()))
            }
            Function::Sin => Ok(Value::Number(self.unary_number(name, args)?.sin())),
            Function::Cos => Ok(Value::Number(self.unary_number(name, args)?.cos())),
            Function::Tan => Ok(Value::Number(self.unary_number(name, args)?.tan())),
            Function::Pi => {
                require_args(name, args, 0)?;
                Ok(Value::Number(PI))
            }

            // ═══════════════════════════════════════════════════════════════════
            // LOGICAL
            // ═══════════════════════════════════════════════════════════════════
            Function::If => {
                require_args_range(name, args, 2, 3)?;
                match self.mode() {
                    ConditionalMode::ShortCircuit => {
                        if self.eval(&args[0])?.to_bool()? {
                            self.eval(&args[1])
                        } else {
                            self.branch_or_false(args.get(2))
                        }
                    }
                    ConditionalMode::Eager => {
                        let condition = self.eval(&args[0])?.to_bool()?;
                        let then_value = self.eval(&args[1])?;
                        let else_value = self.branch_or_false(args.get(2))?;
                        Ok(if condition { then_value } else { else_value })
                    }
                }
            }
            Function::And => {
                let values = self.collect_logical_values(name, args)?;
                Ok(Value::Boolean(values.into_iter().all(|b| b)))
            }
            Function::Or => {
                let values = self.collect_logical_values(name, args)?;
                Ok(Value::Boolean(values.into_iter().any(|b| b)))
            }
        }
    }

    fn number(&mut self, arg: &Expr) -> Result<f64, EvalError> {
        self.eval(arg)?.to_number()
    }

    fn unary_number(&mut self, name: &str, args: &[Expr]) -> Result<f64, EvalError> {
        require_args(name, args, 1)?;
        self.number(&args[0])
    }

    fn branch_or_false(&mut self, arg: Option<&Expr>) -> Result<Value, EvalError> {
        match arg {
            Some(expr) => self.eval(expr),
            None => Ok(Value::Boolean(false)),
        }
    }

    /// Collect all numeric values from arguments. Non-numeric entries inside a
    /// range are skipped; a non-numeric scalar argument is an error.
    fn collect_numeric_values(&mut self, args: &[Expr]) -> Result<Vec<f64>, EvalError> {
        let mut values = Vec::new();

        for arg in args {
            match self.eval(arg)? {
                Value::Array(arr) => {
                    values.extend(arr.into_iter().filter_map(|v| match v {
                        Value::Number(n) => Some(n),
                        _ => None,
                    }));
                }
                scalar => values.push(scalar.to_number()?),
            }
        }

        Ok(values)
    }

    fn collect_logical_values(
        &mut self,
        name: &str,
        args: &[Expr],
    ) -> Result<Vec<bool>, EvalError> {
        if args.is_empty() {
            return Err(EvalError::malformed(format!(
                "{} requires at least 1 argument",
                name
            )));
        }
        let mut values = Vec::new();
        for arg in args {
            match self.eval(arg)? {
                Value::Array(arr) => {
                    for v in arr {
                        if let Value::Boolean(_) | Value::Number(_) = v {
                            values.push(v.to_bool()?);
                        }
                    }
                }
                scalar => values.push(scalar.to_bool()?),
            }
        }
        Ok(values)
    }
}

/// Require exact argument count
fn require_args(func: &str, args: &[Expr], count: usize) -> Result<(), EvalError> {
    if args.len() != count {
        Err(EvalError::malformed(format!(
            "{} requires {} argument(s), got {}",
            func,
            count,
            args.len()
        )))
    } else {
        Ok(())
    }
}

/// Require arguments in range
fn require_args_range(func: &str, args: &[Expr], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        Err(EvalError::malformed(format!(
            "{} requires {}-{} arguments, got {}",
            func,
            min,
            max,
            args.len()
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{evaluate_formula, EvalContext, EvalOutcome};
    use super::*;
    use crate::types::Literal;

    fn eval_with(
        formula: &str,
        ctx: &EvalContext,
        mode: ConditionalMode,
    ) -> Result<EvalOutcome, EvalError> {
        evaluate_formula(formula, ctx, mode)
    }

    fn number(formula: &str) -> f64 {
        let ctx = EvalContext::for_sheet("Sheet1");
        match eval_with(formula, &ctx, ConditionalMode::Eager).unwrap().value {
            Literal::Number(n) => n,
            other => panic!("expected number, got {:?}", other),
        }
    }

    fn loads() -> EvalContext {
        let mut ctx = EvalContext::for_sheet("Loads");
        ctx.set("C2", 10.0).unwrap();
        ctx.set("C3", 20.0).unwrap();
        ctx.set("C4", "n/a").unwrap();
        ctx.set("C5", 30.0).unwrap();
        ctx
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(Function::from_name("sqrt"), Some(Function::Sqrt));
        assert_eq!(Function::from_name("VLOOKUP"), None);
        assert_eq!(Function::ALL.len(), 18);
    }

    #[test]
    fn test_sum_of_empty_range_is_positive_zero() {
        let total = number("=SUM(D1:D9)");
        assert_eq!(total, 0.0);
        assert!(total.is_sign_positive());
    }

    #[test]
    fn test_aggregates_over_range_skip_text() {
        let ctx = loads();
        let sum = eval_with("=SUM(C2:C5)", &ctx, ConditionalMode::Eager).unwrap();
        assert_eq!(sum.value, Literal::Number(60.0));
        // Blank cells inside a range are not defaults
        let avg = eval_with("=AVERAGE(C2:C9)", &ctx, ConditionalMode::Eager).unwrap();
        assert_eq!(avg.value, Literal::Number(20.0));
        assert!(!avg.is_defaulted());
        let max = eval_with("=MAX(C2:C5, 45)", &ctx, ConditionalMode::Eager).unwrap();
        assert_eq!(max.value, Literal::Number(45.0));
    }

    #[test]
    fn test_average_of_nothing_is_division_by_zero() {
        let ctx = EvalContext::for_sheet("Sheet1");
        assert_eq!(
            eval_with("=AVERAGE(A1:A3)", &ctx, ConditionalMode::Eager),
            Err(EvalError::DivisionByZero)
        );
    }

    #[test]
    fn test_math_functions() {
        assert_eq!(number("=SQRT(16)"), 4.0);
        assert_eq!(number("=ABS(-3)"), 3.0);
        assert_eq!(number("=ROUND(3.14159, 2)"), 3.14);
        assert_eq!(number("=ROUND(2.5)"), 3.0);
        assert_eq!(number("=POWER(2, 10)"), 1024.0);
        assert_eq!(number("=LOG(1000)"), 3.0);
        assert!((number("=LOG(8, 2)") - 3.0).abs() < 1e-12);
        assert!((number("=LN(EXP(2))") - 2.0).abs() < 1e-12);
        assert!((number("=SIN(PI()/2)") - 1.0).abs() < 1e-12);
        assert!((number("=COS(0)") - 1.0).abs() < 1e-12);
        assert!(number("=TAN(0)").abs() < 1e-12);
    }

    #[test]
    fn test_domain_errors_are_malformed() {
        let ctx = EvalContext::for_sheet("Sheet1");
        for formula in ["=SQRT(-1)", "=LN(0)", "=LOG(-5)", "=POWER(-8, 0.5)"] {
            assert!(
                matches!(
                    eval_with(formula, &ctx, ConditionalMode::Eager),
                    Err(EvalError::MalformedExpression(_))
                ),
                "{} should be malformed",
                formula
            );
        }
    }

    #[test]
    fn test_arity_errors() {
        let ctx = EvalContext::for_sheet("Sheet1");
        let err = eval_with("=SQRT(1, 2)", &ctx, ConditionalMode::Eager).unwrap_err();
        assert_eq!(
            err,
            EvalError::MalformedExpression("SQRT requires 1 argument(s), got 2".to_string())
        );
        assert!(eval_with("=IF(TRUE)", &ctx, ConditionalMode::Eager).is_err());
    }

    #[test]
    fn test_if_selects_branch() {
        let mut ctx = EvalContext::for_sheet("Sheet1");
        ctx.set("B4", 54.6).unwrap();
        let outcome =
            eval_with(r#"=IF(B4>50,"SAFE","CHECK")"#, &ctx, ConditionalMode::Eager).unwrap();
        assert_eq!(outcome.value, Literal::Text("SAFE".to_string()));
        let outcome = eval_with("=IF(B4<50,1)", &ctx, ConditionalMode::Eager).unwrap();
        assert_eq!(outcome.value, Literal::Boolean(false));
    }

    #[test]
    fn test_if_eager_vs_short_circuit() {
        let ctx = EvalContext::for_sheet("Sheet1");
        let formula = "=IF(TRUE, 1, 1/0)";
        assert_eq!(
            eval_with(formula, &ctx, ConditionalMode::Eager),
            Err(EvalError::DivisionByZero)
        );
        let outcome = eval_with(formula, &ctx, ConditionalMode::ShortCircuit).unwrap();
        assert_eq!(outcome.value, Literal::Number(1.0));
    }

    #[test]
    fn test_and_or() {
        let ctx = EvalContext::for_sheet("Sheet1");
        let and = eval_with("=AND(1>0, 2>1)", &ctx, ConditionalMode::Eager).unwrap();
        assert_eq!(and.value, Literal::Boolean(true));
        let or = eval_with("=OR(FALSE, 0)", &ctx, ConditionalMode::Eager).unwrap();
        assert_eq!(or.value, Literal::Boolean(false));
    }
}
