//! Formula parser for the evaluator
//!
//! Converts a sequence of tokens into an Abstract Syntax Tree (AST).
//! Uses recursive descent parsing with operator precedence. Bare identifiers
//! other than cell addresses, function heads and TRUE/FALSE are rejected.

use super::tokenizer::{tokenize, Token};
use crate::types::{CellAddress, CellReference, Operator, RangeReference};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Neg,
    Plus,
}

/// Abstract Syntax Tree node for formula expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// A single-cell reference, optionally sheet-qualified
    Reference(CellReference),
    /// A rectangular range; only meaningful as a function argument
    Range(RangeReference),
    /// Function call: NAME(arg1, arg2, ...)
    FunctionCall { name: String, args: Vec<Expr> },
    BinaryOp {
        op: Operator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
}

impl Expr {
    /// Visit every function call name in the tree
    pub fn function_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Expr::FunctionCall { name, args } => {
                    names.push(name.as_str());
                    stack.extend(args.iter());
                }
                Expr::BinaryOp { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
                Expr::UnaryOp { operand, .. } => stack.push(operand),
                _ => {}
            }
        }
        names
    }
}

/// Error during parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Deepest expression tree the parser will build. Parenthesis levels, unary
/// and power chains and runs of left-associative operators all count.
pub const MAX_NESTING: usize = 256;

/// Parser for formula tokens
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    /// Parse the tokens into an AST
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("Empty expression", 0));
        }
        let expr = self.expression()?;

        if !self.is_at_end() {
            return Err(ParseError::new(
                format!("Unexpected token after expression: {:?}", self.peek()),
                self.position,
            ));
        }

        Ok(expr)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn match_token(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_any_operator(&mut self, ops: &[Operator]) -> Option<Operator> {
        match self.peek() {
            Some(Token::Operator(op)) if ops.contains(op) => {
                let op = *op;
                self.advance();
                Some(op)
            }
            _ => None,
        }
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.comparison()
    }

    fn descend(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ParseError::new(
                format!("Expression nested deeper than {} levels", MAX_NESTING),
                self.position,
            ));
        }
        Ok(())
    }

    /// Left-associative binary level: next (op next)*
    fn binary_level(
        &mut self,
        ops: &[Operator],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let mut left = next(self)?;
        let entered = self.depth;

        while let Some(op) = self.match_any_operator(ops) {
            // Each fold deepens the left spine by one
            self.descend()?;
            let right = next(self)?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        self.depth = entered;
        Ok(left)
    }

    /// Comparison: concat (( "=" | "<>" | "<" | ">" | "<=" | ">=" ) concat)*
    fn comparison(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                Operator::Eq,
                Operator::Ne,
                Operator::Lt,
                Operator::Gt,
                Operator::Le,
                Operator::Ge,
            ],
            Self::concat,
        )
    }

    /// Concat: term ( "&" term )*
    fn concat(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[Operator::Concat], Self::term)
    }

    /// Term: factor (( "+" | "-" ) factor)*
    fn term(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[Operator::Add, Operator::Sub], Self::factor)
    }

    /// Factor: power (( "*" | "/" ) power)*
    fn factor(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[Operator::Mul, Operator::Div], Self::power)
    }

    /// Power: unary ( "^" power )?   (right-associative)
    fn power(&mut self) -> Result<Expr, ParseError> {
        self.descend()?;
        let expr = self.power_chain();
        self.depth -= 1;
        expr
    }

    fn power_chain(&mut self) -> Result<Expr, ParseError> {
        let left = self.unary()?;

        if self.match_any_operator(&[Operator::Pow]).is_some() {
            let right = self.power()?;
            Ok(Expr::BinaryOp {
                op: Operator::Pow,
                left: Box::new(left),
                right: Box::new(right),
            })
        } else {
            Ok(left)
        }
    }

    /// Unary: ( "-" | "+" ) unary | primary
    fn unary(&mut self) -> Result<Expr, ParseError> {
        self.descend()?;
        let expr = self.unary_chain();
        self.depth -= 1;
        expr
    }

    fn unary_chain(&mut self) -> Result<Expr, ParseError> {
        let op = match self.match_any_operator(&[Operator::Sub, Operator::Add]) {
            Some(Operator::Sub) => UnaryOperator::Neg,
            Some(_) => UnaryOperator::Plus,
            None => return self.primary(),
        };
        let operand = self.unary()?;
        Ok(Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        })
    }

    /// Primary: NUMBER | STRING | reference | range | call | TRUE | FALSE | "(" expr ")"
    fn primary(&mut self) -> Result<Expr, ParseError> {
        let position = self.position;

        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Text(s)) => Ok(Expr::Text(s)),
            Some(Token::QuotedName(sheet)) => {
                if !self.match_token(&Token::Bang) {
                    return Err(ParseError::new(
                        format!("Expected '!' after sheet name '{}'", sheet),
                        self.position,
                    ));
                }
                self.reference(Some(sheet))
            }
            Some(Token::Identifier(name)) => self.identifier(name, position),
            Some(Token::OpenParen) => {
                let expr = self.expression()?;
                if !self.match_token(&Token::CloseParen) {
                    return Err(ParseError::new(
                        "Expected ')' after expression",
                        self.position,
                    ));
                }
                Ok(expr)
            }
            Some(token) => Err(ParseError::new(
                format!("Unexpected token: {:?}", token),
                position,
            )),
            None => Err(ParseError::new("Unexpected end of expression", position)),
        }
    }

    fn identifier(&mut self, name: String, position: usize) -> Result<Expr, ParseError> {
        if self.match_token(&Token::Bang) {
            return self.reference(Some(name));
        }

        if self.match_token(&Token::OpenParen) {
            let args = self.arguments()?;
            if !self.match_token(&Token::CloseParen) {
                return Err(ParseError::new(
                    "Expected ')' after function arguments",
                    self.position,
                ));
            }
            return Ok(Expr::FunctionCall {
                name: name.to_uppercase(),
                args,
            });
        }

        if name.eq_ignore_ascii_case("TRUE") {
            return Ok(Expr::Boolean(true));
        }
        if name.eq_ignore_ascii_case("FALSE") {
            return Ok(Expr::Boolean(false));
        }

        // Rewind so the reference rule sees the identifier again
        self.position = position;
        self.reference(None)
    }

    /// Reference: CELL ( ":" CELL )?
    fn reference(&mut self, sheet: Option<String>) -> Result<Expr, ParseError> {
        let start = self.cell_address()?;

        if self.match_token(&Token::Colon) {
            let end = self.cell_address()?;
            return Ok(Expr::Range(RangeReference { sheet, start, end }));
        }

        Ok(Expr::Reference(CellReference {
            sheet,
            address: start,
        }))
    }

    fn cell_address(&mut self) -> Result<CellAddress, ParseError> {
        let position = self.position;
        match self.advance() {
            Some(Token::Identifier(text)) => text.parse().map_err(|_| {
                ParseError::new(format!("Unknown identifier: {}", text), position)
            }),
            other => Err(ParseError::new(
                format!("Expected cell reference, found {:?}", other),
                position,
            )),
        }
    }

    /// Arguments: ( expr ( "," expr )* )?
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();

        if let Some(Token::CloseParen) = self.peek() {
            return Ok(args);
        }

        args.push(self.expression()?);
        while self.match_token(&Token::Comma) {
            args.push(self.expression()?);
        }

        Ok(args)
    }
}

/// Tokenize and parse formula text in one step
pub fn parse_formula(formula: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(formula).map_err(|e| ParseError::new(e.message, e.position))?;
    Parser::new(tokens).parse()
}
