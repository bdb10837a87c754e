//! Formula tokenizer for the evaluator
//!
//! Converts formula strings like "=SUM(A1:A4) * 1.1" into a sequence of tokens
//! that can be parsed into an AST. Unlike the reference scanner this is strict:
//! anything it cannot read is an error.

use crate::types::Operator;
use std::iter::Peekable;
use std::str::Chars;

/// A token in a formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A numeric literal (e.g., 123, 45.67, 1.5e10)
    Number(f64),
    /// A double-quoted string literal
    Text(String),
    /// Function name, cell address, sheet name or TRUE/FALSE
    Identifier(String),
    /// A single-quoted sheet name ('Load Calc')
    QuotedName(String),
    Operator(Operator),
    OpenParen,
    CloseParen,
    Comma,
    /// Colon for ranges (A1:B2)
    Colon,
    /// Sheet qualifier separator (Sheet1!A1)
    Bang,
}

/// Error during tokenization
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tokenize error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for TokenizeError {}

/// Tokenizer for formula expressions
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a new tokenizer; a leading '=' marker is stripped
    pub fn new(formula: &'a str) -> Self {
        let formula = formula.strip_prefix('=').unwrap_or(formula);
        Self {
            chars: formula.chars().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire formula into a vector of tokens
    pub fn tokenize(mut self) -> Result<Vec<Token>, TokenizeError> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<Token>, TokenizeError> {
        self.skip_whitespace();

        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let token = match c {
            '"' => Token::Text(self.read_quoted('"')?),
            '\'' => Token::QuotedName(self.read_quoted('\'')?),

            '(' => self.single(Token::OpenParen),
            ')' => self.single(Token::CloseParen),
            ',' => self.single(Token::Comma),
            ':' => self.single(Token::Colon),
            '!' => self.single(Token::Bang),

            '+' => self.single(Token::Operator(Operator::Add)),
            '-' => self.single(Token::Operator(Operator::Sub)),
            '*' => self.single(Token::Operator(Operator::Mul)),
            '/' => self.single(Token::Operator(Operator::Div)),
            '^' => self.single(Token::Operator(Operator::Pow)),
            '&' => self.single(Token::Operator(Operator::Concat)),
            '=' => self.single(Token::Operator(Operator::Eq)),

            '<' => {
                self.advance();
                match self.peek() {
                    Some('=') => self.single(Token::Operator(Operator::Le)),
                    Some('>') => self.single(Token::Operator(Operator::Ne)),
                    _ => Token::Operator(Operator::Lt),
                }
            }
            '>' => {
                self.advance();
                match self.peek() {
                    Some('=') => self.single(Token::Operator(Operator::Ge)),
                    _ => Token::Operator(Operator::Gt),
                }
            }

            c if c.is_ascii_digit() || c == '.' => self.read_number()?,

            c if c.is_alphabetic() || c == '_' || c == '$' => self.read_identifier(),

            c => {
                return Err(TokenizeError::new(
                    format!("Unexpected character: '{}'", c),
                    self.position,
                ));
            }
        };
        Ok(Some(token))
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    /// Consume one character and return `token`
    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    /// Read a quoted run; a doubled quote is an escaped quote
    fn read_quoted(&mut self, quote: char) -> Result<String, TokenizeError> {
        let start_pos = self.position;
        self.advance(); // opening quote
        let mut value = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(TokenizeError::new("Unterminated quoted text", start_pos));
                }
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        value.push(quote);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(c) => value.push(c),
            }
        }

        Ok(value)
    }

    /// Read a number (integer, decimal, or scientific notation)
    fn read_number(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let mut num_str = String::new();

        self.read_digits(&mut num_str);
        if self.peek() == Some('.') {
            num_str.push('.');
            self.advance();
            self.read_digits(&mut num_str);
        }

        if matches!(self.peek(), Some('e' | 'E')) {
            num_str.push('e');
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                num_str.push(sign);
                self.advance();
            }
            self.read_digits(&mut num_str);
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| TokenizeError::new(format!("Invalid number: {}", num_str), start_pos))
    }

    fn read_digits(&mut self, out: &mut String) {
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            out.push(c);
            self.advance();
        }
    }

    /// Read an identifier (function name, cell address, sheet name)
    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }

        Token::Identifier(ident)
    }
}

/// Convenience function to tokenize a formula string
pub fn tokenize(formula: &str) -> Result<Vec<Token>, TokenizeError> {
    Tokenizer::new(formula).tokenize()
}
