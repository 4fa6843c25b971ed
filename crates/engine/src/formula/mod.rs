//! Formula parsing and evaluation.
//!
//! A formula is an `=`-prefixed infix arithmetic expression over numeric
//! literals and cell references, using `+ - * /` and parentheses.

pub mod eval;
pub mod parser;

use std::fmt;

pub use parser::{parse, tokenize};

/// Arithmetic operators and grouping symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    LParen,
    RParen,
}

impl Op {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Op::Add),
            '-' => Some(Op::Sub),
            '*' => Some(Op::Mul),
            '/' => Some(Op::Div),
            '(' => Some(Op::LParen),
            ')' => Some(Op::RParen),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Op::Add => '+',
            Op::Sub => '-',
            Op::Mul => '*',
            Op::Div => '/',
            Op::LParen => '(',
            Op::RParen => ')',
        }
    }

    /// True for the four binary operators.
    pub fn is_binary(self) -> bool {
        matches!(self, Op::Add | Op::Sub | Op::Mul | Op::Div)
    }
}

/// One lexical unit of a formula. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Operator(Op),
    /// Cell reference, already uppercased (e.g. `B12`).
    Variable(String),
    Number(f64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Operator(op) => write!(f, "{}", op.as_char()),
            Token::Variable(name) => f.write_str(name),
            Token::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Errors produced while parsing or evaluating a formula.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaError {
    /// Malformed formula syntax.
    Parse(String),
    /// Right operand of `/` evaluated to zero.
    DivisionByZero,
    /// A referenced cell has no numeric value.
    UndefinedVariable(String),
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "formula parse error: {msg}"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::UndefinedVariable(name) => write!(f, "undefined variable: {name}"),
        }
    }
}

impl std::error::Error for FormulaError {}

/// A parsed, validated formula.
///
/// Construct with [`parse`]; the token sequence is guaranteed to be
/// non-empty, balanced, and free of adjacent operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    tokens: Vec<Token>,
}

impl Formula {
    pub(crate) fn from_validated(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Referenced cell names, deduplicated, in order of first appearance.
    pub fn variables(&self) -> Vec<String> {
        let mut seen = rustc_hash::FxHashSet::default();
        self.tokens
            .iter()
            .filter_map(|t| match t {
                Token::Variable(name) => Some(name),
                _ => None,
            })
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect()
    }
}

/// Canonical form: `=` followed by the tokens with no whitespace.
impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("=")?;
        for token in &self.tokens {
            write!(f, "{}", token)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Formula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Referenced variables of arbitrary cell content.
///
/// Non-formula content references nothing. Formula content that fails to
/// parse is reported as an error.
pub fn content_variables(content: &str) -> Result<Vec<String>, FormulaError> {
    if content.starts_with('=') {
        Ok(parse(content)?.variables())
    } else {
        Ok(Vec::new())
    }
}
