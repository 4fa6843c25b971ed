// Formula parser - converts `=`-prefixed strings into validated token streams
// Supports: numbers, cell refs (A1, AB12), basic math (+, -, *, /), parentheses

use super::{Formula, FormulaError, Op, Token};

/// Parse a formula string. The leading `=` is required.
pub fn parse(formula: &str) -> Result<Formula, FormulaError> {
    let Some(body) = formula.strip_prefix('=') else {
        return Err(FormulaError::Parse("formula must start with =".to_string()));
    };

    let tokens = tokenize(body)?;
    validate(&tokens)?;
    Ok(Formula::from_validated(tokens))
}

/// Split raw text into tokens.
///
/// Letters are uppercased first. A run of letters is only a variable when
/// it is immediately followed by digits; letter runs without digits are
/// dropped, as is any character that is not an operator, digit, `.` or
/// letter.
pub fn tokenize(input: &str) -> Result<Vec<Token>, FormulaError> {
    let upper = input.to_ascii_uppercase();
    let mut tokens = Vec::new();
    let mut chars = upper.chars().peekable();

    while let Some(&c) = chars.peek() {
        if let Some(op) = Op::from_char(c) {
            tokens.push(Token::Operator(op));
            chars.next();
        } else if c.is_ascii_uppercase() {
            let mut name = String::new();
            while let Some(&l) = chars.peek() {
                if !l.is_ascii_uppercase() {
                    break;
                }
                name.push(l);
                chars.next();
            }
            let letters = name.len();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                name.push(d);
                chars.next();
            }
            if name.len() > letters {
                tokens.push(Token::Variable(name));
            }
        } else if c.is_ascii_digit() || c == '.' {
            let mut literal = String::new();
            while let Some(&d) = chars.peek() {
                if !(d.is_ascii_digit() || d == '.') {
                    break;
                }
                literal.push(d);
                chars.next();
            }
            match literal.parse::<f64>() {
                Ok(value) if value.is_finite() => tokens.push(Token::Number(value)),
                Ok(_) => {
                    return Err(FormulaError::Parse(format!("number out of range: {literal}")));
                }
                Err(_) => {
                    return Err(FormulaError::Parse(format!("invalid number: {literal}")));
                }
            }
        } else {
            chars.next();
        }
    }

    Ok(tokens)
}

/// What the previous token allows next.
#[derive(Clone, Copy, PartialEq)]
enum Prev {
    Start,
    /// `(` or a binary operator: an operand or `(` must follow.
    OpenOrOperator,
    /// Number, variable or `)`: an operator or `)` must follow.
    Operand,
}

fn validate(tokens: &[Token]) -> Result<(), FormulaError> {
    if tokens.is_empty() {
        return Err(FormulaError::Parse("formula must contain at least one token".to_string()));
    }

    let mut prev = Prev::Start;
    let mut open = 0usize;
    let mut close = 0usize;

    for token in tokens {
        match token {
            Token::Operator(Op::LParen) => {
                if prev == Prev::Operand {
                    return Err(FormulaError::Parse(
                        "( cannot follow a number, variable, or )".to_string(),
                    ));
                }
                open += 1;
                prev = Prev::OpenOrOperator;
            }
            Token::Operator(Op::RParen) => {
                if prev == Prev::OpenOrOperator {
                    return Err(FormulaError::Parse(") cannot follow ( or an operator".to_string()));
                }
                close += 1;
                if close > open {
                    return Err(FormulaError::Parse("unbalanced )".to_string()));
                }
                prev = Prev::Operand;
            }
            Token::Operator(op) => {
                match prev {
                    Prev::Start => {
                        return Err(FormulaError::Parse(
                            "first token must be a number, variable, or (".to_string(),
                        ));
                    }
                    Prev::OpenOrOperator => {
                        return Err(FormulaError::Parse(format!(
                            "{} cannot follow ( or an operator",
                            op.as_char()
                        )));
                    }
                    Prev::Operand => {}
                }
                prev = Prev::OpenOrOperator;
            }
            Token::Variable(_) | Token::Number(_) => {
                if prev == Prev::Operand {
                    return Err(FormulaError::Parse(format!(
                        "{} cannot follow a number, variable, or )",
                        token
                    )));
                }
                prev = Prev::Operand;
            }
        }
    }

    if open != close {
        return Err(FormulaError::Parse("unbalanced (".to_string()));
    }
    if prev != Prev::Operand {
        return Err(FormulaError::Parse(
            "last token must be a number, variable, or )".to_string(),
        ));
    }
    Ok(())
}
