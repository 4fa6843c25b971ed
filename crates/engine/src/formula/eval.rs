// Formula evaluator - two-stack (operand/operator) evaluation
//
// `*` and `/` reduce as soon as their right operand arrives; `+` and `-`
// reduce when the next `+`/`-`, a `)` or the end of input forces them.
// Operands are applied left-to-right: `a - b` and `a / b` in source order.

use super::{Formula, FormulaError, Op, Token};

impl Formula {
    /// Evaluate using `lookup` to resolve cell references.
    ///
    /// `lookup` returns `None` for cells without a numeric value, which
    /// surfaces as [`FormulaError::UndefinedVariable`].
    pub fn evaluate<F>(&self, lookup: F) -> Result<f64, FormulaError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let mut values: Vec<f64> = Vec::new();
        let mut ops: Vec<Op> = Vec::new();

        for token in self.tokens() {
            match token {
                Token::Number(n) => push_operand(*n, &mut values, &mut ops)?,
                Token::Variable(name) => {
                    let value = lookup(name)
                        .ok_or_else(|| FormulaError::UndefinedVariable(name.clone()))?;
                    push_operand(value, &mut values, &mut ops)?;
                }
                Token::Operator(op @ (Op::Add | Op::Sub)) => {
                    if matches!(ops.last(), Some(Op::Add | Op::Sub)) {
                        reduce(&mut values, &mut ops)?;
                    }
                    ops.push(*op);
                }
                Token::Operator(op @ (Op::Mul | Op::Div | Op::LParen)) => ops.push(*op),
                Token::Operator(Op::RParen) => {
                    if matches!(ops.last(), Some(Op::Add | Op::Sub)) {
                        reduce(&mut values, &mut ops)?;
                    }
                    if pop_op(&mut ops)? != Op::LParen {
                        return Err(malformed());
                    }
                    if matches!(ops.last(), Some(Op::Mul | Op::Div)) {
                        reduce(&mut values, &mut ops)?;
                    }
                }
            }
        }

        if matches!(ops.last(), Some(Op::Add | Op::Sub)) {
            reduce(&mut values, &mut ops)?;
        }

        match (values.as_slice(), ops.is_empty()) {
            ([result], true) => Ok(*result),
            _ => Err(malformed()),
        }
    }
}

/// Push an operand, folding it into a pending `*` or `/` first.
fn push_operand(value: f64, values: &mut Vec<f64>, ops: &mut Vec<Op>) -> Result<(), FormulaError> {
    if matches!(ops.last(), Some(Op::Mul | Op::Div)) {
        let op = pop_op(ops)?;
        let left = pop_value(values)?;
        values.push(apply(op, left, value)?);
    } else {
        values.push(value);
    }
    Ok(())
}

/// Pop one operator and two operands, push the result.
fn reduce(values: &mut Vec<f64>, ops: &mut Vec<Op>) -> Result<(), FormulaError> {
    let op = pop_op(ops)?;
    let right = pop_value(values)?;
    let left = pop_value(values)?;
    values.push(apply(op, left, right)?);
    Ok(())
}

fn apply(op: Op, left: f64, right: f64) -> Result<f64, FormulaError> {
    match op {
        Op::Add => Ok(left + right),
        Op::Sub => Ok(left - right),
        Op::Mul => Ok(left * right),
        Op::Div => {
            if right == 0.0 {
                Err(FormulaError::DivisionByZero)
            } else {
                Ok(left / right)
            }
        }
        Op::LParen | Op::RParen => Err(malformed()),
    }
}

fn pop_value(values: &mut Vec<f64>) -> Result<f64, FormulaError> {
    values.pop().ok_or_else(malformed)
}

fn pop_op(ops: &mut Vec<Op>) -> Result<Op, FormulaError> {
    ops.pop().ok_or_else(malformed)
}

fn malformed() -> FormulaError {
    FormulaError::Parse("malformed expression".to_string())
}

#[cfg(test)]
mod tests {
    use crate::formula::parse;

    use super::*;

    fn eval(src: &str) -> Result<f64, FormulaError> {
        parse(src).unwrap().evaluate(|_| None)
    }

    fn eval_with(src: &str, vars: &[(&str, f64)]) -> Result<f64, FormulaError> {
        parse(src)
            .unwrap()
            .evaluate(|name| vars.iter().find(|(n, _)| *n == name).map(|(_, v)| *v))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("=2+3*4").unwrap(), 14.0);
        assert_eq!(eval("=(2+3)*4").unwrap(), 20.0);
        assert_eq!(eval("=2*3+4").unwrap(), 10.0);
        assert_eq!(eval("=2+3*4-5").unwrap(), 9.0);
    }

    #[test]
    fn test_left_to_right_subtraction_and_division() {
        // Operands apply in source order, not in stack-pop order
        assert_eq!(eval("=10-4").unwrap(), 6.0);
        assert_eq!(eval("=10-4-3").unwrap(), 3.0);
        assert_eq!(eval("=8/2").unwrap(), 4.0);
        assert_eq!(eval("=16/4/2").unwrap(), 2.0);
        assert_eq!(eval("=10-(4-3)").unwrap(), 9.0);
        assert_eq!(eval("=12/(6/2)").unwrap(), 4.0);
    }

    #[test]
    fn test_nested_parens() {
        assert_eq!(eval("=((1+2))").unwrap(), 3.0);
        assert_eq!(eval("=2*(3+(4-1))*2").unwrap(), 24.0);
        assert_eq!(eval("=(1+2)/(4-1)").unwrap(), 1.0);
    }

    #[test]
    fn test_decimals() {
        assert!((eval("=3.1+1").unwrap() - 4.1).abs() < 1e-12);
        assert_eq!(eval("=.5*4").unwrap(), 2.0);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval("=1/0"), Err(FormulaError::DivisionByZero));
        assert_eq!(eval("=1/(2-2)"), Err(FormulaError::DivisionByZero));
        assert_eq!(eval("=0/5").unwrap(), 0.0);
    }

    #[test]
    fn test_variables() {
        assert_eq!(eval_with("=A1*B2", &[("A1", 3.0), ("B2", 4.0)]).unwrap(), 12.0);
        assert_eq!(eval_with("=a1-1", &[("A1", 3.0)]).unwrap(), 2.0);
    }

    #[test]
    fn test_undefined_variable() {
        assert_eq!(
            eval_with("=A1+C3", &[("A1", 1.0)]),
            Err(FormulaError::UndefinedVariable("C3".into()))
        );
    }
}
