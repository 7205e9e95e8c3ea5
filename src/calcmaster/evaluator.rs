//! # Expression Evaluator
//!
//! Walks an [`ExprNode`] tree and computes an `f64`, applying the calculator's
//! numeric rules:
//!
//! - Division by zero is an error, never `inf`.
//! - `0^0` is `1`. A negative base with a fractional exponent is a domain error.
//! - `n!` needs a non-negative integer `n` and is computed iteratively.
//! - `sin`, `cos` and `tan` take radians. `log` is base 10 and `ln` is natural.
//!   `sqrt` needs `x >= 0`, and `log`/`ln` need `x > 0`.
//! - Any non-finite value is rejected as [`EvalError::InvalidResult`].
//!
//! ```rust
//! use calcmaster::evaluator::{evaluate_expression, format_number};
//!
//! assert_eq!(evaluate_expression("2^3^2").unwrap(), 512.0);
//! assert_eq!(format_number(evaluate_expression("50%").unwrap()), "0.5");
//! assert!(evaluate_expression("1/0").is_err());
//! ```

use std::error::Error;
use std::fmt;

use super::parser::{parse, BinaryOperator, ExprNode, Function, ParseError};

/// Largest `n` whose factorial is a finite `f64`.
const MAX_FACTORIAL_ARGUMENT: f64 = 170.0;

/// Numeric failures raised while walking the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    DivisionByZero,
    /// Argument outside the function's domain. Carries a short description.
    DomainError(String),
    /// Factorial result too large for a double.
    Overflow,
    /// An intermediate or final value was NaN or infinite.
    InvalidResult,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::DivisionByZero => write!(f, "Division by zero"),
            EvalError::DomainError(detail) => write!(f, "Domain error: {}", detail),
            EvalError::Overflow => write!(f, "Result overflows"),
            EvalError::InvalidResult => write!(f, "Invalid result"),
        }
    }
}

impl Error for EvalError {}

/// Everything that can go wrong turning a buffer into a number.
///
/// This is the kind held in the calculator's error flag.
#[derive(Debug, Clone, PartialEq)]
pub enum CalcError {
    Parse(ParseError),
    Eval(EvalError),
}

impl fmt::Display for CalcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalcError::Parse(e) => write!(f, "Calculator error: {}", e),
            CalcError::Eval(e) => write!(f, "Calculator error: {}", e),
        }
    }
}

impl Error for CalcError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CalcError::Parse(e) => Some(e),
            CalcError::Eval(e) => Some(e),
        }
    }
}

impl From<ParseError> for CalcError {
    fn from(e: ParseError) -> Self {
        CalcError::Parse(e)
    }
}

impl From<EvalError> for CalcError {
    fn from(e: EvalError) -> Self {
        CalcError::Eval(e)
    }
}

/// Evaluate a parsed tree.
pub fn evaluate(node: &ExprNode) -> Result<f64, EvalError> {
    let value = match node {
        ExprNode::Literal(value) => *value,
        ExprNode::Negate(inner) => -evaluate(inner)?,
        ExprNode::UnaryPercent(inner) => evaluate(inner)? / 100.0,
        ExprNode::Factorial(inner) => factorial(evaluate(inner)?)?,
        ExprNode::BinaryOp { op, left, right } => {
            apply_binary(*op, evaluate(left)?, evaluate(right)?)?
        }
        ExprNode::FunctionCall { function, argument } => {
            apply_function(*function, evaluate(argument)?)?
        }
    };
    ensure_finite(value)
}

/// Parse and evaluate in one step.
pub fn evaluate_expression(input: &str) -> Result<f64, CalcError> {
    let tree = parse(input)?;
    Ok(evaluate(&tree)?)
}

fn ensure_finite(value: f64) -> Result<f64, EvalError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::InvalidResult)
    }
}

fn apply_binary(op: BinaryOperator, left: f64, right: f64) -> Result<f64, EvalError> {
    match op {
        BinaryOperator::Add => Ok(left + right),
        BinaryOperator::Subtract => Ok(left - right),
        BinaryOperator::Multiply => Ok(left * right),
        BinaryOperator::Divide => {
            if right == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(left / right)
            }
        }
        BinaryOperator::Power => power(left, right),
    }
}

fn power(base: f64, exponent: f64) -> Result<f64, EvalError> {
    if base == 0.0 && exponent == 0.0 {
        return Ok(1.0);
    }
    if base < 0.0 && exponent.fract() != 0.0 {
        return Err(EvalError::DomainError(format!(
            "{} raised to non-integer power {}",
            base, exponent
        )));
    }
    Ok(base.powf(exponent))
}

fn factorial(n: f64) -> Result<f64, EvalError> {
    if n < 0.0 || n.fract() != 0.0 {
        return Err(EvalError::DomainError(format!(
            "factorial of {} (needs a non-negative integer)",
            n
        )));
    }
    if n > MAX_FACTORIAL_ARGUMENT {
        return Err(EvalError::Overflow);
    }

    let mut result = 1.0;
    let mut k = 2.0;
    while k <= n {
        result *= k;
        k += 1.0;
    }

    if result.is_finite() {
        Ok(result)
    } else {
        Err(EvalError::Overflow)
    }
}

fn apply_function(function: Function, x: f64) -> Result<f64, EvalError> {
    match function {
        Function::Sin => Ok(x.sin()),
        Function::Cos => Ok(x.cos()),
        Function::Tan => Ok(x.tan()),
        Function::Log => {
            require_positive(function, x)?;
            Ok(x.log10())
        }
        Function::Ln => {
            require_positive(function, x)?;
            Ok(x.ln())
        }
        Function::Sqrt => {
            if x < 0.0 {
                return Err(EvalError::DomainError(format!("sqrt of negative {}", x)));
            }
            Ok(x.sqrt())
        }
    }
}

fn require_positive(function: Function, x: f64) -> Result<(), EvalError> {
    if x > 0.0 {
        Ok(())
    } else {
        Err(EvalError::DomainError(format!(
            "{} needs a positive argument, got {}",
            function.name(),
            x
        )))
    }
}

/// Stringify a result the way the display and history show it.
///
/// Uses the shortest decimal that round-trips. Magnitudes of at least `1e21`
/// or below `1e-6` switch to exponent notation with an explicit sign
/// (`1e+21`, `5e-7`), which the tokenizer reads back for chained calculations.
/// Negative zero prints as `0`.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }

    let magnitude = value.abs();
    if magnitude.is_finite() && (magnitude >= 1e21 || magnitude < 1e-6) {
        let formatted = format!("{:e}", value);
        return match formatted.find('e') {
            Some(idx) if !formatted[idx + 1..].starts_with('-') => {
                format!("{}e+{}", &formatted[..idx], &formatted[idx + 1..])
            }
            _ => formatted,
        };
    }

    format!("{}", value)
}
