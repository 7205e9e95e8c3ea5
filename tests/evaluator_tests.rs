//! Evaluator test suite
//!
//! Tests cover:
//! - Arithmetic precedence and associativity
//! - Percent, power and factorial rules
//! - Scientific functions and their domains
//! - Non-finite results and result formatting

use calcmaster::evaluator::{evaluate, evaluate_expression, format_number};
use calcmaster::parser::parse;
use calcmaster::{CalcError, EvalError, ParseError};

fn eval(input: &str) -> f64 {
    evaluate_expression(input).unwrap()
}

fn eval_err(input: &str) -> EvalError {
    match evaluate_expression(input) {
        Err(CalcError::Eval(e)) => e,
        other => panic!("expected an evaluation error for {:?}, got {:?}", input, other),
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-10,
        "expected {}, got {}",
        expected,
        actual
    );
}

#[test]
fn test_basic_arithmetic() {
    assert_eq!(eval("2+2"), 4.0);
    assert_eq!(eval("10-3"), 7.0);
    assert_eq!(eval("4*5"), 20.0);
    assert_eq!(eval("20/4"), 5.0);
    assert_eq!(eval("7/2"), 3.5);
}

#[test]
fn test_order_of_operations() {
    assert_eq!(eval("2+3*4"), 14.0);
    assert_eq!(eval("(2+3)*4"), 20.0);
    assert_eq!(eval("10-5-2"), 3.0);
    assert_eq!(eval("100/10/5"), 2.0);
    assert_eq!(eval("2^3*2"), 16.0);
}

#[test]
fn test_power() {
    assert_eq!(eval("2^3^2"), 512.0);
    assert_eq!(eval("0^0"), 1.0);
    assert_eq!(eval("2^-1"), 0.5);
    assert_eq!(eval("(-2)^3"), -8.0);
    assert_eq!(eval("4^0.5"), 2.0);
}

#[test]
fn test_negative_base_fractional_exponent() {
    assert!(matches!(eval_err("(-8)^(1/3)"), EvalError::DomainError(_)));
    assert!(matches!(eval_err("(-4)^0.5"), EvalError::DomainError(_)));
}

#[test]
fn test_percent() {
    assert_eq!(eval("50%"), 0.5);
    assert_eq!(eval("200*10%"), 20.0);
    assert_eq!(eval("50%%"), 0.005);
    assert_eq!(eval("50%3"), 1.5);
}

#[test]
fn test_factorial() {
    assert_eq!(eval("5!"), 120.0);
    assert_eq!(eval("0!"), 1.0);
    assert_eq!(eval("3!!"), 720.0);
    assert_eq!(eval("(2+1)!"), 6.0);
    assert!(eval("170!").is_finite());
}

#[test]
fn test_factorial_domain_and_overflow() {
    assert!(matches!(eval_err("-1!"), EvalError::DomainError(_)));
    assert!(matches!(eval_err("2.5!"), EvalError::DomainError(_)));
    assert_eq!(eval_err("171!"), EvalError::Overflow);
}

#[test]
fn test_sqrt() {
    assert_eq!(eval("sqrt(4)"), 2.0);
    assert_eq!(eval("sqrt(0)"), 0.0);
    assert!(matches!(eval_err("sqrt(-4)"), EvalError::DomainError(_)));
}

#[test]
fn test_trigonometry_in_radians() {
    assert_eq!(eval("sin(0)"), 0.0);
    assert_eq!(eval("cos(0)"), 1.0);
    assert_close(eval("sin(3.14159265358979/2)"), 1.0);
    assert_close(eval("tan(0.5)"), 0.5f64.tan());
}

#[test]
fn test_logarithms() {
    assert_close(eval("log(1000)"), 3.0);
    assert_close(eval("ln(2.718281828459045)"), 1.0);
    assert!(matches!(eval_err("log(0)"), EvalError::DomainError(_)));
    assert!(matches!(eval_err("ln(-1)"), EvalError::DomainError(_)));
}

#[test]
fn test_division_by_zero_never_returns_infinity() {
    assert_eq!(eval_err("1/0"), EvalError::DivisionByZero);
    assert_eq!(eval_err("0/0"), EvalError::DivisionByZero);
    assert_eq!(eval_err("5/(2-2)"), EvalError::DivisionByZero);
}

#[test]
fn test_non_finite_results_are_rejected() {
    assert_eq!(eval_err("0^-1"), EvalError::InvalidResult);
    assert_eq!(eval_err("1e308*10"), EvalError::InvalidResult);
}

#[test]
fn test_unary_minus() {
    assert_eq!(eval("-5+3"), -2.0);
    assert_eq!(eval("2*-3"), -6.0);
    assert_eq!(eval("7*-1"), -7.0);
    assert_eq!(eval("-(2+3)"), -5.0);
    // The sign belongs to the base.
    assert_eq!(eval("-2^2"), 4.0);
    assert_eq!(eval("0-2^2"), -4.0);
}

#[test]
fn test_long_sum_evaluates() {
    let sum = format!("{}1", "1+".repeat(400));
    assert_eq!(eval(&sum), 401.0);
}

#[test]
fn test_implicit_multiplication() {
    assert_eq!(eval("2(3)"), 6.0);
    assert_eq!(eval("(1+1)(2+2)"), 8.0);
    assert_eq!(eval("2sqrt(4)"), 4.0);
}

#[test]
fn test_parse_errors_surface_as_calc_errors() {
    assert_eq!(
        evaluate_expression("2+"),
        Err(CalcError::Parse(ParseError::DanglingOperator))
    );
    let err = evaluate_expression("").unwrap_err();
    assert_eq!(err.to_string(), "Calculator error: Empty expression");
}

#[test]
fn test_evaluate_tree_directly() {
    let tree = parse("sqrt(16)+1").unwrap();
    assert_eq!(evaluate(&tree), Ok(5.0));
}

#[test]
fn test_chained_result_reparses() {
    for value in &[42.0, -7.5, 1e21, 2.5e-7, 0.1 + 0.2] {
        let text = format_number(*value);
        assert_eq!(eval(&text), *value, "round trip of {}", text);
    }
}

#[test]
fn test_format_number() {
    assert_eq!(format_number(120.0), "120");
    assert_eq!(format_number(0.5), "0.5");
    assert_eq!(format_number(-4.0), "-4");
    assert_eq!(format_number(1e21), "1e+21");
    assert_eq!(format_number(1.5e-7), "1.5e-7");
}
