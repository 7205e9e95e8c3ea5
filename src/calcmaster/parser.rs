//! # Expression Parser
//!
//! Turns the raw keypad buffer into an [`ExprNode`] tree in two passes: a
//! character scanner producing [`Token`]s, then a recursive-descent parser.
//!
//! ## Grammar
//!
//! From highest to lowest binding power:
//!
//! | Level | Syntax | Associativity |
//! |-------|--------|---------------|
//! | primary | number, `( expr )`, `sin( expr )` ... | - |
//! | sign | prefix `-` / `+` | right |
//! | factorial | postfix `!` | left |
//! | power | `^` | right |
//! | percent | postfix `%` (divide by 100) | left |
//! | product | `*`, `/`, implicit (`2(3)`, `2sqrt(4)`) | left |
//! | sum | `+`, `-` | left |
//!
//! A prefix sign binds tighter than `!`, so `-1!` is `(-1)!` and `-2^2` is `(-2)^2`.
//!
//! Input longer than [`MAX_TOKENS`] tokens or nested deeper than [`MAX_NESTING`] levels is
//! rejected with [`ParseError::TooComplex`], so recursion stays bounded.
//!
//! ```rust
//! use calcmaster::parser::{parse, BinaryOperator, ExprNode};
//!
//! let tree = parse("2+3*4").unwrap();
//! match tree {
//!     ExprNode::BinaryOp { op, .. } => assert_eq!(op, BinaryOperator::Add),
//!     other => panic!("unexpected tree {:?}", other),
//! }
//! ```

use std::error::Error;
use std::fmt;

/// Longest token sequence [`parse`] accepts. Bounds the height of the tree.
pub const MAX_TOKENS: usize = 1024;

/// Deepest nesting of groups, prefix signs and `^` chains [`parse`] accepts.
pub const MAX_NESTING: usize = 256;

/// Syntax errors reported by [`tokenize`] and [`parse`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// A character outside the calculator's alphabet, or an unknown word.
    UnexpectedCharacter { ch: char, position: usize },
    /// A `(` without its `)` or a stray `)`.
    UnbalancedParens,
    /// Digits and dots that do not form a number, e.g. `1.2.3`.
    MalformedNumber(String),
    /// An operator with no operand on one side, e.g. `2+` or `*3`.
    DanglingOperator,
    /// Nothing to evaluate: empty input or `()`.
    EmptyExpression,
    /// More tokens than [`MAX_TOKENS`] or nesting deeper than [`MAX_NESTING`].
    TooComplex,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedCharacter { ch, position } => {
                write!(f, "Unexpected character '{}' at position {}", ch, position)
            }
            ParseError::UnbalancedParens => write!(f, "Unbalanced parentheses"),
            ParseError::MalformedNumber(text) => write!(f, "Malformed number: {}", text),
            ParseError::DanglingOperator => write!(f, "Operator is missing an operand"),
            ParseError::EmptyExpression => write!(f, "Empty expression"),
            ParseError::TooComplex => write!(f, "Expression is too long or too deeply nested"),
        }
    }
}

impl Error for ParseError {}

/// Single-character operators that are not grouping or postfix-only symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

/// The scientific functions the keypad can insert.
///
/// Every function takes exactly one parenthesized argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    /// Base-10 logarithm.
    Log,
    /// Natural logarithm.
    Ln,
    Sqrt,
}

impl Function {
    pub const ALL: [Function; 6] = [
        Function::Sin,
        Function::Cos,
        Function::Tan,
        Function::Log,
        Function::Ln,
        Function::Sqrt,
    ];

    /// The name as typed on the keypad, without the opening parenthesis.
    pub fn name(self) -> &'static str {
        match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Log => "log",
            Function::Ln => "ln",
            Function::Sqrt => "sqrt",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Operator(Operator),
    Caret,
    Bang,
    LParen,
    RParen,
    /// A function name together with its opening parenthesis, e.g. `sqrt(`.
    Function(Function),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
}

impl BinaryOperator {
    pub fn symbol(self) -> char {
        match self {
            BinaryOperator::Add => '+',
            BinaryOperator::Subtract => '-',
            BinaryOperator::Multiply => '*',
            BinaryOperator::Divide => '/',
            BinaryOperator::Power => '^',
        }
    }
}

/// Parsed expression tree. Built per evaluation and dropped afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    Literal(f64),
    Negate(Box<ExprNode>),
    UnaryPercent(Box<ExprNode>),
    Factorial(Box<ExprNode>),
    BinaryOp {
        op: BinaryOperator,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    FunctionCall {
        function: Function,
        argument: Box<ExprNode>,
    },
}

/// Whether `c` may appear in a calculator buffer at all.
///
/// Covers digits, operators, grouping, the letters of the function names and
/// `e` for exponent notation in chained results such as `1e+21`.
pub fn is_accepted_char(c: char) -> bool {
    c.is_ascii_digit()
        || "+-*/%^!(). ".contains(c)
        || c == 'e'
        || Function::ALL.iter().any(|f| f.name().contains(c))
}

/// Split `input` into tokens, left to right.
///
/// Whitespace is skipped. A function name must be immediately followed by `(`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let (value, next) = read_number(&chars, i)?;
                tokens.push(Token::Number(value));
                i = next;
            }
            '+' => {
                tokens.push(Token::Operator(Operator::Plus));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Operator(Operator::Minus));
                i += 1;
            }
            '*' => {
                tokens.push(Token::Operator(Operator::Star));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Operator(Operator::Slash));
                i += 1;
            }
            '%' => {
                tokens.push(Token::Operator(Operator::Percent));
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '!' => {
                tokens.push(Token::Bang);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_alphabetic() => {
                let (function, next) = read_function(&chars, i)?;
                tokens.push(Token::Function(function));
                i = next;
            }
            other => {
                return Err(ParseError::UnexpectedCharacter {
                    ch: other,
                    position: i,
                })
            }
        }
    }

    Ok(tokens)
}

/// Read a decimal literal starting at `start`, returning its value and the
/// index just past it. An exponent suffix is only consumed when digits follow.
fn read_number(chars: &[char], start: usize) -> Result<(f64, usize), ParseError> {
    let mut end = start;
    let mut digits = 0;
    let mut dots = 0;

    while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
        if chars[end] == '.' {
            dots += 1;
        } else {
            digits += 1;
        }
        end += 1;
    }

    if digits > 0 && end < chars.len() && chars[end] == 'e' {
        let mut j = end + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        let exponent_start = j;
        while j < chars.len() && chars[j].is_ascii_digit() {
            j += 1;
        }
        if j > exponent_start {
            end = j;
        }
    }

    let text: String = chars[start..end].iter().collect();
    if digits == 0 || dots > 1 {
        return Err(ParseError::MalformedNumber(text));
    }

    text.parse::<f64>()
        .map(|value| (value, end))
        .map_err(|_| ParseError::MalformedNumber(text))
}

fn read_function(chars: &[char], start: usize) -> Result<(Function, usize), ParseError> {
    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_alphabetic() {
        end += 1;
    }

    let word: String = chars[start..end].iter().collect();
    let function = Function::from_name(&word).ok_or(ParseError::UnexpectedCharacter {
        ch: chars[start],
        position: start,
    })?;

    match chars.get(end).copied() {
        Some('(') => Ok((function, end + 1)),
        Some(other) => Err(ParseError::UnexpectedCharacter {
            ch: other,
            position: end,
        }),
        None => Err(ParseError::DanglingOperator),
    }
}

/// Parse `input` into an expression tree.
///
/// Pure function of the string. See the module docs for the grammar.
pub fn parse(input: &str) -> Result<ExprNode, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::EmptyExpression);
    }
    if tokens.len() > MAX_TOKENS {
        return Err(ParseError::TooComplex);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        open_groups: 0,
    };
    let tree = parser.parse_sum()?;

    match parser.peek() {
        None => Ok(tree),
        Some(Token::RParen) => Err(ParseError::UnbalancedParens),
        Some(_) => Err(ParseError::DanglingOperator),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Current recursion depth, capped at `MAX_NESTING`.
    depth: usize,
    open_groups: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn nested<T>(
        &mut self,
        step: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::TooComplex);
        }
        self.depth += 1;
        let result = step(self);
        self.depth -= 1;
        result
    }

    fn peek_operator(&self) -> Option<Operator> {
        match self.peek() {
            Some(Token::Operator(op)) => Some(*op),
            _ => None,
        }
    }

    fn parse_sum(&mut self) -> Result<ExprNode, ParseError> {
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek_operator() {
                Some(Operator::Plus) => BinaryOperator::Add,
                Some(Operator::Minus) => BinaryOperator::Subtract,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_product()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<ExprNode, ParseError> {
        let mut left = self.parse_percent()?;
        loop {
            let op = match self.peek() {
                Some(Token::Operator(Operator::Star)) => {
                    self.pos += 1;
                    BinaryOperator::Multiply
                }
                Some(Token::Operator(Operator::Slash)) => {
                    self.pos += 1;
                    BinaryOperator::Divide
                }
                // Juxtaposition: `2(3)`, `2sin(0)`, `50%3`
                Some(Token::Number(_)) | Some(Token::LParen) | Some(Token::Function(_)) => {
                    BinaryOperator::Multiply
                }
                _ => break,
            };
            let right = self.parse_percent()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_percent(&mut self) -> Result<ExprNode, ParseError> {
        let mut node = self.parse_power()?;
        while self.peek_operator() == Some(Operator::Percent) {
            self.pos += 1;
            node = ExprNode::UnaryPercent(Box::new(node));
        }
        Ok(node)
    }

    fn parse_power(&mut self) -> Result<ExprNode, ParseError> {
        let base = self.parse_factorial()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            let exponent = self.nested(Self::parse_power)?;
            return Ok(binary(BinaryOperator::Power, base, exponent));
        }
        Ok(base)
    }

    fn parse_factorial(&mut self) -> Result<ExprNode, ParseError> {
        let mut node = self.parse_signed()?;
        while self.peek() == Some(&Token::Bang) {
            self.pos += 1;
            node = ExprNode::Factorial(Box::new(node));
        }
        Ok(node)
    }

    fn parse_signed(&mut self) -> Result<ExprNode, ParseError> {
        match self.peek_operator() {
            Some(Operator::Minus) => {
                self.pos += 1;
                Ok(ExprNode::Negate(Box::new(self.nested(Self::parse_signed)?)))
            }
            Some(Operator::Plus) => {
                self.pos += 1;
                self.nested(Self::parse_signed)
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<ExprNode, ParseError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(ExprNode::Literal(value)),
            Some(Token::LParen) => self.parse_group(),
            Some(Token::Function(function)) => {
                let argument = self.parse_group()?;
                Ok(ExprNode::FunctionCall {
                    function,
                    argument: Box::new(argument),
                })
            }
            Some(Token::RParen) if self.open_groups == 0 => Err(ParseError::UnbalancedParens),
            Some(_) => Err(ParseError::DanglingOperator),
            None => match self.tokens.last() {
                Some(Token::LParen) | Some(Token::Function(_)) => {
                    Err(ParseError::UnbalancedParens)
                }
                _ => Err(ParseError::DanglingOperator),
            },
        }
    }

    /// Parse the inside of a group whose `(` was just consumed, plus the `)`.
    fn parse_group(&mut self) -> Result<ExprNode, ParseError> {
        if self.peek() == Some(&Token::RParen) {
            return Err(ParseError::EmptyExpression);
        }
        self.open_groups += 1;
        let inner = self.nested(Self::parse_sum);
        self.open_groups -= 1;
        let inner = inner?;
        match self.advance() {
            Some(Token::RParen) => Ok(inner),
            _ => Err(ParseError::UnbalancedParens),
        }
    }
}

fn binary(op: BinaryOperator, left: ExprNode, right: ExprNode) -> ExprNode {
    ExprNode::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
