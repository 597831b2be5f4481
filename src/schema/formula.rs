//! Compute-field formulas.
//!
//! A formula is plain arithmetic over numeric literals and field aliases
//! written in brackets, e.g. `[S1] + [S2] * 0.5`. Aliases are substituted with
//! the numeric value of the field that declares them; arithmetic is exact
//! decimal so currency-style sums never drift.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormulaError {
    #[error("formula is empty")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unexpected end of formula")]
    UnexpectedEnd,

    #[error("unexpected token at position {pos}")]
    UnexpectedToken { pos: usize },

    #[error("unterminated alias starting at position {pos}")]
    UnterminatedAlias { pos: usize },

    #[error("empty alias at position {pos}")]
    EmptyAlias { pos: usize },

    #[error("invalid number '{text}' at position {pos}")]
    InvalidNumber { text: String, pos: usize },

    #[error("formula nests deeper than {max} levels at position {pos}", max = MAX_DEPTH)]
    TooDeep { pos: usize },
}

/// Deepest expression a formula may build, counting both parenthesis/sign
/// nesting and operator chains. Parsing, evaluation and drop all recurse
/// over the tree.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(Decimal),
    Alias(String),
    Neg(Box<Expr>),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Alias(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, FormulaError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let pos = i;
        match ch {
            c if c.is_whitespace() => {
                i += 1;
            }
            '+' => { tokens.push((Token::Plus, pos)); i += 1; }
            '-' => { tokens.push((Token::Minus, pos)); i += 1; }
            '*' => { tokens.push((Token::Star, pos)); i += 1; }
            '/' => { tokens.push((Token::Slash, pos)); i += 1; }
            '(' => { tokens.push((Token::LParen, pos)); i += 1; }
            ')' => { tokens.push((Token::RParen, pos)); i += 1; }
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&c| c == ']')
                    .ok_or(FormulaError::UnterminatedAlias { pos })?;
                let alias: String = chars[i + 1..i + 1 + close].iter().collect();
                let alias = alias.trim().to_string();
                if alias.is_empty() {
                    return Err(FormulaError::EmptyAlias { pos });
                }
                tokens.push((Token::Alias(alias), pos));
                i += close + 2;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = Decimal::from_str(&text)
                    .map_err(|_| FormulaError::InvalidNumber { text: text.clone(), pos: start })?;
                tokens.push((Token::Number(value), start));
            }
            other => return Err(FormulaError::UnexpectedChar { ch: other, pos }),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    cursor: usize,
    nesting: usize,
}

/// A parsed subtree with its height
type Node = (Expr, usize);

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let item = self.tokens.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }

    fn enter(&mut self, pos: usize) -> Result<(), FormulaError> {
        self.nesting += 1;
        if self.nesting > MAX_DEPTH {
            return Err(FormulaError::TooDeep { pos });
        }
        Ok(())
    }

    fn binary(op: BinOp, lhs: Node, rhs: Node, pos: usize) -> Result<Node, FormulaError> {
        let height = lhs.1.max(rhs.1) + 1;
        if height > MAX_DEPTH {
            return Err(FormulaError::TooDeep { pos });
        }
        Ok((Expr::Binary { op, lhs: Box::new(lhs.0), rhs: Box::new(rhs.0) }, height))
    }

    fn expr(&mut self) -> Result<Node, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            let pos = self.tokens[self.cursor].1;
            self.cursor += 1;
            let rhs = self.term()?;
            lhs = Self::binary(op, lhs, rhs, pos)?;
        }
    }

    fn term(&mut self) -> Result<Node, FormulaError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            let pos = self.tokens[self.cursor].1;
            self.cursor += 1;
            let rhs = self.factor()?;
            lhs = Self::binary(op, lhs, rhs, pos)?;
        }
    }

    fn factor(&mut self) -> Result<Node, FormulaError> {
        match self.next() {
            Some((Token::Minus, pos)) => {
                self.enter(pos)?;
                let (inner, height) = self.factor()?;
                self.nesting -= 1;
                if height + 1 > MAX_DEPTH {
                    return Err(FormulaError::TooDeep { pos });
                }
                Ok((Expr::Neg(Box::new(inner)), height + 1))
            }
            Some((Token::Plus, pos)) => {
                self.enter(pos)?;
                let inner = self.factor()?;
                self.nesting -= 1;
                Ok(inner)
            }
            Some((Token::Number(n), _)) => Ok((Expr::Number(n), 1)),
            Some((Token::Alias(a), _)) => Ok((Expr::Alias(a), 1)),
            Some((Token::LParen, pos)) => {
                self.enter(pos)?;
                let inner = self.expr()?;
                self.nesting -= 1;
                match self.next() {
                    Some((Token::RParen, _)) => Ok(inner),
                    Some((_, pos)) => Err(FormulaError::UnexpectedToken { pos }),
                    None => Err(FormulaError::UnexpectedEnd),
                }
            }
            Some((_, pos)) => Err(FormulaError::UnexpectedToken { pos }),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }
}

/// Parse a formula string into an expression tree
pub fn parse(src: &str) -> Result<Expr, FormulaError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(FormulaError::Empty);
    }

    let mut parser = Parser { tokens, cursor: 0, nesting: 0 };
    let (expr, _) = parser.expr()?;
    match parser.next() {
        None => Ok(expr),
        Some((_, pos)) => Err(FormulaError::UnexpectedToken { pos }),
    }
}

impl Expr {
    /// Aliases referenced by this expression, in first-seen order
    pub fn references(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Alias(a) => {
                if !out.contains(a) {
                    out.push(a.clone());
                }
            }
            Expr::Neg(inner) => inner.collect_references(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_references(out);
                rhs.collect_references(out);
            }
        }
    }

    /// Evaluate with `lookup` resolving aliases. Any unresolved alias, overflow
    /// or division by zero makes the whole result `None`.
    pub fn evaluate(&self, lookup: &mut dyn FnMut(&str) -> Option<Decimal>) -> Option<Decimal> {
        match self {
            Expr::Number(n) => Some(*n),
            Expr::Alias(a) => lookup(a),
            Expr::Neg(inner) => inner.evaluate(lookup).map(|v| -v),
            Expr::Binary { op, lhs, rhs } => {
                let l = lhs.evaluate(lookup)?;
                let r = rhs.evaluate(lookup)?;
                match op {
                    BinOp::Add => l.checked_add(r),
                    BinOp::Sub => l.checked_sub(r),
                    BinOp::Mul => l.checked_mul(r),
                    BinOp::Div => l.checked_div(r),
                }
            }
        }
    }
}

/// Read a stored JSON value as a decimal. Numeric strings count as numbers.
pub fn value_as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(Decimal::from(u))
            } else {
                parse_decimal(&n.to_string())
            }
        }
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(text).or_else(|_| Decimal::from_scientific(text)).ok()
}

/// Render a decimal as JSON; integral values become JSON integers. Values a
/// JSON float cannot hold are rounded.
pub fn decimal_to_json(value: Decimal) -> Value {
    let normalized = value.normalize();
    if normalized.fract().is_zero() {
        if let Some(i) = normalized.to_i64() {
            return Value::from(i);
        }
    }
    normalized
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Like [`decimal_to_json`], but `None` when the JSON number would not read
/// back as exactly the same decimal.
pub fn decimal_to_exact_json(value: Decimal) -> Option<Value> {
    let rendered = decimal_to_json(value);
    match value_as_decimal(&rendered) {
        Some(back) if back == value => Some(rendered),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn eval(src: &str, vars: &[(&str, i64)]) -> Option<Decimal> {
        let vars: HashMap<String, Decimal> =
            vars.iter().map(|(k, v)| (k.to_string(), Decimal::from(*v))).collect();
        parse(src).unwrap().evaluate(&mut |a| vars.get(a).copied())
    }

    #[test]
    fn sums_two_aliases() {
        assert_eq!(eval("[S1]+[S2]", &[("S1", 15000), ("S2", 3000)]), Some(Decimal::from(18000)));
    }

    #[test]
    fn respects_precedence_and_parentheses() {
        assert_eq!(eval("2 + 3 * 4", &[]), Some(Decimal::from(14)));
        assert_eq!(eval("(2 + 3) * 4", &[]), Some(Decimal::from(20)));
        assert_eq!(eval("-[A] + 10", &[("A", 4)]), Some(Decimal::from(6)));
        assert_eq!(eval("[A] - -2", &[("A", 4)]), Some(Decimal::from(6)));
    }

    #[test]
    fn decimal_division_is_exact() {
        let v = eval("[A] / 4", &[("A", 10)]).unwrap();
        assert_eq!(decimal_to_json(v), json!(2.5));
        assert_eq!(decimal_to_json(Decimal::from_str("0.1").unwrap() + Decimal::from_str("0.2").unwrap()), json!(0.3));
    }

    #[test]
    fn missing_alias_or_zero_division_yields_none() {
        assert_eq!(eval("[A] + [B]", &[("A", 1)]), None);
        assert_eq!(eval("[A] / 0", &[("A", 1)]), None);
    }

    #[test]
    fn collects_references_once_in_order() {
        let expr = parse("[B] * ([A] + [B])").unwrap();
        assert_eq!(expr.references(), vec!["B".to_string(), "A".to_string()]);
    }

    #[test]
    fn reports_syntax_errors_with_position() {
        assert_eq!(parse("   "), Err(FormulaError::Empty));
        assert_eq!(parse("[A] +"), Err(FormulaError::UnexpectedEnd));
        assert_eq!(parse("[A"), Err(FormulaError::UnterminatedAlias { pos: 0 }));
        assert_eq!(parse("[] + 1"), Err(FormulaError::EmptyAlias { pos: 0 }));
        assert_eq!(parse("[A] % 2"), Err(FormulaError::UnexpectedChar { ch: '%', pos: 4 }));
        assert_eq!(parse("[A] [B]"), Err(FormulaError::UnexpectedToken { pos: 4 }));
        assert!(matches!(parse("1.2.3"), Err(FormulaError::InvalidNumber { .. })));
    }

    #[test]
    fn rejects_deep_nesting_without_overflowing() {
        let parens = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(matches!(parse(&parens), Err(FormulaError::TooDeep { .. })));

        let negations = format!("{}1", "-".repeat(200_000));
        assert!(matches!(parse(&negations), Err(FormulaError::TooDeep { .. })));

        let chain = vec!["1"; 200_000].join("+");
        assert!(matches!(parse(&chain), Err(FormulaError::TooDeep { .. })));
    }

    #[test]
    fn accepts_nesting_up_to_the_limit() {
        let src = format!("{}[A]{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(eval(&src, &[("A", 3)]), Some(Decimal::from(3)));

        let sum = vec!["[A]"; MAX_DEPTH].join(" + ");
        assert_eq!(eval(&sum, &[("A", 1)]), Some(Decimal::from(MAX_DEPTH as i64)));
    }

    #[test]
    fn exact_json_refuses_lossy_values() {
        let exact = |s: &str| decimal_to_exact_json(value_as_decimal(&json!(s)).unwrap());
        assert_eq!(exact("12000.5"), Some(json!(12000.5)));
        assert_eq!(exact("0.1"), Some(json!(0.1)));
        assert_eq!(exact("1e3"), Some(json!(1000)));
        assert_eq!(exact("1e20"), Some(json!(1e20)));
        assert_eq!(exact("1.00000000000000000001"), None);
        assert_eq!(exact("12345678901234567890123"), None);
    }

    #[test]
    fn reads_numeric_strings() {
        assert_eq!(value_as_decimal(&json!("12.5")), Decimal::from_str("12.5").ok());
        assert_eq!(value_as_decimal(&json!(7)), Some(Decimal::from(7)));
        assert_eq!(value_as_decimal(&json!(0.1)), Decimal::from_str("0.1").ok());
        assert_eq!(value_as_decimal(&json!("2.5e2")), Some(Decimal::from(250)));
        assert_eq!(value_as_decimal(&json!("1e300")), None);
        assert_eq!(value_as_decimal(&json!("abc")), None);
        assert_eq!(value_as_decimal(&json!(true)), None);
        assert_eq!(value_as_decimal(&Value::Null), None);
    }
}
