//! Collection access rules.
//!
//! A rule is `null` (locked: admins only), `""` (public) or a filter
//! expression over the requesting identity, for example
//! `@request.auth.id != "" && @request.auth.role = "admin"`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Role;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unterminated string literal at position {0}")]
    UnterminatedString(usize),

    #[error("unexpected '{found}' at position {pos}")]
    Unexpected { found: String, pos: usize },

    #[error("unexpected end of rule")]
    UnexpectedEnd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum AccessRule {
    Locked,
    Public,
    Expr(String),
}

impl From<Option<String>> for AccessRule {
    fn from(value: Option<String>) -> Self {
        match value {
            None => AccessRule::Locked,
            Some(s) if s.trim().is_empty() => AccessRule::Public,
            Some(s) => AccessRule::Expr(s),
        }
    }
}

impl From<AccessRule> for Option<String> {
    fn from(rule: AccessRule) -> Self {
        match rule {
            AccessRule::Locked => None,
            AccessRule::Public => Some(String::new()),
            AccessRule::Expr(s) => Some(s),
        }
    }
}

impl AccessRule {
    pub fn expr(s: &str) -> Self {
        AccessRule::from(Some(s.to_string()))
    }

    /// Admins pass every rule; everyone else is judged by the rule itself
    pub fn allows(&self, auth: Option<&RequestAuth>) -> Result<bool, RuleError> {
        if auth.map_or(false, |a| a.role == Role::Admin) {
            return Ok(true);
        }
        match self {
            AccessRule::Locked => Ok(false),
            AccessRule::Public => Ok(true),
            AccessRule::Expr(src) => Ok(parse(src)?.eval(auth)),
        }
    }
}

/// Identity a rule is evaluated against
#[derive(Debug, Clone)]
pub struct RequestAuth {
    pub id: String,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    AuthId,
    AuthUsername,
    AuthRole,
    Literal(String),
}

#[derive(Debug, Clone, PartialEq)]
enum RuleExpr {
    Eq(Operand, Operand),
    Ne(Operand, Operand),
    And(Box<RuleExpr>, Box<RuleExpr>),
    Or(Box<RuleExpr>, Box<RuleExpr>),
}

impl Operand {
    fn resolve(&self, auth: Option<&RequestAuth>) -> String {
        match self {
            Operand::AuthId => auth.map(|a| a.id.clone()).unwrap_or_default(),
            Operand::AuthUsername => auth.map(|a| a.username.clone()).unwrap_or_default(),
            Operand::AuthRole => auth.map(|a| a.role.as_str().to_string()).unwrap_or_default(),
            Operand::Literal(s) => s.clone(),
        }
    }
}

impl RuleExpr {
    fn eval(&self, auth: Option<&RequestAuth>) -> bool {
        match self {
            RuleExpr::Eq(a, b) => a.resolve(auth) == b.resolve(auth),
            RuleExpr::Ne(a, b) => a.resolve(auth) != b.resolve(auth),
            RuleExpr::And(a, b) => a.eval(auth) && b.eval(auth),
            RuleExpr::Or(a, b) => a.eval(auth) || b.eval(auth),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Eq,
    Ne,
    And,
    Or,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, RuleError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let pos = i;
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => { out.push((Token::LParen, pos)); i += 1; }
            ')' => { out.push((Token::RParen, pos)); i += 1; }
            '=' => { out.push((Token::Eq, pos)); i += 1; }
            '!' if chars.get(i + 1) == Some(&'=') => { out.push((Token::Ne, pos)); i += 2; }
            '&' if chars.get(i + 1) == Some(&'&') => { out.push((Token::And, pos)); i += 2; }
            '|' if chars.get(i + 1) == Some(&'|') => { out.push((Token::Or, pos)); i += 2; }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or(RuleError::UnterminatedString(pos))?;
                out.push((Token::Str(chars[i + 1..i + 1 + end].iter().collect()), pos));
                i += end + 2;
            }
            c if c == '@' || c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i] == '@' || chars[i] == '.' || chars[i] == '_' || chars[i].is_alphanumeric()) {
                    i += 1;
                }
                out.push((Token::Ident(chars[start..i].iter().collect()), start));
            }
            other => return Err(RuleError::Unexpected { found: other.to_string(), pos }),
        }
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    cursor: usize,
}

impl Parser {
    fn next(&mut self) -> Option<(Token, usize)> {
        let t = self.tokens.get(self.cursor).cloned();
        self.cursor += 1;
        t
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(t, _)| t)
    }

    fn or_expr(&mut self) -> Result<RuleExpr, RuleError> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.cursor += 1;
            lhs = RuleExpr::Or(Box::new(lhs), Box::new(self.and_expr()?));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<RuleExpr, RuleError> {
        let mut lhs = self.comparison()?;
        while self.peek() == Some(&Token::And) {
            self.cursor += 1;
            lhs = RuleExpr::And(Box::new(lhs), Box::new(self.comparison()?));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<RuleExpr, RuleError> {
        if self.peek() == Some(&Token::LParen) {
            self.cursor += 1;
            let inner = self.or_expr()?;
            return match self.next() {
                Some((Token::RParen, _)) => Ok(inner),
                Some((t, pos)) => Err(RuleError::Unexpected { found: format!("{:?}", t), pos }),
                None => Err(RuleError::UnexpectedEnd),
            };
        }

        let lhs = self.operand()?;
        let op = self.next().ok_or(RuleError::UnexpectedEnd)?;
        let rhs = self.operand()?;
        match op {
            (Token::Eq, _) => Ok(RuleExpr::Eq(lhs, rhs)),
            (Token::Ne, _) => Ok(RuleExpr::Ne(lhs, rhs)),
            (t, pos) => Err(RuleError::Unexpected { found: format!("{:?}", t), pos }),
        }
    }

    fn operand(&mut self) -> Result<Operand, RuleError> {
        match self.next() {
            Some((Token::Str(s), _)) => Ok(Operand::Literal(s)),
            Some((Token::Ident(id), _)) => match id.as_str() {
                "@request.auth.id" => Ok(Operand::AuthId),
                "@request.auth.username" => Ok(Operand::AuthUsername),
                "@request.auth.role" => Ok(Operand::AuthRole),
                _ => Err(RuleError::UnknownIdentifier(id)),
            },
            Some((t, pos)) => Err(RuleError::Unexpected { found: format!("{:?}", t), pos }),
            None => Err(RuleError::UnexpectedEnd),
        }
    }
}

fn parse(src: &str) -> Result<RuleExpr, RuleError> {
    let mut parser = Parser { tokens: tokenize(src)?, cursor: 0 };
    let expr = parser.or_expr()?;
    match parser.next() {
        None => Ok(expr),
        Some((t, pos)) => Err(RuleError::Unexpected { found: format!("{:?}", t), pos }),
    }
}

/// Check a rule expression without evaluating it
pub fn validate(rule: &AccessRule) -> Result<(), RuleError> {
    match rule {
        AccessRule::Expr(src) => parse(src).map(|_| ()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> RequestAuth {
        RequestAuth { id: "u1".into(), username: "alice".into(), role }
    }

    const AUTHENTICATED: &str = r#"@request.auth.id != """#;

    #[test]
    fn authenticated_rule() {
        let rule = AccessRule::expr(AUTHENTICATED);
        assert!(rule.allows(Some(&user(Role::User))).unwrap());
        assert!(!rule.allows(None).unwrap());
    }

    #[test]
    fn locked_and_public() {
        assert!(!AccessRule::Locked.allows(Some(&user(Role::User))).unwrap());
        assert!(AccessRule::Locked.allows(Some(&user(Role::Admin))).unwrap());
        assert!(AccessRule::Public.allows(None).unwrap());
    }

    #[test]
    fn role_expressions() {
        let rule = AccessRule::expr(r#"@request.auth.id != "" && (@request.auth.role = 'admin' || @request.auth.username = "alice")"#);
        assert!(rule.allows(Some(&user(Role::User))).unwrap());
        let bob = RequestAuth { id: "u2".into(), username: "bob".into(), role: Role::User };
        assert!(!rule.allows(Some(&bob)).unwrap());
    }

    #[test]
    fn serde_maps_null_and_empty() {
        let rules: Vec<AccessRule> = serde_json::from_str(r#"[null, "", "@request.auth.id != \"\""]"#).unwrap();
        assert_eq!(rules[0], AccessRule::Locked);
        assert_eq!(rules[1], AccessRule::Public);
        assert_eq!(rules[2], AccessRule::expr(AUTHENTICATED));
        assert_eq!(serde_json::to_string(&AccessRule::Locked).unwrap(), "null");
    }

    #[test]
    fn rejects_malformed_rules() {
        assert_eq!(
            validate(&AccessRule::expr("@request.auth.email = 'x'")),
            Err(RuleError::UnknownIdentifier("@request.auth.email".into()))
        );
        assert_eq!(validate(&AccessRule::expr("@request.auth.id !=")), Err(RuleError::UnexpectedEnd));
        assert_eq!(validate(&AccessRule::expr("@request.auth.id = 'x")), Err(RuleError::UnterminatedString(19)));
    }
}
