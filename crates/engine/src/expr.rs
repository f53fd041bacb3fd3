//! Boolean filter expressions over transactions.
//!
//! Grammar, compiled once to an AST:
//!
//! ```text
//! expr    := term ("or" term)*
//! term    := factor ("and" factor)*
//! factor  := "(" expr ")" | IDENT OP VALUE
//! OP      := "==" | "!=" | "contains" | ">" | ">=" | "<" | "<="
//! VALUE   := quoted string | bare word | number
//! ```
//!
//! Text comparisons are case-insensitive. Ordering operators apply to the
//! `amount` and `date` fields only.

use std::str::FromStr;

use rust_decimal::Decimal;
use tidyledger_core::Transaction;

use crate::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp {
        field: String,
        op: CmpOp,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Contains,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Expr {
    pub fn parse(input: &str) -> Result<Expr, EngineError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(EngineError::Expr(format!(
                "unexpected trailing input at token {}",
                parser.pos + 1
            )));
        }
        Ok(expr)
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        match self {
            Expr::And(a, b) => a.matches(tx) && b.matches(tx),
            Expr::Or(a, b) => a.matches(tx) || b.matches(tx),
            Expr::Cmp { field, op, value } => compare(tx, field, *op, value),
        }
    }
}

fn compare(tx: &Transaction, field: &str, op: CmpOp, value: &str) -> bool {
    if field == "amount" {
        let Ok(rhs) = Decimal::from_str(value) else {
            return false;
        };
        let lhs = tx.amount.as_decimal();
        return ordering_holds(op, lhs.partial_cmp(&rhs), || lhs == rhs);
    }
    if field == "date" {
        let Ok(rhs) = value.parse::<chrono::NaiveDate>() else {
            return false;
        };
        return ordering_holds(op, tx.date.partial_cmp(&rhs), || tx.date == rhs);
    }

    let lhs = match field {
        "kind" => Some(tx.kind.to_string()),
        _ => tx.field(field).map(|v| v.to_string()),
    };
    let lhs = lhs.unwrap_or_default().to_lowercase();
    let rhs = value.to_lowercase();
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        CmpOp::Contains => lhs.contains(&rhs),
        // Ordering on free text is never meaningful.
        _ => false,
    }
}

fn ordering_holds(
    op: CmpOp,
    cmp: Option<std::cmp::Ordering>,
    eq: impl Fn() -> bool,
) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CmpOp::Eq => eq(),
        CmpOp::Ne => !eq(),
        CmpOp::Contains => false,
        CmpOp::Gt => cmp == Some(Greater),
        CmpOp::Ge => matches!(cmp, Some(Greater | Equal)),
        CmpOp::Lt => cmp == Some(Less),
        CmpOp::Le => matches!(cmp, Some(Less | Equal)),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Op(CmpOp),
    And,
    Or,
    Word(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, EngineError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => s.push(c),
                        None => {
                            return Err(EngineError::Expr("unterminated string".to_string()))
                        }
                    }
                }
                tokens.push(Token::Word(s));
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let eq = chars.peek() == Some(&'=');
                if eq {
                    chars.next();
                }
                let op = match (c, eq) {
                    ('=', true) => CmpOp::Eq,
                    ('!', true) => CmpOp::Ne,
                    ('<', true) => CmpOp::Le,
                    ('>', true) => CmpOp::Ge,
                    ('<', false) => CmpOp::Lt,
                    ('>', false) => CmpOp::Gt,
                    _ => {
                        return Err(EngineError::Expr(format!(
                            "unexpected character '{c}'"
                        )))
                    }
                };
                tokens.push(Token::Op(op));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '=' | '!' | '<' | '>') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "contains" => Token::Op(CmpOp::Contains),
                    _ => Token::Word(word),
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expr(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.term()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.term()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.factor()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.factor()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, EngineError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(EngineError::Expr("expected ')'".to_string())),
                }
            }
            Some(Token::Word(field)) => {
                let op = match self.next() {
                    Some(Token::Op(op)) => op,
                    _ => {
                        return Err(EngineError::Expr(format!(
                            "expected comparison operator after '{field}'"
                        )))
                    }
                };
                let value = match self.next() {
                    Some(Token::Word(v)) => v,
                    _ => {
                        return Err(EngineError::Expr(format!(
                            "expected value after operator for '{field}'"
                        )))
                    }
                };
                Ok(Expr::Cmp { field, op, value })
            }
            other => Err(EngineError::Expr(format!(
                "expected field or '(' but found {other:?}"
            ))),
        }
    }
}
