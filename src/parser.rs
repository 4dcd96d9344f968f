//! Text-to-AST parser for probabilistic counter programs
//!
//! Input shape (see the grammar in the project documentation):
//!
//! ```text
//! # line comments
//! /*@ Bounded, M, [x, 0, 3], [y, -1, 4] @*/      (optional annotation)
//! int x = 1;                                      (declarations)
//! while (x > 0) { { x := x + 1 } [1/2] { x := x - 1 } }
//! ```
//!
//! Guards are parsed into symbolic predicates and stored in a [`GuardTable`];
//! the syntax tree refers to them through labels so the k-d → 1-d transforms
//! can rewrite every guard in one sweep. After parsing, instructions that
//! cannot influence termination are dropped: `skip`s, zero-step assignments,
//! and assignments to variables that appear in no guard. If nothing remains,
//! a dummy counter is introduced so the pipeline always has one variable to
//! work with.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use num_traits::{One, ToPrimitive, Zero};
use tracing::info;

use crate::program::{Guard, GuardTable, Program, Stmt};
use crate::symbolic::{CmpOp, Expr, Pred};
use crate::{Int, Rat};

/// Parser failures (malformed source text or annotation).
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected character `{0}` on line {1}")]
    UnexpectedChar(char, usize),
    #[error("expected {expected}, found {found} on line {line}")]
    Unexpected {
        expected: String,
        found: String,
        line: usize,
    },
    #[error("unexpected end of input, expected {0}")]
    UnexpectedEof(String),
    #[error("probability {0} is outside [0, 1]")]
    BadProbability(String),
    #[error("malformed annotation: {0}")]
    BadAnnotation(String),
    #[error("integer literal out of range: {0}")]
    BadInt(String),
    #[error("assignment on line {0} must update its own variable")]
    SelfAssign(usize),
}

// ============================================================================
// Annotations
// ============================================================================

/// The `/*@ … @*/` block preceding the declarations.
#[derive(Clone, Debug)]
pub enum Annotation {
    Bounded(BoundedAnn),
    CondBounded(CondBoundedAnn),
}

/// `Bounded`: per-variable ranges plus an optional unbounded variable.
#[derive(Clone, Debug)]
pub struct BoundedAnn {
    pub unbounded: Option<String>,
    /// Sorted by increasing extent.
    pub vars: Vec<BoundedVar>,
}

/// One bounded variable: `comp` shifts the range to start at zero and
/// `extent` is the number of values the shifted variable can take.
#[derive(Clone, Debug)]
pub struct BoundedVar {
    pub name: String,
    pub comp: i64,
    pub extent: i64,
}

/// `CondBounded`: a central variable plus, per tracked variable, the tuple
/// `(a, b, C, D)` such that `a·v − b·c − C` stays within `[-D, D]`.
#[derive(Clone, Debug)]
pub struct CondBoundedAnn {
    pub central: String,
    pub vars: Vec<CondVar>,
}

#[derive(Clone, Debug)]
pub struct CondVar {
    pub name: String,
    pub scale: i64,  // a
    pub slope: i64,  // b
    pub offset: i64, // C
    pub radius: i64, // D
}

fn extract_annotation(text: &str) -> Result<(Option<Annotation>, String), ParseError> {
    let Some(start) = text.find("/*@") else {
        return Ok((None, text.to_string()));
    };
    let Some(end_rel) = text[start + 3..].find("@*/") else {
        return Err(ParseError::BadAnnotation("unterminated /*@ block".into()));
    };
    let content = &text[start + 3..start + 3 + end_rel];
    let rest = format!("{}{}", &text[..start], &text[start + 3 + end_rel + 3..]);

    let mut parts: Vec<&str> = content
        .split(|c| c == ',' || c == '[' || c == ']')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        return Err(ParseError::BadAnnotation("empty annotation block".into()));
    }
    let category = parts.remove(0);

    let parse_i64 = |s: &str| -> Result<i64, ParseError> {
        s.parse::<i64>()
            .map_err(|_| ParseError::BadAnnotation(format!("expected an integer, got `{s}`")))
    };

    let ann = match category {
        "Bounded" => {
            let unbounded = if parts.len() % 3 != 0 {
                Some(parts.remove(0).to_string())
            } else {
                None
            };
            if parts.len() % 3 != 0 {
                return Err(ParseError::BadAnnotation(
                    "Bounded expects [name, lo, hi] triples".into(),
                ));
            }
            let mut vars = Vec::new();
            for chunk in parts.chunks(3) {
                let (lo, hi) = (parse_i64(chunk[1])?, parse_i64(chunk[2])?);
                if hi < lo {
                    return Err(ParseError::BadAnnotation(format!(
                        "empty range [{lo}, {hi}] for `{}`",
                        chunk[0]
                    )));
                }
                let comp = if lo < 0 { -lo } else { 0 };
                vars.push(BoundedVar {
                    name: chunk[0].to_string(),
                    comp,
                    extent: comp + hi + 1,
                });
            }
            vars.sort_by_key(|v| v.extent);
            Annotation::Bounded(BoundedAnn { unbounded, vars })
        }
        "CondBounded" => {
            if parts.is_empty() || (parts.len() - 1) % 5 != 0 {
                return Err(ParseError::BadAnnotation(
                    "CondBounded expects a central variable and 5-tuples".into(),
                ));
            }
            let central = parts.remove(0).to_string();
            let mut vars = Vec::new();
            for chunk in parts.chunks(5) {
                vars.push(CondVar {
                    name: chunk[0].to_string(),
                    scale: parse_i64(chunk[1])?,
                    slope: parse_i64(chunk[2])?,
                    offset: parse_i64(chunk[3])?,
                    radius: parse_i64(chunk[4])?,
                });
            }
            Annotation::CondBounded(CondBoundedAnn { central, vars })
        }
        other => {
            return Err(ParseError::BadAnnotation(format!(
                "unsupported category `{other}`, expected Bounded or CondBounded"
            )))
        }
    };
    Ok((Some(ann), rest))
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
enum Tok {
    Int(Int),
    Decimal(Int, String),
    Ident(String),
    KwInt,
    KwWhile,
    KwIf,
    KwElse,
    KwSkip,
    KwAnd,
    KwOr,
    KwNot,
    KwTrue,
    KwFalse,
    Assign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
}

impl std::fmt::Display for Tok {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tok::Int(v) => write!(f, "`{v}`"),
            Tok::Decimal(i, d) => write!(f, "`{i}.{d}`"),
            Tok::Ident(s) => write!(f, "`{s}`"),
            Tok::KwInt => write!(f, "`int`"),
            Tok::KwWhile => write!(f, "`while`"),
            Tok::KwIf => write!(f, "`if`"),
            Tok::KwElse => write!(f, "`else`"),
            Tok::KwSkip => write!(f, "`skip`"),
            Tok::KwAnd => write!(f, "`and`"),
            Tok::KwOr => write!(f, "`or`"),
            Tok::KwNot => write!(f, "`not`"),
            Tok::KwTrue => write!(f, "`true`"),
            Tok::KwFalse => write!(f, "`false`"),
            Tok::Assign => write!(f, "`:=`"),
            Tok::Plus => write!(f, "`+`"),
            Tok::Minus => write!(f, "`-`"),
            Tok::Star => write!(f, "`*`"),
            Tok::StarStar => write!(f, "`**`"),
            Tok::Slash => write!(f, "`/`"),
            Tok::Eq => write!(f, "`=`"),
            Tok::Ne => write!(f, "`!=`"),
            Tok::Lt => write!(f, "`<`"),
            Tok::Le => write!(f, "`<=`"),
            Tok::Gt => write!(f, "`>`"),
            Tok::Ge => write!(f, "`>=`"),
            Tok::LParen => write!(f, "`(`"),
            Tok::RParen => write!(f, "`)`"),
            Tok::LBrace => write!(f, "`{{`"),
            Tok::RBrace => write!(f, "`}}`"),
            Tok::LBracket => write!(f, "`[`"),
            Tok::RBracket => write!(f, "`]`"),
            Tok::Semi => write!(f, "`;`"),
            Tok::Comma => write!(f, "`,`"),
        }
    }
}

fn strip_comments(text: &str) -> String {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

fn lex(text: &str) -> Result<Vec<(Tok, usize)>, ParseError> {
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1usize;
    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let int_part: Int = digits
                    .parse()
                    .map_err(|_| ParseError::BadInt(digits.clone()))?;
                if chars.peek() == Some(&'.') {
                    chars.next();
                    let mut frac = String::new();
                    while let Some(&d) = chars.peek() {
                        if d.is_ascii_digit() {
                            frac.push(d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    out.push((Tok::Decimal(int_part, frac), line));
                } else {
                    out.push((Tok::Int(int_part), line));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        word.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let tok = match word.as_str() {
                    "int" => Tok::KwInt,
                    "while" => Tok::KwWhile,
                    "if" => Tok::KwIf,
                    "else" => Tok::KwElse,
                    "skip" => Tok::KwSkip,
                    "and" => Tok::KwAnd,
                    "or" => Tok::KwOr,
                    "not" => Tok::KwNot,
                    "true" => Tok::KwTrue,
                    "false" => Tok::KwFalse,
                    _ => Tok::Ident(word),
                };
                out.push((tok, line));
            }
            ':' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    out.push((Tok::Assign, line));
                } else {
                    return Err(ParseError::UnexpectedChar(':', line));
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                }
                out.push((Tok::Eq, line));
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    out.push((Tok::Ne, line));
                } else {
                    return Err(ParseError::UnexpectedChar('!', line));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    out.push((Tok::Le, line));
                } else {
                    out.push((Tok::Lt, line));
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    out.push((Tok::Ge, line));
                } else {
                    out.push((Tok::Gt, line));
                }
            }
            '*' => {
                chars.next();
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push((Tok::StarStar, line));
                } else {
                    out.push((Tok::Star, line));
                }
            }
            '+' => {
                chars.next();
                out.push((Tok::Plus, line));
            }
            '-' => {
                chars.next();
                out.push((Tok::Minus, line));
            }
            '/' => {
                chars.next();
                out.push((Tok::Slash, line));
            }
            '(' => {
                chars.next();
                out.push((Tok::LParen, line));
            }
            ')' => {
                chars.next();
                out.push((Tok::RParen, line));
            }
            '{' => {
                chars.next();
                out.push((Tok::LBrace, line));
            }
            '}' => {
                chars.next();
                out.push((Tok::RBrace, line));
            }
            '[' => {
                chars.next();
                out.push((Tok::LBracket, line));
            }
            ']' => {
                chars.next();
                out.push((Tok::RBracket, line));
            }
            ';' => {
                chars.next();
                out.push((Tok::Semi, line));
            }
            ',' => {
                chars.next();
                out.push((Tok::Comma, line));
            }
            other => return Err(ParseError::UnexpectedChar(other, line)),
        }
    }
    Ok(out)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    toks: &'a [(Tok, usize)],
    pos: usize,
    table: GuardTable,
}

impl<'a> Parser<'a> {
    fn new(toks: &'a [(Tok, usize)]) -> Self {
        Self {
            toks,
            pos: 0,
            table: GuardTable::new(),
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.toks
            .get(self.pos.min(self.toks.len().saturating_sub(1)))
            .map(|(_, l)| *l)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Option<&Tok> {
        let t = self.toks.get(self.pos).map(|(t, _)| t);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: &Tok, what: &str) -> Result<(), ParseError> {
        match self.toks.get(self.pos) {
            Some((t, _)) if t == want => {
                self.pos += 1;
                Ok(())
            }
            Some((t, l)) => Err(ParseError::Unexpected {
                expected: what.to_string(),
                found: t.to_string(),
                line: *l,
            }),
            None => Err(ParseError::UnexpectedEof(what.to_string())),
        }
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected<T>(&self, expected: &str) -> Result<T, ParseError> {
        match self.toks.get(self.pos) {
            Some((t, l)) => Err(ParseError::Unexpected {
                expected: expected.to_string(),
                found: t.to_string(),
                line: *l,
            }),
            None => Err(ParseError::UnexpectedEof(expected.to_string())),
        }
    }

    // ------------------------- Declarations -------------------------

    fn parse_declarations(&mut self) -> Result<Vec<(String, i64)>, ParseError> {
        let mut vars = Vec::new();
        while self.peek() == Some(&Tok::KwInt) {
            self.pos += 1;
            let name = match self.next() {
                Some(Tok::Ident(n)) => n.clone(),
                _ => return self.unexpected("a variable name"),
            };
            self.expect(&Tok::Eq, "`=`")?;
            let negative = self.eat(&Tok::Minus);
            let value = match self.next() {
                Some(Tok::Int(v)) => v.clone(),
                _ => return self.unexpected("an integer initial value"),
            };
            let mut value = value
                .to_i64()
                .ok_or_else(|| ParseError::BadInt(value.to_string()))?;
            if negative {
                value = -value;
            }
            self.expect(&Tok::Semi, "`;` after declaration")?;
            vars.push((name, value));
        }
        Ok(vars)
    }

    // ------------------------- Statements -------------------------

    fn parse_stmts_until(&mut self, terminator: Option<&Tok>) -> Result<Vec<Stmt>, ParseError> {
        let mut out = Vec::new();
        loop {
            match (self.peek(), terminator) {
                (None, None) => break,
                (None, Some(_)) => return self.unexpected("`}`"),
                (Some(t), Some(term)) if t == term => break,
                _ => out.push(self.parse_stmt()?),
            }
        }
        Ok(out)
    }

    fn parse_braced_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&Tok::LBrace, "`{`")?;
        let body = self.parse_stmts_until(Some(&Tok::RBrace))?;
        self.expect(&Tok::RBrace, "`}`")?;
        Ok(body)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Some(Tok::KwSkip) => {
                self.pos += 1;
                self.eat(&Tok::Semi);
                Ok(Stmt::Skip)
            }
            Some(Tok::KwWhile) => {
                self.pos += 1;
                self.expect(&Tok::LParen, "`(`")?;
                let guard = self.parse_labeled_guard()?;
                self.expect(&Tok::RParen, "`)`")?;
                let body = self.parse_braced_block()?;
                Ok(Stmt::While { guard, body })
            }
            Some(Tok::KwIf) => {
                self.pos += 1;
                self.expect(&Tok::LParen, "`(`")?;
                let guard = self.parse_labeled_guard()?;
                self.expect(&Tok::RParen, "`)`")?;
                let then_branch = self.parse_braced_block()?;
                let else_branch = if self.eat(&Tok::KwElse) {
                    self.parse_braced_block()?
                } else {
                    Vec::new()
                };
                Ok(Stmt::If {
                    guard,
                    then_branch,
                    else_branch,
                })
            }
            Some(Tok::LBrace) => {
                let lhs = self.parse_braced_block()?;
                self.expect(&Tok::LBracket, "`[`")?;
                let prob = self.parse_probability()?;
                self.expect(&Tok::RBracket, "`]`")?;
                let rhs = self.parse_braced_block()?;
                Ok(Stmt::Choice { prob, lhs, rhs })
            }
            Some(Tok::Ident(_)) => self.parse_assignment(),
            _ => self.unexpected("a statement"),
        }
    }

    fn parse_assignment(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        let lhs = match self.next() {
            Some(Tok::Ident(n)) => n.clone(),
            _ => return self.unexpected("a variable name"),
        };
        self.expect(&Tok::Assign, "`:=`")?;
        match self.next() {
            Some(Tok::Ident(rhs)) if *rhs == lhs => {}
            _ => return Err(ParseError::SelfAssign(line)),
        }
        let sign = match self.next() {
            Some(Tok::Plus) => 1i64,
            Some(Tok::Minus) => -1i64,
            _ => return self.unexpected("`+` or `-`"),
        };
        let magnitude = match self.next() {
            Some(Tok::Int(v)) => v.clone(),
            _ => return self.unexpected("a step magnitude"),
        };
        let magnitude = magnitude
            .to_i64()
            .ok_or_else(|| ParseError::BadInt(magnitude.to_string()))?;
        self.eat(&Tok::Semi);
        Ok(Stmt::Assign {
            var: lhs,
            delta: sign * magnitude,
        })
    }

    fn parse_probability(&mut self) -> Result<Rat, ParseError> {
        let prob = match self.next() {
            Some(Tok::Int(n)) => {
                let n = n.clone();
                if self.eat(&Tok::Slash) {
                    match self.next() {
                        Some(Tok::Int(d)) if !d.is_zero() => Rat::new(n, d.clone()),
                        Some(Tok::Int(d)) => {
                            return Err(ParseError::BadProbability(format!("{n}/{d}")))
                        }
                        _ => return self.unexpected("a denominator"),
                    }
                } else {
                    Rat::from_integer(n)
                }
            }
            Some(Tok::Decimal(int_part, frac)) => {
                let digits: Int = if frac.is_empty() {
                    Int::zero()
                } else {
                    frac.parse()
                        .map_err(|_| ParseError::BadInt(frac.clone()))?
                };
                let scale = crate::symbolic::int_pow(&Int::from(10), frac.len() as u32);
                Rat::from_integer(int_part.clone()) + Rat::new(digits, scale)
            }
            _ => return self.unexpected("a probability"),
        };
        if prob < Rat::zero() || prob > Rat::one() {
            return Err(ParseError::BadProbability(prob.to_string()));
        }
        Ok(prob)
    }

    // ------------------------- Guards -------------------------

    fn parse_labeled_guard(&mut self) -> Result<Guard, ParseError> {
        let pred = self.parse_pred()?;
        Ok(Guard::Label(self.table.insert(pred)))
    }

    fn parse_pred(&mut self) -> Result<Pred, ParseError> {
        let mut parts = vec![self.parse_pred_and()?];
        while self.eat(&Tok::KwOr) {
            parts.push(self.parse_pred_and()?);
        }
        Ok(Pred::or(parts))
    }

    fn parse_pred_and(&mut self) -> Result<Pred, ParseError> {
        let mut parts = vec![self.parse_pred_not()?];
        while self.eat(&Tok::KwAnd) {
            parts.push(self.parse_pred_not()?);
        }
        Ok(Pred::and(parts))
    }

    fn parse_pred_not(&mut self) -> Result<Pred, ParseError> {
        if self.eat(&Tok::KwNot) {
            Ok(self.parse_pred_not()?.negate())
        } else {
            self.parse_pred_atom()
        }
    }

    fn parse_pred_atom(&mut self) -> Result<Pred, ParseError> {
        match self.peek() {
            Some(Tok::KwTrue) => {
                self.pos += 1;
                return Ok(Pred::Bool(true));
            }
            Some(Tok::KwFalse) => {
                self.pos += 1;
                return Ok(Pred::Bool(false));
            }
            _ => {}
        }
        // A comparison and a parenthesized sub-predicate both may start with
        // `(`; try the comparison first and backtrack on failure.
        let save = self.pos;
        if let Ok(lhs) = self.parse_expr() {
            if let Some(op) = self.peek_cmp() {
                self.pos += 1;
                let rhs = self.parse_expr()?;
                return Ok(Pred::cmp(op, Expr::sub(lhs, rhs)));
            }
        }
        self.pos = save;
        self.expect(&Tok::LParen, "a comparison or `(`")?;
        let pred = self.parse_pred()?;
        self.expect(&Tok::RParen, "`)`")?;
        Ok(pred)
    }

    fn peek_cmp(&self) -> Option<CmpOp> {
        match self.peek() {
            Some(Tok::Eq) => Some(CmpOp::Eq),
            Some(Tok::Ne) => Some(CmpOp::Ne),
            Some(Tok::Lt) => Some(CmpOp::Lt),
            Some(Tok::Le) => Some(CmpOp::Le),
            Some(Tok::Gt) => Some(CmpOp::Gt),
            Some(Tok::Ge) => Some(CmpOp::Ge),
            _ => None,
        }
    }

    // ------------------------- Expressions -------------------------

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut acc = self.parse_term()?;
        loop {
            if self.eat(&Tok::Plus) {
                let rhs = self.parse_term()?;
                acc = Expr::add(vec![acc, rhs]);
            } else if self.eat(&Tok::Minus) {
                let rhs = self.parse_term()?;
                acc = Expr::sub(acc, rhs);
            } else {
                break;
            }
        }
        Ok(acc)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut acc = self.parse_unary()?;
        while self.eat(&Tok::Star) {
            let rhs = self.parse_unary()?;
            acc = Expr::mul(vec![acc, rhs]);
        }
        Ok(acc)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Tok::Minus) {
            Ok(Expr::neg(self.parse_unary()?))
        } else {
            self.parse_power()
        }
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_atom()?;
        if self.eat(&Tok::StarStar) {
            let exp = match self.next() {
                Some(Tok::Int(v)) => v.clone(),
                _ => return self.unexpected("an integer exponent"),
            };
            let exp = exp
                .to_u32()
                .ok_or_else(|| ParseError::BadInt(exp.to_string()))?;
            Ok(Expr::pow(base, exp))
        } else {
            Ok(base)
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        match self.peek().cloned() {
            Some(Tok::Int(v)) => {
                self.pos += 1;
                Ok(Expr::Int(v))
            }
            Some(Tok::Ident(name)) => {
                self.pos += 1;
                if (name == "DIV" || name == "MOD") && self.eat(&Tok::LParen) {
                    let a = self.parse_expr()?;
                    self.expect(&Tok::Comma, "`,`")?;
                    let b = self.parse_expr()?;
                    self.expect(&Tok::RParen, "`)`")?;
                    Ok(if name == "DIV" {
                        Expr::div(a, b)
                    } else {
                        Expr::modulo(a, b)
                    })
                } else {
                    Ok(Expr::var(name))
                }
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                let e = self.parse_expr()?;
                self.expect(&Tok::RParen, "`)`")?;
                Ok(e)
            }
            _ => self.unexpected("an expression"),
        }
    }
}

// ============================================================================
// Post-parse filtering
// ============================================================================

/// Remove instructions that cannot affect termination: `skip`s, zero steps,
/// and assignments to variables that appear in no guard.
fn filter_redundant(block: &mut Vec<Stmt>, meaningful: &BTreeSet<String>) {
    block.retain_mut(|stmt| match stmt {
        Stmt::Skip => false,
        Stmt::Assign { var, delta } => *delta != 0 && meaningful.contains(var.as_str()),
        Stmt::While { body, .. } => {
            filter_redundant(body, meaningful);
            true
        }
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            filter_redundant(then_branch, meaningful);
            filter_redundant(else_branch, meaningful);
            true
        }
        Stmt::Choice { lhs, rhs, .. } => {
            filter_redundant(lhs, meaningful);
            filter_redundant(rhs, meaningful);
            true
        }
    });
}

/// Parse one program text into a filtered [`Program`], the guard table, and
/// the optional annotation block.
pub fn parse(source: &str) -> Result<(Program, GuardTable, Option<Annotation>), ParseError> {
    let text = strip_comments(source);
    let (annotation, text) = extract_annotation(&text)?;
    let toks = lex(&text)?;
    let mut parser = Parser::new(&toks);
    let declared = parser.parse_declarations()?;
    let body = parser.parse_stmts_until(None)?;
    let table = parser.table;

    let mut meaningful: BTreeSet<String> = BTreeSet::new();
    for pred in table.iter() {
        meaningful.extend(pred.free_vars());
    }
    let excluded: Vec<&str> = declared
        .iter()
        .map(|(n, _)| n.as_str())
        .filter(|n| !meaningful.contains(*n))
        .collect();
    if !excluded.is_empty() {
        info!(
            "excluding variables absent from all guards: {}",
            excluded.join(", ")
        );
    }

    let mut program = Program {
        variables: declared
            .into_iter()
            .filter(|(n, _)| meaningful.contains(n))
            .collect(),
        body,
    };
    filter_redundant(&mut program.body, &meaningful);
    if program.variables.is_empty() {
        info!("no variables remain after filtering; adding a dummy counter");
        program.variables.push(("x".to_string(), 0));
    }
    Ok((program, table, annotation))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_random_walk() {
        let src = "
            # a fair random walk
            int x = 1;
            while (x > 0) { { x := x + 1 } [1/2] { x := x - 1 } }
        ";
        let (prog, table, ann) = parse(src).unwrap();
        assert!(ann.is_none());
        assert_eq!(prog.variables, vec![("x".to_string(), 1)]);
        assert_eq!(table.len(), 1);
        let Stmt::While { guard, body } = &prog.body[0] else {
            panic!("expected a while loop");
        };
        assert!(matches!(guard, Guard::Label(0)));
        let Stmt::Choice { prob, lhs, rhs } = &body[0] else {
            panic!("expected a choice");
        };
        assert_eq!(prob, &Rat::new(Int::from(1), Int::from(2)));
        assert!(matches!(lhs[0], Stmt::Assign { delta: 1, .. }));
        assert!(matches!(rhs[0], Stmt::Assign { delta: -1, .. }));
    }

    #[test]
    fn declarations_accept_negative_values() {
        let (prog, _, _) = parse("int a = -5;\nwhile (a < 0) { a := a + 1 }").unwrap();
        assert_eq!(prog.variables, vec![("a".to_string(), -5)]);
    }

    #[test]
    fn skip_and_irrelevant_assignments_are_filtered() {
        let src = "
            int x = 1;
            int y = 9;
            while (x > 0) { skip; y := y + 1; x := x - 1; x := x + 0 }
        ";
        let (prog, _, _) = parse(src).unwrap();
        // y appears in no guard, so it and its assignment vanish.
        assert_eq!(prog.variables, vec![("x".to_string(), 1)]);
        let Stmt::While { body, .. } = &prog.body[0] else {
            panic!("expected a while loop");
        };
        assert_eq!(body.len(), 1);
        assert!(matches!(body[0], Stmt::Assign { delta: -1, .. }));
    }

    #[test]
    fn dummy_variable_when_nothing_remains() {
        let (prog, _, _) = parse("int y = 3;\nwhile (true) { y := y + 1 }").unwrap();
        assert_eq!(prog.variables, vec![("x".to_string(), 0)]);
    }

    #[test]
    fn guard_grammar_and_connectives() {
        let src = "int x = 0;\nif (not (x < 0) and x*x - 1 <= 4 or x = 2) { x := x + 1 } else { skip }";
        let (_, table, _) = parse(src).unwrap();
        assert_eq!(table.len(), 1);
        let atoms = table.get(0).unwrap().atoms().len();
        assert_eq!(atoms, 3);
    }

    #[test]
    fn bounded_annotation() {
        let src = "
            /*@ Bounded, M, [x, 0, 3], [y, -2, 1] @*/
            int x = 1; int y = 0; int M = 5;
            while (x > 0 and M > 0) { x := x - 1; y := y + 1; M := M - 1 }
        ";
        let (_, _, ann) = parse(src).unwrap();
        let Some(Annotation::Bounded(b)) = ann else {
            panic!("expected a Bounded annotation");
        };
        assert_eq!(b.unbounded.as_deref(), Some("M"));
        // y: comp 2, extent 2 + 1 + 1 = 4; x: comp 0, extent 4; stable order
        // keeps x before y on the tie.
        assert_eq!(b.vars[0].name, "x");
        assert_eq!(b.vars[0].extent, 4);
        assert_eq!(b.vars[1].name, "y");
        assert_eq!((b.vars[1].comp, b.vars[1].extent), (2, 4));
    }

    #[test]
    fn condbounded_annotation() {
        let src = "
            /*@ CondBounded, c, [v, 2, 1, 0, 3] @*/
            int c = 4; int v = 2;
            while (c > 0 and v > 0) { c := c - 1; v := v - 2 }
        ";
        let (_, _, ann) = parse(src).unwrap();
        let Some(Annotation::CondBounded(cb)) = ann else {
            panic!("expected a CondBounded annotation");
        };
        assert_eq!(cb.central, "c");
        assert_eq!(cb.vars.len(), 1);
        let v = &cb.vars[0];
        assert_eq!((v.scale, v.slope, v.offset, v.radius), (2, 1, 0, 3));
    }

    #[test]
    fn rejects_bad_probability() {
        let err = parse("int x = 1;\n{ x := x + 1 } [3/2] { x := x - 1 }").unwrap_err();
        assert!(matches!(err, ParseError::BadProbability(_)));
    }

    #[test]
    fn rejects_foreign_assignment() {
        let err = parse("int x = 1; int y = 1;\nwhile (x > 0 and y > 0) { x := y + 1 }").unwrap_err();
        assert!(matches!(err, ParseError::SelfAssign(_)));
    }

    #[test]
    fn decimal_probability() {
        let (prog, _, _) = parse("int x = 1;\n{ x := x + 1 } [0.25] { x := x - 1 }").unwrap();
        let Stmt::Choice { prob, .. } = &prog.body[0] else {
            panic!("expected a choice");
        };
        assert_eq!(prob, &Rat::new(Int::from(1), Int::from(4)));
    }
}
