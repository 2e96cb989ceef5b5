//! URL template evaluation.
//!
//! A template is literal text with `{expr}` markers, `{{` and `}}` standing for
//! literal braces. Expressions use a small, closed grammar: names, literals,
//! subscripts, attribute access, calls to a fixed set of helpers and methods,
//! arithmetic, comparisons, `and`/`or`/`not` and `a if cond else b`. Names
//! resolve against the download parameters; there is no way to reach anything
//! outside that environment.
//!
//! ```
//! use iri_dl::{evaluate, Params};
//!
//! let params = Params::new().first_year(1982).final_year(2018);
//! let url = evaluate("http://x/{first_year}-{final_year}.tsv", &params)?;
//! assert_eq!(url, "http://x/1982-2018.tsv");
//! # Ok::<(), iri_dl::Error>(())
//! ```

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{Datelike, Timelike};

use crate::date::{
    seasonal_target, seasonal_target_length, seasonal_target_length_monthly, threeletters,
};
use crate::error::{Error, Result};
use crate::params::{Params, Value, format_float};

/// Evaluate `template` against `params`.
///
/// `ensemblemean` is bound to `True` unless the parameters set it.
pub fn evaluate(template: &str, params: &Params) -> Result<String> {
    let mut env: BTreeMap<&str, Value> = BTreeMap::new();
    env.insert("ensemblemean", Value::Bool(true));
    for (k, v) in params.iter() {
        env.insert(k.as_str(), v.clone());
    }

    let mut out = String::with_capacity(template.len());
    for segment in split_template(template)? {
        match segment {
            Segment::Literal(s) => out.push_str(&s),
            Segment::Field { expr, spec } => {
                let ast = Parser::new(&expr)?.parse()?;
                let value = eval(&ast, &env).map_err(|e| match e {
                    Error::Template(msg) => Error::Template(format!("{{{expr}}}: {msg}")),
                    other => other,
                })?;
                match spec {
                    Some(spec) => out.push_str(&apply_format_spec(&value, &spec)?),
                    None => out.push_str(&value.to_string()),
                }
            }
        }
    }
    Ok(out)
}

#[derive(Debug, PartialEq)]
enum Segment {
    Literal(String),
    Field { expr: String, spec: Option<String> },
}

fn split_template(template: &str) -> Result<Vec<Segment>> {
    let chars: Vec<char> = template.chars().collect();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '}' => {
                return Err(Error::Template(format!(
                    "single '}}' is not allowed at offset {i}"
                )));
            }
            '{' => {
                let start = i + 1;
                let mut depth = 0usize;
                let mut quote: Option<char> = None;
                let mut colon: Option<usize> = None;
                let mut j = start;
                let end = loop {
                    let Some(&c) = chars.get(j) else {
                        return Err(Error::Template(format!(
                            "expected '}}' before end of template (marker at offset {i})"
                        )));
                    };
                    if let Some(q) = quote {
                        if c == '\\' {
                            j += 1;
                        } else if c == q {
                            quote = None;
                        }
                    } else {
                        match c {
                            '\'' | '"' => quote = Some(c),
                            '(' | '[' => depth += 1,
                            ')' | ']' => depth = depth.saturating_sub(1),
                            ':' if depth == 0 && colon.is_none() => colon = Some(j),
                            '}' if depth == 0 => break j,
                            '{' => {
                                return Err(Error::Template(format!(
                                    "nested '{{' inside expression at offset {j}"
                                )));
                            }
                            _ => {}
                        }
                    }
                    j += 1;
                };

                let (expr, spec) = match colon {
                    Some(c) => (
                        chars[start..c].iter().collect::<String>(),
                        Some(chars[c + 1..end].iter().collect::<String>()),
                    ),
                    None => (chars[start..end].iter().collect::<String>(), None),
                };
                if expr.trim().is_empty() {
                    return Err(Error::Template(format!(
                        "empty expression at offset {i}"
                    )));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Field {
                    expr: expr.trim().to_string(),
                    spec,
                });
                i = end + 1;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

// ----------------------------------------------------------------------------
// Lexer
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
}

const OPERATORS: [&str; 19] = [
    "==", "!=", "<=", ">=", "//", "<", ">", "+", "-", "*", "/", "%", "(", ")", "[", "]", ".", ",",
    "=",
];

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit()
            || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            let start = i;
            let mut is_float = false;
            while i < chars.len() {
                let d = chars[i];
                if d.is_ascii_digit() || d == '_' {
                    i += 1;
                } else if d == '.' && !is_float {
                    is_float = true;
                    i += 1;
                } else if (d == 'e' || d == 'E')
                    && chars
                        .get(i + 1)
                        .is_some_and(|n| n.is_ascii_digit() || *n == '-' || *n == '+')
                {
                    is_float = true;
                    i += 2;
                } else {
                    break;
                }
            }
            let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            if is_float {
                let v = text
                    .parse::<f64>()
                    .map_err(|_| Error::Template(format!("invalid number literal: {text}")))?;
                tokens.push(Token::Float(v));
            } else {
                let v = text
                    .parse::<i64>()
                    .map_err(|_| Error::Template(format!("invalid number literal: {text}")))?;
                tokens.push(Token::Int(v));
            }
        } else if c == '\'' || c == '"' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                let Some(&d) = chars.get(i) else {
                    return Err(Error::Template("unterminated string literal".into()));
                };
                i += 1;
                if d == quote {
                    break;
                }
                if d == '\\' {
                    let Some(&e) = chars.get(i) else {
                        return Err(Error::Template("unterminated string literal".into()));
                    };
                    i += 1;
                    s.push(match e {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                } else {
                    s.push(d);
                }
            }
            tokens.push(Token::Str(s));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                return Err(Error::Template(format!("unexpected character {c:?}")));
            };
            tokens.push(Token::Op(*op));
            i += op.chars().count();
        }
    }
    Ok(tokens)
}

// ----------------------------------------------------------------------------
// Parser
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Name(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Method(Box<Expr>, String, Vec<Expr>),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    fn parse(mut self) -> Result<Expr> {
        let expr = self.expr()?;
        if let Some(t) = self.peek() {
            return Err(Error::Template(format!("unexpected token {t:?}")));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(s)) if s == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(Error::Template(format!(
                "expected '{op}', found {:?}",
                self.peek()
            )))
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        let then = self.or_expr()?;
        if self.eat_keyword("if") {
            let cond = self.or_expr()?;
            if !self.eat_keyword("else") {
                return Err(Error::Template("expected 'else' in conditional".into()));
            }
            let otherwise = self.expr()?;
            return Ok(Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(then)
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        while self.eat_keyword("or") {
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.not_expr()?;
        while self.eat_keyword("and") {
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            let inner = self.not_expr()?;
            return Ok(Expr::Unary("not", Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let lhs = self.additive()?;
        for op in ["==", "!=", "<=", ">=", "<", ">"] {
            if self.eat_op(op) {
                let rhs = self.additive()?;
                return Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
            }
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                "+"
            } else if self.eat_op("-") {
                "-"
            } else {
                return Ok(lhs);
            };
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                "*"
            } else if self.eat_op("//") {
                "//"
            } else if self.eat_op("/") {
                "/"
            } else if self.eat_op("%") {
                "%"
            } else {
                return Ok(lhs);
            };
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat_op("-") {
            let inner = self.unary()?;
            return Ok(Expr::Unary("-", Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_op(".") {
                let Some(Token::Ident(name)) = self.next() else {
                    return Err(Error::Template("expected attribute name after '.'".into()));
                };
                if self.eat_op("(") {
                    let args = self.args()?;
                    expr = Expr::Method(Box::new(expr), name, args);
                } else {
                    expr = Expr::Attr(Box::new(expr), name);
                }
            } else if self.eat_op("[") {
                let idx = self.expr()?;
                self.expect_op("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(idx));
            } else if matches!(self.peek(), Some(Token::Op("("))) {
                return Err(Error::Template(
                    "only helper functions and methods may be called".into(),
                ));
            } else {
                return Ok(expr);
            }
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat_op(")") {
            return Ok(args);
        }
        loop {
            if matches!(self.tokens.get(self.pos + 1), Some(Token::Op("=")))
                && matches!(self.peek(), Some(Token::Ident(_)))
            {
                return Err(Error::Template("keyword arguments are not supported".into()));
            }
            args.push(self.expr()?);
            if self.eat_op(")") {
                return Ok(args);
            }
            self.expect_op(",")?;
            // trailing comma
            if self.eat_op(")") {
                return Ok(args);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::Int(n))),
            Some(Token::Float(x)) => Ok(Expr::Literal(Value::Float(x))),
            Some(Token::Str(mut s)) => {
                // adjacent literals concatenate
                while let Some(Token::Str(more)) = self.peek().cloned() {
                    s.push_str(&more);
                    self.pos += 1;
                }
                Ok(Expr::Literal(Value::Str(s)))
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                "None" => Ok(Expr::Literal(Value::None)),
                "if" | "else" | "and" | "or" | "not" => {
                    Err(Error::Template(format!("unexpected keyword '{name}'")))
                }
                _ => {
                    if self.eat_op("(") {
                        let args = self.args()?;
                        Ok(Expr::Call(name, args))
                    } else {
                        Ok(Expr::Name(name))
                    }
                }
            },
            Some(Token::Op("(")) => {
                let inner = self.expr()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Some(t) => Err(Error::Template(format!("unexpected token {t:?}"))),
            None => Err(Error::Template("unexpected end of expression".into())),
        }
    }
}

// ----------------------------------------------------------------------------
// Evaluator
// ----------------------------------------------------------------------------

type Env<'a> = BTreeMap<&'a str, Value>;

fn type_error(msg: impl Into<String>) -> Error {
    Error::Template(msg.into())
}

fn eval(expr: &Expr, env: &Env<'_>) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Name(name) => env
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| Error::Template(format!("name '{name}' is not defined"))),
        Expr::Attr(target, name) => attribute(&eval(target, env)?, name),
        Expr::Index(target, idx) => subscript(&eval(target, env)?, &eval(idx, env)?),
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, env))
                .collect::<Result<Vec<_>>>()?;
            call_helper(name, &args)
        }
        Expr::Method(target, name, args) => {
            let target = eval(target, env)?;
            let args = args
                .iter()
                .map(|a| eval(a, env))
                .collect::<Result<Vec<_>>>()?;
            call_method(&target, name, &args)
        }
        Expr::Unary("not", inner) => Ok(Value::Bool(!eval(inner, env)?.truthy())),
        Expr::Unary(_, inner) => match eval(inner, env)? {
            Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
            Value::Float(x) => Ok(Value::Float(-x)),
            other => Err(type_error(format!("bad operand type for unary -: '{}'", other.kind()))),
        },
        Expr::And(lhs, rhs) => {
            let l = eval(lhs, env)?;
            if l.truthy() { eval(rhs, env) } else { Ok(l) }
        }
        Expr::Or(lhs, rhs) => {
            let l = eval(lhs, env)?;
            if l.truthy() { Ok(l) } else { eval(rhs, env) }
        }
        Expr::IfElse {
            cond,
            then,
            otherwise,
        } => {
            if eval(cond, env)?.truthy() {
                eval(then, env)
            } else {
                eval(otherwise, env)
            }
        }
        Expr::Binary(op, lhs, rhs) => binary(op, &eval(lhs, env)?, &eval(rhs, env)?),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(x) => Some(*x),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Int(n) => Some(*n),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn binary(op: &str, l: &Value, r: &Value) -> Result<Value> {
    let unsupported = || {
        type_error(format!(
            "unsupported operand type(s) for {op}: '{}' and '{}'",
            l.kind(),
            r.kind()
        ))
    };

    match op {
        "==" => return Ok(Value::Bool(values_equal(l, r))),
        "!=" => return Ok(Value::Bool(!values_equal(l, r))),
        "<" | "<=" | ">" | ">=" => {
            let ord = match (l, r) {
                (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
                _ => match (as_f64(l), as_f64(r)) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            }
            .ok_or_else(unsupported)?;
            let result = match op {
                "<" => ord.is_lt(),
                "<=" => ord.is_le(),
                ">" => ord.is_gt(),
                _ => ord.is_ge(),
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    match (op, l, r) {
        ("+", Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
        ("*", Value::Str(s), n) | ("*", n, Value::Str(s)) if as_i64(n).is_some() => {
            let times = usize::try_from(as_i64(n).unwrap_or(0).max(0)).map_err(|_| too_long())?;
            if s.len().checked_mul(times).is_none_or(|len| len > MAX_TEXT_LEN) {
                return Err(too_long());
            }
            return Ok(Value::Str(s.repeat(times)));
        }
        _ => {}
    }

    if let (Some(a), Some(b)) = (as_i64(l), as_i64(r)) {
        return match op {
            "+" => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            "-" => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            "*" => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            "/" if b == 0 => Err(type_error("division by zero")),
            "/" => Ok(Value::Float(a as f64 / b as f64)),
            "//" | "%" if b == 0 => Err(type_error("integer division or modulo by zero")),
            "//" => floor_div(a, b).map(Value::Int).ok_or_else(overflow),
            "%" => floor_mod(a, b).map(Value::Int).ok_or_else(overflow),
            _ => Err(unsupported()),
        };
    }

    let (Some(a), Some(b)) = (as_f64(l), as_f64(r)) else {
        return Err(unsupported());
    };
    match op {
        "+" => Ok(Value::Float(a + b)),
        "-" => Ok(Value::Float(a - b)),
        "*" => Ok(Value::Float(a * b)),
        "/" | "//" | "%" if b == 0.0 => Err(type_error("float division by zero")),
        "/" => Ok(Value::Float(a / b)),
        "//" => Ok(Value::Float((a / b).floor())),
        "%" => Ok(Value::Float(a - b * (a / b).floor())),
        _ => Err(unsupported()),
    }
}

fn overflow() -> Error {
    type_error("integer overflow")
}

/// Longest string a template may build through repetition or padding.
const MAX_TEXT_LEN: usize = 64 * 1024;

fn too_long() -> Error {
    type_error(format!("result longer than {MAX_TEXT_LEN} characters"))
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    let r = a.checked_rem(b)?;
    if r != 0 && ((a < 0) != (b < 0)) { q.checked_sub(1) } else { Some(q) }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) { r.checked_add(b) } else { Some(r) }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (as_f64(l), as_f64(r)) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

fn attribute(target: &Value, name: &str) -> Result<Value> {
    match (target, name) {
        (Value::Date(d), "year") => Ok(Value::Int(d.year() as i64)),
        (Value::Date(d), "month") => Ok(Value::Int(d.month() as i64)),
        (Value::Date(d), "day") => Ok(Value::Int(d.day() as i64)),
        (Value::Date(d), "hour") => Ok(Value::Int(d.hour() as i64)),
        (Value::Date(d), "minute") => Ok(Value::Int(d.minute() as i64)),
        _ => Err(type_error(format!(
            "'{}' object has no attribute '{name}'",
            target.kind()
        ))),
    }
}

fn subscript(target: &Value, idx: &Value) -> Result<Value> {
    match (target, idx) {
        (Value::Map(m), Value::Str(k)) => m
            .get(k)
            .cloned()
            .ok_or_else(|| Error::Template(format!("key '{k}' not found"))),
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let pos = if *i < 0 { len + i } else { *i };
            if pos < 0 || pos >= len {
                return Err(type_error("string index out of range"));
            }
            Ok(Value::Str(chars[pos as usize].to_string()))
        }
        _ => Err(type_error(format!(
            "'{}' object is not subscriptable with '{}'",
            target.kind(),
            idx.kind()
        ))),
    }
}

fn arity(name: &str, args: &[Value], n: usize) -> Result<()> {
    if args.len() == n {
        Ok(())
    } else {
        Err(type_error(format!(
            "{name}() takes {n} argument(s), got {}",
            args.len()
        )))
    }
}

fn number_arg(name: &str, v: &Value) -> Result<f64> {
    as_f64(v).ok_or_else(|| {
        type_error(format!("{name}() expects a number, got '{}'", v.kind()))
    })
}

fn call_helper(name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "seasonal_target" => {
            arity(name, args, 3)?;
            let Value::Date(fdate) = &args[0] else {
                return Err(type_error(format!(
                    "seasonal_target() expects a datetime, got '{}'",
                    args[0].kind()
                )));
            };
            let low = number_arg(name, &args[1])?;
            let high = number_arg(name, &args[2])?;
            Ok(Value::Str(seasonal_target(fdate, low, high)?))
        }
        "seasonal_target_length" => {
            arity(name, args, 1)?;
            let target = args[0].as_str().ok_or_else(|| {
                type_error("seasonal_target_length() expects a string")
            })?;
            Ok(Value::Int(seasonal_target_length(target)?))
        }
        "seasonal_target_length_monthly" => {
            arity(name, args, 2)?;
            let low = number_arg(name, &args[0])?;
            let high = number_arg(name, &args[1])?;
            Ok(Value::Int(seasonal_target_length_monthly(low, high)?))
        }
        "threeletters" => {
            arity(name, args, 1)?;
            let month = as_i64(&args[0])
                .ok_or_else(|| type_error("threeletters() expects an int month"))?;
            Ok(Value::Str(threeletters(month)))
        }
        "int" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| type_error(format!("invalid literal for int(): '{s}'"))),
                v => Ok(Value::Int(number_arg(name, v)?.trunc() as i64)),
            }
        }
        "float" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| type_error(format!("could not convert string to float: '{s}'"))),
                v => Ok(Value::Float(number_arg(name, v)?)),
            }
        }
        "str" => {
            arity(name, args, 1)?;
            Ok(Value::Str(args[0].to_string()))
        }
        "abs" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(overflow),
                v => Ok(Value::Float(number_arg(name, v)?.abs())),
            }
        }
        "round" => match args {
            [v] => Ok(Value::Int(round_half_even(number_arg(name, v)?) as i64)),
            [v, digits] => {
                let digits = as_i64(digits)
                    .ok_or_else(|| type_error("round() digits must be an int"))?;
                let scale = 10f64.powi(digits as i32);
                Ok(Value::Float(round_half_even(number_arg(name, v)? * scale) / scale))
            }
            _ => Err(type_error("round() takes 1 or 2 arguments")),
        },
        "len" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Map(m) => Ok(Value::Int(m.len() as i64)),
                v => Err(type_error(format!("object of type '{}' has no len()", v.kind()))),
            }
        }
        _ => Err(Error::Template(format!("name '{name}' is not defined"))),
    }
}

fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - x.signum()
    } else {
        r
    }
}

fn call_method(target: &Value, name: &str, args: &[Value]) -> Result<Value> {
    match (target, name) {
        (Value::Date(d), "strftime") => {
            arity(name, args, 1)?;
            let fmt = args[0]
                .as_str()
                .ok_or_else(|| type_error("strftime() format must be a string"))?;
            let items: Vec<chrono::format::Item<'_>> =
                chrono::format::StrftimeItems::new(fmt).collect();
            if items.iter().any(|i| matches!(i, chrono::format::Item::Error)) {
                return Err(type_error(format!("invalid strftime format: {fmt:?}")));
            }
            let mut out = String::new();
            write!(out, "{}", d.format_with_items(items.into_iter()))
                .map_err(|_| type_error(format!("format {fmt:?} does not apply to a naive datetime")))?;
            Ok(Value::Str(out))
        }
        (Value::Str(s), "upper") => {
            arity(name, args, 0)?;
            Ok(Value::Str(s.to_uppercase()))
        }
        (Value::Str(s), "lower") => {
            arity(name, args, 0)?;
            Ok(Value::Str(s.to_lowercase()))
        }
        (Value::Str(s), "strip") => {
            arity(name, args, 0)?;
            Ok(Value::Str(s.trim().to_string()))
        }
        (Value::Str(s), "replace") => {
            arity(name, args, 2)?;
            match (&args[0], &args[1]) {
                (Value::Str(from), Value::Str(to)) => Ok(Value::Str(s.replace(from.as_str(), to))),
                _ => Err(type_error("replace() arguments must be strings")),
            }
        }
        (Value::Map(m), "get") => match args {
            [Value::Str(k)] => Ok(m.get(k).cloned().unwrap_or(Value::None)),
            [Value::Str(k), default] => Ok(m.get(k).cloned().unwrap_or_else(|| default.clone())),
            _ => Err(type_error("get() takes a string key and an optional default")),
        },
        _ => Err(type_error(format!(
            "'{}' object has no method '{name}'",
            target.kind()
        ))),
    }
}

// ----------------------------------------------------------------------------
// Format specs: [0][width][.precision][d|f|s]
// ----------------------------------------------------------------------------

fn apply_format_spec(value: &Value, spec: &str) -> Result<String> {
    let bad = || Error::Template(format!("invalid format spec {spec:?}"));

    let mut rest = spec;
    let zero = rest.starts_with('0');
    if zero {
        rest = &rest[1..];
    }
    let width_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let width: usize = if width_len == 0 {
        0
    } else {
        rest[..width_len].parse().map_err(|_| bad())?
    };
    rest = &rest[width_len..];
    if width > MAX_TEXT_LEN {
        return Err(too_long());
    }

    let mut precision: Option<usize> = None;
    if let Some(p) = rest.strip_prefix('.') {
        let n = p.chars().take_while(|c| c.is_ascii_digit()).count();
        if n == 0 {
            return Err(bad());
        }
        let parsed: usize = p[..n].parse().map_err(|_| bad())?;
        if parsed > MAX_TEXT_LEN {
            return Err(too_long());
        }
        precision = Some(parsed);
        rest = &p[n..];
    }

    let body = match rest {
        "d" => match value {
            Value::Int(n) => n.to_string(),
            Value::Bool(b) => (*b as i64).to_string(),
            _ => {
                return Err(type_error(format!(
                    "format 'd' requires an int, got '{}'",
                    value.kind()
                )));
            }
        },
        "f" => {
            let x = as_f64(value).ok_or_else(|| {
                type_error(format!("format 'f' requires a number, got '{}'", value.kind()))
            })?;
            let p = precision.unwrap_or(6);
            format!("{x:.p$}")
        }
        "s" | "" => match (value, precision) {
            (Value::Float(x), Some(p)) if rest.is_empty() => format!("{x:.p$}"),
            (Value::Float(x), None) => format_float(*x),
            (v, Some(p)) => v.to_string().chars().take(p).collect(),
            (v, None) => v.to_string(),
        },
        _ => return Err(bad()),
    };

    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let numeric = matches!(value, Value::Int(_) | Value::Float(_));
    if zero && numeric {
        let (sign, digits) = match body.strip_prefix('-') {
            Some(d) => ("-", d),
            None => ("", body.as_str()),
        };
        Ok(format!("{sign}{}{digits}", "0".repeat(pad)))
    } else if numeric {
        Ok(format!("{}{body}", " ".repeat(pad)))
    } else {
        Ok(format!("{body}{}", " ".repeat(pad)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{Extent, FileFormat};
    use chrono::NaiveDate;

    fn fdate() -> Value {
        NaiveDate::from_ymd_opt(2022, 5, 1).unwrap().into()
    }

    #[test]
    fn substitutes_plain_names() {
        let p = Params::new().first_year(1982).final_year(2018);
        assert_eq!(
            evaluate("http://x/{first_year}-{final_year}.tsv", &p).unwrap(),
            "http://x/1982-2018.tsv"
        );
    }

    #[test]
    fn missing_name_is_an_error() {
        let p = Params::new().first_year(1982);
        let err = evaluate("http://x/{first_year}-{final_year}.tsv", &p).unwrap_err();
        assert!(matches!(err, Error::Template(ref m) if m.contains("final_year")), "{err}");
    }

    #[test]
    fn unused_params_are_ignored() {
        let p = Params::new().first_year(1982).set("unrelated", "x");
        assert_eq!(evaluate("{first_year}", &p).unwrap(), "1982");
    }

    #[test]
    fn extent_subscripts() {
        let p = Params::new().predictor_extent(Extent::new(30.0, -10.0, 60.0, 20.0));
        let url = evaluate(
            "Y/{predictor_extent['south']}/{predictor_extent[\"north\"]}/RANGEEDGES/X/{predictor_extent['west']}/{predictor_extent['east']}/RANGEEDGES",
            &p,
        )
        .unwrap();
        assert_eq!(url, "Y/-10.0/30.0/RANGEEDGES/X/20.0/60.0/RANGEEDGES");
    }

    #[test]
    fn date_methods_and_helpers() {
        let p = Params::new()
            .fdate(fdate())
            .lead_low(1.5)
            .lead_high(3.5)
            .target("Jun-Aug");
        let url = evaluate(
            "S/(0000 1 {fdate.strftime('%b')} {fdate.year})/L/{lead_low}/{lead_high}/{seasonal_target(fdate, lead_low, lead_high)}/{seasonal_target_length(target)}/{threeletters(fdate.month + 1)}",
            &p,
        )
        .unwrap();
        assert_eq!(url, "S/(0000 1 May 2022)/L/1.5/3.5/Jun-Aug/3/Jun");
    }

    #[test]
    fn ensemblemean_defaults_true() {
        let tpl = "{'' if ensemblemean else '[M]'}average";
        assert_eq!(evaluate(tpl, &Params::new()).unwrap(), "average");
        assert_eq!(
            evaluate(tpl, &Params::new().ensemblemean(false)).unwrap(),
            "[M]average"
        );
    }

    #[test]
    fn arithmetic_and_comparisons() {
        let p = Params::new().first_year(1982).final_year(2018).pressure(850);
        assert_eq!(evaluate("{final_year - first_year + 1}", &p).unwrap(), "37");
        assert_eq!(evaluate("{first_year // 10}", &p).unwrap(), "198");
        assert_eq!(evaluate("{-7 // 2} {-7 % 2}", &p).unwrap(), "-4 1");
        assert_eq!(evaluate("{pressure / 2}", &p).unwrap(), "425.0");
        assert_eq!(
            evaluate("{'hi' if pressure >= 500 and not first_year == 0 else 'lo'}", &p).unwrap(),
            "hi"
        );
        assert_eq!(evaluate("{'P' + str(pressure)}", &p).unwrap(), "P850");
    }

    #[test]
    fn format_specs() {
        let p = Params::new().fdate(fdate()).lead_low(1.5).first_year(7);
        assert_eq!(evaluate("{fdate.month:02d}", &p).unwrap(), "05");
        assert_eq!(evaluate("{lead_low:.2f}", &p).unwrap(), "1.50");
        assert_eq!(evaluate("{first_year:03}", &p).unwrap(), "007");
        assert!(evaluate("{lead_low:d}", &p).is_err());
    }

    #[test]
    fn brace_escapes() {
        let p = Params::new().first_year(1982);
        assert_eq!(evaluate("{{X}}/{first_year}", &p).unwrap(), "{X}/1982");
        assert!(evaluate("a}b", &p).is_err());
        assert!(evaluate("a{first_year", &p).is_err());
        assert!(evaluate("a{}b", &p).is_err());
    }

    #[test]
    fn rejects_arbitrary_calls() {
        let p = Params::new().filetype(FileFormat::CptV10);
        assert!(evaluate("{__import__('os')}", &p).is_err());
        assert!(evaluate("{filetype.upper()}", &p).is_ok());
        assert!(evaluate("{filetype.__class__}", &p).is_err());
        assert!(evaluate("{(filetype)(1)}", &p).is_err());
        assert!(evaluate("{open(filetype)}", &p).is_err());
    }

    #[test]
    fn no_markers_remain_after_success() {
        let p = Params::new()
            .fdate(fdate())
            .first_year(1991)
            .final_year(2020)
            .lead_low(0.5)
            .lead_high(2.5);
        let url = evaluate(
            "https://iridl.ldeo.columbia.edu/S/({fdate.strftime('%d %b %Y')})/L/{lead_low}/{lead_high}/T/({first_year})({final_year})/data.nc",
            &p,
        )
        .unwrap();
        assert!(!url.contains('{') && !url.contains('}'));
        assert_eq!(
            url,
            "https://iridl.ldeo.columbia.edu/S/(01 May 2022)/L/0.5/2.5/T/(1991)(2020)/data.nc"
        );
    }

    #[test]
    fn oversized_results_are_errors() {
        let p = Params::new().lead_low(1.5).first_year(1982);
        for template in [
            "{(-9223372036854775807 - 1) // -1}",
            "{(-9223372036854775807 - 1) % -1}",
            "{'ab' * 9223372036854775807}",
            "{9223372036854775807 * 'ab'}",
            "{first_year:99999999999}",
            "{lead_low:.99999999999f}",
            "{lead_low:.70000f}",
            "{abs(-9223372036854775807 - 1)}",
        ] {
            let err = evaluate(template, &p).unwrap_err();
            assert!(matches!(err, Error::Template(_)), "{template}: {err:?}");
        }
        assert_eq!(evaluate("{'ab' * 3}", &p).unwrap(), "ababab");
        assert_eq!(evaluate("{7 % -2} {-7 // 2}", &p).unwrap(), "-1 -4");
    }
}
