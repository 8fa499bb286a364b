//! Transform expressions
//!
//! Rule fields that hold code (`s`, `q`, `c`, `g`, `follow`, `post`, `fix`)
//! are written in a small expression language instead of executable script:
//!
//! ```text
//! let id = m[1];
//! return id ? "https://cdn.example.com/full/" + id + ".jpg" : false;
//! ```
//!
//! A source is parsed once into a [`Program`] and evaluated against a
//! [`Scope`] any number of times. Evaluation has no I/O: document queries
//! only see the document that was already fetched.
//!
//! Bindings: `m` (capture list), `url`, `text` (remote document text), `base`
//! and whatever extra names the caller provides (`s`, `isUrl` in `fix`).

use std::sync::Arc;

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;
use scraper::Selector;

use crate::dom::{node_url, parse_selector, Document, Node};
use crate::url::absolutize;

/// Error type for expressions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("parse error at {pos}: {message}")]
    Parse { pos: usize, message: String },
    #[error("{0}")]
    Eval(String),
}

fn eval_err<T>(message: impl Into<String>) -> Result<T, ExprError> {
    Err(ExprError::Eval(message.into()))
}

/// Marker that turns a string field into an expression.
pub fn is_expression(source: &str) -> bool {
    source.match_indices("return").any(|(pos, word)| {
        let before = source[..pos].chars().next_back();
        let after = source[pos + word.len()..].chars().next();
        let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
        !before.map_or(false, is_ident) && !after.map_or(false, is_ident)
    })
}

// =============================================================================
// Values
// =============================================================================

/// A compiled regex literal.
#[derive(Debug)]
pub struct RegexLiteral {
    pub re: Regex,
    pub global: bool,
}

/// Runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Regex(Arc<RegexLiteral>),
}

impl Value {
    /// Script-style truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(_) | Value::Regex(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// String conversion used by `+` and string methods.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => format_num(*n),
            Value::Str(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(|v| match v {
                    Value::Null => String::new(),
                    other => other.to_text(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Regex(lit) => format!("/{}/", lit.re.as_str()),
        }
    }

    fn from_opt(value: Option<&str>) -> Self {
        value.map_or(Value::Null, |s| Value::Str(s.to_string()))
    }

    fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Num(a), Value::Str(b)) | (Value::Str(b), Value::Num(a)) => {
                b.trim().parse::<f64>().map_or(false, |b| b == *a)
            }
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => false,
        }
    }
}

fn format_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Str(String),
    Num(f64),
    Ident(String),
    Regex(String, String),
    Punct(&'static str),
}

const PUNCTS: [&str; 17] = [
    "==", "!=", "&&", "||", "(", ")", "[", "]", ",", ".", ";", "?", ":", "+", "-", "!", "=",
];

fn lex(src: &str) -> Result<Vec<(usize, Tok)>, ExprError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;

        if c == b'"' || c == b'\'' || c == b'`' {
            let (s, next) = lex_string(src, i)?;
            out.push((start, Tok::Str(s)));
            i = next;
        } else if c.is_ascii_digit() {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let n = src[start..i].parse::<f64>().map_err(|_| ExprError::Parse {
                pos: start,
                message: format!("bad number '{}'", &src[start..i]),
            })?;
            out.push((start, Tok::Num(n)));
        } else if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$') {
                i += 1;
            }
            out.push((start, Tok::Ident(src[start..i].to_string())));
        } else if c == b'/' {
            let (pattern, flags, next) = lex_regex(src, i)?;
            out.push((start, Tok::Regex(pattern, flags)));
            i = next;
        } else {
            let punct = PUNCTS
                .iter()
                .find(|p| src[i..].starts_with(**p))
                .ok_or_else(|| ExprError::Parse {
                    pos: i,
                    message: format!("unexpected character '{}'", &src[i..].chars().next().unwrap_or(' ')),
                })?;
            // `===` / `!==` read as `==` / `!=`.
            i += punct.len();
            if (*punct == "==" || *punct == "!=") && bytes.get(i) == Some(&b'=') {
                i += 1;
            }
            out.push((start, Tok::Punct(punct)));
        }
    }

    Ok(out)
}

fn lex_string(src: &str, start: usize) -> Result<(String, usize), ExprError> {
    let quote = src.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = src[start + 1..].char_indices();

    while let Some((off, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, esc) = chars.next().ok_or_else(|| ExprError::Parse {
                    pos: start,
                    message: "unterminated string".to_string(),
                })?;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'u' => {
                        let hex: String = (0..4).filter_map(|_| chars.next().map(|(_, h)| h)).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| ExprError::Parse {
                                pos: start + 1 + off,
                                message: format!("bad unicode escape '{hex}'"),
                            })?;
                        out.push(code);
                    }
                    other => out.push(other),
                }
            }
            c if c == quote => return Ok((out, start + 1 + off + 1)),
            c => out.push(c),
        }
    }

    Err(ExprError::Parse {
        pos: start,
        message: "unterminated string".to_string(),
    })
}

fn lex_regex(src: &str, start: usize) -> Result<(String, String, usize), ExprError> {
    let bytes = src.as_bytes();
    let mut i = start + 1;
    let mut in_class = false;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'[' => in_class = true,
            b']' => in_class = false,
            b'/' if !in_class => break,
            _ => {}
        }
        i += 1;
    }
    if i >= bytes.len() {
        return Err(ExprError::Parse {
            pos: start,
            message: "unterminated regex".to_string(),
        });
    }

    let pattern = src[start + 1..i].to_string();
    i += 1;
    let flags_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    Ok((pattern, src[flags_start..i].to_string(), i))
}

/// Compile a script-style regex body and flag string.
pub fn compile_regex(pattern: &str, flags: &str) -> Result<RegexLiteral, String> {
    let mut inline = String::new();
    for flag in flags.chars() {
        match flag {
            'i' => inline.push('i'),
            'm' => inline.push('m'),
            's' => inline.push('s'),
            'g' | 'u' | 'y' => {}
            other => return Err(format!("unknown regex flag '{other}'")),
        }
    }
    let source = if inline.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{inline}){pattern}")
    };
    let re = Regex::new(&source).map_err(|e| e.to_string())?;
    Ok(RegexLiteral {
        re,
        global: flags.contains('g'),
    })
}

// =============================================================================
// Parser
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone)]
enum Expr {
    Lit(Value),
    Var(String),
    List(Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Member(Box<Expr>, String),
    Method(Box<Expr>, String, Vec<Expr>),
    Call(String, Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// A parsed expression source.
#[derive(Debug, Clone)]
pub struct Program {
    lets: Vec<(String, Expr)>,
    ret: Expr,
}

struct Parser {
    toks: Vec<(usize, Tok)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.toks.get(self.pos).map_or(self.end, |(p, _)| *p)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ExprError> {
        Err(ExprError::Parse {
            pos: self.offset(),
            message: message.into(),
        })
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ExprError> {
        if self.eat(punct) {
            Ok(())
        } else {
            self.error(format!("expected '{punct}'"))
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Ident(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<String, ExprError> {
        match self.peek() {
            Some(Tok::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => self.error("expected identifier"),
        }
    }

    fn program(&mut self) -> Result<Program, ExprError> {
        let mut lets = Vec::new();
        loop {
            while self.eat(";") {}
            if self.eat_keyword("let") || self.eat_keyword("const") || self.eat_keyword("var") {
                let name = self.ident()?;
                self.expect("=")?;
                let value = self.expr()?;
                lets.push((name, value));
                continue;
            }
            break;
        }
        self.eat_keyword("return");
        let ret = self.expr()?;
        while self.eat(";") {}
        if self.pos < self.toks.len() {
            return self.error("unexpected trailing input");
        }
        Ok(Program { lets, ret })
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let cond = self.binary(0)?;
        if self.eat("?") {
            let then = self.expr()?;
            self.expect(":")?;
            let other = self.expr()?;
            return Ok(Expr::Cond(Box::new(cond), Box::new(then), Box::new(other)));
        }
        Ok(cond)
    }

    /// Precedence climbing: `||` < `&&` < `==`/`!=` < `+`.
    fn binary(&mut self, level: u8) -> Result<Expr, ExprError> {
        const LEVELS: [&[(&str, BinOp)]; 4] = [
            &[("||", BinOp::Or)],
            &[("&&", BinOp::And)],
            &[("==", BinOp::Eq), ("!=", BinOp::Ne)],
            &[("+", BinOp::Add)],
        ];
        if level as usize >= LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        'outer: loop {
            for (punct, op) in LEVELS[level as usize] {
                if self.eat(punct) {
                    let rhs = self.binary(level + 1)?;
                    lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat("!") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat("[") {
                let index = self.expr()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat(".") {
                let name = self.ident()?;
                if self.eat("(") {
                    let args = self.args(")")?;
                    expr = Expr::Method(Box::new(expr), name, args);
                } else {
                    expr = Expr::Member(Box::new(expr), name);
                }
            } else {
                return Ok(expr);
            }
        }
    }

    fn args(&mut self, close: &str) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(",")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let tok = match self.toks.get(self.pos) {
            Some((_, tok)) => tok.clone(),
            None => return self.error("unexpected end of expression"),
        };
        let at = self.offset();
        self.pos += 1;

        match tok {
            Tok::Str(s) => Ok(Expr::Lit(Value::Str(s))),
            Tok::Num(n) => Ok(Expr::Lit(Value::Num(n))),
            Tok::Regex(pattern, flags) => compile_regex(&pattern, &flags)
                .map(|lit| Expr::Lit(Value::Regex(Arc::new(lit))))
                .map_err(|message| ExprError::Parse { pos: at, message }),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Lit(Value::Bool(true))),
                "false" => Ok(Expr::Lit(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Lit(Value::Null)),
                _ if self.eat("(") => Ok(Expr::Call(name, self.args(")")?)),
                _ => Ok(Expr::Var(name)),
            },
            Tok::Punct("(") => {
                let inner = self.expr()?;
                self.expect(")")?;
                Ok(inner)
            }
            Tok::Punct("[") => Ok(Expr::List(self.args("]")?)),
            Tok::Punct(p) => {
                self.pos -= 1;
                self.error(format!("unexpected '{p}'"))
            }
        }
    }
}

impl Program {
    /// Parse an expression source.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let toks = lex(source)?;
        let mut parser = Parser {
            toks,
            pos: 0,
            end: source.len(),
        };
        parser.program()
    }

    /// Evaluate against a scope.
    pub fn eval(&self, scope: &Scope<'_>) -> Result<Value, ExprError> {
        let mut env = Env {
            scope,
            locals: Vec::with_capacity(self.lets.len()),
        };
        for (name, expr) in &self.lets {
            let value = env.eval(expr)?;
            env.locals.push((name.clone(), value));
        }
        env.eval(&self.ret)
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// What an expression can see.
#[derive(Default)]
pub struct Scope<'a> {
    pub captures: &'a [Option<String>],
    pub url: &'a str,
    pub node: Option<&'a dyn Node>,
    pub document: Option<&'a Document>,
    pub vars: Vec<(&'static str, Value)>,
}

impl<'a> Scope<'a> {
    pub fn new(url: &'a str) -> Self {
        Self {
            url,
            ..Self::default()
        }
    }

    pub fn with_captures(mut self, captures: &'a [Option<String>]) -> Self {
        self.captures = captures;
        self
    }

    pub fn with_node(mut self, node: Option<&'a dyn Node>) -> Self {
        self.node = node;
        self
    }

    pub fn with_document(mut self, document: Option<&'a Document>) -> Self {
        self.document = document;
        self
    }

    pub fn with_var(mut self, name: &'static str, value: Value) -> Self {
        self.vars.push((name, value));
        self
    }

    fn base(&self) -> &str {
        self.document.map_or(self.url, Document::base)
    }
}

struct Env<'s, 'a> {
    scope: &'s Scope<'a>,
    locals: Vec<(String, Value)>,
}

impl<'s, 'a> Env<'s, 'a> {
    fn eval(&self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Lit(v) => Ok(v.clone()),
            Expr::Var(name) => self.var(name),
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e)).collect::<Result<_, _>>()?,
            )),
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                Ok(index_value(&target, &index))
            }
            Expr::Member(target, name) => {
                let target = self.eval(target)?;
                match (name.as_str(), &target) {
                    ("length", Value::Str(s)) => Ok(Value::Num(s.chars().count() as f64)),
                    ("length", Value::List(items)) => Ok(Value::Num(items.len() as f64)),
                    _ => eval_err(format!("unknown property '{name}'")),
                }
            }
            Expr::Method(target, name, args) => {
                let target = self.eval(target)?;
                let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
                call_method(&target, name, &args)
            }
            Expr::Call(name, args) => {
                let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
                self.call(name, &args)
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.truthy())),
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Num(n) => Ok(Value::Num(-n)),
                other => eval_err(format!("cannot negate {}", other.to_text())),
            },
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                match op {
                    BinOp::And if !lhs.truthy() => Ok(lhs),
                    BinOp::Or if lhs.truthy() => Ok(lhs),
                    BinOp::And | BinOp::Or => self.eval(rhs),
                    BinOp::Eq => Ok(Value::Bool(lhs.loose_eq(&self.eval(rhs)?))),
                    BinOp::Ne => Ok(Value::Bool(!lhs.loose_eq(&self.eval(rhs)?))),
                    BinOp::Add => Ok(match (lhs, self.eval(rhs)?) {
                        (Value::Num(a), Value::Num(b)) => Value::Num(a + b),
                        (a, b) => Value::Str(a.to_text() + &b.to_text()),
                    }),
                }
            }
            Expr::Cond(cond, then, other) => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(other)
                }
            }
        }
    }

    fn var(&self, name: &str) -> Result<Value, ExprError> {
        if let Some((_, v)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(v.clone());
        }
        if let Some((_, v)) = self.scope.vars.iter().find(|(n, _)| *n == name) {
            return Ok(v.clone());
        }
        match name {
            "m" => Ok(Value::List(
                self.scope
                    .captures
                    .iter()
                    .map(|c| Value::from_opt(c.as_deref()))
                    .collect(),
            )),
            "url" => Ok(Value::Str(self.scope.url.to_string())),
            "base" => Ok(Value::Str(self.scope.base().to_string())),
            "text" => Ok(Value::from_opt(self.scope.document.map(Document::text))),
            _ => eval_err(format!("unknown name '{name}'")),
        }
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, ExprError> {
        let text_arg = |i: usize| args.get(i).map(Value::to_text).unwrap_or_default();
        match name {
            "attr" => Ok(Value::from_opt(self.scope.node.and_then(|n| n.attr(&text_arg(0))))),
            "decode" => Ok(Value::Str(
                percent_decode_str(&text_arg(0)).decode_utf8_lossy().into_owned(),
            )),
            "encode" => Ok(Value::Str(
                utf8_percent_encode(&text_arg(0), NON_ALPHANUMERIC).to_string(),
            )),
            "abs" => Ok(Value::from_opt(absolutize(self.scope.base(), &text_arg(0)).as_deref())),
            "select" | "selectAll" | "text" => {
                let doc = match self.scope.document {
                    Some(doc) => doc,
                    None => return Ok(Value::Null),
                };
                let selector = selector_arg(&text_arg(0))?;
                let attr = args.get(1).and_then(Value::as_str);
                let read = |el: scraper::ElementRef<'_>| -> Option<String> {
                    if name == "text" {
                        return Some(el.text().collect::<String>().trim().to_string());
                    }
                    let raw = match attr {
                        Some(a) => el.value().attr(a),
                        None => node_url(&el),
                    }?;
                    match attr {
                        Some(a) if !matches!(a, "src" | "href" | "content" | "poster" | "data-src") => {
                            Some(raw.to_string())
                        }
                        _ => doc.absolutize(raw),
                    }
                };
                if name == "selectAll" {
                    Ok(Value::List(
                        doc.select_all(&selector)
                            .filter_map(read)
                            .map(Value::Str)
                            .collect(),
                    ))
                } else {
                    Ok(Value::from_opt(doc.select_first(&selector).and_then(read).as_deref()))
                }
            }
            _ => eval_err(format!("unknown function '{name}'")),
        }
    }
}

fn selector_arg(text: &str) -> Result<Selector, ExprError> {
    parse_selector(text).map_err(|e| ExprError::Eval(format!("bad selector '{text}': {e}")))
}

fn index_value(target: &Value, index: &Value) -> Value {
    let idx = match index {
        Value::Num(n) if *n >= 0.0 && n.fract() == 0.0 => *n as usize,
        _ => return Value::Null,
    };
    match target {
        Value::List(items) => items.get(idx).cloned().unwrap_or(Value::Null),
        Value::Str(s) => s.chars().nth(idx).map_or(Value::Null, |c| Value::Str(c.to_string())),
        _ => Value::Null,
    }
}

/// Expand `$n`, `$&` and `$$` in a replacement string.
pub fn expand_captures(template: &str, captures: &[Option<&str>]) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() {
            let next = bytes[i + 1];
            if next == b'$' {
                out.push('$');
                i += 2;
                continue;
            }
            if next == b'&' {
                out.push_str(captures.first().copied().flatten().unwrap_or(""));
                i += 2;
                continue;
            }
            if next.is_ascii_digit() {
                // Prefer a two-digit group when it exists.
                let one = (next - b'0') as usize;
                let two = bytes
                    .get(i + 2)
                    .filter(|b| b.is_ascii_digit())
                    .map(|b| one * 10 + (b - b'0') as usize)
                    .filter(|n| *n < captures.len());
                let (group, used) = match two {
                    Some(n) => (n, 3),
                    None => (one, 2),
                };
                if group < captures.len() && group > 0 {
                    out.push_str(captures[group].unwrap_or(""));
                    i += used;
                    continue;
                }
            }
        }
        let ch = template[i..].chars().next().unwrap_or('$');
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Script-style `String.prototype.replace` with a regex.
pub fn regex_replace(input: &str, lit: &RegexLiteral, replacement: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in lit.re.captures_iter(input) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        out.push_str(&input[last..whole.start()]);
        let groups: Vec<Option<&str>> = caps.iter().map(|m| m.map(|m| m.as_str())).collect();
        out.push_str(&expand_captures(replacement, &groups));
        last = whole.end();
        if !lit.global {
            break;
        }
    }
    out.push_str(&input[last..]);
    out
}

fn call_method(target: &Value, name: &str, args: &[Value]) -> Result<Value, ExprError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
    let text_arg = |i: usize| args.get(i).map(Value::to_text).unwrap_or_default();
    let num_arg = |i: usize| match args.get(i) {
        Some(Value::Num(n)) => Some(*n),
        _ => None,
    };

    if let Value::Regex(lit) = target {
        return match name {
            "test" => Ok(Value::Bool(lit.re.is_match(&text_arg(0)))),
            _ => eval_err(format!("unknown regex method '{name}'")),
        };
    }

    if let Value::List(items) = target {
        return match name {
            "join" => {
                let sep = args.first().map_or(",".to_string(), Value::to_text);
                Ok(Value::Str(
                    items.iter().map(Value::to_text).collect::<Vec<_>>().join(&sep),
                ))
            }
            "includes" => Ok(Value::Bool(items.iter().any(|v| v.loose_eq(&arg(0))))),
            "slice" => {
                let (start, end) = slice_bounds(items.len(), num_arg(0), num_arg(1));
                Ok(Value::List(items[start..end].to_vec()))
            }
            _ => eval_err(format!("unknown list method '{name}'")),
        };
    }

    let s = match target {
        Value::Str(s) => s.as_str(),
        Value::Null => return eval_err(format!("cannot call '{name}' on null")),
        _ => return eval_err(format!("unknown method '{name}'")),
    };

    match name {
        "replace" => match args.first() {
            Some(Value::Regex(lit)) => Ok(Value::Str(regex_replace(s, lit, &text_arg(1)))),
            _ => Ok(Value::Str(s.replacen(&text_arg(0), &text_arg(1), 1))),
        },
        "includes" => Ok(Value::Bool(s.contains(&text_arg(0)))),
        "startsWith" => Ok(Value::Bool(s.starts_with(&text_arg(0)))),
        "endsWith" => Ok(Value::Bool(s.ends_with(&text_arg(0)))),
        "indexOf" => Ok(Value::Num(
            s.find(&text_arg(0)).map_or(-1.0, |pos| s[..pos].chars().count() as f64),
        )),
        "split" => Ok(Value::List(match args.first() {
            Some(Value::Regex(lit)) => lit.re.split(s).map(|p| Value::Str(p.to_string())).collect(),
            _ => s.split(text_arg(0).as_str()).map(|p| Value::Str(p.to_string())).collect(),
        })),
        "match" => match args.first() {
            Some(Value::Regex(lit)) => Ok(lit.re.captures(s).map_or(Value::Null, |caps| {
                Value::List(caps.iter().map(|m| Value::from_opt(m.map(|m| m.as_str()))).collect())
            })),
            _ => eval_err("match() expects a regex"),
        },
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), num_arg(0), num_arg(1));
            Ok(Value::Str(chars[start..end].iter().collect()))
        }
        "toLowerCase" => Ok(Value::Str(s.to_lowercase())),
        "toUpperCase" => Ok(Value::Str(s.to_uppercase())),
        "trim" => Ok(Value::Str(s.trim().to_string())),
        _ => eval_err(format!("unknown string method '{name}'")),
    }
}

fn slice_bounds(len: usize, start: Option<f64>, end: Option<f64>) -> (usize, usize) {
    let clamp = |v: f64| -> usize {
        let v = if v < 0.0 { len as f64 + v } else { v };
        v.max(0.0).min(len as f64) as usize
    };
    let start = start.map_or(0, clamp);
    let end = end.map_or(len, clamp);
    (start, end.max(start))
}
