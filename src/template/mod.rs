//! Small text-template engine used for config expansion.
//!
//! Config fields (source args, processor keys, filter expressions, output
//! templates) may embed actions of the form `{{ ... }}` which are evaluated
//! against a JSON value tree. The language is deliberately tiny:
//!
//! - `{{.}}` - the root value
//! - `{{.ScanMatch.tag}}` - field access, one step per `.name`
//! - `{{index .VerMeta "v1.2.3"}}` - index a map by key or an array by position
//! - `{{split .Version "."}}` - split a string into an array
//! - `( ... )` - nest a call as an argument, e.g.
//!   `{{index (split .Version ".") 0}}`
//! - `"..."` string and `123` integer literals
//!
//! Everything outside actions is copied through verbatim. Structured data is
//! serialized into [`serde_json::Value`] before evaluation, so field names in
//! templates follow the serialized spelling (`ScanMatch`, `VerMap`, ...).

use serde::Serialize;
use serde_json::Value;

use crate::core::VbumpError;

/// Render `tmpl` against a serializable data value.
pub fn render_data<T: Serialize>(tmpl: &str, data: &T) -> Result<String, VbumpError> {
    let value = serde_json::to_value(data).map_err(|e| VbumpError::Template {
        template: tmpl.to_string(),
        reason: format!("failed to serialize template data: {e}"),
    })?;
    render(tmpl, &value)
}

/// Render `tmpl` against an already-built JSON value.
pub fn render(tmpl: &str, data: &Value) -> Result<String, VbumpError> {
    let err = |reason: String| VbumpError::Template {
        template: tmpl.to_string(),
        reason,
    };
    let mut out = String::with_capacity(tmpl.len());
    let mut rest = tmpl;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let action = &rest[start + 2..];
        let (expr_src, consumed) = action_body(action).map_err(&err)?;
        let tokens = lex(expr_src).map_err(&err)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_expr().map_err(&err)?;
        if !parser.at_end() {
            return Err(err(format!("unexpected trailing input in \"{expr_src}\"")));
        }
        let value = eval(&expr, data).map_err(&err)?;
        out.push_str(&to_text(&value).map_err(&err)?);
        rest = &action[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Locate the closing `}}` of an action, skipping string literals. Returns
/// the expression source and the offset just past the closing braces.
fn action_body(action: &str) -> Result<(&str, usize), String> {
    let bytes = action.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err("unterminated string literal".to_string());
                }
            }
            b'}' if i + 1 < bytes.len() && bytes[i + 1] == b'}' => {
                return Ok((&action[..i], i + 2));
            }
            _ => {}
        }
        i += 1;
    }
    Err("unterminated action, missing }}".to_string())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    /// `.a.b.c` - empty vec for the bare root `.`
    Path(Vec<String>),
    Str(String),
    Int(i64),
    Ident(String),
}

fn lex(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(i, c)) = chars.peek() {
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
            '.' => {
                chars.next();
                let mut path = Vec::new();
                loop {
                    let mut field = String::new();
                    while let Some(&(_, c)) = chars.peek() {
                        if c.is_alphanumeric() || c == '_' || c == '-' {
                            field.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if field.is_empty() {
                        if path.is_empty() {
                            break; // bare `.` is the root
                        }
                        return Err(format!("empty field name in path at offset {i}"));
                    }
                    path.push(field);
                    match chars.peek() {
                        Some(&(_, '.')) => {
                            chars.next();
                        }
                        _ => break,
                    }
                }
                tokens.push(Token::Path(path));
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, e)) => s.push(match e {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            }),
                            None => return Err("unterminated escape in string".to_string()),
                        },
                        c => s.push(c),
                    }
                }
                if !closed {
                    return Err("unterminated string literal".to_string());
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut num = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: i64 = num.parse().map_err(|e| format!("bad integer {num}: {e}"))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            c => return Err(format!("unexpected character '{c}' at offset {i}")),
        }
    }
    Ok(tokens)
}

#[derive(Debug)]
enum Expr {
    Path(Vec<String>),
    Str(String),
    Int(i64),
    Index(Box<Expr>, Box<Expr>),
    Split(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    /// Top-level expression: a function call or a single term.
    fn parse_expr(&mut self) -> Result<Expr, String> {
        match self.tokens.get(self.pos) {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                let a = self.parse_term()?;
                let b = self.parse_term()?;
                match name.as_str() {
                    "index" => Ok(Expr::Index(Box::new(a), Box::new(b))),
                    "split" => Ok(Expr::Split(Box::new(a), Box::new(b))),
                    other => Err(format!("unknown function \"{other}\"")),
                }
            }
            _ => self.parse_term(),
        }
    }

    /// A term: path, literal, or parenthesized expression.
    fn parse_term(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Path(path)) => Ok(Expr::Path(path)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected closing parenthesis".to_string()),
                }
            }
            Some(tok) => Err(format!("unexpected token {tok:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn eval(expr: &Expr, data: &Value) -> Result<Value, String> {
    match expr {
        Expr::Path(path) => {
            let mut cur = data;
            for field in path {
                cur = match cur {
                    Value::Object(map) => map
                        .get(field)
                        .ok_or_else(|| format!("field \"{field}\" not found"))?,
                    other => {
                        return Err(format!(
                            "cannot access field \"{field}\" on non-object value {other}"
                        ))
                    }
                };
            }
            Ok(cur.clone())
        }
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Int(n) => Ok(Value::Number((*n).into())),
        Expr::Index(target, key) => {
            let target = eval(target, data)?;
            let key = eval(key, data)?;
            match (&target, &key) {
                (Value::Object(map), Value::String(k)) => map
                    .get(k)
                    .cloned()
                    .ok_or_else(|| format!("key \"{k}\" not found")),
                (Value::Array(items), Value::Number(n)) => {
                    let i = n
                        .as_u64()
                        .ok_or_else(|| format!("bad array index {n}"))?
                        as usize;
                    items
                        .get(i)
                        .cloned()
                        .ok_or_else(|| format!("index {i} out of range, len {}", items.len()))
                }
                (t, k) => Err(format!("cannot index {t} with {k}")),
            }
        }
        Expr::Split(target, sep) => {
            let target = eval(target, data)?;
            let sep = eval(sep, data)?;
            match (&target, &sep) {
                (Value::String(s), Value::String(sep)) if !sep.is_empty() => Ok(Value::Array(
                    s.split(sep.as_str())
                        .map(|p| Value::String(p.to_string()))
                        .collect(),
                )),
                (t, s) => Err(format!("split expects string arguments, got {t} and {s}")),
            }
        }
    }
}

/// Text form of an evaluated value as it appears in rendered output.
fn to_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => serde_json::to_string(other).map_err(|e| e.to_string()),
    }
}
