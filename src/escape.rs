//! Conversion of caller-supplied values into substitution-safe statement fragments.
//!
//! Three modes are provided, one per template sigil:
//! * [`literal`] (`{{name}}`): strings become single-quoted literals with `\` and `'`
//!   backslash-escaped; numbers and booleans are emitted bare; `null` becomes `NULL`;
//!   arrays become comma-separated literal lists.
//! * [`identifier`] (`{{: name}}`): backtick-quoted identifiers, with `*` and `["*"]`
//!   passed through bare.
//! * [`html_literal`] (`{{? name}}`): HTML entity encoding followed by literal quoting.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::{Result, SupersequelError};
use crate::value::type_name;

lazy_static! {
    static ref HTML_SPECIAL: Regex = Regex::new(r#"[&<>"'`=]"#).unwrap();
}

/// Which escaping strategy a substitution site uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Literal,
    Identifier,
    Html,
}

impl Mode {
    pub fn apply(self, value: &Value) -> Result<String> {
        match self {
            Mode::Literal => literal(value),
            Mode::Identifier => identifier(value),
            Mode::Html => html_literal(value),
        }
    }
}

fn unescapable(mode: &str, value: &Value) -> SupersequelError {
    SupersequelError::UnescapableValue(format!("{} cannot be escaped as {mode}", type_name(value)))
}

/// Single-quote `text`, backslash-escaping quotes, backslashes and NUL.
pub fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for c in text.chars() {
        match c {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            '\0' => quoted.push_str("\\0"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

pub fn literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(quote(s)),
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| match item {
                    Value::Array(_) => Ok(format!("({})", literal(item)?)),
                    _ => literal(item),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(parts.join(", "))
        }
        Value::Object(_) => Err(unescapable("literal", value)),
    }
}

fn backtick(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn single_identifier(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(backtick(s)),
        Value::Number(n) => Ok(backtick(&n.to_string())),
        _ => Err(unescapable("identifier", value)),
    }
}

pub fn identifier(value: &Value) -> Result<String> {
    match value {
        Value::String(s) if s == "*" => Ok("*".to_string()),
        Value::Array(items) => match items.as_slice() {
            [Value::String(s)] if s == "*" => Ok("*".to_string()),
            [] => Err(SupersequelError::UnescapableValue("empty identifier list".to_string())),
            _ => {
                let parts = items.iter().map(single_identifier).collect::<Result<Vec<_>>>()?;
                Ok(parts.join(", "))
            }
        },
        _ => single_identifier(value),
    }
}

/// Encode the characters that are significant in HTML markup and attributes.
pub fn html_escape(text: &str) -> String {
    HTML_SPECIAL
        .replace_all(text, |caps: &Captures| {
            match &caps[0] {
                "&" => "&amp;",
                "<" => "&lt;",
                ">" => "&gt;",
                "\"" => "&quot;",
                "'" => "&#x27;",
                "`" => "&#x60;",
                _ => "&#x3D;",
            }
            .to_string()
        })
        .into_owned()
}

pub fn html_literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::String(s) => Ok(quote(&html_escape(s))),
        Value::Bool(_) | Value::Number(_) => Ok(quote(&value.to_string())),
        _ => Err(unescapable("html literal", value)),
    }
}
