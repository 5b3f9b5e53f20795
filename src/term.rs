//! Argument values and engine-ready terms.
//!
//! Intent arguments arrive as untyped JSON. They are converted once, at the
//! boundary, into [`ArgValue`]; the formatter then maps each `ArgValue` to a
//! [`Term`] that renders to safe Prolog text. Nothing downstream inspects raw
//! JSON types again.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One loosely-typed argument value supplied by the understanding step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    /// Arrays and objects. Kept verbatim; formatted lossily.
    Other(serde_json::Value),
}

impl From<serde_json::Value> for ArgValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::Text(s),
            other => Self::Other(other),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

/// A formatted, engine-ready query term.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Unquoted atom; guaranteed to be a bare identifier.
    Atom(String),
    /// Arbitrary text, rendered as an escaped quoted atom.
    QuotedText(String),
    /// Numeric literal, rendered with its exact textual value.
    Number(serde_json::Number),
    Bool(bool),
    /// Anonymous `_`. Matches anything, binds nothing.
    Wildcard,
    /// Named output variable read back after the query runs.
    Variable(String),
    Compound(String, Vec<Term>),
}

impl Term {
    /// Atom constructor that quotes automatically when the name is not bare.
    pub fn atom(name: impl Into<String>) -> Self {
        let name = name.into();
        if is_bare_identifier(&name) {
            Self::Atom(name)
        } else {
            Self::QuotedText(name)
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom(a) => f.write_str(a),
            Term::QuotedText(t) => f.write_str(&quote(t)),
            Term::Number(n) => write!(f, "{n}"),
            Term::Bool(b) => write!(f, "{b}"),
            Term::Wildcard => f.write_str("_"),
            Term::Variable(v) => f.write_str(v),
            Term::Compound(name, args) => {
                let functor = if is_bare_identifier(name) {
                    name.clone()
                } else {
                    quote(name)
                };
                if args.is_empty() {
                    return write!(f, "{functor}()");
                }
                write!(f, "{functor}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Convert one argument value into a query term.
///
/// Total: every input produces a term. Values with no faithful term form fall
/// back to quoted JSON text and are logged as lossy.
pub fn format_arg(value: &ArgValue) -> Term {
    match value {
        ArgValue::Text(s) if is_bare_identifier(s) => Term::Atom(s.clone()),
        ArgValue::Text(s) => Term::QuotedText(s.clone()),
        ArgValue::Bool(b) => Term::Bool(*b),
        ArgValue::Number(n) => Term::Number(n.clone()),
        ArgValue::Null => Term::Wildcard,
        ArgValue::Other(v) => {
            let text = v.to_string();
            tracing::warn!(value = %text, "lossy argument conversion, quoting JSON text");
            Term::QuotedText(text)
        }
    }
}

/// Whether `s` can be emitted as an unquoted atom.
///
/// `true` and `false` are excluded so they never shadow boolean arguments.
pub fn is_bare_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && s != "true" && s != "false"
}

/// Whether `s` is a valid named variable (leading uppercase letter).
pub fn is_variable_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render `text` as a single-quoted atom.
///
/// Quotes are doubled and backslash is escaped. Newline, CR and tab use their
/// short escapes; every other ASCII control character, NUL included, becomes
/// `\x<hex>\`, so the rendered text never carries a raw control byte.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_control() => out.push_str(&hex_escape(c)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Reverse [`quote`]. Returns `None` if `rendered` is not a well-formed
/// quoted atom produced by it.
pub fn unescape_quoted(rendered: &str) -> Option<String> {
    let inner = rendered.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                if chars.next()? != '\'' {
                    return None;
                }
                out.push('\'');
            }
            '\\' => match chars.next()? {
                '\\' => out.push('\\'),
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'x' => {
                    let mut digits = String::new();
                    loop {
                        match chars.next()? {
                            '\\' => break,
                            d if d.is_ascii_hexdigit() => digits.push(d),
                            _ => return None,
                        }
                    }
                    let code = u32::from_str_radix(&digits, 16).ok()?;
                    out.push(char::from_u32(code)?);
                }
                _ => return None,
            },
            c => out.push(c),
        }
    }
    Some(out)
}

/// `\x<hex>\`, the numeric escape accepted inside quoted atoms.
pub fn hex_escape(c: char) -> String {
    format!("\\x{:x}\\", c as u32)
}
