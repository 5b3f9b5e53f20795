//! In-memory ground-fact backend.
//!
//! Holds an immutable list of facts and answers a query by matching it against
//! every fact of the same predicate and arity, in file order. There are no
//! rules: a predicate holds exactly for the facts listed. Used for demos, the
//! CLI's offline mode, and tests.
//!
//! ```toml
//! [[fact]]
//! predicate = "get_return_fee"
//! args = ["uk", 34, "gbp"]
//!
//! [[fact]]
//! predicate = "is_item_excluded"
//! args = ["dangerous_good", { functor = "includes", args = [["batteries", "aerosols"]] }]
//! ```
//!
//! TOML strings become atoms, integers and floats numbers, booleans booleans,
//! arrays lists, and `{ functor, args }` tables compound terms.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::cancel::CancelToken;
use crate::compile::Query;
use crate::kb::{KbError, KbResult, KnowledgeBase};
use crate::normalize::{RawSolution, RawValue};
use crate::term::Term;

#[derive(Debug, Deserialize)]
struct FactFile {
    #[serde(default)]
    fact: Vec<FactDecl>,
}

#[derive(Debug, Deserialize)]
struct FactDecl {
    predicate: String,
    #[serde(default)]
    args: Vec<toml::Value>,
}

/// Immutable table of ground facts, grouped by predicate.
#[derive(Debug, Default, Clone)]
pub struct FactBase {
    facts: HashMap<String, Vec<Vec<RawValue>>>,
}

impl FactBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fact. Only used while building; the base is read-only once shared.
    pub fn insert(&mut self, predicate: impl Into<String>, args: Vec<RawValue>) {
        self.facts.entry(predicate.into()).or_default().push(args);
    }

    pub fn from_toml_file(path: &Path) -> KbResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| KbError::Facts {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text).map_err(|e| match e {
            KbError::Facts { message, .. } => KbError::Facts {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> KbResult<Self> {
        let file: FactFile = toml::from_str(text).map_err(|e| KbError::Facts {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;
        let mut base = Self::new();
        for decl in file.fact {
            let args = decl
                .args
                .into_iter()
                .map(raw_from_toml)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|message| KbError::Facts {
                    path: "<inline>".into(),
                    message: format!("fact {}: {message}", decl.predicate),
                })?;
            base.insert(decl.predicate, args);
        }
        Ok(base)
    }

    /// Number of facts across all predicates.
    pub fn len(&self) -> usize {
        self.facts.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KnowledgeBase for FactBase {
    fn query(&self, query: &Query, cancel: &CancelToken) -> KbResult<Vec<RawSolution>> {
        if cancel.is_cancelled() {
            return Err(KbError::Cancelled {
                query: query.to_string(),
            });
        }
        let Some(rows) = self.facts.get(&query.predicate) else {
            return Ok(Vec::new());
        };
        let solutions = rows
            .iter()
            .filter(|row| row.len() == query.terms.len())
            .filter_map(|row| match_row(&query.terms, row))
            .collect();
        Ok(solutions)
    }

    fn name(&self) -> &str {
        "facts"
    }
}

/// Match one fact against the query terms, returning bindings in
/// variable order.
fn match_row(terms: &[Term], row: &[RawValue]) -> Option<RawSolution> {
    let mut bindings: RawSolution = Vec::new();
    for (term, value) in terms.iter().zip(row) {
        match term {
            Term::Wildcard => {}
            Term::Variable(name) => {
                if let Some((_, bound)) = bindings.iter().find(|(n, _)| n == name) {
                    if bound != value {
                        return None;
                    }
                } else {
                    bindings.push((name.clone(), value.clone()));
                }
            }
            ground => {
                if !term_matches(ground, value) {
                    return None;
                }
            }
        }
    }
    Some(bindings)
}

fn term_matches(term: &Term, value: &RawValue) -> bool {
    match (term, value) {
        (Term::Wildcard | Term::Variable(_), _) => true,
        (Term::Atom(a) | Term::QuotedText(a), RawValue::Atom(b)) => a == b,
        (Term::QuotedText(a), RawValue::Text(b)) => a == b,
        (Term::Number(a), RawValue::Number(b)) => numbers_equal(a, b),
        (Term::Bool(a), RawValue::Bool(b)) => a == b,
        (Term::Bool(a), RawValue::Atom(b)) => b.as_str() == (if *a { "true" } else { "false" }),
        (Term::Compound(name, args), RawValue::Compound { name: n, args: vs }) => {
            name == n
                && args.len() == vs.len()
                && args.iter().zip(vs).all(|(t, v)| term_matches(t, v))
        }
        _ => false,
    }
}

/// Integers never unify with floats, as in Prolog.
fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    if a.is_f64() || b.is_f64() {
        return a.is_f64() && b.is_f64() && a.as_f64() == b.as_f64();
    }
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        // u64 and bignums: integers have one canonical spelling.
        _ => a == b,
    }
}

fn raw_from_toml(value: toml::Value) -> Result<RawValue, String> {
    Ok(match value {
        toml::Value::String(s) => RawValue::Atom(s),
        toml::Value::Integer(i) => RawValue::Number(i.into()),
        toml::Value::Float(f) => RawValue::Number(
            serde_json::Number::from_f64(f).ok_or_else(|| format!("non-finite float {f}"))?,
        ),
        toml::Value::Boolean(b) => RawValue::Bool(b),
        toml::Value::Array(items) => RawValue::List(
            items
                .into_iter()
                .map(raw_from_toml)
                .collect::<Result<_, _>>()?,
        ),
        toml::Value::Table(mut table) => {
            let name = match table.remove("functor") {
                Some(toml::Value::String(s)) => s,
                _ => return Err("compound table needs a string `functor`".into()),
            };
            let args = match table.remove("args") {
                Some(toml::Value::Array(items)) => items
                    .into_iter()
                    .map(raw_from_toml)
                    .collect::<Result<_, _>>()?,
                None => Vec::new(),
                Some(_) => return Err("compound `args` must be an array".into()),
            };
            RawValue::Compound { name, args }
        }
        toml::Value::Datetime(d) => RawValue::Atom(d.to_string()),
    })
}
