//! Query compiler: predicate name + named arguments → positional query.
//!
//! The compiler never touches an engine. It produces a structured [`Query`]
//! whose text form is only materialized when a backend asks for it.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CompileError, CompileResult};
use crate::schema::SchemaRegistry;
use crate::term::{ArgValue, Term, format_arg};

/// A structured goal: predicate plus ordered argument terms.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub predicate: String,
    pub terms: Vec<Term>,
    /// Variables to read back, in the order they appear in `terms`.
    pub output_vars: Vec<String>,
}

impl Query {
    /// Build a query directly, without consulting a schema.
    ///
    /// Used for internal lookups such as explanations; user-driven queries go
    /// through [`compile`].
    pub fn raw(predicate: impl Into<String>, terms: Vec<Term>) -> Self {
        let output_vars = terms
            .iter()
            .filter_map(|t| match t {
                Term::Variable(v) => Some(v.clone()),
                _ => None,
            })
            .collect();
        Self {
            predicate: predicate.into(),
            terms,
            output_vars,
        }
    }

    pub fn arity(&self) -> usize {
        self.terms.len()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = Term::atom(self.predicate.clone());
        if self.terms.is_empty() {
            return write!(f, "{head}");
        }
        write!(f, "{}", Term::Compound(self.predicate.clone(), self.terms.clone()))
    }
}

/// Compile a predicate call against the registry.
///
/// Fails on the first problem; a partial query is never returned.
pub fn compile(
    registry: &SchemaRegistry,
    predicate: &str,
    args: &BTreeMap<String, ArgValue>,
) -> CompileResult<Query> {
    let schema = registry
        .lookup(predicate)
        .ok_or_else(|| CompileError::InvalidPredicate {
            name: predicate.to_string(),
        })?;

    let mut terms = Vec::with_capacity(schema.arity());
    for input in schema.inputs() {
        let value = args.get(input).ok_or_else(|| CompileError::MissingArgument {
            predicate: predicate.to_string(),
            name: input.clone(),
        })?;
        terms.push(format_arg(value));
    }

    for extra in args.keys().filter(|k| !schema.inputs().contains(k)) {
        tracing::debug!(predicate, argument = %extra, "ignoring undeclared argument");
    }

    let max_output = schema.outputs().keys().next_back().copied().unwrap_or(0);
    let arity = schema.inputs().len().max(max_output);
    terms.resize(arity, Term::Wildcard);

    for (&position, var) in schema.outputs() {
        let slot = position
            .checked_sub(1)
            .and_then(|idx| terms.get_mut(idx))
            .ok_or_else(|| CompileError::SchemaMisconfigured {
                predicate: predicate.to_string(),
                position,
                slots: arity,
            })?;
        *slot = Term::Variable(var.clone());
    }

    let query = Query {
        predicate: predicate.to_string(),
        terms,
        output_vars: schema.output_names(),
    };
    tracing::debug!(query = %query, outputs = ?query.output_vars, "compiled query");
    Ok(query)
}
