//! Knowledge-base backends.
//!
//! A backend executes a compiled [`Query`] and returns the engine's ordered
//! solutions. Backends must be shareable across concurrent requests without
//! leaking bindings between them:
//!
//! - [`swipl::SwiplEngine`]: one `swipl` process per query, killed on timeout
//!   or cancellation.
//! - [`facts::FactBase`]: immutable in-memory ground facts.

pub mod facts;
pub mod reader;
pub mod swipl;

use miette::Diagnostic;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::compile::Query;
use crate::normalize::{RawSolution, RawValue, normalize_value};
use crate::term::Term;

/// Errors from knowledge-base execution.
#[derive(Debug, Error, Diagnostic)]
pub enum KbError {
    #[error("failed to start engine \"{program}\": {source}")]
    #[diagnostic(
        code(bridge::kb::spawn),
        help("Install SWI-Prolog or point `kb.swipl_path` at the `swipl` executable.")
    )]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("query `{query}` failed: {message}")]
    #[diagnostic(
        code(bridge::kb::execution),
        help(
            "The engine raised an error while running the query. Check that the rule \
             file loads cleanly and defines the predicate."
        )
    )]
    Execution { query: String, message: String },

    #[error("query `{query}` timed out after {timeout_secs}s")]
    #[diagnostic(
        code(bridge::kb::timeout),
        help("Increase `kb.timeout_secs` or simplify the rule file.")
    )]
    Timeout { query: String, timeout_secs: u64 },

    #[error("query `{query}` was cancelled")]
    #[diagnostic(code(bridge::kb::cancelled))]
    Cancelled { query: String },

    #[error("unreadable engine output at column {column}: {message}")]
    #[diagnostic(
        code(bridge::kb::malformed_output),
        help("The engine printed something that is not a canonical term. This is a bug.")
    )]
    MalformedOutput { column: usize, message: String },

    #[error("rule file not found: {path}")]
    #[diagnostic(
        code(bridge::kb::rule_file),
        help("Set `kb.rule_file` to an existing Prolog source file.")
    )]
    RuleFileMissing { path: String },

    #[error("failed to load facts from {path}: {message}")]
    #[diagnostic(
        code(bridge::kb::facts),
        help("Check the TOML syntax: one [[fact]] table with `predicate` and `args` per fact.")
    )]
    Facts { path: String, message: String },
}

pub type KbResult<T> = std::result::Result<T, KbError>;

/// A logic engine the pipeline can query.
pub trait KnowledgeBase: Send + Sync {
    /// Run `query` and return every solution in engine order.
    ///
    /// An empty vector means the goal failed. Implementations must give up when
    /// `cancel` trips.
    fn query(&self, query: &Query, cancel: &CancelToken) -> KbResult<Vec<RawSolution>>;

    /// Short backend name for logs and diagnostics.
    fn name(&self) -> &str;
}

/// Name of the explanation relation: `predicate_explanation(Predicate, Tag, Explanation)`.
pub const EXPLANATION_PREDICATE: &str = "predicate_explanation";

/// The explanation lookup for `predicate`.
pub fn explanation_query(predicate: &str) -> Query {
    Query::raw(
        EXPLANATION_PREDICATE,
        vec![
            Term::atom(predicate),
            Term::Wildcard,
            Term::Variable("Explanation".into()),
        ],
    )
}

/// Fetch the first explanation text for `predicate`, if any.
pub fn lookup_explanation(
    kb: &dyn KnowledgeBase,
    predicate: &str,
    cancel: &CancelToken,
) -> KbResult<Option<String>> {
    let query = explanation_query(predicate);
    let solutions = kb.query(&query, cancel)?;
    let text = solutions.into_iter().next().and_then(|bindings| {
        bindings
            .into_iter()
            .find(|(var, _)| var == "Explanation")
            .map(|(_, value)| explanation_text(value))
    });
    Ok(text)
}

fn explanation_text(value: RawValue) -> String {
    match value {
        RawValue::Atom(t) | RawValue::Text(t) => t,
        other => normalize_value(other).to_text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::facts::FactBase;

    #[test]
    fn explanation_query_shape() {
        assert_eq!(
            explanation_query("get_return_fee").to_string(),
            "predicate_explanation(get_return_fee, _, Explanation)"
        );
    }

    #[test]
    fn explanation_found_and_missing() {
        let kb = FactBase::from_toml_str(
            r#"
            [[fact]]
            predicate = "predicate_explanation"
            args = ["get_return_fee", "fees", "Return fees depend on the destination region."]
            "#,
        )
        .unwrap();
        let cancel = CancelToken::new();
        assert_eq!(
            lookup_explanation(&kb, "get_return_fee", &cancel).unwrap().as_deref(),
            Some("Return fees depend on the destination region.")
        );
        assert_eq!(lookup_explanation(&kb, "can_exchange", &cancel).unwrap(), None);
    }
}
