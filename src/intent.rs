//! Intents produced by the understanding step.
//!
//! The model is asked for a JSON object such as
//!
//! ```json
//! {"status": "success", "predicate": "get_return_fee", "args": {"Region": "uk"}}
//! ```
//!
//! Output wrapped in markdown code fences is tolerated. Anything that is not a
//! JSON object is an [`IntentError`]; field-level sloppiness (wrong types,
//! missing optional fields) is absorbed here so the pipeline only ever sees a
//! well-typed [`Intent`].

use std::collections::BTreeMap;

use miette::Diagnostic;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::term::ArgValue;

/// The understanding output could not be turned into an intent.
#[derive(Debug, Error, Diagnostic)]
pub enum IntentError {
    #[error("understanding output is not valid JSON: {message}")]
    #[diagnostic(
        code(bridge::intent::invalid_json),
        help("The model must answer with a single JSON object. Check the understanding prompt.")
    )]
    InvalidJson { message: String, raw: String },

    #[error("understanding output is JSON but not an object")]
    #[diagnostic(
        code(bridge::intent::not_object),
        help("The model must answer with a single JSON object. Check the understanding prompt.")
    )]
    NotAnObject { raw: String },
}

impl IntentError {
    /// The unparsed model output.
    pub fn raw(&self) -> &str {
        match self {
            Self::InvalidJson { raw, .. } | Self::NotAnObject { raw } => raw,
        }
    }
}

/// Routing outcome of the understanding step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentStatus {
    Success,
    MissingInfo,
    OffTopic,
    /// Any other value, including a missing status.
    Unknown(String),
}

impl IntentStatus {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("success") => Self::Success,
            Some("missing_info") => Self::MissingInfo,
            Some("off_topic") => Self::OffTopic,
            Some(other) => Self::Unknown(other.to_string()),
            None => Self::Unknown(String::new()),
        }
    }
}

/// A parsed intent. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub status: IntentStatus,
    pub predicate: Option<String>,
    pub args: BTreeMap<String, ArgValue>,
    pub clarification_question: Option<String>,
    pub missing_args: Vec<String>,
    pub off_topic_reason: Option<String>,
    /// The JSON object as received, for debug echoes.
    pub raw: JsonValue,
}

impl Intent {
    /// The predicate name, if present and not blank.
    pub fn predicate(&self) -> Option<&str> {
        self.predicate.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}

/// Parse the understanding output.
pub fn parse_intent(raw: &str) -> Result<Intent, IntentError> {
    let body = strip_code_fence(raw);
    let json: JsonValue = serde_json::from_str(body).map_err(|e| IntentError::InvalidJson {
        message: e.to_string(),
        raw: raw.to_string(),
    })?;
    let JsonValue::Object(map) = &json else {
        return Err(IntentError::NotAnObject {
            raw: raw.to_string(),
        });
    };

    let text = |key: &str| map.get(key).and_then(JsonValue::as_str).map(str::to_string);

    let args = match map.get("args") {
        Some(JsonValue::Object(args)) => args
            .iter()
            .map(|(k, v)| (k.clone(), ArgValue::from(v.clone())))
            .collect(),
        Some(JsonValue::Null) | None => BTreeMap::new(),
        Some(other) => {
            tracing::warn!(args = %other, "intent args is not an object, ignoring");
            BTreeMap::new()
        }
    };

    let missing_args = match map.get("missing_args") {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    Ok(Intent {
        status: IntentStatus::parse(map.get("status").and_then(JsonValue::as_str)),
        predicate: text("predicate"),
        args,
        clarification_question: text("clarification_question"),
        missing_args,
        off_topic_reason: text("off_topic_reason"),
        raw: json.clone(),
    })
}

/// Remove a surrounding markdown code fence (```` ``` ```` or ```` ```json ````).
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // Drop an info string such as `json` on the opening line.
    let rest = match rest.find('\n') {
        Some(nl) if !rest[..nl].trim_start().starts_with('{') => &rest[nl + 1..],
        _ => rest,
    };
    rest.trim()
}
