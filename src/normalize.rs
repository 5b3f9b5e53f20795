//! Result normalization: raw engine bindings → canonical solution set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A value as returned by a knowledge-base backend, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Atom(String),
    /// Engine string object (double-quoted text).
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
    Compound { name: String, args: Vec<RawValue> },
    List(Vec<RawValue>),
    /// Variable left unbound by the solution.
    Unbound(String),
}

/// One solution as reported by a backend: ordered `(variable, value)` pairs.
pub type RawSolution = Vec<(String, RawValue)>;

/// A compound term kept in structured form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundValue {
    pub functor: String,
    pub args: Vec<Value>,
}

/// A normalized binding value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<Value>),
    Compound(CompoundValue),
}

impl Value {
    /// Plain-text rendering, used for explanations and CLI output.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => "_".into(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Text(t) => t.clone(),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_text).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Compound(c) => {
                let parts: Vec<String> = c.args.iter().map(Value::to_text).collect();
                format!("{}({})", c.functor, parts.join(", "))
            }
        }
    }
}

/// Variable name → normalized value.
pub type Solution = BTreeMap<String, Value>;

/// Outcome of one knowledge-base query.
///
/// `success == false` always comes with no solutions. A query that succeeds
/// without binding anything carries exactly one empty solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionSet {
    pub success: bool,
    pub solutions: Vec<Solution>,
}

impl SolutionSet {
    pub fn failure() -> Self {
        Self {
            success: false,
            solutions: Vec::new(),
        }
    }

    /// Succeeded with nothing to bind.
    pub fn proven() -> Self {
        Self {
            success: true,
            solutions: vec![Solution::new()],
        }
    }

    /// All values bound to `var`, in solution order.
    pub fn values_of<'a>(&'a self, var: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.solutions.iter().filter_map(move |s| s.get(var))
    }
}

/// Normalize a backend's ordered solution list.
///
/// Order and multiplicity are preserved; nothing is deduplicated.
pub fn normalize(raw: Vec<RawSolution>) -> SolutionSet {
    if raw.is_empty() {
        return SolutionSet::failure();
    }
    if raw.len() == 1 && raw[0].is_empty() {
        return SolutionSet::proven();
    }
    let solutions = raw
        .into_iter()
        .map(|bindings| {
            bindings
                .into_iter()
                .map(|(var, value)| (var, normalize_value(value)))
                .collect()
        })
        .collect();
    SolutionSet {
        success: true,
        solutions,
    }
}

/// Normalize a single raw value.
pub fn normalize_value(value: RawValue) -> Value {
    match value {
        RawValue::Atom(a) => Value::Text(a),
        RawValue::Text(t) => Value::Text(t),
        RawValue::Number(n) => Value::Number(n),
        RawValue::Bool(b) => Value::Bool(b),
        RawValue::Compound { name, args } if args.is_empty() => Value::Text(name),
        RawValue::Compound { name, args } => Value::Compound(CompoundValue {
            functor: name,
            args: args.into_iter().map(normalize_value).collect(),
        }),
        RawValue::List(items) => Value::List(items.into_iter().map(normalize_value).collect()),
        RawValue::Unbound(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn atom(s: &str) -> RawValue {
        RawValue::Atom(s.into())
    }

    #[test]
    fn empty_is_failure() {
        let set = normalize(vec![]);
        assert_eq!(set, SolutionSet::failure());
        assert_eq!(
            serde_json::to_value(&set).unwrap(),
            json!({"success": false, "solutions": []})
        );
    }

    #[test]
    fn single_empty_binding_is_success() {
        let set = normalize(vec![vec![]]);
        assert!(set.success);
        assert_eq!(set.solutions.len(), 1);
        assert!(set.solutions[0].is_empty());
        assert_eq!(
            serde_json::to_value(&set).unwrap(),
            json!({"success": true, "solutions": [{}]})
        );
        assert_ne!(set, normalize(vec![]));
    }

    #[test]
    fn multiple_solutions_kept_in_order_without_dedup() {
        let raw = vec![
            vec![("Method".to_string(), atom("create_account_same_email"))],
            vec![("Method".to_string(), atom("use_self_service_tool"))],
            vec![("Method".to_string(), atom("contact_customer_care"))],
            vec![("Method".to_string(), atom("contact_customer_care"))],
        ];
        let set = normalize(raw);
        assert!(set.success);
        let methods: Vec<String> = set.values_of("Method").map(Value::to_text).collect();
        assert_eq!(
            methods,
            vec![
                "create_account_same_email",
                "use_self_service_tool",
                "contact_customer_care",
                "contact_customer_care"
            ]
        );
    }

    #[test]
    fn zero_arity_compound_unwraps() {
        let raw = vec![vec![(
            "X".to_string(),
            RawValue::Compound {
                name: "free".into(),
                args: vec![],
            },
        )]];
        assert_eq!(normalize(raw).solutions[0]["X"], Value::Text("free".into()));
    }

    #[test]
    fn compound_with_args_kept_structured() {
        let raw = vec![vec![(
            "Fee".to_string(),
            RawValue::Compound {
                name: "amount".into(),
                args: vec![RawValue::Number(60.into()), atom("aud")],
            },
        )]];
        let set = normalize(raw);
        assert_eq!(
            serde_json::to_value(&set.solutions[0]["Fee"]).unwrap(),
            json!({"functor": "amount", "args": [60, "aud"]})
        );
        assert_eq!(set.solutions[0]["Fee"].to_text(), "amount(60, aud)");
    }

    #[test]
    fn scalars_pass_through() {
        let raw = vec![vec![
            ("Amount".to_string(), RawValue::Number(34.into())),
            ("Currency".to_string(), atom("gbp")),
            ("Flag".to_string(), RawValue::Bool(false)),
            ("Hours".to_string(), RawValue::Text("Mon-Fri 9AM-8PM EST".into())),
        ]];
        let set = normalize(raw);
        assert_eq!(
            serde_json::to_value(&set.solutions[0]).unwrap(),
            json!({"Amount": 34, "Currency": "gbp", "Flag": false, "Hours": "Mon-Fri 9AM-8PM EST"})
        );
    }

    #[test]
    fn lists_and_unbound_normalize() {
        let raw = vec![vec![
            (
                "Reason".to_string(),
                RawValue::Compound {
                    name: "includes".into(),
                    args: vec![RawValue::List(vec![atom("batteries"), atom("aerosols")])],
                },
            ),
            ("Free".to_string(), RawValue::Unbound("_123".into())),
        ]];
        let set = normalize(raw);
        assert_eq!(
            serde_json::to_value(&set.solutions[0]).unwrap(),
            json!({
                "Reason": {"functor": "includes", "args": [["batteries", "aerosols"]]},
                "Free": null
            })
        );
    }

    #[test]
    fn repeated_empty_solutions_preserved() {
        let set = normalize(vec![vec![], vec![]]);
        assert!(set.success);
        assert_eq!(set.solutions.len(), 2);
    }
}
