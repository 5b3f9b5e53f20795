//! Predicate schema registry: the fixed vocabulary the compiler may target.
//!
//! A registry is built once at startup, either from the bundled returns-policy
//! table or from a TOML file, and is validated in full before it is handed out.
//! Every positional mismatch that would otherwise surface at first compile is a
//! construction error here.
//!
//! TOML layout:
//!
//! ```toml
//! [[predicate]]
//! name = "get_return_fee"
//! inputs = ["Region"]
//! outputs = [{ position = 2, name = "Amount" }, { position = 3, name = "Currency" }]
//! ignored = []
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};
use crate::term::{is_bare_identifier, is_variable_name};

/// Declared shape of one knowledge-base predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateSchema {
    name: String,
    inputs: Vec<String>,
    outputs: BTreeMap<usize, String>,
    ignored: BTreeSet<usize>,
    arity: usize,
}

impl PredicateSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input parameter names, in argument order (positions `1..=inputs.len()`).
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Output variables keyed by 1-based argument position.
    pub fn outputs(&self) -> &BTreeMap<usize, String> {
        &self.outputs
    }

    /// Positions deliberately left as wildcards.
    pub fn ignored(&self) -> &BTreeSet<usize> {
        &self.ignored
    }

    /// `max(inputs, highest output position)`.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Output variable names in position order.
    pub fn output_names(&self) -> Vec<String> {
        self.outputs.values().cloned().collect()
    }

    fn signature(&self) -> String {
        let mut slots = vec!["_".to_string(); self.arity];
        for (i, input) in self.inputs.iter().enumerate() {
            slots[i] = format!("+{input}");
        }
        for (pos, var) in &self.outputs {
            if let Some(slot) = slots.get_mut(pos - 1) {
                *slot = format!("-{var}");
            }
        }
        format!("{}({})", self.name, slots.join(", "))
    }
}

/// Serialized form of one predicate declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicateDecl {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
    #[serde(default)]
    pub ignored: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDecl {
    pub position: usize,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    predicate: Vec<PredicateDecl>,
}

impl PredicateDecl {
    fn new(name: &str, inputs: &[&str], outputs: &[(usize, &str)]) -> Self {
        Self {
            name: name.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs
                .iter()
                .map(|(position, name)| OutputDecl {
                    position: *position,
                    name: name.to_string(),
                })
                .collect(),
            ignored: Vec::new(),
        }
    }

    /// Validate and freeze this declaration.
    pub fn build(self) -> SchemaResult<PredicateSchema> {
        let PredicateDecl {
            name,
            inputs,
            outputs,
            ignored,
        } = self;

        if !is_bare_identifier(&name) {
            return Err(SchemaError::InvalidPredicateName { name });
        }

        let mut seen_inputs = BTreeSet::new();
        for input in &inputs {
            if input.trim().is_empty() || !seen_inputs.insert(input.as_str()) {
                return Err(SchemaError::InvalidInput {
                    predicate: name,
                    input: input.clone(),
                });
            }
        }

        let mut out_map = BTreeMap::new();
        let mut out_names = BTreeSet::new();
        for out in &outputs {
            if out.position == 0 {
                return Err(SchemaError::ZeroPosition {
                    predicate: name,
                    position: 0,
                });
            }
            if !is_variable_name(&out.name)
                || !out_names.insert(out.name.as_str())
                || seen_inputs.contains(out.name.as_str())
            {
                return Err(SchemaError::InvalidVariable {
                    predicate: name,
                    variable: out.name.clone(),
                });
            }
            if out.position <= inputs.len() {
                return Err(SchemaError::OutputCollision {
                    predicate: name,
                    variable: out.name.clone(),
                    position: out.position,
                    inputs: inputs.len(),
                });
            }
            if out_map.insert(out.position, out.name.clone()).is_some() {
                return Err(SchemaError::DuplicatePosition {
                    predicate: name,
                    position: out.position,
                });
            }
        }

        let max_output = out_map.keys().next_back().copied().unwrap_or(0);
        let arity = inputs.len().max(max_output);

        let mut ignored_set = BTreeSet::new();
        for pos in ignored {
            if pos == 0 {
                return Err(SchemaError::ZeroPosition {
                    predicate: name,
                    position: 0,
                });
            }
            // Ignored slots must lie in the padding region.
            if pos <= inputs.len() || pos > arity {
                return Err(SchemaError::IgnoredOutOfRange {
                    predicate: name,
                    position: pos,
                    inputs: inputs.len(),
                    arity,
                });
            }
            if out_map.contains_key(&pos) || !ignored_set.insert(pos) {
                return Err(SchemaError::DuplicatePosition {
                    predicate: name,
                    position: pos,
                });
            }
        }

        for pos in inputs.len() + 1..=arity {
            if !out_map.contains_key(&pos) && !ignored_set.contains(&pos) {
                return Err(SchemaError::UnexplainedGap {
                    predicate: name,
                    position: pos,
                });
            }
        }

        Ok(PredicateSchema {
            name,
            inputs,
            outputs: out_map,
            ignored: ignored_set,
            arity,
        })
    }
}

/// Read-only table of allowed predicates.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    predicates: HashMap<String, PredicateSchema>,
    /// Declaration order, for stable listings.
    order: Vec<String>,
}

impl SchemaRegistry {
    /// Build a registry from declarations, validating every entry.
    pub fn new(decls: Vec<PredicateDecl>) -> SchemaResult<Self> {
        let mut predicates = HashMap::with_capacity(decls.len());
        let mut order = Vec::with_capacity(decls.len());
        for decl in decls {
            let schema = decl.build()?;
            let name = schema.name.clone();
            if predicates.contains_key(&name) {
                return Err(SchemaError::DuplicatePredicate { name });
            }
            order.push(name.clone());
            predicates.insert(name, schema);
        }
        tracing::debug!(predicates = order.len(), "schema registry built");
        Ok(Self { predicates, order })
    }

    /// The bundled returns-policy vocabulary.
    pub fn builtin() -> SchemaResult<Self> {
        Self::new(builtin_decls())
    }

    /// Load and validate a registry from a TOML file.
    pub fn from_toml_file(path: &Path) -> SchemaResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|e| match e {
            SchemaError::Parse { message, .. } => SchemaError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> SchemaResult<Self> {
        let file: SchemaFile = toml::from_str(text).map_err(|e| SchemaError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;
        Self::new(file.predicate)
    }

    pub fn lookup(&self, name: &str) -> Option<&PredicateSchema> {
        self.predicates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }

    /// Schemas in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &PredicateSchema> {
        self.order.iter().filter_map(|n| self.predicates.get(n))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// One line per predicate, `+Input` / `-Output` marked. Appended to the
    /// understanding prompt so the model sees the exact vocabulary.
    pub fn catalog(&self) -> String {
        let mut out = String::new();
        for schema in self.iter() {
            let _ = writeln!(out, "- {}", schema.signature());
        }
        out
    }
}

fn builtin_decls() -> Vec<PredicateDecl> {
    vec![
        PredicateDecl::new(
            "is_eligible",
            &["ItemType", "Condition", "Packaging", "Tags", "DaysSinceDelivery"],
            &[],
        ),
        PredicateDecl::new("get_return_window", &[], &[(1, "Days")]),
        PredicateDecl::new("get_shipping_cost", &["Region"], &[(2, "CostType")]),
        PredicateDecl::new("get_return_label_info", &["Region"], &[(2, "LabelInfo")]),
        PredicateDecl::new(
            "get_return_fee",
            &["Region"],
            &[(2, "Amount"), (3, "Currency")],
        ),
        PredicateDecl::new("is_item_excluded", &["ItemType"], &[(2, "ReasonStructure")]),
        PredicateDecl::new("get_initiation_method", &["UserType"], &[(2, "Method")]),
        PredicateDecl::new("can_exchange", &[], &[(1, "Result")]),
        PredicateDecl::new("get_contact_email", &[], &[(1, "Email")]),
        PredicateDecl::new("get_contact_chat_availability", &[], &[(1, "Availability")]),
        PredicateDecl::new(
            "get_phone_number",
            &["PhoneType"],
            &[(2, "Number"), (3, "Hours")],
        ),
        PredicateDecl::new("get_damaged_item_action", &[], &[(1, "Action")]),
        PredicateDecl::new("get_warranty_provider", &[], &[(1, "Provider")]),
        PredicateDecl::new("is_warranty_by_ssense", &[], &[(1, "Result")]),
    ]
}
