// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # policy-bridge
//!
//! A question-answering bridge between a language model and a fixed-schema
//! Prolog knowledge base describing a retailer's returns policy.
//!
//! The model only *understands* (question → intent) and *phrases*
//! (result → text). The answer itself always comes from the knowledge base.
//!
//! ## Architecture
//!
//! - **Schema registry** (`schema`): the allowed predicates and their argument slots
//! - **Formatter** (`term`): untyped argument values → safe Prolog terms
//! - **Compiler** (`compile`): predicate + named args → structured query
//! - **Backends** (`kb`): per-query `swipl` processes or in-memory facts
//! - **Normalizer** (`normalize`): engine bindings → canonical solution sets
//! - **Pipeline** (`pipeline`): the per-request state machine
//! - **Server** (`server`, feature `server`): the HTTP API
//!
//! ## Library usage
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use policy_bridge::cancel::CancelToken;
//! use policy_bridge::compile::compile;
//! use policy_bridge::kb::KnowledgeBase;
//! use policy_bridge::kb::facts::FactBase;
//! use policy_bridge::normalize::normalize;
//! use policy_bridge::schema::SchemaRegistry;
//!
//! let registry = SchemaRegistry::builtin().unwrap();
//! let kb = FactBase::from_toml_file("data/policy.facts.toml".as_ref()).unwrap();
//! let mut args = BTreeMap::new();
//! args.insert("Region".to_string(), "uk".into());
//! let query = compile(&registry, "get_return_fee", &args).unwrap();
//! let result = normalize(kb.query(&query, &CancelToken::new()).unwrap());
//! println!("{query} -> {}", serde_json::to_string(&result).unwrap());
//! ```

pub mod cancel;
pub mod compile;
pub mod config;
pub mod error;
pub mod intent;
pub mod kb;
pub mod llm;
pub mod normalize;
pub mod pipeline;
pub mod schema;
#[cfg(feature = "server")]
pub mod server;
pub mod term;
