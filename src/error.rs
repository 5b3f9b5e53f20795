//! Rich diagnostic error types for policy-bridge.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Schema and compiler errors live here;
//! the knowledge-base, LLM, intent and config errors live next to their modules
//! and are folded into [`BridgeError`].

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;
use crate::intent::IntentError;
use crate::kb::KbError;
use crate::llm::LlmError;

/// Top-level error type for the bridge.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum BridgeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Kb(#[from] KbError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Intent(#[from] IntentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Schema errors
// ---------------------------------------------------------------------------

/// Misconfiguration detected while building the predicate schema registry.
///
/// These are startup failures: a registry that constructs successfully never
/// produces them later.
#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    #[error("predicate name \"{name}\" is not a bare identifier")]
    #[diagnostic(
        code(bridge::schema::bad_name),
        help(
            "Predicate names must start with a lowercase ASCII letter followed by \
             letters, digits or underscores, so they can be emitted unquoted."
        )
    )]
    InvalidPredicateName { name: String },

    #[error("predicate \"{name}\" is declared more than once")]
    #[diagnostic(
        code(bridge::schema::duplicate_predicate),
        help("Remove or rename one of the duplicate declarations.")
    )]
    DuplicatePredicate { name: String },

    #[error("predicate \"{predicate}\" declares input \"{input}\" that is empty or repeated")]
    #[diagnostic(
        code(bridge::schema::bad_input),
        help("Input parameter names must be non-empty and unique within a predicate.")
    )]
    InvalidInput { predicate: String, input: String },

    #[error("predicate \"{predicate}\" declares output position {position}, positions start at 1")]
    #[diagnostic(
        code(bridge::schema::zero_position),
        help("Output and ignored positions are 1-based argument indices.")
    )]
    ZeroPosition { predicate: String, position: usize },

    #[error("predicate \"{predicate}\" declares position {position} more than once")]
    #[diagnostic(
        code(bridge::schema::duplicate_position),
        help("Each argument slot can hold exactly one output variable or be ignored once.")
    )]
    DuplicatePosition { predicate: String, position: usize },

    #[error("predicate \"{predicate}\" has output variable \"{variable}\" that is not a valid variable name")]
    #[diagnostic(
        code(bridge::schema::bad_variable),
        help(
            "Output variables must start with an uppercase ASCII letter followed by \
             letters, digits or underscores, and be unique within the predicate."
        )
    )]
    InvalidVariable { predicate: String, variable: String },

    #[error(
        "predicate \"{predicate}\" places output \"{variable}\" at position {position}, \
         which is an input slot ({inputs} inputs)"
    )]
    #[diagnostic(
        code(bridge::schema::output_collision),
        help(
            "Inputs occupy positions 1..=N in declaration order. Move the output after \
             the last input or drop the colliding input."
        )
    )]
    OutputCollision {
        predicate: String,
        variable: String,
        position: usize,
        inputs: usize,
    },

    #[error(
        "predicate \"{predicate}\" ignores position {position}, which is not after its \
         {inputs} inputs and within arity {arity}"
    )]
    #[diagnostic(
        code(bridge::schema::ignored_out_of_range),
        help(
            "Only slots after the last input and up to the highest output can be ignored. \
             Remove the position from `ignored` or declare an output beyond it."
        )
    )]
    IgnoredOutOfRange {
        predicate: String,
        position: usize,
        inputs: usize,
        arity: usize,
    },

    #[error("predicate \"{predicate}\" leaves argument position {position} unexplained")]
    #[diagnostic(
        code(bridge::schema::gap),
        help(
            "Every slot between the last input and the highest output must be an output \
             or listed under `ignored`, so wildcard padding is always intentional."
        )
    )]
    UnexplainedGap { predicate: String, position: usize },

    #[error("failed to read schema file: {path}")]
    #[diagnostic(
        code(bridge::schema::read),
        help("Ensure the schema file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema file {path}: {message}")]
    #[diagnostic(
        code(bridge::schema::parse),
        help("Check the TOML syntax: one [[predicate]] table per predicate.")
    )]
    Parse { path: String, message: String },
}

pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

// ---------------------------------------------------------------------------
// Compile errors
// ---------------------------------------------------------------------------

/// Failures of the query compiler. None of these are ever answered with a
/// substituted default: the request aborts.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum CompileError {
    #[error("predicate \"{name}\" is not allowed")]
    #[diagnostic(
        code(bridge::compile::invalid_predicate),
        help(
            "Only predicates declared in the schema registry can be queried. \
             Run `policy-bridge schema` to list them."
        )
    )]
    InvalidPredicate { name: String },

    #[error("missing required argument \"{name}\" for predicate \"{predicate}\"")]
    #[diagnostic(
        code(bridge::compile::missing_argument),
        help("Every declared input must be supplied; partial queries are never emitted.")
    )]
    MissingArgument { predicate: String, name: String },

    #[error(
        "output position {position} for predicate \"{predicate}\" is outside the {slots} computed slots"
    )]
    #[diagnostic(
        code(bridge::compile::schema_misconfigured),
        help("This is a registry bug, not a caller error. Fix the predicate declaration.")
    )]
    SchemaMisconfigured {
        predicate: String,
        position: usize,
        slots: usize,
    },
}

pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Convenience alias for top-level results.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
