//! Property-based tests for the formatter, compiler and normalizer.

use std::collections::BTreeMap;

use policy_bridge::compile::compile;
use policy_bridge::error::CompileError;
use policy_bridge::kb::reader::read_term;
use policy_bridge::normalize::{RawValue, normalize};
use policy_bridge::schema::SchemaRegistry;
use policy_bridge::term::{ArgValue, Term, format_arg, is_bare_identifier, unescape_quoted};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

/// Text biased towards quote, backslash and control characters.
fn tricky_text() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<String>(),
        "[a-z' \\\\\n\t\r()]{0,24}",
        "[A-Za-z0-9_]{0,12}",
    ]
}

fn arg_value() -> impl Strategy<Value = ArgValue> {
    prop_oneof![
        Just(ArgValue::Null),
        any::<bool>().prop_map(ArgValue::Bool),
        any::<i64>().prop_map(ArgValue::from),
        tricky_text().prop_map(ArgValue::Text),
    ]
}

fn predicate_name() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,20}"
}

fn registry() -> SchemaRegistry {
    SchemaRegistry::builtin().unwrap()
}

// ============================================================================
// Formatter
// ============================================================================

proptest! {
    #[test]
    fn quoted_text_round_trips(text in tricky_text()) {
        let term = format_arg(&ArgValue::Text(text.clone()));
        let rendered = term.to_string();
        if is_bare_identifier(&text) {
            prop_assert_eq!(rendered, text);
        } else {
            prop_assert_eq!(unescape_quoted(&rendered), Some(text));
        }
    }

    #[test]
    fn engine_reads_back_quoted_text(text in tricky_text()) {
        let rendered = Term::QuotedText(text.clone()).to_string();
        prop_assert_eq!(read_term(&rendered).unwrap(), RawValue::Atom(text));
    }

    #[test]
    fn formatted_text_never_escapes_its_literal(text in tricky_text()) {
        let rendered = format_arg(&ArgValue::Text(text)).to_string();
        if rendered.starts_with('\'') {
            // Every quote inside the literal is doubled.
            let inner = &rendered[1..rendered.len() - 1];
            prop_assert_eq!(inner.replace("''", "").matches('\'').count(), 0);
        }
    }
}

// ============================================================================
// Compiler
// ============================================================================

proptest! {
    #[test]
    fn complete_args_fill_declared_arity(values in prop::collection::vec(arg_value(), 5)) {
        let reg = registry();
        for schema in reg.iter() {
            let args: BTreeMap<String, ArgValue> = schema
                .inputs()
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect();
            let query = compile(&reg, schema.name(), &args).unwrap();
            prop_assert_eq!(query.arity(), schema.arity());
            for (&position, var) in schema.outputs() {
                prop_assert_eq!(&query.terms[position - 1], &Term::Variable(var.clone()));
            }
            prop_assert_eq!(query.output_vars, schema.output_names());
        }
    }

    #[test]
    fn omitted_input_is_reported_by_name(values in prop::collection::vec(arg_value(), 5), pick in any::<prop::sample::Index>()) {
        let reg = registry();
        for schema in reg.iter().filter(|s| !s.inputs().is_empty()) {
            let missing = pick.get(schema.inputs()).clone();
            let args: BTreeMap<String, ArgValue> = schema
                .inputs()
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .filter(|(name, _)| name != &missing)
                .collect();
            let err = compile(&reg, schema.name(), &args).unwrap_err();
            prop_assert_eq!(
                err,
                CompileError::MissingArgument { predicate: schema.name().to_string(), name: missing }
            );
        }
    }

    #[test]
    fn unknown_predicates_always_rejected(
        name in predicate_name(),
        values in prop::collection::btree_map("[A-Za-z]{1,8}", arg_value(), 0..4),
    ) {
        let reg = registry();
        prop_assume!(!reg.contains(&name));
        let err = compile(&reg, &name, &values).unwrap_err();
        prop_assert_eq!(err, CompileError::InvalidPredicate { name });
    }
}

// ============================================================================
// Normalizer
// ============================================================================

proptest! {
    #[test]
    fn normalization_preserves_order_and_count(atoms in prop::collection::vec("[a-z_]{1,10}", 0..12)) {
        let raw = atoms
            .iter()
            .map(|a| vec![("Method".to_string(), RawValue::Atom(a.clone()))])
            .collect();
        let set = normalize(raw);
        prop_assert_eq!(set.success, !atoms.is_empty());
        let texts: Vec<String> = set.values_of("Method").map(|v| v.to_text()).collect();
        prop_assert_eq!(texts, atoms);
    }
}
