//! Benchmarks for query compilation, formatting, normalization and term reading.

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use policy_bridge::compile::compile;
use policy_bridge::kb::reader::{read_solution, read_term};
use policy_bridge::normalize::{normalize, RawValue};
use policy_bridge::schema::SchemaRegistry;
use policy_bridge::term::{format_arg, ArgValue};

fn bench_compile(c: &mut Criterion) {
    let registry = SchemaRegistry::builtin().unwrap();
    let mut args = BTreeMap::new();
    args.insert("ItemType".to_string(), ArgValue::from("shoes"));
    args.insert("Condition".to_string(), ArgValue::from("original"));
    args.insert("Packaging".to_string(), ArgValue::from("original_intact"));
    args.insert("Tags".to_string(), ArgValue::from("intact"));
    args.insert("DaysSinceDelivery".to_string(), ArgValue::from(12i64));

    c.bench_function("compile_is_eligible", |bench| {
        bench.iter(|| black_box(compile(&registry, "is_eligible", &args).unwrap().to_string()))
    });
}

fn bench_format(c: &mut Criterion) {
    let plain = ArgValue::from("united_states");
    let quoted = ArgValue::from("Customer's \"gift\" order\nfrom C:\\orders");

    c.bench_function("format_bare_atom", |bench| {
        bench.iter(|| black_box(format_arg(&plain).to_string()))
    });
    c.bench_function("format_quoted_text", |bench| {
        bench.iter(|| black_box(format_arg(&quoted).to_string()))
    });
}

fn bench_normalize(c: &mut Criterion) {
    let raw: Vec<_> = (0..100)
        .map(|i| {
            vec![
                ("Method".to_string(), RawValue::Atom(format!("method_{i}"))),
                (
                    "Reason".to_string(),
                    RawValue::Compound {
                        name: "reason".into(),
                        args: vec![RawValue::List(vec![
                            RawValue::Atom("hygiene".into()),
                            RawValue::Number(i.into()),
                        ])],
                    },
                ),
            ]
        })
        .collect();

    c.bench_function("normalize_100_solutions", |bench| {
        bench.iter(|| black_box(normalize(raw.clone())))
    });
}

fn bench_read(c: &mut Criterion) {
    let line = "[includes([batteries,aerosols,'nail polish']),60,'It''s final',\"text\",-1.5e3]";
    let vars: Vec<String> = ["A", "B", "C", "D", "E"].iter().map(|v| v.to_string()).collect();

    c.bench_function("read_term_list", |bench| {
        bench.iter(|| black_box(read_term(line).unwrap()))
    });
    c.bench_function("read_solution_line", |bench| {
        bench.iter(|| black_box(read_solution(line, &vars).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_compile,
    bench_format,
    bench_normalize,
    bench_read
);
criterion_main!(benches);
