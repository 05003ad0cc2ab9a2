//! Criterion benchmarks for the query evaluator.
//!
//! Measures raw evaluation cost over pre-compiled expressions, separately
//! from parse cost, plus a parse-only group.
//!
//! Run:
//!   cargo bench
//!   cargo bench -- projection      # one group

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use jmesquery::{compile, parse, Value};

// ── Data builders ────────────────────────────────────────────────────────────

/// Tiny single-field object used by simple-path benchmarks.
fn tiny_obj(key: &str, val: Value) -> Value {
    let mut m = IndexMap::new();
    m.insert(key.to_string(), val);
    Value::object(m)
}

/// Nested object `d` levels deep ending in a number.
fn nested_obj(depth: usize) -> Value {
    let mut v = Value::from(42);
    for _ in 0..depth {
        v = tiny_obj("a", v);
    }
    v
}

/// 100 simple product objects: {id, name, price, inStock}.
fn products_100() -> Value {
    let products: Vec<Value> = (0..100_usize)
        .map(|i| {
            let mut m = IndexMap::new();
            m.insert("id".to_string(), Value::from(i as f64));
            m.insert("name".to_string(), Value::string(format!("Product {i}")));
            m.insert("price".to_string(), Value::from(10.0 + i as f64 * 2.5));
            m.insert("inStock".to_string(), Value::Bool(i % 2 == 0));
            Value::object(m)
        })
        .collect();
    tiny_obj("products", Value::array(products))
}

/// Flat numeric array of n values under "values".
fn numeric_array(n: usize) -> Value {
    let values: Vec<Value> = (0..n).map(|i| Value::from(i as f64)).collect();
    tiny_obj("values", Value::array(values))
}

// ── Benchmarks ───────────────────────────────────────────────────────────────

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for (name, expr) in [
        ("simple_path", "a.b.c.d"),
        ("projection", "products[?inStock].name"),
        (
            "pipeline",
            "let $min = `10` in products[?price > $min] | sort_by(@, &price)[:5].name",
        ),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| parse(black_box(expr)).unwrap());
        });
    }
    group.finish();
}

fn bench_simple_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("simple_path");
    for depth in [1_usize, 4, 16] {
        let data = nested_obj(depth);
        let expr = compile(&vec!["a"; depth].join(".")).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(depth), &data, |b, data| {
            b.iter(|| expr.search(black_box(data)).unwrap());
        });
    }
    group.finish();
}

fn bench_projection(c: &mut Criterion) {
    let data = products_100();
    let mut group = c.benchmark_group("projection");

    let list = compile("products[*].name").unwrap();
    group.bench_function("list", |b| {
        b.iter(|| list.search(black_box(&data)).unwrap());
    });

    let filter = compile("products[?inStock].name").unwrap();
    group.bench_function("filter", |b| {
        b.iter(|| filter.search(black_box(&data)).unwrap());
    });

    let sorted = compile("sort_by(products, &price)[:10].name").unwrap();
    group.bench_function("sort_by", |b| {
        b.iter(|| sorted.search(black_box(&data)).unwrap());
    });

    group.finish();
}

fn bench_functions(c: &mut Criterion) {
    let mut group = c.benchmark_group("functions");

    let sums = compile("sum(values)").unwrap();
    for n in [100_usize, 1000] {
        let data = numeric_array(n);
        group.bench_with_input(BenchmarkId::new("sum", n), &data, |b, data| {
            b.iter(|| sums.search(black_box(data)).unwrap());
        });
    }

    let serialize = compile("json_serialize(@)").unwrap();
    let data = products_100();
    group.bench_function("json_serialize", |b| {
        b.iter(|| serialize.search(black_box(&data)).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_simple_path,
    bench_projection,
    bench_functions
);
criterion_main!(benches);
