use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sdfc::codegen::{self, CodegenOptions};
use sdfc::desc::{self, ModelDesc};
use sdfc::registry::{ActorKind, KindRegistry};
use sdfc::resolve::resolve_links;
use sdfc::schedule::build_schedule;

// KPI-aligned benchmark scenarios.
// All scenarios compile cleanly against the inline kind set below.

const KINDS: &str = r#"[
    {
        "name": "source",
        "ports": [{ "name": "out", "output": true }],
        "templates": { "fire": "$ref(out) = 1.0;" }
    },
    {
        "name": "scale",
        "ports": [
            { "name": "in", "input": true },
            { "name": "out", "output": true }
        ],
        "templates": { "fire": "$ref(out) = $ref(in) * $param(factor);" }
    },
    {
        "name": "decimate",
        "ports": [
            { "name": "in", "input": true, "rate": 4 },
            { "name": "out", "output": true }
        ],
        "templates": { "fire": "$ref(out) = $ref(in, 3);" }
    },
    {
        "name": "sink",
        "ports": [{ "name": "in", "input": true }],
        "templates": { "fire": "$print(in);" }
    }
]"#;

const SIMPLE_MODEL: &str = r#"{
    "name": "simple",
    "iterations": 16,
    "actors": [
        { "name": "src", "kind": "source" },
        { "name": "amp", "kind": "scale", "params": { "factor": "2.0" } },
        { "name": "snk", "kind": "sink" }
    ],
    "relations": [
        { "name": "r0", "endpoints": ["src.out", "amp.in"] },
        { "name": "r1", "endpoints": ["amp.out", "snk.in"] }
    ]
}"#;

const NESTED_MODEL: &str = r#"{
    "name": "nested",
    "iterations": 16,
    "actors": [
        { "name": "src", "kind": "source" },
        {
            "name": "stage",
            "ports": [
                { "name": "in", "input": true, "rate": 4 },
                { "name": "out", "output": true }
            ],
            "actors": [
                { "name": "pre", "kind": "scale", "params": { "factor": "0.5" } },
                { "name": "dec", "kind": "decimate" }
            ],
            "relations": [
                { "name": "feed", "endpoints": ["stage.in", "pre.in"] },
                { "name": "mid", "endpoints": ["pre.out", "dec.in"] },
                { "name": "drain", "endpoints": ["dec.out", "stage.out"] }
            ]
        },
        { "name": "snk", "kind": "sink" }
    ],
    "relations": [
        { "name": "in0", "endpoints": ["src.out", "stage.in"] },
        { "name": "out0", "endpoints": ["stage.out", "snk.in"] }
    ]
}"#;

fn scenarios() -> [(&'static str, &'static str); 2] {
    [("simple", SIMPLE_MODEL), ("nested", NESTED_MODEL)]
}

/// Scaling generator: a 1:1 chain of `n` scale actors between a source and
/// a sink. Rate-homogeneous, so scheduling cost isolates graph size.
fn generate_chain_model(n: usize) -> String {
    let mut actors = vec![r#"{ "name": "src", "kind": "source" }"#.to_string()];
    let mut relations = Vec::new();
    let mut prev = "src.out".to_string();

    for i in 0..n {
        actors.push(format!(
            r#"{{ "name": "s{}", "kind": "scale", "params": {{ "factor": "1.0" }} }}"#,
            i
        ));
        relations.push(format!(
            r#"{{ "name": "r{}", "endpoints": ["{}", "s{}.in"] }}"#,
            i, prev, i
        ));
        prev = format!("s{}.out", i);
    }
    actors.push(r#"{ "name": "snk", "kind": "sink" }"#.to_string());
    relations.push(format!(
        r#"{{ "name": "r{}", "endpoints": ["{}", "snk.in"] }}"#,
        n, prev
    ));

    format!(
        r#"{{ "name": "chain", "iterations": 1, "actors": [{}], "relations": [{}] }}"#,
        actors.join(", "),
        relations.join(", ")
    )
}

fn create_loaded_registry() -> KindRegistry {
    let kinds: Vec<ActorKind> = serde_json::from_str(KINDS).expect("bad kind literal");
    let mut registry = KindRegistry::new();
    for k in kinds {
        registry.insert(k).expect("duplicate bench kind");
    }
    registry
}

fn compile_full(model_json: &str, registry: &KindRegistry, opts: &CodegenOptions) {
    let desc = ModelDesc::from_json(model_json).expect("benchmark scenario must parse");
    let graph = desc::build(&desc, registry).expect("benchmark scenario must build");
    let links = resolve_links(&graph).expect("benchmark scenario must resolve");
    let schedule = build_schedule(&graph).expect("benchmark scenario must schedule");
    let generated =
        codegen::codegen(&graph, &links.table, &schedule, registry, opts).expect("codegen");
    black_box(generated);
}

// KPI: full compile latency (parse -> build -> resolve -> schedule -> codegen).
fn bench_kpi_full_compile_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/full_compile_latency");
    let registry = create_loaded_registry();
    let opts = CodegenOptions::default();

    for (name, model) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), model, |b, model| {
            b.iter(|| compile_full(black_box(model), &registry, &opts));
        });
    }

    group.finish();
}

// KPI: phase-level latency on a pre-built graph.
fn bench_kpi_phase_latency(c: &mut Criterion) {
    let registry = create_loaded_registry();
    let desc = ModelDesc::from_json(NESTED_MODEL).expect("benchmark scenario must parse");
    let graph = desc::build(&desc, &registry).expect("benchmark scenario must build");
    let links = resolve_links(&graph).expect("benchmark scenario must resolve");
    let schedule = build_schedule(&graph).expect("benchmark scenario must schedule");
    let opts = CodegenOptions::default();

    let mut group = c.benchmark_group("kpi/phase_latency");
    group.bench_function("resolve", |b| {
        b.iter(|| black_box(resolve_links(black_box(&graph)).unwrap()));
    });
    group.bench_function("schedule", |b| {
        b.iter(|| black_box(build_schedule(black_box(&graph)).unwrap()));
    });
    group.bench_function("codegen", |b| {
        b.iter(|| {
            black_box(
                codegen::codegen(&graph, &links.table, &schedule, &registry, &opts).unwrap(),
            )
        });
    });
    group.finish();
}

// KPI: compile scalability over chain length.
fn bench_kpi_compile_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/compile_scaling");
    let registry = create_loaded_registry();
    let opts = CodegenOptions::default();

    for n in [4usize, 16, 64, 256] {
        let model = generate_chain_model(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &model, |b, model| {
            b.iter(|| compile_full(black_box(model), &registry, &opts));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_kpi_full_compile_latency,
    bench_kpi_phase_latency,
    bench_kpi_compile_scaling
);
criterion_main!(benches);
