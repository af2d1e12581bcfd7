// Request validation benchmarks (Criterion)
//
// Every /run-script request passes through these checks before a child is
// spawned, so they should stay in the microsecond range.
//
// Usage:
//   cargo bench --bench validation

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use scriptgate::scripts::{dangerous_pattern, ExecutionRequest, RequestValidator, ScriptType};
use std::hint::black_box;

fn validator() -> RequestValidator {
    RequestValidator::new(
        ["script1.py", "script2.py", "script1.sh", "script1.zsh"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    )
}

fn bench_validate_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_request");
    let validator = validator();

    let cases = [
        ("valid", ExecutionRequest::new("abc1234", "script1.py")),
        ("bad_user", ExecutionRequest::new("ab", "script1.py")),
        ("not_allowed", ExecutionRequest::new("abc1234", "evil.sh")),
        (
            "with_args",
            ExecutionRequest::new("abc1234", "script1.sh").with_arguments(["alpha", "beta", "gamma", "delta"]),
        ),
    ];

    for (name, req) in &cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), req, |b, req| {
            b.iter(|| black_box(validator.validate(black_box(req)).is_ok()));
        });
    }

    group.finish();
}

fn bench_dangerous_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("dangerous_pattern");

    let long = "x".repeat(1024);
    for arg in ["plain-argument", "a; rm -rf /", long.as_str()] {
        group.bench_with_input(BenchmarkId::from_parameter(arg.len()), arg, |b, arg| {
            b.iter(|| black_box(dangerous_pattern(black_box(arg))));
        });
    }

    group.finish();
}

fn bench_detect_script_type(c: &mut Criterion) {
    c.bench_function("detect_script_type", |b| {
        b.iter(|| {
            for name in ["script1.py", "script1.sh", "script1.zsh", "README"] {
                black_box(ScriptType::detect(black_box(name)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_validate_request,
    bench_dangerous_pattern,
    bench_detect_script_type
);
criterion_main!(benches);
