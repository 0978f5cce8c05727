use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use wachposten::clock::SystemClock;
use wachposten::config::AppConfig;
use wachposten::middleware::blacklist::Blacklist;
use wachposten::middleware::csrf::CsrfCodec;
use wachposten::middleware::rate_limit::{Policy, RateLimitGuard, RateLimiter};
use wachposten::middleware::validation;

fn benchmark_rate_limit_check(c: &mut Criterion) {
    let settings = AppConfig::default().rate_limits;
    let clock = Arc::new(SystemClock);
    let guard = RateLimitGuard::new(RateLimiter::new(clock.clone()), Blacklist::new(clock), &settings);

    let mut group = c.benchmark_group("rate_limit");
    for ips in [1usize, 1_000, 100_000] {
        let addrs: Vec<String> = (0..ips).map(|i| format!("10.{}.{}.{}", i >> 16 & 255, i >> 8 & 255, i & 255)).collect();
        group.bench_with_input(BenchmarkId::new("check_multiple", ips), &addrs, |b, addrs| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % addrs.len();
                black_box(guard.check_multiple(&addrs[i], Policy::Api, Some("user-1")))
            });
        });
    }
    group.finish();
}

fn benchmark_threat_analysis(c: &mut Criterion) {
    let long = "lorem ipsum dolor sit amet ".repeat(200);
    let inputs: [(&str, &str); 4] = [
        ("benign", "Ein ganz normaler Kommentar zum Artikel, nichts Besonderes."),
        ("sqli", "admin' OR '1'='1' -- "),
        ("xss", "<img src=x onerror=alert(1)><script>alert(document.cookie)</script>"),
        ("long", long.as_str()),
    ];

    let mut group = c.benchmark_group("threat_analysis");
    for (name, input) in inputs.iter() {
        group.bench_with_input(BenchmarkId::new("analyze", name), input, |b, input| {
            b.iter(|| black_box(validation::analyze(input)));
        });
    }
    group.finish();
}

fn benchmark_csrf(c: &mut Criterion) {
    let codec = CsrfCodec::new(b"bench-secret", Duration::from_secs(3600), Arc::new(SystemClock));
    let token = codec.generate();
    let mut forged = token.clone();
    forged.pop();
    forged.push('0');

    c.bench_function("csrf_generate", |b| b.iter(|| black_box(codec.generate())));
    c.bench_function("csrf_validate", |b| b.iter(|| black_box(codec.validate(black_box(&token)))));
    c.bench_function("csrf_validate_forged", |b| b.iter(|| black_box(codec.validate(black_box(&forged)))));
}

criterion_group!(benches, benchmark_rate_limit_check, benchmark_threat_analysis, benchmark_csrf);
criterion_main!(benches);
