use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mas_coordinator::agent::parse_coordination_request;
use mas_coordinator::providers::SseDecoder;

fn stream_body(chunks: usize) -> Vec<u8> {
    let mut body = String::new();
    for i in 0..chunks {
        body.push_str(&format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"token {i} \"}}}}]}}\n\n"
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

fn bench_sse_decoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("sse_decoder");
    for chunks in [16usize, 256, 4096] {
        let body = stream_body(chunks);
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::new("network_slices", chunks), &body, |b, body| {
            b.iter(|| {
                let mut decoder = SseDecoder::new();
                let mut count = 0;
                for slice in body.chunks(1460) {
                    count += decoder.push(black_box(slice)).len();
                }
                black_box(count)
            });
        });
    }
    group.finish();
}

fn bench_classifier_parse(c: &mut Criterion) {
    let plain = r#"{"agent_name":"UMS","additional_instructions":"Create user Bob with role admin"}"#;
    let fenced = format!("```json\n{plain}\n```");
    c.bench_function("parse_coordination_request/plain", |b| {
        b.iter(|| parse_coordination_request(black_box(plain)))
    });
    c.bench_function("parse_coordination_request/fenced", |b| {
        b.iter(|| parse_coordination_request(black_box(&fenced)))
    });
}

criterion_group!(benches, bench_sse_decoder, bench_classifier_parse);
criterion_main!(benches);
