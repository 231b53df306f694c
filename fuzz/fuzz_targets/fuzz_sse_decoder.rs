#![no_main]
use libfuzzer_sys::fuzz_target;
use mas_coordinator::providers::SseDecoder;

fuzz_target!(|data: &[u8]| {
    // Feed in uneven slices so line reassembly across pushes is exercised.
    let mut decoder = SseDecoder::new();
    let split = data.first().map_or(1, |b| usize::from(*b % 13) + 1);
    for chunk in data.chunks(split) {
        for payload in decoder.push(chunk) {
            assert!(!payload.is_empty());
        }
    }
    let _ = decoder.finish();
});
