#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = mas_coordinator::Config::from_toml(s) {
            let _ = config.validate();
        }
    }
});
