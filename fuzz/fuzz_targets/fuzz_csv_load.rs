#![no_main]

use af_io::{DatasetSchema, read_csv_str};
use libfuzzer_sys::fuzz_target;

const MAX_INPUT_BYTES: usize = 16_384;

fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_BYTES)];
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(frame) = read_csv_str(text, &DatasetSchema::permissive()) {
        let _ = af_engine::compute_kpis(&frame);
    }
    let _ = read_csv_str(text, &DatasetSchema::olist());
});
