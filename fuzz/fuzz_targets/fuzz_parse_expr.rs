#![no_main]

use libfuzzer_sys::fuzz_target;

const MAX_INPUT_BYTES: usize = 4_096;

fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_BYTES)];
    let text = String::from_utf8_lossy(data);
    let sanitized = af_engine::sanitize(&text);
    assert_eq!(af_engine::sanitize(&sanitized), sanitized);

    if let Ok(expr) = af_expr::parse_expr(&sanitized) {
        let _ = af_expr::parse_expr(&expr.to_string());
        let _ = af_engine::QueryPlan::decompose(&expr);
    }
});
