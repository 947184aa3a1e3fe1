#![no_main]

use std::sync::OnceLock;

use af_columnar::Column;
use af_engine::{CodeMap, Dataset, Pipeline};
use af_frame::DataFrame;
use af_runtime::RuntimePolicy;
use af_types::Scalar;
use libfuzzer_sys::fuzz_target;

const MAX_INPUT_BYTES: usize = 1_024;
const MAX_STEPS: u64 = 50_000;

fn pipeline() -> &'static Pipeline {
    static PIPELINE: OnceLock<Pipeline> = OnceLock::new();
    PIPELINE.get_or_init(|| {
        let frame = DataFrame::from_columns(vec![
            (
                "customer_state".to_owned(),
                Column::from_values(vec!["SP".into(), "RJ".into(), "MG".into()])
                    .expect("states"),
            ),
            (
                "payment_value".to_owned(),
                Column::from_values(vec![
                    Scalar::Float64(10.0),
                    Scalar::Float64(20.0),
                    Scalar::Float64(5.0),
                ])
                .expect("payments"),
            ),
            (
                "order_purchase_timestamp".to_owned(),
                Column::from_values(vec![
                    Scalar::Timestamp(af_types::parse_timestamp("2018-01-02").expect("ts")),
                    Scalar::Timestamp(af_types::parse_timestamp("2018-05-09").expect("ts")),
                    Scalar::Timestamp(af_types::parse_timestamp("2018-08-30").expect("ts")),
                ])
                .expect("timestamps"),
            ),
        ])
        .expect("frame");
        Pipeline::new(
            Dataset::from_frame(frame),
            RuntimePolicy::hardened(Some(MAX_STEPS)),
            CodeMap::default(),
        )
    })
}

fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_BYTES)];
    let text = String::from_utf8_lossy(data);
    let pipeline = pipeline();
    let rows = pipeline.dataset().len();

    let answer = pipeline.run(&text);
    let _ = answer.reply.render_plain();
    assert_eq!(pipeline.dataset().len(), rows);
});
