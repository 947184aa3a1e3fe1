#![forbid(unsafe_code)]

//! askframe: untrusted, model-generated pandas-style expressions evaluated
//! against one immutable dataset.
//!
//! [`Pipeline::run`] sanitizes the text, evaluates it in a closed-grammar
//! sandbox, repairs an extremum over an empty result once and normalizes
//! the value for display. The building blocks are re-exported as modules.

pub use af_columnar as columnar;
pub use af_engine::{
    Answer, CodeMap, Dataset, DatasetSchema, DisplayValue, EngineError, EvaluationOutcome,
    ExpressionGenerator, Failure, FailureKind, GeneratorError, Kpis, Pipeline, PipelineConfig,
    QueryValue, Reply, build_prompt, compute_kpis, evaluate, normalize, repair, sanitize,
};
pub use af_expr as expr;
pub use af_frame as frame;
pub use af_index as index;
pub use af_io as io;
pub use af_runtime::{DecisionAction, EvidenceLedger, RuntimeMode, RuntimePolicy};
pub use af_types as types;

#[cfg(test)]
mod tests {
    use super::columnar::Column;
    use super::frame::DataFrame;
    use super::types::Scalar;
    use super::{CodeMap, Dataset, DisplayValue, Pipeline, Reply, RuntimePolicy};

    #[test]
    fn facade_runs_a_query_end_to_end() {
        let frame = DataFrame::from_columns(vec![
            (
                "customer_state".to_owned(),
                Column::from_values(vec!["MG".into(), "SP".into()]).expect("states"),
            ),
            (
                "payment_value".to_owned(),
                Column::from_values(vec![Scalar::Float64(7.0), Scalar::Float64(3.0)])
                    .expect("payments"),
            ),
        ])
        .expect("frame");
        let pipeline = Pipeline::new(
            Dataset::from_frame(frame),
            RuntimePolicy::default(),
            CodeMap::default(),
        );
        let answer = pipeline.run("df.groupby('customer_state')['payment_value'].sum().idxmax()");
        assert_eq!(
            answer.reply,
            Reply::Answered(DisplayValue::Text("Minas Gerais".into()))
        );
    }
}
