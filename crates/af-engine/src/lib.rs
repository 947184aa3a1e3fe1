#![forbid(unsafe_code)]

//! The askframe query pipeline: untrusted expression text in, a display
//! value or a classified failure out.

use std::path::PathBuf;

use af_columnar::ColumnError;
use af_io::IoError;
use thiserror::Error;

mod dataset;
pub mod generator;
pub mod kpi;
pub mod normalize;
mod pipeline;
pub mod repair;
pub mod sandbox;
pub mod sanitize;

pub use af_io::{ColumnKind, DatasetSchema, RequiredColumn};
pub use dataset::Dataset;
pub use generator::{ExpressionGenerator, GeneratorError, build_prompt};
pub use kpi::{Kpis, compute_kpis};
pub use normalize::{CodeMap, DisplayValue, normalize};
pub use pipeline::{Answer, Pipeline, PipelineConfig, Reply};
pub use repair::{QueryPlan, repair};
pub use sandbox::{EvaluationOutcome, Failure, FailureKind, QueryValue, evaluate};
pub use sanitize::sanitize;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load dataset {}: {source}", .path.display())]
    DatasetLoad {
        path: PathBuf,
        #[source]
        source: IoError,
    },
    #[error("no dataset path configured")]
    MissingDatasetPath,
    #[error("failed to read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pipeline config: {0}")]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}
