use std::path::Path;
use std::sync::Arc;

use af_frame::DataFrame;
use af_io::{DatasetSchema, read_csv_path};

use crate::EngineError;

/// The immutable table every query runs against. Cloning shares the
/// underlying frame.
#[derive(Debug, Clone)]
pub struct Dataset {
    frame: Arc<DataFrame>,
}

impl Dataset {
    /// Load one CSV file, validating it against `schema`.
    pub fn load(path: impl AsRef<Path>, schema: &DatasetSchema) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let frame = read_csv_path(path, schema).map_err(|source| EngineError::DatasetLoad {
            path: path.to_path_buf(),
            source,
        })?;
        #[cfg(feature = "tracing")]
        tracing::info!(
            path = %path.display(),
            rows = frame.len(),
            columns = frame.column_names().len(),
            "dataset loaded"
        );
        Ok(Self::from_frame(frame))
    }

    #[must_use]
    pub fn from_frame(frame: DataFrame) -> Self {
        Self {
            frame: Arc::new(frame),
        }
    }

    #[must_use]
    pub fn frame(&self) -> &Arc<DataFrame> {
        &self.frame
    }

    /// A handle for one evaluation. Evaluation never mutates it, so sharing
    /// the allocation is the snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<DataFrame> {
        Arc::clone(&self.frame)
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        self.frame.column_names()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use af_io::{DatasetSchema, IoError};

    use super::Dataset;
    use crate::EngineError;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn dataset_is_shareable_across_threads() {
        assert_send_sync::<Dataset>();
    }

    #[test]
    fn load_reports_schema_errors_with_the_path() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "order_id,payment_value").expect("write");
        writeln!(file, "o1,10").expect("write");
        let err = Dataset::load(file.path(), &DatasetSchema::olist()).expect_err("schema");
        assert!(matches!(
            err,
            EngineError::DatasetLoad {
                source: IoError::MissingColumns(_),
                ..
            }
        ));
        assert!(err.to_string().contains("missing required column(s)"));
    }

    #[test]
    fn snapshots_share_the_frame() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "a,b\n1,x\n2,y").expect("write");
        let dataset = Dataset::load(file.path(), &DatasetSchema::permissive()).expect("load");
        let snapshot = dataset.snapshot();
        assert!(std::sync::Arc::ptr_eq(&snapshot, dataset.frame()));
        assert_eq!(dataset.columns(), ["a", "b"]);
        assert_eq!(dataset.len(), 2);
    }
}
