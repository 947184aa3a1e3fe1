use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use af_io::DatasetSchema;
use af_runtime::{EvidenceLedger, RuntimePolicy};
use serde::{Deserialize, Serialize};

use crate::generator::{ExpressionGenerator, GeneratorError, build_prompt};
use crate::kpi::{Kpis, compute_kpis};
use crate::normalize::{CodeMap, DisplayValue, normalize};
use crate::repair::attempt_repair;
use crate::sandbox::{EvaluationOutcome, Failure, FailureKind, evaluate_with_ledger};
use crate::sanitize::sanitize;
use crate::{Dataset, EngineError};

/// Host settings, loadable from JSON. Every field is optional in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset_path: Option<PathBuf>,
    pub policy: RuntimePolicy,
    pub code_map_overrides: BTreeMap<String, String>,
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    #[must_use]
    pub fn code_map(&self) -> CodeMap {
        CodeMap::default().with_overrides(self.code_map_overrides.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum Reply {
    Answered(DisplayValue),
    Failed(Failure),
}

impl Reply {
    #[must_use]
    pub fn render_plain(&self) -> String {
        match self {
            Self::Answered(display) => display.render_plain(),
            Self::Failed(failure) => failure.render_plain(),
        }
    }
}

/// One answered question: the expression that ran, what it produced and
/// the decisions taken on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub expression: String,
    pub reply: Reply,
    /// Whether the repair pass ran, successful or not.
    pub repair_attempted: bool,
    pub ledger: EvidenceLedger,
}

/// sanitize, evaluate, repair and normalize over one shared dataset.
/// Holds no per-query state, so one pipeline serves many threads.
#[derive(Debug, Clone)]
pub struct Pipeline {
    dataset: Dataset,
    policy: RuntimePolicy,
    code_map: CodeMap,
}

impl Pipeline {
    #[must_use]
    pub fn new(dataset: Dataset, policy: RuntimePolicy, code_map: CodeMap) -> Self {
        Self {
            dataset,
            policy,
            code_map,
        }
    }

    /// Load the configured dataset against the Olist schema.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, EngineError> {
        let path = config
            .dataset_path
            .as_deref()
            .ok_or(EngineError::MissingDatasetPath)?;
        let dataset = Dataset::load(path, &DatasetSchema::olist())?;
        Ok(Self::new(dataset, config.policy.clone(), config.code_map()))
    }

    #[must_use]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    #[must_use]
    pub fn policy(&self) -> &RuntimePolicy {
        &self.policy
    }

    #[must_use]
    pub fn code_map(&self) -> &CodeMap {
        &self.code_map
    }

    pub fn kpis(&self) -> Result<Kpis, EngineError> {
        Ok(compute_kpis(self.dataset.frame())?)
    }

    #[must_use]
    pub fn prompt(&self, question: &str) -> String {
        build_prompt(question, self.dataset.columns())
    }

    /// Generate an expression for `question`, then run it.
    pub fn ask(
        &self,
        question: &str,
        generator: &dyn ExpressionGenerator,
    ) -> Result<Answer, EngineError> {
        let raw = generator.generate(&self.prompt(question))?;
        if sanitize(&raw).is_empty() {
            return Err(GeneratorError::Empty.into());
        }
        Ok(self.run(&raw))
    }

    /// Run raw expression text through the whole pipeline. Never fails:
    /// every error is a [`Reply::Failed`].
    #[must_use]
    pub fn run(&self, raw: &str) -> Answer {
        let expression = sanitize(raw);
        let mut ledger = EvidenceLedger::new();
        let (outcome, repair_attempted) = self.execute(&expression, &mut ledger);
        let reply = match outcome {
            EvaluationOutcome::Success(value) => {
                Reply::Answered(normalize(value, &self.code_map))
            }
            EvaluationOutcome::Failure(failure) => Reply::Failed(failure),
        };
        Answer {
            expression,
            reply,
            repair_attempted,
            ledger,
        }
    }

    /// Evaluate, and repair an `ExtremumOnEmpty` failure at most once.
    fn execute(
        &self,
        expression: &str,
        ledger: &mut EvidenceLedger,
    ) -> (EvaluationOutcome, bool) {
        let outcome = evaluate_with_ledger(expression, &self.dataset, &self.policy, ledger);
        if outcome.failure_kind() != Some(FailureKind::ExtremumOnEmpty) {
            return (outcome, false);
        }
        match attempt_repair(expression, &self.dataset, &self.policy, ledger) {
            Some(repaired) => (repaired, true),
            None => (outcome, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use af_runtime::{RuntimeMode, RuntimePolicy};

    use super::{Pipeline, PipelineConfig, Reply};
    use crate::{DisplayValue, EngineError, Failure};

    #[test]
    fn config_fields_default_when_absent() {
        let config = PipelineConfig::from_json_str("{}").expect("config");
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.policy.mode, RuntimeMode::Hardened);
        assert_eq!(config.code_map().display_name("SP"), Some("São Paulo"));
    }

    #[test]
    fn config_reads_policy_and_overrides() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "dataset_path": "data/olist.csv",
                "policy": {"mode": "strict", "eval_timeout_ms": 250, "max_eval_steps": null},
                "code_map_overrides": {"SP": "Sampa"}
            }"#,
        )
        .expect("config");
        assert_eq!(config.dataset_path.as_deref(), Some("data/olist.csv".as_ref()));
        assert_eq!(
            config.policy,
            RuntimePolicy::strict().with_timeout_ms(Some(250)).with_max_steps(None)
        );
        assert_eq!(config.code_map().display_name("SP"), Some("Sampa"));
        assert_eq!(config.code_map().display_name("RJ"), Some("Rio de Janeiro"));
    }

    #[test]
    fn config_errors_are_typed() {
        assert!(matches!(
            PipelineConfig::from_json_str("{\"policy\": 3}"),
            Err(EngineError::Config(_))
        ));
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            PipelineConfig::load(dir.path().join("absent.json")),
            Err(EngineError::ConfigRead { .. })
        ));
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "{{\"dataset_path\": \"x.csv\"}}").expect("write");
        let loaded = PipelineConfig::load(file.path()).expect("load");
        assert_eq!(loaded.dataset_path.as_deref(), Some("x.csv".as_ref()));
    }

    #[test]
    fn pipeline_without_dataset_path_is_rejected() {
        let err = Pipeline::from_config(&PipelineConfig::default()).expect_err("path");
        assert!(matches!(err, EngineError::MissingDatasetPath));
    }

    #[test]
    fn replies_render_with_prefixes() {
        let failed = Reply::Failed(Failure::general("boom"));
        assert_eq!(failed.render_plain(), "Could not compute: boom");
        let answered = Reply::Answered(DisplayValue::Text("São Paulo".into()));
        assert_eq!(answered.render_plain(), "São Paulo");
    }
}
