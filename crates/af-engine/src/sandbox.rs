use std::sync::Arc;

use af_expr::{ExprError, Value, evaluate as evaluate_expr, parse_expr};
use af_frame::{DataFrame, Series};
use af_index::Index;
use af_runtime::{EvalBudget, EvidenceLedger, RuntimePolicy};
use af_types::Scalar;
use serde::{Deserialize, Serialize};

use crate::Dataset;

/// A successful evaluation, wrapped by shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryValue {
    Scalar(Scalar),
    Series(Series),
    Table(DataFrame),
    /// Success with nothing to show; carries the message for the user.
    EmptyResult(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An extremum was selected from an empty or all-missing collection.
    /// The only failure the repair pass handles.
    ExtremumOnEmpty,
    GeneralRuntimeError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub sandbox_violation: bool,
}

impl Failure {
    #[must_use]
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::GeneralRuntimeError,
            message: message.into(),
            sandbox_violation: false,
        }
    }

    #[must_use]
    pub fn render_plain(&self) -> String {
        if self.sandbox_violation {
            format!("Disallowed operation: {}", self.message)
        } else {
            format!("Could not compute: {}", self.message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    Success(QueryValue),
    Failure(Failure),
}

impl EvaluationOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure.kind),
        }
    }
}

/// Evaluate untrusted expression text against the dataset. Every error is
/// caught and classified; nothing propagates to the caller.
#[must_use]
pub fn evaluate(expression: &str, dataset: &Dataset, policy: &RuntimePolicy) -> EvaluationOutcome {
    evaluate_with_ledger(expression, dataset, policy, &mut EvidenceLedger::new())
}

/// Like [`evaluate`], recording sandbox and budget rejections in `ledger`.
pub fn evaluate_with_ledger(
    expression: &str,
    dataset: &Dataset,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> EvaluationOutcome {
    let snapshot = dataset.snapshot();
    let mut budget = EvalBudget::from_policy(policy);
    let result = parse_expr(expression)
        .and_then(|expr| evaluate_expr(&expr, &snapshot, &mut budget))
        .and_then(wrap_value);
    match result {
        Ok(value) => EvaluationOutcome::Success(value),
        Err(error) => {
            let failure = classify(expression, &error, policy, ledger);
            #[cfg(feature = "tracing")]
            tracing::warn!(
                kind = ?failure.kind,
                sandbox_violation = failure.sandbox_violation,
                message = %failure.message,
                "evaluation failed"
            );
            EvaluationOutcome::Failure(failure)
        }
    }
}

/// Sandbox violations first, then budget exhaustion, then the extremum
/// markers. Anything else keeps its message verbatim.
pub(crate) fn classify(
    expression: &str,
    error: &ExprError,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> Failure {
    let message = error.to_string();
    if error.is_sandbox_violation() {
        policy.decide_sandbox_violation("sandbox", message.clone(), ledger);
        return Failure {
            kind: FailureKind::GeneralRuntimeError,
            message,
            sandbox_violation: true,
        };
    }
    if error.is_budget_exhausted() {
        policy.decide_budget_exhausted("budget", expression, ledger);
        return Failure::general(message);
    }
    if error.is_argmax_on_empty() || has_extremum_marker(expression, &message) {
        return Failure {
            kind: FailureKind::ExtremumOnEmpty,
            message,
            sandbox_violation: false,
        };
    }
    Failure::general(message)
}

fn has_extremum_marker(expression: &str, message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("idxmax")
        || lowered.contains("argmax")
        || expression.trim_end().ends_with(".idxmax()")
}

/// Map an interpreter value onto the outcome shapes. Indexes become series
/// of their labels; lists of scalars become range-indexed series.
pub(crate) fn wrap_value(value: Value) -> Result<QueryValue, ExprError> {
    match value {
        Value::Scalar(scalar) => Ok(QueryValue::Scalar(scalar)),
        Value::Series(series) => Ok(QueryValue::Series(series)),
        Value::Frame(frame) => Ok(QueryValue::Table(Arc::unwrap_or_clone(frame))),
        Value::Index(index) => Ok(QueryValue::Series(Series::from_index(&index)?)),
        Value::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Scalar(scalar) => values.push(scalar),
                    other => {
                        return Err(ExprError::TypeMismatch(format!(
                            "expression produced a list containing {}",
                            other.type_name()
                        )));
                    }
                }
            }
            let labels = Index::range(values.len()).labels().to_vec();
            Ok(QueryValue::Series(Series::from_values("", labels, values)?))
        }
        other => Err(ExprError::TypeMismatch(format!(
            "expression produced {}, not a value",
            other.type_name()
        ))),
    }
}
