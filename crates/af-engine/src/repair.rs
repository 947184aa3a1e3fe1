use af_expr::{EXTREMUM_METHODS, Expr, Value, evaluate as evaluate_expr, parse_expr};
use af_frame::{DataFrame, FrameError, Series};
use af_runtime::{DecisionAction, EvalBudget, EvidenceLedger, RuntimePolicy};
use serde::{Deserialize, Serialize};

use crate::Dataset;
use crate::sandbox::{EvaluationOutcome, Failure, FailureKind, QueryValue};

pub const EMPTY_SERIES_MESSAGE: &str =
    "No data found for that period: the filtered series is empty.";
pub const NO_NUMERIC_MESSAGE: &str =
    "No numeric data found in the result to determine the top category.";

/// An `.idxmax()` query split into the whole query and the collection the
/// extremum is taken over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub full: Expr,
    pub reduced: Expr,
}

impl QueryPlan {
    /// Only an outermost zero-argument `.idxmax()` over a receiver with no
    /// extremum calls of its own is repairable.
    pub fn decompose(full: &Expr) -> Result<Self, String> {
        let Some(reduced) = full.zero_arg_method_receiver("idxmax") else {
            return Err("idxmax() is not the outermost operation".to_owned());
        };
        if reduced.calls_any(&EXTREMUM_METHODS) {
            return Err("nested extremum calls cannot be repaired".to_owned());
        }
        Ok(Self {
            full: full.clone(),
            reduced: reduced.clone(),
        })
    }

    pub fn parse(expression: &str) -> Result<Self, String> {
        let full = parse_expr(expression).map_err(|error| error.to_string())?;
        Self::decompose(&full)
    }
}

/// Run the repair pass for an `ExtremumOnEmpty` failure. Under a strict
/// policy the pass is declined and the failure is reported unrepaired.
#[must_use]
pub fn repair(expression: &str, dataset: &Dataset, policy: &RuntimePolicy) -> EvaluationOutcome {
    repair_with_ledger(expression, dataset, policy, &mut EvidenceLedger::new())
}

pub fn repair_with_ledger(
    expression: &str,
    dataset: &Dataset,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> EvaluationOutcome {
    attempt_repair(expression, dataset, policy, ledger).unwrap_or_else(|| {
        EvaluationOutcome::Failure(Failure {
            kind: FailureKind::ExtremumOnEmpty,
            message: "repair declined by strict runtime policy".to_owned(),
            sandbox_violation: false,
        })
    })
}

/// `None` when the policy declines the repair.
pub(crate) fn attempt_repair(
    expression: &str,
    dataset: &Dataset,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> Option<EvaluationOutcome> {
    let decision = policy.decide_repair("idxmax", expression, ledger);
    #[cfg(feature = "tracing")]
    tracing::info!(?decision, expression, "extremum repair decision");
    if decision != DecisionAction::Repair {
        return None;
    }

    let outcome = match repair_pass(expression, dataset, policy) {
        Ok(value) => EvaluationOutcome::Success(value),
        Err(message) => EvaluationOutcome::Failure(Failure::general(message)),
    };
    let detail = match &outcome {
        EvaluationOutcome::Success(QueryValue::EmptyResult(message)) => message.clone(),
        EvaluationOutcome::Success(_) => "selected top label".to_owned(),
        EvaluationOutcome::Failure(failure) => failure.message.clone(),
    };
    #[cfg(feature = "tracing")]
    {
        if outcome.is_success() {
            tracing::info!(detail = %detail, "repair succeeded");
        } else {
            tracing::warn!(detail = %detail, "repair failed");
        }
    }
    policy.record_repair_outcome(outcome.is_success(), detail, ledger);
    Some(outcome)
}

/// One non-recursive fallback evaluation of the reduced query.
fn repair_pass(
    expression: &str,
    dataset: &Dataset,
    policy: &RuntimePolicy,
) -> Result<QueryValue, String> {
    let plan = QueryPlan::parse(expression)
        .map_err(|reason| format!("Fallback not applicable: {reason}"))?;

    let snapshot = dataset.snapshot();
    let mut budget = EvalBudget::from_policy(policy);
    let reduced = evaluate_expr(&plan.reduced, &snapshot, &mut budget)
        .map_err(|error| format!("Error in fallback idxmax handling: {error}"))?;

    let selected = match reduced {
        Value::Series(series) => top_label(&series, EMPTY_SERIES_MESSAGE),
        Value::Frame(frame) => top_row_label(&frame),
        other => {
            return Err(format!(
                "Fallback failed: expression produced {}",
                other.type_name()
            ));
        }
    };
    selected.map_err(|error| format!("Error in fallback idxmax handling: {error}"))
}

/// Label of the largest present value; the first occurrence wins ties.
fn top_label(series: &Series, empty_message: &str) -> Result<QueryValue, FrameError> {
    if series.values().iter().all(|value| value.is_missing()) {
        return Ok(QueryValue::EmptyResult(empty_message.to_owned()));
    }
    Ok(QueryValue::Scalar(series.idxmax()?.to_scalar()))
}

fn top_row_label(frame: &DataFrame) -> Result<QueryValue, FrameError> {
    let numeric = frame.select_numeric()?;
    if numeric.column_names().is_empty() {
        return Ok(QueryValue::EmptyResult(NO_NUMERIC_MESSAGE.to_owned()));
    }
    top_label(&numeric.sum_rows()?, NO_NUMERIC_MESSAGE)
}

#[cfg(test)]
mod tests {
    use af_columnar::Column;
    use af_expr::parse_expr;
    use af_frame::{DataFrame, Series};
    use af_index::IndexLabel;
    use af_runtime::{DecisionAction, EvidenceLedger, IssueKind, RuntimePolicy};
    use af_types::Scalar;

    use super::{
        EMPTY_SERIES_MESSAGE, NO_NUMERIC_MESSAGE, QueryPlan, repair, repair_with_ledger, top_label,
    };
    use crate::Dataset;
    use crate::sandbox::{EvaluationOutcome, FailureKind, QueryValue};

    fn dataset() -> Dataset {
        let frame = DataFrame::from_columns(vec![
            (
                "label".to_owned(),
                Column::from_values(vec!["A".into(), "B".into(), "B".into()]).expect("label"),
            ),
            (
                "value".to_owned(),
                Column::from_values(vec![
                    Scalar::Int64(10),
                    Scalar::Int64(30),
                    Scalar::Int64(30),
                ])
                .expect("value"),
            ),
            (
                "kind".to_owned(),
                Column::from_values(vec!["x".into(), "y".into(), "z".into()]).expect("kind"),
            ),
        ])
        .expect("frame");
        Dataset::from_frame(frame)
    }

    fn general_message(outcome: EvaluationOutcome) -> String {
        match outcome {
            EvaluationOutcome::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::GeneralRuntimeError);
                failure.message
            }
            EvaluationOutcome::Success(value) => panic!("unexpected success: {value:?}"),
        }
    }

    #[test]
    fn plan_strips_the_outermost_idxmax() {
        let plan = QueryPlan::parse("df.groupby('label')['value'].sum().idxmax()").expect("plan");
        assert_eq!(
            plan.reduced,
            parse_expr("df.groupby('label')['value'].sum()").expect("reduced")
        );
        assert!(QueryPlan::parse("df['value'].idxmax() + 1").is_err());
        assert!(QueryPlan::parse("df.loc[df['value'].idxmax()].idxmax()").is_err());
        assert!(QueryPlan::parse("df['value'].idxmax(").is_err());
    }

    #[test]
    fn empty_series_becomes_empty_result() {
        let outcome = repair(
            "df[df['value'] > 100]['value'].idxmax()",
            &dataset(),
            &RuntimePolicy::default(),
        );
        assert_eq!(
            outcome,
            EvaluationOutcome::Success(QueryValue::EmptyResult(EMPTY_SERIES_MESSAGE.to_owned()))
        );
    }

    #[test]
    fn duplicate_maxima_pick_the_first_label() {
        let series = Series::from_values(
            "value",
            vec![
                IndexLabel::Utf8("A".into()),
                IndexLabel::Utf8("B".into()),
                IndexLabel::Utf8("B".into()),
            ],
            vec![Scalar::Int64(10), Scalar::Int64(30), Scalar::Int64(30)],
        )
        .expect("series");
        assert_eq!(
            top_label(&series, EMPTY_SERIES_MESSAGE).expect("top"),
            QueryValue::Scalar(Scalar::Utf8("B".into()))
        );

        let outcome = repair(
            "df.groupby('kind')['value'].sum().idxmax()",
            &dataset(),
            &RuntimePolicy::default(),
        );
        assert_eq!(
            outcome,
            EvaluationOutcome::Success(QueryValue::Scalar(Scalar::Utf8("y".into())))
        );
    }

    #[test]
    fn tables_are_summed_across_numeric_columns() {
        let outcome = repair(
            "df.groupby('label')[['value']].sum().idxmax()",
            &dataset(),
            &RuntimePolicy::default(),
        );
        assert_eq!(
            outcome,
            EvaluationOutcome::Success(QueryValue::Scalar(Scalar::Utf8("B".into())))
        );

        let outcome = repair(
            "df[['label', 'kind']].idxmax()",
            &dataset(),
            &RuntimePolicy::default(),
        );
        assert_eq!(
            outcome,
            EvaluationOutcome::Success(QueryValue::EmptyResult(NO_NUMERIC_MESSAGE.to_owned()))
        );
    }

    #[test]
    fn other_shapes_fail() {
        let outcome = repair("df['value'].sum().idxmax()", &dataset(), &RuntimePolicy::default());
        assert_eq!(general_message(outcome), "Fallback failed: expression produced int");
    }

    #[test]
    fn nested_extremum_is_not_repaired() {
        let outcome = repair(
            "df.loc[df['value'].idxmax()].idxmax()",
            &dataset(),
            &RuntimePolicy::default(),
        );
        assert_eq!(
            general_message(outcome),
            "Fallback not applicable: nested extremum calls cannot be repaired"
        );
    }

    #[test]
    fn strict_policy_declines_and_records() {
        let mut ledger = EvidenceLedger::new();
        let outcome = repair_with_ledger(
            "df[df['value'] > 100]['value'].idxmax()",
            &dataset(),
            &RuntimePolicy::strict(),
            &mut ledger,
        );
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ExtremumOnEmpty));
        assert_eq!(ledger.records().len(), 1);
        assert_eq!(ledger.count(DecisionAction::Reject), 1);
    }

    #[test]
    fn hardened_policy_records_decision_and_outcome() {
        let mut ledger = EvidenceLedger::new();
        let outcome = repair_with_ledger(
            "df[df['value'] > 100]['value'].idxmax()",
            &dataset(),
            &RuntimePolicy::default(),
            &mut ledger,
        );
        assert!(outcome.is_success());
        let kinds = ledger
            .records()
            .iter()
            .map(|record| (record.issue.kind, record.action))
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [
                (IssueKind::ExtremumOnEmpty, DecisionAction::Repair),
                (IssueKind::RepairOutcome, DecisionAction::Allow),
            ]
        );
    }
}
