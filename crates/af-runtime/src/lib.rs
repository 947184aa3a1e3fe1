#![forbid(unsafe_code)]

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_EVAL_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_EVAL_STEPS: u64 = 50_000_000;

/// Deadline checks are amortized over this many charges.
const CLOCK_CHECK_INTERVAL: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    Strict,
    Hardened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Allow,
    Reject,
    Repair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    SandboxViolation,
    ExtremumOnEmpty,
    BudgetExhausted,
    RepairOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityIssue {
    pub kind: IssueKind,
    pub subject: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub ts_unix_ms: u64,
    pub mode: RuntimeMode,
    pub action: DecisionAction,
    pub issue: CompatibilityIssue,
}

impl DecisionRecord {
    #[must_use]
    pub fn render_plain(&self) -> String {
        format!(
            "[{:?}] {}::{:?} {}",
            self.mode, self.issue.subject, self.action, self.issue.detail
        )
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceLedger {
    records: Vec<DecisionRecord>,
}

impl EvidenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: DecisionRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    #[must_use]
    pub fn last(&self) -> Option<&DecisionRecord> {
        self.records.last()
    }

    #[must_use]
    pub fn count(&self, action: DecisionAction) -> usize {
        self.records
            .iter()
            .filter(|record| record.action == action)
            .count()
    }
}

fn default_mode() -> RuntimeMode {
    RuntimeMode::Hardened
}

fn default_timeout() -> Option<u64> {
    Some(DEFAULT_EVAL_TIMEOUT_MS)
}

fn default_steps() -> Option<u64> {
    Some(DEFAULT_MAX_EVAL_STEPS)
}

/// How the engine treats recoverable failures, and the resource ceiling of
/// one evaluation. `None` limits are unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimePolicy {
    #[serde(default = "default_mode")]
    pub mode: RuntimeMode,
    #[serde(default = "default_timeout")]
    pub eval_timeout_ms: Option<u64>,
    #[serde(default = "default_steps")]
    pub max_eval_steps: Option<u64>,
}

impl RuntimePolicy {
    /// Fail closed: recoverable failures are reported, never repaired.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            mode: RuntimeMode::Strict,
            eval_timeout_ms: default_timeout(),
            max_eval_steps: default_steps(),
        }
    }

    #[must_use]
    pub fn hardened(max_eval_steps: Option<u64>) -> Self {
        Self {
            mode: RuntimeMode::Hardened,
            eval_timeout_ms: default_timeout(),
            max_eval_steps,
        }
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.eval_timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_eval_steps: Option<u64>) -> Self {
        self.max_eval_steps = max_eval_steps;
        self
    }

    fn record(
        &self,
        kind: IssueKind,
        action: DecisionAction,
        subject: String,
        detail: String,
        ledger: &mut EvidenceLedger,
    ) -> DecisionAction {
        ledger.push(DecisionRecord {
            ts_unix_ms: now_unix_ms().unwrap_or_default(),
            mode: self.mode,
            action,
            issue: CompatibilityIssue {
                kind,
                subject,
                detail,
            },
        });
        action
    }

    /// Whether an extremum-on-empty failure may be repaired.
    pub fn decide_repair(
        &self,
        subject: impl Into<String>,
        detail: impl Into<String>,
        ledger: &mut EvidenceLedger,
    ) -> DecisionAction {
        let action = match self.mode {
            RuntimeMode::Strict => DecisionAction::Reject,
            RuntimeMode::Hardened => DecisionAction::Repair,
        };
        self.record(
            IssueKind::ExtremumOnEmpty,
            action,
            subject.into(),
            detail.into(),
            ledger,
        )
    }

    /// Sandbox violations are rejected in every mode.
    pub fn decide_sandbox_violation(
        &self,
        subject: impl Into<String>,
        detail: impl Into<String>,
        ledger: &mut EvidenceLedger,
    ) -> DecisionAction {
        self.record(
            IssueKind::SandboxViolation,
            DecisionAction::Reject,
            subject.into(),
            detail.into(),
            ledger,
        )
    }

    pub fn decide_budget_exhausted(
        &self,
        subject: impl Into<String>,
        detail: impl Into<String>,
        ledger: &mut EvidenceLedger,
    ) -> DecisionAction {
        self.record(
            IssueKind::BudgetExhausted,
            DecisionAction::Reject,
            subject.into(),
            detail.into(),
            ledger,
        )
    }

    /// Record how a repair pass ended: `Allow` when it produced a value.
    pub fn record_repair_outcome(
        &self,
        succeeded: bool,
        detail: impl Into<String>,
        ledger: &mut EvidenceLedger,
    ) -> DecisionAction {
        let action = if succeeded {
            DecisionAction::Allow
        } else {
            DecisionAction::Reject
        };
        self.record(
            IssueKind::RepairOutcome,
            action,
            "repair".to_owned(),
            detail.into(),
            ledger,
        )
    }
}

impl Default for RuntimePolicy {
    fn default() -> Self {
        Self::hardened(default_steps())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("system clock is before UNIX_EPOCH")]
    ClockSkew,
    #[error("evaluation budget exhausted")]
    BudgetExhausted,
}

fn now_unix_ms() -> Result<u64, RuntimeError> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::ClockSkew)?
        .as_millis();
    Ok(u64::try_from(ms).unwrap_or(u64::MAX))
}

/// Cooperative cutoff for one evaluation: a step cap and a wall-clock
/// deadline, both optional.
#[derive(Debug, Clone)]
pub struct EvalBudget {
    deadline: Option<Instant>,
    max_steps: Option<u64>,
    steps: u64,
    next_clock_check: u64,
}

impl EvalBudget {
    #[must_use]
    pub fn from_policy(policy: &RuntimePolicy) -> Self {
        Self {
            deadline: policy
                .eval_timeout_ms
                .map(|ms| Instant::now() + Duration::from_millis(ms)),
            max_steps: policy.max_eval_steps,
            steps: 0,
            next_clock_check: 0,
        }
    }

    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            deadline: None,
            max_steps: None,
            steps: 0,
            next_clock_check: 0,
        }
    }

    #[must_use]
    pub fn steps_used(&self) -> u64 {
        self.steps
    }

    pub fn charge(&mut self, steps: u64) -> Result<(), RuntimeError> {
        self.steps = self.steps.saturating_add(steps);
        if self.max_steps.is_some_and(|cap| self.steps > cap) {
            return Err(RuntimeError::BudgetExhausted);
        }
        let Some(deadline) = self.deadline else {
            return Ok(());
        };
        if self.steps >= self.next_clock_check {
            self.next_clock_check = self.steps.saturating_add(CLOCK_CHECK_INTERVAL);
            if Instant::now() >= deadline {
                return Err(RuntimeError::BudgetExhausted);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DecisionAction, EvalBudget, EvidenceLedger, IssueKind, RuntimeError, RuntimeMode,
        RuntimePolicy,
    };

    #[test]
    fn strict_mode_fails_closed_for_repairs() {
        let mut ledger = EvidenceLedger::new();
        let policy = RuntimePolicy::strict();

        let action = policy.decide_repair("idxmax", "empty series", &mut ledger);
        assert_eq!(action, DecisionAction::Reject);
        assert_eq!(ledger.records()[0].mode, RuntimeMode::Strict);
        assert_eq!(ledger.records()[0].issue.kind, IssueKind::ExtremumOnEmpty);
    }

    #[test]
    fn hardened_mode_repairs_extremum_failures() {
        let mut ledger = EvidenceLedger::new();
        let policy = RuntimePolicy::default();
        assert_eq!(policy.mode, RuntimeMode::Hardened);

        let action = policy.decide_repair("idxmax", "empty series", &mut ledger);
        assert_eq!(action, DecisionAction::Repair);
        assert_eq!(ledger.count(DecisionAction::Repair), 1);
    }

    #[test]
    fn sandbox_violations_are_rejected_in_every_mode() {
        let mut ledger = EvidenceLedger::new();
        RuntimePolicy::default().decide_sandbox_violation("open", "name", &mut ledger);
        RuntimePolicy::strict().decide_sandbox_violation("open", "name", &mut ledger);
        assert_eq!(ledger.count(DecisionAction::Reject), 2);
        let rendered = ledger.last().expect("record").render_plain();
        assert!(rendered.contains("open::Reject"));
    }

    #[test]
    fn step_budget_cuts_off() {
        let mut budget = EvalBudget::from_policy(&RuntimePolicy::hardened(Some(10)).with_timeout_ms(None));
        budget.charge(6).expect("within budget");
        assert_eq!(budget.charge(6), Err(RuntimeError::BudgetExhausted));
        assert_eq!(budget.steps_used(), 12);
    }

    #[test]
    fn zero_timeout_expires_immediately() {
        let policy = RuntimePolicy::hardened(None).with_timeout_ms(Some(0));
        let mut budget = EvalBudget::from_policy(&policy);
        assert_eq!(budget.charge(1), Err(RuntimeError::BudgetExhausted));
    }

    #[test]
    fn unlimited_budget_never_trips() {
        let mut budget = EvalBudget::unlimited();
        budget.charge(u64::MAX).expect("unbounded");
        budget.charge(1).expect("saturates");
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: RuntimePolicy =
            serde_json::from_str(r#"{"mode":"strict"}"#).expect("policy json");
        assert_eq!(policy.mode, RuntimeMode::Strict);
        assert_eq!(policy.eval_timeout_ms, Some(super::DEFAULT_EVAL_TIMEOUT_MS));

        let unbounded: RuntimePolicy =
            serde_json::from_str(r#"{"max_eval_steps":null}"#).expect("policy json");
        assert_eq!(unbounded.mode, RuntimeMode::Hardened);
        assert_eq!(unbounded.max_eval_steps, None);
    }
}
