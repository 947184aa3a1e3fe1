#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use af_columnar::{ColumnError, ComparisonOp};
use af_frame::{DataFrame, FrameError};
use af_groupby::GroupByError;
use af_index::IndexError;
use af_runtime::{EvalBudget, RuntimeError};
use af_types::{NullKind, Scalar, TypeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod eval;
mod parse;

pub use eval::{Accessor, DateOffset, GroupedValue, Indexer, Namespace, Value, evaluate};
pub use parse::{MAX_DEPTH, MAX_NESTING, MAX_TOKENS, parse_expr};

/// The methods that select the label or position of an extremum.
pub const EXTREMUM_METHODS: [&str; 4] = ["idxmax", "idxmin", "argmax", "argmin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
}

impl BinaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::BitAnd => "&",
            Self::BitOr => "|",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptItem {
    Index {
        expr: Expr,
    },
    Slice {
        start: Option<Expr>,
        stop: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Literal {
        value: Scalar,
    },
    Name {
        name: String,
    },
    List {
        items: Vec<Expr>,
    },
    Attribute {
        object: Box<Expr>,
        attr: String,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<Keyword>,
    },
    Subscript {
        object: Box<Expr>,
        items: Vec<SubscriptItem>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        left: Box<Expr>,
        right: Box<Expr>,
        op: ComparisonOp,
    },
    And {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Or {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not {
        expr: Box<Expr>,
    },
    Neg {
        expr: Box<Expr>,
    },
    Invert {
        expr: Box<Expr>,
    },
}

impl Expr {
    /// Receiver of the outermost call when it is `<receiver>.<method>()`
    /// with no arguments.
    #[must_use]
    pub fn zero_arg_method_receiver(&self, method: &str) -> Option<&Expr> {
        let Self::Call { func, args, kwargs } = self else {
            return None;
        };
        if !args.is_empty() || !kwargs.is_empty() {
            return None;
        }
        match func.as_ref() {
            Self::Attribute { object, attr } if attr == method => Some(object),
            _ => None,
        }
    }

    /// Direct subexpressions, in source order.
    #[must_use]
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Literal { .. } | Self::Name { .. } => Vec::new(),
            Self::List { items } => items.iter().collect(),
            Self::Attribute { object, .. } => vec![object.as_ref()],
            Self::Call { func, args, kwargs } => std::iter::once(func.as_ref())
                .chain(args.iter())
                .chain(kwargs.iter().map(|kw| &kw.value))
                .collect(),
            Self::Subscript { object, items } => {
                let mut children = vec![object.as_ref()];
                for item in items {
                    match item {
                        SubscriptItem::Index { expr } => children.push(expr),
                        SubscriptItem::Slice { start, stop } => {
                            children.extend(start.iter().chain(stop.iter()));
                        }
                    }
                }
                children
            }
            Self::Binary { left, right, .. }
            | Self::Compare { left, right, .. }
            | Self::And { left, right }
            | Self::Or { left, right } => vec![left.as_ref(), right.as_ref()],
            Self::Not { expr } | Self::Neg { expr } | Self::Invert { expr } => vec![expr.as_ref()],
        }
    }

    /// Nodes on the longest root-to-leaf path. Walks with an explicit stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1_usize)];
        while let Some((expr, depth)) = pending.pop() {
            deepest = deepest.max(depth);
            pending.extend(expr.children().into_iter().map(|child| (child, depth + 1)));
        }
        deepest
    }

    /// Whether any call anywhere in the tree invokes one of `methods`.
    #[must_use]
    pub fn calls_any(&self, methods: &[&str]) -> bool {
        match self {
            Self::Literal { .. } | Self::Name { .. } => false,
            Self::List { items } => items.iter().any(|item| item.calls_any(methods)),
            Self::Attribute { object, .. } => object.calls_any(methods),
            Self::Call { func, args, kwargs } => {
                let direct = matches!(
                    func.as_ref(),
                    Self::Attribute { attr, .. } if methods.contains(&attr.as_str())
                );
                direct
                    || func.calls_any(methods)
                    || args.iter().any(|arg| arg.calls_any(methods))
                    || kwargs.iter().any(|kw| kw.value.calls_any(methods))
            }
            Self::Subscript { object, items } => {
                object.calls_any(methods)
                    || items.iter().any(|item| match item {
                        SubscriptItem::Index { expr } => expr.calls_any(methods),
                        SubscriptItem::Slice { start, stop } => {
                            start.as_ref().is_some_and(|e| e.calls_any(methods))
                                || stop.as_ref().is_some_and(|e| e.calls_any(methods))
                        }
                    })
            }
            Self::Binary { left, right, .. }
            | Self::Compare { left, right, .. }
            | Self::And { left, right }
            | Self::Or { left, right } => left.calls_any(methods) || right.calls_any(methods),
            Self::Not { expr } | Self::Neg { expr } | Self::Invert { expr } => {
                expr.calls_any(methods)
            }
        }
    }
}

fn write_literal(f: &mut fmt::Formatter<'_>, value: &Scalar) -> fmt::Result {
    match value {
        Scalar::Null(NullKind::Null) => f.write_str("None"),
        Scalar::Null(NullKind::NaN) => f.write_str("np.nan"),
        Scalar::Null(NullKind::NaT) => f.write_str("pd.NaT"),
        Scalar::Bool(true) => f.write_str("True"),
        Scalar::Bool(false) => f.write_str("False"),
        Scalar::Utf8(text) => write!(f, "{text:?}"),
        Scalar::Float64(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{v:.1}"),
        other => write!(f, "{other}"),
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::Literal { .. }
        | Expr::Name { .. }
        | Expr::List { .. }
        | Expr::Attribute { .. }
        | Expr::Call { .. }
        | Expr::Subscript { .. } => write!(f, "{expr}"),
        _ => write!(f, "({expr})"),
    }
}

/// Renders the tree back into expression text that parses to the same tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { value } => write_literal(f, value),
            Self::Name { name } => f.write_str(name),
            Self::List { items } => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Attribute { object, attr } => {
                write_operand(f, object)?;
                write!(f, ".{attr}")
            }
            Self::Call { func, args, kwargs } => {
                write_operand(f, func)?;
                f.write_str("(")?;
                let mut first = true;
                for arg in args {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{arg}")?;
                }
                for kw in kwargs {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{}={}", kw.name, kw.value)?;
                }
                f.write_str(")")
            }
            Self::Subscript { object, items } => {
                write_operand(f, object)?;
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        SubscriptItem::Index { expr } => write!(f, "{expr}")?,
                        SubscriptItem::Slice { start, stop } => {
                            if let Some(start) = start {
                                write!(f, "{start}")?;
                            }
                            f.write_str(":")?;
                            if let Some(stop) = stop {
                                write!(f, "{stop}")?;
                            }
                        }
                    }
                }
                f.write_str("]")
            }
            Self::Binary { op, left, right } => {
                write_operand(f, left)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right)
            }
            Self::Compare { left, right, op } => {
                write_operand(f, left)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right)
            }
            Self::And { left, right } => {
                write_operand(f, left)?;
                f.write_str(" and ")?;
                write_operand(f, right)
            }
            Self::Or { left, right } => {
                write_operand(f, left)?;
                f.write_str(" or ")?;
                write_operand(f, right)
            }
            Self::Not { expr } => {
                f.write_str("not ")?;
                write_operand(f, expr)
            }
            Self::Neg { expr } => {
                f.write_str("-")?;
                write_operand(f, expr)
            }
            Self::Invert { expr } => {
                f.write_str("~")?;
                write_operand(f, expr)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("name '{0}' is not defined")]
    UnknownName(String),
    #[error("disallowed operation: '{owner}.{attr}'")]
    DisallowedAttribute { owner: String, attr: String },
    #[error("disallowed operation: '{0}' object is not callable")]
    NotCallable(String),
    #[error("{0}")]
    TypeMismatch(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("expression nested too deeply")]
    TooDeep,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    GroupBy(#[from] GroupByError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl From<ColumnError> for ExprError {
    fn from(value: ColumnError) -> Self {
        Self::Frame(FrameError::Column(value))
    }
}

impl From<IndexError> for ExprError {
    fn from(value: IndexError) -> Self {
        Self::Frame(FrameError::Index(value))
    }
}

impl From<TypeError> for ExprError {
    fn from(value: TypeError) -> Self {
        Self::Frame(FrameError::from(value))
    }
}

impl ExprError {
    /// Name lookups and attribute or call access outside the closed surface.
    #[must_use]
    pub fn is_sandbox_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownName(_) | Self::DisallowedAttribute { .. } | Self::NotCallable(_)
        )
    }

    /// The typed failure of `idxmax`/`argmax` on a collection with nothing
    /// to select. The minimum variants are ordinary errors.
    #[must_use]
    pub fn is_argmax_on_empty(&self) -> bool {
        matches!(
            self,
            Self::Frame(FrameError::ExtremumOnEmpty { op: "argmax" })
                | Self::GroupBy(GroupByError::Frame(FrameError::ExtremumOnEmpty { op: "argmax" }))
        )
    }

    #[must_use]
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, Self::Runtime(RuntimeError::BudgetExhausted))
    }
}

/// Parse and evaluate `text` against `frame` under the three bindings
/// `df`, `pd` and `np`.
pub fn eval_str(
    text: &str,
    frame: &Arc<DataFrame>,
    budget: &mut EvalBudget,
) -> Result<Value, ExprError> {
    let expr = parse_expr(text)?;
    evaluate(&expr, frame, budget)
}

/// `df.query(text)`: bare identifiers resolve to columns of `frame`.
pub fn query_str(
    text: &str,
    frame: &Arc<DataFrame>,
    budget: &mut EvalBudget,
) -> Result<DataFrame, ExprError> {
    let expr = parse_expr(text)?;
    eval::query_frame(&expr, frame, budget)
}
