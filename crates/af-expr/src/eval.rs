use std::sync::Arc;

use af_columnar::{ArithmeticOp, Column, ColumnError, ComparisonOp, LogicalOp, ReduceOp, scalar_binary, scalar_compare};
use af_frame::{
    DataFrame, DatetimeField, FrameError, PeriodFreq, Series, StringOp, abs_scalar,
    datetime_field, period_label, round_scalar, slice_positions,
};
use af_groupby::{
    GroupAgg, GroupByOptions, GroupPlan, groupby_agg_frame, groupby_agg_planned, pivot_table,
    plan_groups,
};
use af_index::{Index, IndexError, IndexLabel, resolve_position};
use af_runtime::EvalBudget;
use af_types::{
    DType, NANOS_PER_DAY, NANOS_PER_SECOND, NullKind, Scalar, TypeError, datetime_to_timestamp,
    parse_timestamp, timestamp_to_datetime,
};
use chrono::{Months, TimeDelta};

use crate::{BinaryOp, Expr, ExprError, Keyword, SubscriptItem, parse_expr};

/// Interpreter recursion ceiling. Covers `df.query` strings, which are
/// parsed separately but evaluated on the same stack.
const MAX_EVAL_DEPTH: usize = crate::parse::MAX_DEPTH;

/// Argument slot that can only be passed by keyword.
const KEYWORD_ONLY: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Pandas,
    Numpy,
}

#[derive(Debug, Clone)]
pub enum Accessor {
    Dt(Series),
    Str(Series),
}

/// `.loc` / `.iloc` bound to a frame or series.
#[derive(Debug, Clone)]
pub enum Indexer {
    Loc(Box<Value>),
    Iloc(Box<Value>),
}

/// Calendar offset, as built by `pd.DateOffset(years=, months=, days=)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateOffset {
    pub years: i64,
    pub months: i64,
    pub days: i64,
}

impl DateOffset {
    /// Shift `nanos` forward (`sign = 1`) or backward (`sign = -1`). Month
    /// arithmetic clamps to the last day of the target month.
    #[must_use]
    pub fn shift(self, nanos: i64, sign: i64) -> Option<i64> {
        let datetime = timestamp_to_datetime(nanos)?;
        let months = sign.checked_mul(self.years.checked_mul(12)?.checked_add(self.months)?)?;
        let span = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
        let shifted = if months >= 0 {
            datetime.checked_add_months(span)?
        } else {
            datetime.checked_sub_months(span)?
        };
        let days = TimeDelta::try_days(sign.checked_mul(self.days)?)?;
        datetime_to_timestamp(shifted.checked_add_signed(days)?)
    }
}

#[derive(Debug, Clone)]
enum GroupSource {
    Frame {
        frame: Arc<DataFrame>,
        columns: Vec<String>,
        single: bool,
    },
    Series(Series),
}

/// A pending `groupby`: the factorized keys plus the selected values.
#[derive(Debug, Clone)]
pub struct GroupedValue {
    plan: Arc<GroupPlan>,
    source: GroupSource,
    as_index: bool,
}

impl GroupedValue {
    #[must_use]
    pub fn plan(&self) -> &GroupPlan {
        &self.plan
    }

    fn type_name(&self) -> &'static str {
        match self.source {
            GroupSource::Frame { single: false, .. } => "DataFrameGroupBy",
            _ => "SeriesGroupBy",
        }
    }

    fn select(&self, names: Vec<String>, single: bool) -> Result<Self, ExprError> {
        let GroupSource::Frame { frame, .. } = &self.source else {
            return Err(ExprError::TypeMismatch(
                "column selection requires a DataFrameGroupBy".into(),
            ));
        };
        for name in &names {
            if frame.column(name).is_none() {
                return Err(FrameError::ColumnNotFound(name.clone()).into());
            }
        }
        Ok(Self {
            plan: Arc::clone(&self.plan),
            source: GroupSource::Frame {
                frame: Arc::clone(frame),
                columns: names,
                single,
            },
            as_index: self.as_index,
        })
    }

    fn aggregate(&self, agg: GroupAgg) -> Result<Value, ExprError> {
        let plan = self.plan.as_ref();
        let value = match (&self.source, agg) {
            (_, GroupAgg::Size) => {
                let rows = plan.row_index();
                let ones = Column::broadcast(&Scalar::Int64(1), rows.len())?;
                let counted = Series::new("", rows.clone(), ones)?;
                Value::Series(groupby_agg_planned(plan, &counted, GroupAgg::Size)?)
            }
            (GroupSource::Series(series), agg) => {
                Value::Series(groupby_agg_planned(plan, series, agg)?)
            }
            (
                GroupSource::Frame {
                    frame,
                    columns,
                    single: true,
                },
                agg,
            ) => {
                let name = columns.first().ok_or_else(|| {
                    ExprError::InvalidArgument("empty column selection".into())
                })?;
                Value::Series(groupby_agg_planned(plan, &frame.column_series(name)?, agg)?)
            }
            (GroupSource::Frame { frame, columns, .. }, agg) => {
                Value::Frame(Arc::new(groupby_agg_frame(plan, frame, columns, agg)?))
            }
        };
        if self.as_index {
            return Ok(value);
        }
        Ok(match value {
            Value::Series(series) => Value::Frame(Arc::new(series.reset_index()?)),
            Value::Frame(frame) => Value::Frame(Arc::new(frame.reset_index()?)),
            other => other,
        })
    }
}

/// Anything an expression can evaluate to. Only `Scalar`, `Series`,
/// `Frame`, `Index` and `List` are data; the rest are intermediate handles.
#[derive(Debug, Clone)]
pub enum Value {
    Scalar(Scalar),
    Series(Series),
    Frame(Arc<DataFrame>),
    Index(Index),
    List(Vec<Value>),
    GroupBy(GroupedValue),
    Accessor(Accessor),
    Indexer(Indexer),
    Namespace(Namespace),
    DateOffset(DateOffset),
}

fn scalar_type_name(value: &Scalar) -> &'static str {
    match value {
        Scalar::Null(NullKind::Null) => "NoneType",
        Scalar::Null(NullKind::NaN) | Scalar::Float64(_) => "float",
        Scalar::Null(NullKind::NaT) => "NaTType",
        Scalar::Bool(_) => "bool",
        Scalar::Int64(_) => "int",
        Scalar::Utf8(_) => "str",
        Scalar::Timestamp(_) => "Timestamp",
        Scalar::Timedelta(_) => "Timedelta",
    }
}

impl Value {
    /// The type name the value reports in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(value) => scalar_type_name(value),
            Self::Series(_) => "Series",
            Self::Frame(_) => "DataFrame",
            Self::Index(_) => "Index",
            Self::List(_) => "list",
            Self::GroupBy(grouped) => grouped.type_name(),
            Self::Accessor(Accessor::Dt(_)) => "DatetimeProperties",
            Self::Accessor(Accessor::Str(_)) => "StringMethods",
            Self::Indexer(Indexer::Loc(_)) => "_LocIndexer",
            Self::Indexer(Indexer::Iloc(_)) => "_iLocIndexer",
            Self::Namespace(Namespace::Pandas) => "pandas",
            Self::Namespace(Namespace::Numpy) => "numpy",
            Self::DateOffset(_) => "DateOffset",
        }
    }

    fn rows(&self) -> usize {
        match self {
            Self::Series(series) => series.len(),
            Self::Frame(frame) => frame.len(),
            Self::Index(index) => index.len(),
            Self::List(items) => items.len(),
            _ => 0,
        }
    }

    fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Utf8(text)) => Some(text),
            _ => None,
        }
    }
}

fn disallowed(target: &Value, attr: &str) -> ExprError {
    ExprError::DisallowedAttribute {
        owner: target.type_name().to_owned(),
        attr: attr.to_owned(),
    }
}

fn unsupported_operands(symbol: &str, left: &Value, right: &Value) -> ExprError {
    ExprError::TypeMismatch(format!(
        "unsupported operand type(s) for {symbol}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

fn ambiguous(value: &Value) -> ExprError {
    ExprError::TypeMismatch(format!(
        "The truth value of a {} is ambiguous. Use a.empty, a.bool(), a.item(), a.any() or a.all().",
        value.type_name()
    ))
}

fn int_scalar(value: usize) -> Value {
    Value::Scalar(Scalar::Int64(i64::try_from(value).unwrap_or(i64::MAX)))
}

fn label_value(label: &IndexLabel) -> Value {
    Value::Scalar(label.to_scalar())
}

fn positional_series(series: &Series) -> Result<Series, ExprError> {
    Ok(Series::new(
        series.name(),
        Index::range(series.len()),
        series.column().clone(),
    )?)
}

fn list_scalars(items: &[Value], what: &str) -> Result<Vec<Scalar>, ExprError> {
    items
        .iter()
        .map(|item| {
            item.as_scalar().cloned().ok_or_else(|| {
                ExprError::InvalidArgument(format!(
                    "{what} must contain scalars, got {}",
                    item.type_name()
                ))
            })
        })
        .collect()
}

/// Evaluated call arguments.
struct CallArgs {
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl CallArgs {
    fn get(&self, position: usize, keyword: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(name, _)| name == keyword)
            .map(|(_, value)| value)
            .or_else(|| self.positional.get(position))
    }

    fn require(&self, position: usize, keyword: &str, method: &str) -> Result<&Value, ExprError> {
        self.get(position, keyword).ok_or_else(|| {
            ExprError::InvalidArgument(format!(
                "{method}() missing required argument: '{keyword}'"
            ))
        })
    }

    fn int(&self, position: usize, keyword: &str, default: i64) -> Result<i64, ExprError> {
        match self.get(position, keyword) {
            None => Ok(default),
            Some(value) => int_argument(value, keyword),
        }
    }

    fn boolean(&self, position: usize, keyword: &str, default: bool) -> Result<bool, ExprError> {
        match self.get(position, keyword) {
            None => Ok(default),
            Some(Value::Scalar(Scalar::Bool(flag))) => Ok(*flag),
            Some(other) => Err(ExprError::InvalidArgument(format!(
                "{keyword} must be a bool, got {}",
                other.type_name()
            ))),
        }
    }

    fn text(&self, position: usize, keyword: &str) -> Result<Option<String>, ExprError> {
        match self.get(position, keyword) {
            None | Some(Value::Scalar(Scalar::Null(NullKind::Null))) => Ok(None),
            Some(Value::Scalar(Scalar::Utf8(text))) => Ok(Some(text.clone())),
            Some(other) => Err(ExprError::InvalidArgument(format!(
                "{keyword} must be a string, got {}",
                other.type_name()
            ))),
        }
    }

    fn names(&self, position: usize, keyword: &str) -> Result<Option<Vec<String>>, ExprError> {
        match self.get(position, keyword) {
            None | Some(Value::Scalar(Scalar::Null(NullKind::Null))) => Ok(None),
            Some(value) => column_names(value, keyword).map(Some),
        }
    }
}

fn int_argument(value: &Value, keyword: &str) -> Result<i64, ExprError> {
    match value {
        Value::Scalar(Scalar::Int64(v)) => Ok(*v),
        Value::Scalar(Scalar::Bool(flag)) => Ok(i64::from(*flag)),
        Value::Scalar(Scalar::Float64(v)) if v.fract() == 0.0 && v.abs() < 9.0e15 => Ok(*v as i64),
        other => Err(ExprError::InvalidArgument(format!(
            "{keyword} must be an integer, got {}",
            other.type_name()
        ))),
    }
}

fn column_names(value: &Value, what: &str) -> Result<Vec<String>, ExprError> {
    let invalid = |found: &Value| {
        ExprError::InvalidArgument(format!(
            "{what} must be a column name or a list of names, got {}",
            found.type_name()
        ))
    };
    match value {
        Value::Scalar(Scalar::Utf8(name)) => Ok(vec![name.clone()]),
        Value::List(items) => items
            .iter()
            .map(|item| item.as_text().map(str::to_owned).ok_or_else(|| invalid(item)))
            .collect(),
        Value::Index(index) => Ok(index.labels().iter().map(ToString::to_string).collect()),
        other => Err(invalid(other)),
    }
}

fn aligned_column(frame: &DataFrame, series: &Series) -> Result<Column, ExprError> {
    if series.index().labels() == frame.index().labels() {
        return Ok(series.column().clone());
    }
    if series.index().has_duplicates() {
        return Err(FrameError::DuplicateLabels.into());
    }
    let positions = series.index().position_map_first();
    let by_row = frame
        .index()
        .labels()
        .iter()
        .map(|label| positions.get(label).copied())
        .collect::<Vec<_>>();
    Ok(series.column().reindex_by_positions(&by_row)?)
}

fn shift_scalar(value: &Scalar, offset: DateOffset, sign: i64) -> Result<Scalar, ColumnError> {
    match value {
        Scalar::Timestamp(nanos) => offset
            .shift(*nanos, sign)
            .map(Scalar::Timestamp)
            .ok_or(ColumnError::TemporalOverflow),
        Scalar::Null(_) => Ok(Scalar::Null(NullKind::NaT)),
        other => Err(ColumnError::UnsupportedOperands {
            op: if sign > 0 { "+" } else { "-" },
            left: other.dtype().type_name(),
            right: "DateOffset",
        }),
    }
}

fn negate_scalar(value: &Scalar) -> Result<Scalar, ColumnError> {
    Ok(match value {
        Scalar::Int64(v) => Scalar::Int64(v.wrapping_neg()),
        Scalar::Float64(v) => Scalar::Float64(-v),
        Scalar::Timedelta(v) => Scalar::Timedelta(v.wrapping_neg()),
        Scalar::Bool(v) => Scalar::Int64(-i64::from(*v)),
        Scalar::Null(_) => value.clone(),
        other => {
            return Err(ColumnError::UnsupportedOperands {
                op: "unary -",
                left: other.dtype().type_name(),
                right: other.dtype().type_name(),
            });
        }
    })
}

fn invert_scalar(value: &Scalar) -> Result<Scalar, ColumnError> {
    Ok(match value {
        Scalar::Bool(v) => Scalar::Bool(!v),
        Scalar::Int64(v) => Scalar::Int64(!v),
        Scalar::Null(_) => value.clone(),
        other => {
            return Err(ColumnError::UnsupportedOperands {
                op: "~",
                left: other.dtype().type_name(),
                right: other.dtype().type_name(),
            });
        }
    })
}

fn sqrt_scalar(value: &Scalar) -> Result<Scalar, ColumnError> {
    if value.is_missing() {
        return Ok(Scalar::Null(NullKind::NaN));
    }
    let number = value.to_f64()?;
    Ok(if number < 0.0 {
        Scalar::Null(NullKind::NaN)
    } else {
        Scalar::Float64(number.sqrt())
    })
}

fn parse_datetime_scalar(value: &Scalar, coerce: bool) -> Result<Scalar, ColumnError> {
    match value {
        Scalar::Timestamp(_) => Ok(value.clone()),
        Scalar::Null(_) => Ok(Scalar::Null(NullKind::NaT)),
        Scalar::Utf8(text) => match parse_timestamp(text) {
            Some(nanos) => Ok(Scalar::Timestamp(nanos)),
            None if coerce => Ok(Scalar::Null(NullKind::NaT)),
            None => Err(TypeError::UnparseableTimestamp {
                value: text.clone(),
            }
            .into()),
        },
        other => Err(ColumnError::UnsupportedReduction {
            op: "to_datetime",
            dtype: other.dtype().type_name(),
        }),
    }
}

fn timedelta_unit(unit: &str) -> Option<i64> {
    Some(match unit {
        "W" | "w" | "weeks" | "week" => 7 * NANOS_PER_DAY,
        "D" | "d" | "days" | "day" => NANOS_PER_DAY,
        "h" | "H" | "hours" | "hour" => 3_600 * NANOS_PER_SECOND,
        "m" | "min" | "minutes" | "minute" | "T" => 60 * NANOS_PER_SECOND,
        "s" | "S" | "seconds" | "second" | "sec" => NANOS_PER_SECOND,
        "ns" => 1,
        _ => return None,
    })
}

/// `"3 days"`, `"12h"`, `"1 day 2 hours"`.
fn parse_timedelta_text(text: &str) -> Option<i64> {
    let mut total = 0_i64;
    let mut rest = text.trim();
    if rest.is_empty() {
        return None;
    }
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '-')
            .unwrap_or(rest.len());
        let amount: i64 = rest[..digits].parse().ok()?;
        rest = rest[digits..].trim_start();
        let unit_len = rest.find(|c: char| !c.is_alphabetic()).unwrap_or(rest.len());
        let unit = timedelta_unit(&rest[..unit_len])?;
        total = total.checked_add(amount.checked_mul(unit)?)?;
        rest = rest[unit_len..].trim_start_matches([',', ' ']);
    }
    Some(total)
}

fn period_freq(args: &CallArgs) -> Result<PeriodFreq, ExprError> {
    let code = args
        .text(0, "freq")?
        .ok_or_else(|| ExprError::InvalidArgument("to_period() missing required argument: 'freq'".into()))?;
    PeriodFreq::from_code(&code)
        .ok_or_else(|| ExprError::InvalidArgument(format!("Invalid frequency: {code}")))
}

enum Key {
    Value(Value),
    Slice(Option<i64>, Option<i64>),
}

impl Key {
    fn is_full_slice(&self) -> bool {
        matches!(self, Self::Slice(None, None))
    }
}

fn single_key(mut keys: Vec<Key>, target: &str) -> Result<Key, ExprError> {
    if keys.len() != 1 {
        return Err(ExprError::InvalidArgument(format!(
            "too many indexers for {target}"
        )));
    }
    keys.pop()
        .ok_or_else(|| ExprError::InvalidArgument("empty subscript".into()))
}

fn label_positions(index: &Index, label: &IndexLabel) -> Vec<usize> {
    index
        .labels()
        .iter()
        .enumerate()
        .filter_map(|(idx, candidate)| (candidate == label).then_some(idx))
        .collect()
}

fn has_integer_labels(index: &Index) -> bool {
    index
        .labels()
        .iter()
        .any(|label| matches!(label, IndexLabel::Int64(_)))
}

/// Row positions a `.loc` row key selects, plus whether it named exactly
/// one row by label.
fn loc_row_positions(frame: &DataFrame, key: &Key) -> Result<(Vec<usize>, bool), ExprError> {
    match key {
        Key::Slice(None, None) => Ok(((0..frame.len()).collect(), false)),
        Key::Slice(..) => Err(ExprError::InvalidArgument(
            "label slices are not supported by .loc".into(),
        )),
        Key::Value(Value::Series(mask)) => Ok((Series::mask_positions(frame.index(), mask)?, false)),
        Key::Value(Value::List(items)) => {
            let mut positions = Vec::new();
            for item in list_scalars(items, ".loc labels")? {
                let label = IndexLabel::from_scalar(&item);
                let found = label_positions(frame.index(), &label);
                if found.is_empty() {
                    return Err(IndexError::LabelNotFound {
                        label: label.to_string(),
                    }
                    .into());
                }
                positions.extend(found);
            }
            Ok((positions, false))
        }
        Key::Value(Value::Scalar(value)) => {
            let label = IndexLabel::from_scalar(value);
            let found = label_positions(frame.index(), &label);
            if found.is_empty() {
                return Err(IndexError::LabelNotFound {
                    label: label.to_string(),
                }
                .into());
            }
            let single = found.len() == 1;
            Ok((found, single))
        }
        Key::Value(other) => Err(ExprError::InvalidArgument(format!(
            "cannot index with {}",
            other.type_name()
        ))),
    }
}

fn iloc_positions(len: usize, key: &Key) -> Result<(Vec<usize>, bool), ExprError> {
    match key {
        Key::Slice(start, stop) => Ok((slice_positions(*start, *stop, len), false)),
        Key::Value(Value::Scalar(Scalar::Int64(position))) => {
            Ok((vec![resolve_position(*position, len)?], true))
        }
        Key::Value(Value::List(items)) => {
            let positions = items
                .iter()
                .map(|item| {
                    let position = int_argument(item, ".iloc position")?;
                    Ok(resolve_position(position, len)?)
                })
                .collect::<Result<Vec<_>, ExprError>>()?;
            Ok((positions, false))
        }
        Key::Value(other) => Err(ExprError::InvalidArgument(format!(
            "cannot index by location with {}",
            other.type_name()
        ))),
    }
}

fn frame_column_at(frame: &DataFrame, names: &[String], row_single: bool) -> Result<Value, ExprError> {
    let selected = frame.select_columns(names)?;
    match (row_single, names) {
        (true, [name]) => {
            let value = selected
                .column(name)
                .and_then(|column| column.value(0))
                .cloned()
                .ok_or_else(|| FrameError::ColumnNotFound(name.clone()))?;
            Ok(Value::Scalar(value))
        }
        (true, _) => Ok(Value::Series(selected.iloc_row(0)?)),
        (false, _) => Ok(Value::Frame(Arc::new(selected))),
    }
}

fn series_label_lookup(series: &Series, key: &Scalar) -> Result<Value, ExprError> {
    let label = IndexLabel::from_scalar(key);
    let positions = series.loc_positions(&label);
    match positions.as_slice() {
        [position] => Ok(Value::Scalar(series.values()[*position].clone())),
        [] => match key {
            Scalar::Int64(position) if !has_integer_labels(series.index()) => {
                Ok(Value::Scalar(series.iloc(*position)?))
            }
            _ => Err(IndexError::LabelNotFound {
                label: label.to_string(),
            }
            .into()),
        },
        _ => Ok(Value::Series(series.take(&positions)?)),
    }
}

struct Interpreter<'a> {
    frame: &'a Arc<DataFrame>,
    budget: &'a mut EvalBudget,
    /// Frame whose columns bare names resolve to inside `df.query`.
    scope: Option<Arc<DataFrame>>,
    depth: usize,
}

/// Evaluate a parsed expression with `df` bound to `frame`.
pub fn evaluate(
    expr: &Expr,
    frame: &Arc<DataFrame>,
    budget: &mut EvalBudget,
) -> Result<Value, ExprError> {
    #[cfg(feature = "tracing")]
    tracing::debug!(expression = %expr, "evaluating expression");
    Interpreter {
        frame,
        budget,
        scope: None,
        depth: 0,
    }
    .eval(expr)
}

pub(crate) fn query_frame(
    expr: &Expr,
    frame: &Arc<DataFrame>,
    budget: &mut EvalBudget,
) -> Result<DataFrame, ExprError> {
    let mut interpreter = Interpreter {
        frame,
        budget,
        scope: None,
        depth: 0,
    };
    interpreter.query(Arc::clone(frame), expr)
}

impl Interpreter<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<Value, ExprError> {
        self.budget.charge(1)?;
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(ExprError::TooDeep);
        }
        self.depth += 1;
        let result = self.eval_node(expr);
        self.depth -= 1;
        let value = result?;
        self.budget
            .charge(u64::try_from(value.rows()).unwrap_or(u64::MAX))?;
        Ok(value)
    }

    fn eval_node(&mut self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Literal { value } => Ok(Value::Scalar(value.clone())),
            Expr::Name { name } => self.lookup(name),
            Expr::List { items } => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Attribute { object, attr } => {
                let target = self.eval(object)?;
                attribute(target, attr)
            }
            Expr::Call { func, args, kwargs } => {
                let Expr::Attribute { object, attr } = func.as_ref() else {
                    let callee = self.eval(func)?;
                    return Err(ExprError::NotCallable(callee.type_name().to_owned()));
                };
                let receiver = self.eval(object)?;
                if attr.starts_with('_') {
                    return Err(disallowed(&receiver, attr));
                }
                let args = self.eval_args(args, kwargs)?;
                self.call_method(receiver, attr, &args)
            }
            Expr::Subscript { object, items } => {
                let target = self.eval(object)?;
                let keys = items
                    .iter()
                    .map(|item| self.eval_key(item))
                    .collect::<Result<Vec<_>, _>>()?;
                subscript(target, keys)
            }
            Expr::Binary { op, left, right } => {
                let lhs = self.eval(left)?;
                let rhs = self.eval(right)?;
                match op {
                    BinaryOp::BitAnd => logical(lhs, rhs, LogicalOp::And, "&"),
                    BinaryOp::BitOr => logical(lhs, rhs, LogicalOp::Or, "|"),
                    BinaryOp::Add => arithmetic(lhs, rhs, ArithmeticOp::Add),
                    BinaryOp::Sub => arithmetic(lhs, rhs, ArithmeticOp::Sub),
                    BinaryOp::Mul => arithmetic(lhs, rhs, ArithmeticOp::Mul),
                    BinaryOp::Div => arithmetic(lhs, rhs, ArithmeticOp::Div),
                    BinaryOp::Mod => arithmetic(lhs, rhs, ArithmeticOp::Mod),
                }
            }
            Expr::Compare { left, right, op } => {
                let lhs = self.eval(left)?;
                let rhs = self.eval(right)?;
                compare(lhs, rhs, *op)
            }
            Expr::And { left, right } => {
                let lhs = self.eval(left)?;
                if self.scope.is_some() && matches!(lhs, Value::Series(_)) {
                    let rhs = self.eval(right)?;
                    return logical(lhs, rhs, LogicalOp::And, "and");
                }
                if truthy(&lhs)? {
                    self.eval(right)
                } else {
                    Ok(lhs)
                }
            }
            Expr::Or { left, right } => {
                let lhs = self.eval(left)?;
                if self.scope.is_some() && matches!(lhs, Value::Series(_)) {
                    let rhs = self.eval(right)?;
                    return logical(lhs, rhs, LogicalOp::Or, "or");
                }
                if truthy(&lhs)? {
                    Ok(lhs)
                } else {
                    self.eval(right)
                }
            }
            Expr::Not { expr } => {
                let inner = self.eval(expr)?;
                match inner {
                    Value::Series(series) if self.scope.is_some() => {
                        Ok(Value::Series(series.not()?))
                    }
                    other => Ok(Value::Scalar(Scalar::Bool(!truthy(&other)?))),
                }
            }
            Expr::Neg { expr } => match self.eval(expr)? {
                Value::Scalar(value) => Ok(Value::Scalar(negate_scalar(&value)?)),
                Value::Series(series) => Ok(Value::Series(
                    series.map_values(series.dtype(), negate_scalar)?,
                )),
                other => Err(ExprError::TypeMismatch(format!(
                    "bad operand type for unary -: '{}'",
                    other.type_name()
                ))),
            },
            Expr::Invert { expr } => match self.eval(expr)? {
                Value::Scalar(value) => Ok(Value::Scalar(invert_scalar(&value)?)),
                Value::Series(series) if series.dtype() == DType::Bool => {
                    Ok(Value::Series(series.not()?))
                }
                Value::Series(series) => Ok(Value::Series(
                    series.map_values(series.dtype(), invert_scalar)?,
                )),
                other => Err(ExprError::TypeMismatch(format!(
                    "bad operand type for unary ~: '{}'",
                    other.type_name()
                ))),
            },
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, ExprError> {
        if let Some(scope) = &self.scope {
            return match scope.column(name) {
                Some(_) => Ok(Value::Series(scope.column_series(name)?)),
                None => Err(ExprError::UnknownName(name.to_owned())),
            };
        }
        match name {
            "df" => Ok(Value::Frame(Arc::clone(self.frame))),
            "pd" => Ok(Value::Namespace(Namespace::Pandas)),
            "np" => Ok(Value::Namespace(Namespace::Numpy)),
            _ => Err(ExprError::UnknownName(name.to_owned())),
        }
    }

    fn eval_args(&mut self, args: &[Expr], kwargs: &[Keyword]) -> Result<CallArgs, ExprError> {
        let positional = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let keywords = kwargs
            .iter()
            .map(|kw| Ok((kw.name.clone(), self.eval(&kw.value)?)))
            .collect::<Result<Vec<_>, ExprError>>()?;
        Ok(CallArgs {
            positional,
            keywords,
        })
    }

    fn eval_key(&mut self, item: &SubscriptItem) -> Result<Key, ExprError> {
        match item {
            SubscriptItem::Index { expr } => self.eval(expr).map(Key::Value),
            SubscriptItem::Slice { start, stop } => {
                let start = self.slice_bound(start.as_ref())?;
                let stop = self.slice_bound(stop.as_ref())?;
                Ok(Key::Slice(start, stop))
            }
        }
    }

    fn slice_bound(&mut self, bound: Option<&Expr>) -> Result<Option<i64>, ExprError> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::Scalar(Scalar::Null(NullKind::Null)) => Ok(None),
            Value::Scalar(Scalar::Int64(v)) => Ok(Some(v)),
            other => Err(ExprError::InvalidArgument(format!(
                "slice indices must be integers or None, got {}",
                other.type_name()
            ))),
        }
    }

    /// Evaluate `expr` with bare names bound to the columns of `frame` and
    /// keep the rows where it holds.
    fn query(&mut self, frame: Arc<DataFrame>, expr: &Expr) -> Result<DataFrame, ExprError> {
        let previous = self.scope.replace(Arc::clone(&frame));
        let mask = self.eval(expr);
        self.scope = previous;
        match mask? {
            Value::Series(mask) => Ok(frame.filter_rows(&mask)?),
            other => Err(ExprError::InvalidArgument(format!(
                "query expression must produce a boolean mask, got {}",
                other.type_name()
            ))),
        }
    }

    fn call_method(&mut self, receiver: Value, method: &str, args: &CallArgs) -> Result<Value, ExprError> {
        match receiver {
            Value::Frame(frame) => self.frame_method(frame, method, args),
            Value::Series(series) => series_method(series, method, args),
            Value::GroupBy(grouped) => grouped_method(&grouped, method, args),
            Value::Accessor(Accessor::Dt(series)) => dt_method(&series, method, args),
            Value::Accessor(Accessor::Str(series)) => str_method(&series, method, args),
            Value::Namespace(Namespace::Pandas) => pandas_function(method, args),
            Value::Namespace(Namespace::Numpy) => numpy_function(method, args),
            Value::Scalar(value) => scalar_method(&value, method, args),
            Value::Index(index) => match method {
                "tolist" | "to_list" => Ok(Value::List(
                    index.labels().iter().map(label_value).collect(),
                )),
                _ => Err(disallowed(&Value::Index(index), method)),
            },
            other => Err(disallowed(&other, method)),
        }
    }

    fn frame_method(&mut self, frame: Arc<DataFrame>, method: &str, args: &CallArgs) -> Result<Value, ExprError> {
        let result = match method {
            "groupby" => {
                let options = GroupByOptions {
                    dropna: args.boolean(KEYWORD_ONLY, "dropna", true)?,
                    sort: args.boolean(KEYWORD_ONLY, "sort", true)?,
                };
                let as_index = args.boolean(KEYWORD_ONLY, "as_index", true)?;
                let keys = match args.require(0, "by", "groupby")? {
                    Value::Series(series) => vec![series.clone()],
                    Value::List(items) => items
                        .iter()
                        .map(|item| match item {
                            Value::Series(series) => Ok(series.clone()),
                            Value::Scalar(Scalar::Utf8(name)) => Ok(frame.column_series(name)?),
                            other => Err(ExprError::InvalidArgument(format!(
                                "cannot group by {}",
                                other.type_name()
                            ))),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    Value::Scalar(Scalar::Utf8(name)) => vec![frame.column_series(name)?],
                    other => {
                        return Err(ExprError::InvalidArgument(format!(
                            "cannot group by {}",
                            other.type_name()
                        )));
                    }
                };
                let plan = plan_groups(&keys, options)?;
                let columns = frame
                    .column_names()
                    .iter()
                    .filter(|name| !keys.iter().any(|key| key.name() == name.as_str()))
                    .cloned()
                    .collect();
                Value::GroupBy(GroupedValue {
                    plan: Arc::new(plan),
                    source: GroupSource::Frame {
                        frame,
                        columns,
                        single: false,
                    },
                    as_index,
                })
            }
            "query" => {
                let text = args
                    .text(0, "expr")?
                    .ok_or_else(|| ExprError::InvalidArgument("query() missing required argument: 'expr'".into()))?;
                let expr = parse_expr(&text)?;
                Value::Frame(Arc::new(self.query(frame, &expr)?))
            }
            "assign" => {
                let mut out = frame.as_ref().clone();
                for (name, value) in &args.keywords {
                    let column = match value {
                        Value::Series(series) => aligned_column(&out, series)?,
                        Value::Scalar(scalar) => Column::broadcast(scalar, out.len())?,
                        other => {
                            return Err(ExprError::InvalidArgument(format!(
                                "cannot assign {} to column '{name}'",
                                other.type_name()
                            )));
                        }
                    };
                    out = out.with_column(name, column)?;
                }
                Value::Frame(Arc::new(out))
            }
            "head" => Value::Frame(Arc::new(frame.head(args.int(0, "n", 5)?)?)),
            "tail" => Value::Frame(Arc::new(frame.tail(args.int(0, "n", 5)?)?)),
            "sort_values" => {
                let by = args
                    .names(0, "by")?
                    .ok_or_else(|| ExprError::InvalidArgument("sort_values() missing required argument: 'by'".into()))?;
                let ascending = match args.get(KEYWORD_ONLY, "ascending") {
                    None => vec![true; by.len()],
                    Some(Value::Scalar(Scalar::Bool(flag))) => vec![*flag; by.len()],
                    Some(Value::List(items)) => items
                        .iter()
                        .map(|item| match item {
                            Value::Scalar(Scalar::Bool(flag)) => Ok(*flag),
                            other => Err(ExprError::InvalidArgument(format!(
                                "ascending must contain bools, got {}",
                                other.type_name()
                            ))),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(other) => {
                        return Err(ExprError::InvalidArgument(format!(
                            "ascending must be a bool, got {}",
                            other.type_name()
                        )));
                    }
                };
                Value::Frame(Arc::new(frame.sort_values(&by, &ascending)?))
            }
            "nlargest" | "nsmallest" => {
                let n = usize::try_from(args.int(0, "n", 5)?).unwrap_or(0);
                let columns = args
                    .names(1, "columns")?
                    .ok_or_else(|| ExprError::InvalidArgument(format!("{method}() missing required argument: 'columns'")))?;
                let column = columns
                    .first()
                    .ok_or_else(|| ExprError::InvalidArgument(format!("{method}() needs a column")))?;
                let out = if method == "nlargest" {
                    frame.nlargest(n, column)?
                } else {
                    frame.nsmallest(n, column)?
                };
                Value::Frame(Arc::new(out))
            }
            "dropna" => {
                let subset = args.names(KEYWORD_ONLY, "subset")?;
                Value::Frame(Arc::new(frame.dropna(subset.as_deref())?))
            }
            "drop_duplicates" => {
                let subset = args.names(0, "subset")?;
                Value::Frame(Arc::new(frame.drop_duplicates(subset.as_deref())?))
            }
            "reset_index" => {
                let out = if args.boolean(KEYWORD_ONLY, "drop", false)? {
                    DataFrame::new_with_column_order(
                        Index::range(frame.len()),
                        frame.columns().clone(),
                        frame.column_names().to_vec(),
                    )?
                } else {
                    frame.reset_index()?
                };
                Value::Frame(Arc::new(out))
            }
            "select_dtypes" => {
                let include = args
                    .names(0, "include")?
                    .ok_or_else(|| ExprError::InvalidArgument("select_dtypes() missing required argument: 'include'".into()))?;
                if !include.iter().all(|kind| matches!(kind.as_str(), "number" | "numeric")) {
                    return Err(ExprError::InvalidArgument(format!(
                        "select_dtypes supports include='number' only, got {include:?}"
                    )));
                }
                Value::Frame(Arc::new(frame.select_numeric()?))
            }
            "pivot_table" => {
                let values = args
                    .text(0, "values")?
                    .ok_or_else(|| ExprError::InvalidArgument("pivot_table() missing required argument: 'values'".into()))?;
                let index = args
                    .names(1, "index")?
                    .ok_or_else(|| ExprError::InvalidArgument("pivot_table() missing required argument: 'index'".into()))?;
                let columns = args.text(2, "columns")?;
                let aggfunc = args.text(3, "aggfunc")?.unwrap_or_else(|| "mean".to_owned());
                let agg = GroupAgg::from_name(&aggfunc).ok_or_else(|| {
                    ExprError::InvalidArgument(format!("unsupported aggfunc '{aggfunc}'"))
                })?;
                Value::Frame(Arc::new(pivot_table(&frame, &index, columns.as_deref(), &values, agg)?))
            }
            "sum" | "mean" | "count" | "nunique" | "min" | "max" | "median" | "std" => {
                let Some(op) = ReduceOp::from_name(method) else {
                    return Err(disallowed(&Value::Frame(frame), method));
                };
                let by_row = match args.get(0, "axis") {
                    None => false,
                    Some(Value::Scalar(Scalar::Utf8(axis))) => axis == "columns",
                    Some(axis) => int_argument(axis, "axis")? == 1,
                };
                if by_row {
                    if op != ReduceOp::Sum {
                        return Err(ExprError::InvalidArgument(format!(
                            "{method}(axis=1) is not supported"
                        )));
                    }
                    Value::Series(frame.select_numeric()?.sum_rows()?)
                } else {
                    Value::Series(frame.reduce_columns(op)?)
                }
            }
            "idxmax" | "idxmin" => {
                let numeric = frame.select_numeric()?;
                let mut labels = Vec::new();
                let mut values = Vec::new();
                for name in numeric.column_names() {
                    let series = numeric.column_series(name)?;
                    let label = if method == "idxmax" {
                        series.idxmax()?
                    } else {
                        series.idxmin()?
                    };
                    labels.push(IndexLabel::Utf8(name.clone()));
                    values.push(label.to_scalar());
                }
                Value::Series(Series::from_values("", labels, values)?)
            }
            "copy" => Value::Frame(frame),
            _ => return Err(disallowed(&Value::Frame(frame), method)),
        };
        Ok(result)
    }
}

fn truthy(value: &Value) -> Result<bool, ExprError> {
    match value {
        Value::Scalar(scalar) => Ok(scalar.truthy()),
        Value::List(items) => Ok(!items.is_empty()),
        Value::Series(_) | Value::Frame(_) | Value::Index(_) => Err(ambiguous(value)),
        _ => Ok(true),
    }
}

fn broadcast_like(series: &Series, value: &Scalar) -> Result<Series, ExprError> {
    let column = Column::broadcast(value, series.len())?;
    Ok(Series::new(series.name(), series.index().clone(), column)?)
}

fn logical(lhs: Value, rhs: Value, op: LogicalOp, symbol: &str) -> Result<Value, ExprError> {
    match (lhs, rhs) {
        (Value::Series(left), Value::Series(right)) => Ok(Value::Series(left.logical(&right, op)?)),
        (Value::Series(series), Value::Scalar(value)) | (Value::Scalar(value), Value::Series(series)) => {
            let other = broadcast_like(&series, &value)?;
            Ok(Value::Series(series.logical(&other, op)?))
        }
        (Value::Scalar(Scalar::Bool(a)), Value::Scalar(Scalar::Bool(b))) => {
            Ok(Value::Scalar(Scalar::Bool(match op {
                LogicalOp::And => a && b,
                LogicalOp::Or => a || b,
            })))
        }
        (Value::Scalar(Scalar::Int64(a)), Value::Scalar(Scalar::Int64(b))) => {
            Ok(Value::Scalar(Scalar::Int64(match op {
                LogicalOp::And => a & b,
                LogicalOp::Or => a | b,
            })))
        }
        (lhs, rhs) => Err(unsupported_operands(symbol, &lhs, &rhs)),
    }
}

fn arithmetic(lhs: Value, rhs: Value, op: ArithmeticOp) -> Result<Value, ExprError> {
    let offset_sign = match op {
        ArithmeticOp::Add => Some(1),
        ArithmeticOp::Sub => Some(-1),
        _ => None,
    };
    match (lhs, rhs) {
        (Value::Series(left), Value::Series(right)) => Ok(Value::Series(left.binary(&right, op)?)),
        (Value::Series(series), Value::Scalar(value)) => {
            Ok(Value::Series(series.binary_scalar(&value, op, false)?))
        }
        (Value::Scalar(value), Value::Series(series)) => {
            Ok(Value::Series(series.binary_scalar(&value, op, true)?))
        }
        (Value::Scalar(left), Value::Scalar(right)) => {
            Ok(Value::Scalar(scalar_binary(&left, &right, op)?))
        }
        (Value::Scalar(value), Value::DateOffset(offset)) if offset_sign.is_some() => {
            let sign = offset_sign.unwrap_or(1);
            Ok(Value::Scalar(shift_scalar(&value, offset, sign)?))
        }
        (Value::DateOffset(offset), Value::Scalar(value)) if op == ArithmeticOp::Add => {
            Ok(Value::Scalar(shift_scalar(&value, offset, 1)?))
        }
        (Value::Series(series), Value::DateOffset(offset)) if offset_sign.is_some() => {
            let sign = offset_sign.unwrap_or(1);
            Ok(Value::Series(series.map_values(DType::Timestamp, |value| {
                shift_scalar(value, offset, sign)
            })?))
        }
        (Value::DateOffset(a), Value::DateOffset(b)) if offset_sign.is_some() => {
            let sign = offset_sign.unwrap_or(1);
            Ok(Value::DateOffset(DateOffset {
                years: a.years.saturating_add(sign * b.years),
                months: a.months.saturating_add(sign * b.months),
                days: a.days.saturating_add(sign * b.days),
            }))
        }
        (lhs, rhs) => Err(unsupported_operands(op.symbol(), &lhs, &rhs)),
    }
}

fn compare(lhs: Value, rhs: Value, op: ComparisonOp) -> Result<Value, ExprError> {
    match (lhs, rhs) {
        (Value::Series(left), Value::Series(right)) => Ok(Value::Series(left.compare(&right, op)?)),
        (Value::Series(series), Value::Scalar(value)) => {
            Ok(Value::Series(series.compare_scalar(&value, op)?))
        }
        (Value::Scalar(value), Value::Series(series)) => {
            Ok(Value::Series(series.compare_scalar(&value, op.reversed())?))
        }
        (Value::Scalar(left), Value::Scalar(right)) => {
            Ok(Value::Scalar(Scalar::Bool(scalar_compare(&left, &right, op)?)))
        }
        (lhs, rhs) => Err(ExprError::TypeMismatch(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn attribute(target: Value, attr: &str) -> Result<Value, ExprError> {
    if attr.starts_with('_') {
        return Err(disallowed(&target, attr));
    }
    let value = match &target {
        Value::Frame(frame) => match attr {
            "shape" => {
                let (rows, cols) = frame.shape();
                Value::List(vec![int_scalar(rows), int_scalar(cols)])
            }
            "empty" => Value::Scalar(Scalar::Bool(frame.is_empty() || frame.column_names().is_empty())),
            "columns" => Value::Index(Index::from_utf8(frame.column_names().to_vec())),
            "index" => Value::Index(frame.index().clone()),
            "size" => int_scalar(frame.len() * frame.column_names().len()),
            "loc" => Value::Indexer(Indexer::Loc(Box::new(target.clone()))),
            "iloc" => Value::Indexer(Indexer::Iloc(Box::new(target.clone()))),
            name if frame.column(name).is_some() => Value::Series(frame.column_series(name)?),
            _ => return Err(disallowed(&target, attr)),
        },
        Value::Series(series) => match attr {
            "index" => Value::Index(series.index().clone()),
            "values" => Value::Series(positional_series(series)?),
            "dt" => Value::Accessor(Accessor::Dt(series.clone())),
            "str" => Value::Accessor(Accessor::Str(series.clone())),
            "empty" => Value::Scalar(Scalar::Bool(series.is_empty())),
            "size" => int_scalar(series.len()),
            "shape" => Value::List(vec![int_scalar(series.len())]),
            "name" => Value::Scalar(if series.name().is_empty() {
                Scalar::Null(NullKind::Null)
            } else {
                Scalar::Utf8(series.name().to_owned())
            }),
            "dtype" => Value::Scalar(Scalar::Utf8(series.dtype().type_name().to_owned())),
            "loc" => Value::Indexer(Indexer::Loc(Box::new(target.clone()))),
            "iloc" => Value::Indexer(Indexer::Iloc(Box::new(target.clone()))),
            _ => return Err(disallowed(&target, attr)),
        },
        Value::Accessor(Accessor::Dt(series)) => match DatetimeField::from_name(attr) {
            Some(field) => Value::Series(series.dt_field(field)?),
            None => return Err(disallowed(&target, attr)),
        },
        Value::Scalar(scalar @ (Scalar::Timestamp(_) | Scalar::Null(NullKind::NaT))) => {
            match DatetimeField::from_name(attr) {
                Some(field) if field != DatetimeField::Days => {
                    Value::Scalar(datetime_field(scalar, field)?)
                }
                _ => return Err(disallowed(&target, attr)),
            }
        }
        Value::Scalar(scalar @ Scalar::Timedelta(_)) => match attr {
            "days" => Value::Scalar(datetime_field(scalar, DatetimeField::Days)?),
            _ => return Err(disallowed(&target, attr)),
        },
        Value::Index(index) => match attr {
            "name" => Value::Scalar(
                index
                    .name()
                    .map_or(Scalar::Null(NullKind::Null), |name| Scalar::Utf8(name.to_owned())),
            ),
            "size" => int_scalar(index.len()),
            "empty" => Value::Scalar(Scalar::Bool(index.is_empty())),
            "values" => Value::Series(positional_series(&Series::from_index(index)?)?),
            _ => return Err(disallowed(&target, attr)),
        },
        Value::GroupBy(grouped) => match &grouped.source {
            GroupSource::Frame { columns, .. } if columns.iter().any(|name| name == attr) => {
                Value::GroupBy(grouped.select(vec![attr.to_owned()], true)?)
            }
            _ => return Err(disallowed(&target, attr)),
        },
        Value::Namespace(Namespace::Pandas) => match attr {
            "NaT" => Value::Scalar(Scalar::Null(NullKind::NaT)),
            _ => return Err(disallowed(&target, attr)),
        },
        Value::Namespace(Namespace::Numpy) => match attr {
            "nan" | "NaN" => Value::Scalar(Scalar::Null(NullKind::NaN)),
            "inf" => Value::Scalar(Scalar::Float64(f64::INFINITY)),
            "pi" => Value::Scalar(Scalar::Float64(std::f64::consts::PI)),
            _ => return Err(disallowed(&target, attr)),
        },
        _ => return Err(disallowed(&target, attr)),
    };
    Ok(value)
}

fn subscript(target: Value, keys: Vec<Key>) -> Result<Value, ExprError> {
    match target {
        Value::Frame(frame) => match single_key(keys, "DataFrame")? {
            Key::Value(Value::Scalar(Scalar::Utf8(name))) => Ok(Value::Series(frame.column_series(&name)?)),
            Key::Value(Value::Series(mask)) => Ok(Value::Frame(Arc::new(frame.filter_rows(&mask)?))),
            Key::Value(names @ (Value::List(_) | Value::Index(_))) => {
                let names = column_names(&names, "column selection")?;
                Ok(Value::Frame(Arc::new(frame.select_columns(&names)?)))
            }
            Key::Slice(start, stop) => Ok(Value::Frame(Arc::new(frame.iloc_slice(start, stop)?))),
            Key::Value(other) => Err(ExprError::InvalidArgument(format!(
                "cannot index DataFrame with {}",
                other.type_name()
            ))),
        },
        Value::Series(series) => series_subscript(&series, single_key(keys, "Series")?),
        Value::Index(index) => match single_key(keys, "Index")? {
            Key::Value(Value::Scalar(Scalar::Int64(position))) => {
                let position = resolve_position(position, index.len())?;
                Ok(label_value(&index.labels()[position]))
            }
            Key::Slice(start, stop) => Ok(Value::Index(index.take(&slice_positions(start, stop, index.len())))),
            Key::Value(other) => Err(ExprError::InvalidArgument(format!(
                "cannot index Index with {}",
                other.type_name()
            ))),
        },
        Value::List(items) => match single_key(keys, "list")? {
            Key::Value(Value::Scalar(Scalar::Int64(position))) => {
                let position = resolve_position(position, items.len())?;
                Ok(items[position].clone())
            }
            Key::Slice(start, stop) => {
                let positions = slice_positions(start, stop, items.len());
                Ok(Value::List(positions.into_iter().map(|idx| items[idx].clone()).collect()))
            }
            Key::Value(other) => Err(ExprError::TypeMismatch(format!(
                "list indices must be integers or slices, not {}",
                other.type_name()
            ))),
        },
        Value::GroupBy(grouped) => match single_key(keys, "GroupBy")? {
            Key::Value(Value::Scalar(Scalar::Utf8(name))) => Ok(Value::GroupBy(grouped.select(vec![name], true)?)),
            Key::Value(names @ Value::List(_)) => {
                let names = column_names(&names, "column selection")?;
                Ok(Value::GroupBy(grouped.select(names, false)?))
            }
            _ => Err(ExprError::InvalidArgument("GroupBy selection must be column names".into())),
        },
        Value::Indexer(Indexer::Loc(target)) => loc(*target, keys),
        Value::Indexer(Indexer::Iloc(target)) => iloc(*target, keys),
        other => Err(ExprError::TypeMismatch(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn series_subscript(series: &Series, key: Key) -> Result<Value, ExprError> {
    match key {
        Key::Value(Value::Scalar(value)) => series_label_lookup(series, &value),
        Key::Value(Value::Series(mask)) => Ok(Value::Series(series.filter(&mask)?)),
        Key::Value(Value::List(items)) => {
            let mut positions = Vec::new();
            for item in list_scalars(&items, "labels")? {
                let label = IndexLabel::from_scalar(&item);
                let found = series.loc_positions(&label);
                if found.is_empty() {
                    return Err(IndexError::LabelNotFound {
                        label: label.to_string(),
                    }
                    .into());
                }
                positions.extend(found);
            }
            Ok(Value::Series(series.take(&positions)?))
        }
        Key::Slice(start, stop) => Ok(Value::Series(series.iloc_slice(start, stop)?)),
        Key::Value(other) => Err(ExprError::InvalidArgument(format!(
            "cannot index Series with {}",
            other.type_name()
        ))),
    }
}

fn loc(target: Value, mut keys: Vec<Key>) -> Result<Value, ExprError> {
    match target {
        Value::Frame(frame) => {
            if keys.is_empty() || keys.len() > 2 {
                return Err(ExprError::InvalidArgument("too many indexers for .loc".into()));
            }
            let column_key = if keys.len() == 2 { keys.pop() } else { None };
            let row_key = single_key(keys, ".loc")?;
            let (positions, single_row) = loc_row_positions(&frame, &row_key)?;
            let rows = frame.take_rows(&positions)?;
            match column_key {
                None => {
                    if single_row {
                        Ok(Value::Series(rows.iloc_row(0)?))
                    } else {
                        Ok(Value::Frame(Arc::new(rows)))
                    }
                }
                Some(key) if key.is_full_slice() => {
                    if single_row {
                        Ok(Value::Series(rows.iloc_row(0)?))
                    } else {
                        Ok(Value::Frame(Arc::new(rows)))
                    }
                }
                Some(Key::Value(Value::Scalar(Scalar::Utf8(name)))) => {
                    if single_row {
                        frame_column_at(&rows, &[name], true)
                    } else {
                        Ok(Value::Series(rows.column_series(&name)?))
                    }
                }
                Some(Key::Value(names @ (Value::List(_) | Value::Index(_)))) => {
                    let names = column_names(&names, ".loc columns")?;
                    frame_column_at(&rows, &names, single_row)
                }
                Some(_) => Err(ExprError::InvalidArgument(
                    ".loc columns must be a name or a list of names".into(),
                )),
            }
        }
        Value::Series(series) => match single_key(keys, ".loc")? {
            key @ Key::Slice(None, None) => series_subscript(&series, key),
            Key::Slice(..) => Err(ExprError::InvalidArgument(
                "label slices are not supported by .loc".into(),
            )),
            Key::Value(Value::Scalar(value)) => {
                let label = IndexLabel::from_scalar(&value);
                match series.loc_positions(&label).as_slice() {
                    [] => Err(IndexError::LabelNotFound {
                        label: label.to_string(),
                    }
                    .into()),
                    [position] => Ok(Value::Scalar(series.values()[*position].clone())),
                    positions => Ok(Value::Series(series.take(positions)?)),
                }
            }
            key => series_subscript(&series, key),
        },
        other => Err(disallowed(&other, "loc")),
    }
}

fn iloc(target: Value, mut keys: Vec<Key>) -> Result<Value, ExprError> {
    match target {
        Value::Frame(frame) => {
            if keys.is_empty() || keys.len() > 2 {
                return Err(ExprError::InvalidArgument("too many indexers for .iloc".into()));
            }
            let column_key = if keys.len() == 2 { keys.pop() } else { None };
            let row_key = single_key(keys, ".iloc")?;
            let (positions, single_row) = iloc_positions(frame.len(), &row_key)?;
            let rows = frame.take_rows(&positions)?;
            match column_key {
                None => {
                    if single_row {
                        Ok(Value::Series(rows.iloc_row(0)?))
                    } else {
                        Ok(Value::Frame(Arc::new(rows)))
                    }
                }
                Some(key) => {
                    let (columns, single_column) = iloc_positions(rows.column_names().len(), &key)?;
                    let names = columns
                        .into_iter()
                        .map(|idx| rows.column_names()[idx].clone())
                        .collect::<Vec<_>>();
                    match (single_row, single_column) {
                        (false, true) => Ok(Value::Series(rows.column_series(&names[0])?)),
                        _ => frame_column_at(&rows, &names, single_row),
                    }
                }
            }
        }
        Value::Series(series) => match single_key(keys, ".iloc")? {
            Key::Value(Value::Scalar(Scalar::Int64(position))) => Ok(Value::Scalar(series.iloc(position)?)),
            key => {
                let (positions, _) = iloc_positions(series.len(), &key)?;
                Ok(Value::Series(series.take(&positions)?))
            }
        },
        other => Err(disallowed(&other, "iloc")),
    }
}

fn series_method(series: Series, method: &str, args: &CallArgs) -> Result<Value, ExprError> {
    let result = match method {
        "sum" | "mean" | "median" | "min" | "max" | "count" | "nunique" | "std" => {
            let Some(op) = ReduceOp::from_name(method) else {
                return Err(disallowed(&Value::Series(series), method));
            };
            Value::Scalar(series.reduce(op)?)
        }
        "idxmax" => label_value(&series.idxmax()?),
        "idxmin" => label_value(&series.idxmin()?),
        "argmax" => int_scalar(series.argmax()?),
        "argmin" => int_scalar(series.argmin()?),
        "nlargest" => {
            let n = usize::try_from(args.int(0, "n", 5)?).unwrap_or(0);
            Value::Series(series.nlargest(n)?)
        }
        "nsmallest" => {
            let n = usize::try_from(args.int(0, "n", 5)?).unwrap_or(0);
            Value::Series(series.nsmallest(n)?)
        }
        "sort_values" => Value::Series(series.sort_values(args.boolean(KEYWORD_ONLY, "ascending", true)?)?),
        "sort_index" => Value::Series(series.sort_index(args.boolean(KEYWORD_ONLY, "ascending", true)?)?),
        "head" => Value::Series(series.head(args.int(0, "n", 5)?)?),
        "tail" => Value::Series(series.tail(args.int(0, "n", 5)?)?),
        "value_counts" => {
            let counts = series.value_counts()?;
            if args.boolean(0, "normalize", false)? {
                let total = counts.reduce(ReduceOp::Sum)?;
                Value::Series(
                    counts
                        .binary_scalar(&total, ArithmeticOp::Div, false)?
                        .rename("proportion"),
                )
            } else {
                Value::Series(counts)
            }
        }
        "unique" => {
            let values = series.unique();
            let column = Column::from_values_or(series.dtype(), values)?;
            Value::Series(Series::new(series.name(), Index::range(column.len()), column)?)
        }
        "dropna" => Value::Series(series.dropna()?),
        "fillna" => {
            let fill = args.require(0, "value", "fillna")?;
            let Some(fill) = fill.as_scalar() else {
                return Err(ExprError::InvalidArgument(format!(
                    "fillna value must be a scalar, got {}",
                    fill.type_name()
                )));
            };
            Value::Series(series.fillna(fill)?)
        }
        "isin" => {
            let candidates = match args.require(0, "values", "isin")? {
                Value::List(items) => list_scalars(items, "isin values")?,
                Value::Series(values) => values.values().to_vec(),
                other => {
                    return Err(ExprError::TypeMismatch(format!(
                        "only list-like objects are allowed to be passed to isin(), you passed a '{}'",
                        other.type_name()
                    )));
                }
            };
            Value::Series(series.isin(&candidates)?)
        }
        "between" => {
            let bound = |position: usize, keyword: &str| -> Result<Scalar, ExprError> {
                let value = args.require(position, keyword, "between")?;
                value.as_scalar().cloned().ok_or_else(|| {
                    ExprError::InvalidArgument(format!(
                        "{keyword} must be a scalar, got {}",
                        value.type_name()
                    ))
                })
            };
            Value::Series(series.between(&bound(0, "left")?, &bound(1, "right")?)?)
        }
        "round" => {
            let decimals = i32::try_from(args.int(0, "decimals", 0)?)
                .map_err(|_| ExprError::InvalidArgument("decimals out of range".into()))?;
            Value::Series(series.round(decimals)?)
        }
        "abs" => Value::Series(series.abs()?),
        "isna" | "isnull" => Value::Series(series.isna()?),
        "notna" | "notnull" => Value::Series(series.isna()?.not()?),
        "reset_index" => {
            if args.boolean(KEYWORD_ONLY, "drop", false)? {
                Value::Series(positional_series(&series)?)
            } else {
                Value::Frame(Arc::new(series.reset_index()?))
            }
        }
        "to_frame" => {
            let name = args.text(0, "name")?;
            Value::Frame(Arc::new(series.to_frame(name.as_deref())?))
        }
        "unstack" => Value::Frame(Arc::new(series.unstack()?)),
        "groupby" => {
            let options = GroupByOptions {
                dropna: args.boolean(KEYWORD_ONLY, "dropna", true)?,
                sort: args.boolean(KEYWORD_ONLY, "sort", true)?,
            };
            let keys = match (args.get(KEYWORD_ONLY, "level"), args.get(0, "by")) {
                (Some(level), _) => {
                    let level = usize::try_from(int_argument(level, "level")?).map_err(|_| {
                        ExprError::InvalidArgument("level must be non-negative".into())
                    })?;
                    if level >= series.index().nlevels() {
                        return Err(ExprError::InvalidArgument(format!(
                            "level {level} out of range for an index with {} level(s)",
                            series.index().nlevels()
                        )));
                    }
                    let name = series
                        .index()
                        .names()
                        .get(level)
                        .cloned()
                        .flatten()
                        .unwrap_or_default();
                    let column = Column::from_values_or(DType::Utf8, series.index().level_values(level))?;
                    vec![Series::new(name, series.index().clone(), column)?]
                }
                (None, Some(Value::Series(key))) => vec![key.clone()],
                (None, Some(Value::List(items))) => items
                    .iter()
                    .map(|item| match item {
                        Value::Series(key) => Ok(key.clone()),
                        other => Err(ExprError::InvalidArgument(format!(
                            "cannot group a Series by {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                (None, Some(other)) => {
                    return Err(ExprError::InvalidArgument(format!(
                        "cannot group a Series by {}",
                        other.type_name()
                    )));
                }
                (None, None) => {
                    return Err(ExprError::InvalidArgument(
                        "groupby() needs a key series or level=".into(),
                    ));
                }
            };
            let plan = plan_groups(&keys, options)?;
            Value::GroupBy(GroupedValue {
                plan: Arc::new(plan),
                source: GroupSource::Series(series),
                as_index: true,
            })
        }
        "tolist" | "to_list" => Value::List(series.values().iter().cloned().map(Value::Scalar).collect()),
        "item" => match series.values() {
            [value] => Value::Scalar(value.clone()),
            _ => {
                return Err(ExprError::InvalidArgument(
                    "can only convert an array of size 1 to a Python scalar".into(),
                ));
            }
        },
        "copy" => Value::Series(series),
        _ => return Err(disallowed(&Value::Series(series), method)),
    };
    Ok(result)
}

fn grouped_method(grouped: &GroupedValue, method: &str, args: &CallArgs) -> Result<Value, ExprError> {
    let agg = match method {
        "sum" | "mean" | "median" | "min" | "max" | "count" | "nunique" | "std" | "first" | "size" => {
            GroupAgg::from_name(method)
        }
        "agg" | "aggregate" => {
            let name = args
                .text(0, "func")?
                .ok_or_else(|| ExprError::InvalidArgument("agg() expects an aggregation name".into()))?;
            Some(GroupAgg::from_name(&name).ok_or_else(|| {
                ExprError::InvalidArgument(format!("unsupported aggregation '{name}'"))
            })?)
        }
        _ => None,
    };
    match agg {
        Some(agg) => grouped.aggregate(agg),
        None => Err(disallowed(&Value::GroupBy(grouped.clone()), method)),
    }
}

fn dt_method(series: &Series, method: &str, args: &CallArgs) -> Result<Value, ExprError> {
    match method {
        "to_period" => Ok(Value::Series(series.dt_to_period(period_freq(args)?)?)),
        _ => Err(disallowed(&Value::Accessor(Accessor::Dt(series.clone())), method)),
    }
}

fn str_method(series: &Series, method: &str, args: &CallArgs) -> Result<Value, ExprError> {
    let pattern = |what: &str| -> Result<String, ExprError> {
        args.text(0, "pat")?.ok_or_else(|| {
            ExprError::InvalidArgument(format!("{what}() missing required argument: 'pat'"))
        })
    };
    let op = match method {
        "lower" => StringOp::Lower,
        "upper" => StringOp::Upper,
        "strip" => StringOp::Strip,
        "len" => StringOp::Len,
        "contains" => StringOp::Contains {
            pattern: pattern("contains")?,
            case_sensitive: args.boolean(1, "case", true)?,
            regex: args.boolean(KEYWORD_ONLY, "regex", true)?,
        },
        "startswith" => StringOp::StartsWith {
            prefix: pattern("startswith")?,
        },
        "endswith" => StringOp::EndsWith {
            suffix: pattern("endswith")?,
        },
        _ => return Err(disallowed(&Value::Accessor(Accessor::Str(series.clone())), method)),
    };
    Ok(Value::Series(series.str_op(&op)?))
}

fn pandas_function(name: &str, args: &CallArgs) -> Result<Value, ExprError> {
    match name {
        "DateOffset" => {
            let weeks = args.int(KEYWORD_ONLY, "weeks", 0)?;
            Ok(Value::DateOffset(DateOffset {
                years: args.int(KEYWORD_ONLY, "years", 0)?,
                months: args.int(KEYWORD_ONLY, "months", 0)?,
                days: args
                    .int(KEYWORD_ONLY, "days", 0)?
                    .saturating_add(weeks.saturating_mul(7)),
            }))
        }
        "Timedelta" => {
            if let Some(Value::Scalar(Scalar::Utf8(text))) = args.get(0, "value") {
                return parse_timedelta_text(text)
                    .map(|nanos| Value::Scalar(Scalar::Timedelta(nanos)))
                    .ok_or_else(|| ExprError::InvalidArgument(format!("invalid Timedelta string: '{text}'")));
            }
            let overflow = || ExprError::InvalidArgument("Timedelta out of range".into());
            let mut total = 0_i64;
            if let Some(value) = args.get(0, "value") {
                let unit = args.text(1, "unit")?.unwrap_or_else(|| "ns".to_owned());
                let scale = timedelta_unit(&unit)
                    .ok_or_else(|| ExprError::InvalidArgument(format!("invalid unit '{unit}'")))?;
                total = int_argument(value, "value")?
                    .checked_mul(scale)
                    .ok_or_else(overflow)?;
            }
            for (keyword, unit) in [("weeks", "W"), ("days", "D"), ("hours", "h"), ("minutes", "m"), ("seconds", "s")] {
                let amount = args.int(KEYWORD_ONLY, keyword, 0)?;
                let scale = timedelta_unit(unit).unwrap_or(1);
                total = amount
                    .checked_mul(scale)
                    .and_then(|part| total.checked_add(part))
                    .ok_or_else(overflow)?;
            }
            Ok(Value::Scalar(Scalar::Timedelta(total)))
        }
        "Timestamp" => match args.require(0, "ts_input", "Timestamp")? {
            Value::Scalar(value @ Scalar::Timestamp(_)) => Ok(Value::Scalar(value.clone())),
            Value::Scalar(Scalar::Utf8(text)) => parse_timestamp(text)
                .map(|nanos| Value::Scalar(Scalar::Timestamp(nanos)))
                .ok_or_else(|| {
                    ExprError::InvalidArgument(format!("could not convert string to Timestamp: '{text}'"))
                }),
            other => Err(ExprError::InvalidArgument(format!(
                "cannot convert {} to Timestamp",
                other.type_name()
            ))),
        },
        "to_datetime" => {
            let coerce = args.text(KEYWORD_ONLY, "errors")?.as_deref() == Some("coerce");
            match args.require(0, "arg", "to_datetime")? {
                Value::Scalar(value) => Ok(Value::Scalar(parse_datetime_scalar(value, coerce)?)),
                Value::Series(series) => Ok(Value::Series(series.map_values(DType::Timestamp, |value| {
                    parse_datetime_scalar(value, coerce)
                })?)),
                other => Err(ExprError::InvalidArgument(format!(
                    "cannot convert {} to datetime",
                    other.type_name()
                ))),
            }
        }
        "isna" | "isnull" | "notna" | "notnull" => {
            let negate = name.starts_with("not");
            match args.require(0, "obj", name)? {
                Value::Scalar(value) => Ok(Value::Scalar(Scalar::Bool(value.is_missing() != negate))),
                Value::Series(series) => {
                    let missing = series.isna()?;
                    Ok(Value::Series(if negate { missing.not()? } else { missing }))
                }
                other => Err(ExprError::InvalidArgument(format!(
                    "{name}() does not support {}",
                    other.type_name()
                ))),
            }
        }
        _ => Err(disallowed(&Value::Namespace(Namespace::Pandas), name)),
    }
}

fn numpy_function(name: &str, args: &CallArgs) -> Result<Value, ExprError> {
    match name {
        "sum" | "mean" | "max" | "min" | "median" | "std" => {
            let Some(op) = ReduceOp::from_name(name) else {
                return Err(disallowed(&Value::Namespace(Namespace::Numpy), name));
            };
            match args.require(0, "a", name)? {
                Value::Series(series) => Ok(Value::Scalar(series.reduce(op)?)),
                Value::List(items) => {
                    let column = Column::from_values_or(DType::Float64, list_scalars(items, name)?)?;
                    Ok(Value::Scalar(column.reduce(op)?))
                }
                Value::Scalar(value) => {
                    let column = Column::from_values(vec![value.clone()])?;
                    Ok(Value::Scalar(column.reduce(op)?))
                }
                other => Err(ExprError::InvalidArgument(format!(
                    "np.{name}() does not support {}",
                    other.type_name()
                ))),
            }
        }
        "abs" | "round" | "sqrt" => {
            let decimals = i32::try_from(args.int(1, "decimals", 0)?)
                .map_err(|_| ExprError::InvalidArgument("decimals out of range".into()))?;
            let apply = |value: &Scalar| -> Result<Scalar, ColumnError> {
                match name {
                    "abs" => abs_scalar(value),
                    "round" => round_scalar(value, decimals),
                    _ => sqrt_scalar(value),
                }
            };
            match args.require(0, "x", name)? {
                Value::Scalar(value) => Ok(Value::Scalar(apply(value)?)),
                Value::Series(series) => {
                    let fallback = if name == "sqrt" {
                        DType::Float64
                    } else {
                        series.dtype()
                    };
                    Ok(Value::Series(series.map_values(fallback, apply)?))
                }
                other => Err(ExprError::InvalidArgument(format!(
                    "np.{name}() does not support {}",
                    other.type_name()
                ))),
            }
        }
        _ => Err(disallowed(&Value::Namespace(Namespace::Numpy), name)),
    }
}

fn scalar_method(value: &Scalar, method: &str, args: &CallArgs) -> Result<Value, ExprError> {
    match (value, method) {
        (Scalar::Timestamp(nanos), "to_period") => {
            let freq = period_freq(args)?;
            Ok(Value::Scalar(
                period_label(*nanos, freq).map_or(Scalar::Null(NullKind::NaT), Scalar::Utf8),
            ))
        }
        (Scalar::Null(NullKind::NaT), "to_period") => Ok(Value::Scalar(value.clone())),
        (Scalar::Timedelta(nanos), "total_seconds") => {
            Ok(Value::Scalar(Scalar::Float64(*nanos as f64 / NANOS_PER_SECOND as f64)))
        }
        _ => Err(disallowed(&Value::Scalar(value.clone()), method)),
    }
}
