#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::HashSet;

use af_types::{
    DType, NullKind, Scalar, TypeError, cast_scalar_owned, common_dtype, compare_values,
    infer_dtype, parse_timestamp,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let bits = values.iter().map(|value| !value.is_missing()).collect();
        Self { bits }
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Gt,
    Lt,
    Eq,
    Ne,
    Ge,
    Le,
}

impl ComparisonOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }

    /// The operator that gives the same answer with operands swapped.
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Self::Gt => Self::Lt,
            Self::Lt => Self::Gt,
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Ge => Self::Le,
            Self::Le => Self::Ge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Count,
    Nunique,
    Std,
    First,
}

impl ReduceOp {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => Self::Sum,
            "mean" => Self::Mean,
            "median" => Self::Median,
            "min" => Self::Min,
            "max" => Self::Max,
            "count" => Self::Count,
            "nunique" => Self::Nunique,
            "std" => Self::Std,
            "first" => Self::First,
            _ => return None,
        })
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::Nunique => "nunique",
            Self::Std => "std",
            Self::First => "first",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("unsupported operand types for {op}: '{left}' and '{right}'")]
    UnsupportedOperands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("'{op}' not supported between instances of '{left}' and '{right}'")]
    Unorderable {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("cannot perform {op} with dtype {dtype}")]
    UnsupportedReduction { op: &'static str, dtype: &'static str },
    #[error("timestamp arithmetic overflowed")]
    TemporalOverflow,
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Hashable identity of a cell value, used for distinct counts, grouping
/// and duplicate detection. All NaN payloads share one key.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum ValueKey<'a> {
    Bool(bool),
    Int64(i64),
    FloatBits(u64),
    Utf8(&'a str),
    Timestamp(i64),
    Timedelta(i64),
    Null(NullKind),
}

impl<'a> ValueKey<'a> {
    #[must_use]
    pub fn from_scalar(value: &'a Scalar) -> Self {
        match value {
            Scalar::Bool(v) => Self::Bool(*v),
            Scalar::Int64(v) => Self::Int64(*v),
            Scalar::Float64(v) if v.is_nan() => Self::Null(NullKind::NaN),
            Scalar::Float64(v) if *v == v.trunc() && v.abs() < 9.0e15 => Self::Int64(*v as i64),
            Scalar::Float64(v) => Self::FloatBits(v.to_bits()),
            Scalar::Utf8(v) => Self::Utf8(v.as_str()),
            Scalar::Timestamp(v) => Self::Timestamp(*v),
            Scalar::Timedelta(v) => Self::Timedelta(*v),
            Scalar::Null(kind) => Self::Null(*kind),
        }
    }
}

impl Column {
    /// Construct a column, coercing values to the target dtype.
    /// Takes ownership of the values vec and skips the cast when values
    /// already have the correct dtype.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let needs_coercion = values.iter().any(|v| {
            let d = v.dtype();
            d != dtype && d != DType::Null
        });

        let coerced = if needs_coercion {
            values
                .into_iter()
                .map(|value| cast_scalar_owned(value, dtype))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            values
                .into_iter()
                .map(|value| match value {
                    Scalar::Null(_) => Scalar::missing_for_dtype(dtype),
                    other => other,
                })
                .collect()
        };

        let validity = ValidityMask::from_values(&coerced);

        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    /// Like `from_values`, but an all-missing or empty result keeps
    /// `fallback` as its dtype instead of collapsing to `Null`.
    pub fn from_values_or(fallback: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let inferred = infer_dtype(&values)?;
        let dtype = if inferred == DType::Null {
            fallback
        } else {
            inferred
        };
        Self::new(dtype, values)
    }

    pub fn broadcast(value: &Scalar, len: usize) -> Result<Self, ColumnError> {
        Self::from_values(vec![value.clone(); len])
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    pub fn reindex_by_positions(&self, positions: &[Option<usize>]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|slot| match slot {
                Some(idx) => self
                    .values
                    .get(*idx)
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype)),
                None => Scalar::missing_for_dtype(self.dtype),
            })
            .collect::<Vec<_>>();

        Self::new(self.dtype, values)
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|idx| {
                self.values
                    .get(*idx)
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype))
            })
            .collect::<Vec<_>>();
        Self::new(self.dtype, values)
    }

    /// Apply `func` to every value; the output dtype is inferred, falling
    /// back to `fallback` when every output is missing.
    pub fn map_values<F>(&self, fallback: DType, mut func: F) -> Result<Self, ColumnError>
    where
        F: FnMut(&Scalar) -> Result<Scalar, ColumnError>,
    {
        let values = self
            .values
            .iter()
            .map(&mut func)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_values_or(fallback, values)
    }

    pub fn binary(&self, right: &Self, op: ArithmeticOp) -> Result<Self, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }

        let out_dtype = binary_result_dtype(self.dtype, right.dtype, op)?;
        let values = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(left, right)| binary_value(left, right, op, out_dtype))
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_values_or(out_dtype, values)
    }

    pub fn compare(&self, right: &Self, op: ComparisonOp) -> Result<Self, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }

        let values = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(left, right)| scalar_compare(left, right, op).map(Scalar::Bool))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(DType::Bool, values)
    }

    pub fn compare_scalar(&self, scalar: &Scalar, op: ComparisonOp) -> Result<Self, ColumnError> {
        let values = self
            .values
            .iter()
            .map(|left| scalar_compare(left, scalar, op).map(Scalar::Bool))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(DType::Bool, values)
    }

    /// Three-valued (Kleene) logic: a missing operand only decides the
    /// result when the other operand does not.
    pub fn logical(&self, right: &Self, op: LogicalOp) -> Result<Self, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }

        let values = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(left, right)| -> Result<Scalar, ColumnError> {
                let lhs = as_kleene(left, op)?;
                let rhs = as_kleene(right, op)?;
                Ok(match (op, lhs, rhs) {
                    (LogicalOp::And, Some(false), _) | (LogicalOp::And, _, Some(false)) => {
                        Scalar::Bool(false)
                    }
                    (LogicalOp::Or, Some(true), _) | (LogicalOp::Or, _, Some(true)) => {
                        Scalar::Bool(true)
                    }
                    (_, None, _) | (_, _, None) => Scalar::Null(NullKind::Null),
                    (LogicalOp::And, Some(_), Some(_)) => Scalar::Bool(true),
                    (LogicalOp::Or, Some(_), Some(_)) => Scalar::Bool(false),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(DType::Bool, values)
    }

    pub fn not(&self) -> Result<Self, ColumnError> {
        let values = self
            .values
            .iter()
            .map(|value| match value {
                Scalar::Bool(v) => Ok(Scalar::Bool(!v)),
                Scalar::Null(_) => Ok(Scalar::Null(NullKind::Null)),
                Scalar::Float64(v) if v.is_nan() => Ok(Scalar::Null(NullKind::Null)),
                other => Err(ColumnError::UnsupportedOperands {
                    op: "~",
                    left: other.dtype().type_name(),
                    right: "bool",
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(DType::Bool, values)
    }

    pub fn reduce(&self, op: ReduceOp) -> Result<Scalar, ColumnError> {
        let present = || self.values.iter().filter(|value| !value.is_missing());
        match op {
            ReduceOp::Count => Ok(Scalar::Int64(count_as_i64(self.validity.count_valid()))),
            ReduceOp::Nunique => {
                let distinct = present().map(ValueKey::from_scalar).collect::<HashSet<_>>();
                Ok(Scalar::Int64(count_as_i64(distinct.len())))
            }
            ReduceOp::First => Ok(present()
                .next()
                .cloned()
                .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype))),
            ReduceOp::Min | ReduceOp::Max => {
                let mut best: Option<&Scalar> = None;
                for value in present() {
                    let Some(current) = best else {
                        best = Some(value);
                        continue;
                    };
                    let ordering = compare_values(value, current).ok_or(
                        ColumnError::Unorderable {
                            op: if op == ReduceOp::Min { "<" } else { ">" },
                            left: value.dtype().type_name(),
                            right: current.dtype().type_name(),
                        },
                    )?;
                    let better = if op == ReduceOp::Min {
                        ordering == Ordering::Less
                    } else {
                        ordering == Ordering::Greater
                    };
                    if better {
                        best = Some(value);
                    }
                }
                Ok(best
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype)))
            }
            ReduceOp::Sum => match self.dtype {
                DType::Null | DType::Bool | DType::Int64 => {
                    let mut total = 0_i64;
                    for value in present() {
                        total = total.wrapping_add(match value {
                            Scalar::Int64(v) => *v,
                            Scalar::Bool(v) => i64::from(*v),
                            _ => 0,
                        });
                    }
                    Ok(Scalar::Int64(total))
                }
                DType::Float64 => Ok(Scalar::Float64(
                    present().filter_map(|value| value.to_f64().ok()).sum(),
                )),
                DType::Timedelta => {
                    let mut total = 0_i64;
                    for value in present() {
                        if let Scalar::Timedelta(v) = value {
                            total = total.checked_add(*v).ok_or(ColumnError::TemporalOverflow)?;
                        }
                    }
                    Ok(Scalar::Timedelta(total))
                }
                other => Err(ColumnError::UnsupportedReduction {
                    op: "sum",
                    dtype: other.type_name(),
                }),
            },
            ReduceOp::Mean | ReduceOp::Median | ReduceOp::Std => {
                if self.dtype == DType::Timedelta && op != ReduceOp::Std {
                    let nanos = present()
                        .filter_map(|value| match value {
                            Scalar::Timedelta(v) => Some(*v as f64),
                            _ => None,
                        })
                        .collect::<Vec<_>>();
                    return Ok(match float_statistic(op, nanos) {
                        Some(v) => Scalar::Timedelta(v.round() as i64),
                        None => Scalar::Null(NullKind::NaT),
                    });
                }
                if !matches!(
                    self.dtype,
                    DType::Null | DType::Bool | DType::Int64 | DType::Float64
                ) {
                    return Err(ColumnError::UnsupportedReduction {
                        op: op.name(),
                        dtype: self.dtype.type_name(),
                    });
                }
                let numbers = present()
                    .filter_map(|value| value.to_f64().ok())
                    .collect::<Vec<_>>();
                Ok(float_statistic(op, numbers)
                    .map_or(Scalar::Null(NullKind::NaN), Scalar::Float64))
            }
        }
    }

    /// Positions in sorted order. Stable: equal and unorderable values keep
    /// their relative order; missing values always sort last.
    #[must_use]
    pub fn sort_positions(&self, ascending: bool) -> Vec<usize> {
        let mut present = Vec::with_capacity(self.values.len());
        let mut missing = Vec::new();
        for (idx, value) in self.values.iter().enumerate() {
            if value.is_missing() {
                missing.push(idx);
            } else {
                present.push(idx);
            }
        }
        present.sort_by(|a, b| {
            let ordering =
                compare_values(&self.values[*a], &self.values[*b]).unwrap_or(Ordering::Equal);
            if ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
        present.extend(missing);
        present
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| left.semantic_eq(right))
    }
}

fn count_as_i64(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn float_statistic(op: ReduceOp, mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    match op {
        ReduceOp::Mean => Some(values.iter().sum::<f64>() / n),
        ReduceOp::Median => {
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                Some((values[mid - 1] + values[mid]) / 2.0)
            } else {
                Some(values[mid])
            }
        }
        ReduceOp::Std => {
            if values.len() < 2 {
                return None;
            }
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            Some(var.sqrt())
        }
        _ => None,
    }
}

fn as_kleene(value: &Scalar, op: LogicalOp) -> Result<Option<bool>, ColumnError> {
    match value {
        Scalar::Bool(v) => Ok(Some(*v)),
        other if other.is_missing() => Ok(None),
        other => Err(ColumnError::UnsupportedOperands {
            op: if op == LogicalOp::And { "&" } else { "|" },
            left: other.dtype().type_name(),
            right: "bool",
        }),
    }
}

fn unsupported(op: ArithmeticOp, left: DType, right: DType) -> ColumnError {
    ColumnError::UnsupportedOperands {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    }
}

fn is_numeric_like(dtype: DType) -> bool {
    matches!(dtype, DType::Bool | DType::Int64 | DType::Float64)
}

/// Result dtype of `left <op> right`, or the error pandas would raise for
/// the operand pair.
pub fn binary_result_dtype(
    left: DType,
    right: DType,
    op: ArithmeticOp,
) -> Result<DType, ColumnError> {
    use ArithmeticOp::{Add, Div, Sub};
    use DType::{Float64, Int64, Null, Timedelta, Timestamp, Utf8};

    match (left, right) {
        (Timestamp, Timestamp) if op == Sub => Ok(Timedelta),
        (Timestamp, Timedelta) if matches!(op, Add | Sub) => Ok(Timestamp),
        (Timedelta, Timestamp) if op == Add => Ok(Timestamp),
        (Timedelta, Timedelta) => match op {
            Add | Sub => Ok(Timedelta),
            Div => Ok(Float64),
            _ => Err(unsupported(op, left, right)),
        },
        (Utf8, Utf8) if op == Add => Ok(Utf8),
        (Null, Null) => Ok(Float64),
        (Null, other) | (other, Null) if other.is_temporal() || other == Utf8 => Ok(other),
        (Null, other) | (other, Null) if is_numeric_like(other) => Ok(Float64),
        (a, b) if is_numeric_like(a) && is_numeric_like(b) => {
            let mut out = common_dtype(a, b)?;
            if out == DType::Bool {
                out = Int64;
            }
            if op == Div {
                out = Float64;
            }
            Ok(out)
        }
        _ => Err(unsupported(op, left, right)),
    }
}

/// Elementwise `left <op> right` for two scalars.
pub fn scalar_binary(left: &Scalar, right: &Scalar, op: ArithmeticOp) -> Result<Scalar, ColumnError> {
    let out_dtype = binary_result_dtype(left.dtype(), right.dtype(), op)?;
    binary_value(left, right, op, out_dtype)
}

fn binary_value(
    left: &Scalar,
    right: &Scalar,
    op: ArithmeticOp,
    out_dtype: DType,
) -> Result<Scalar, ColumnError> {
    if left.is_missing() || right.is_missing() {
        return Ok(if matches!(out_dtype, DType::Int64 | DType::Float64) {
            Scalar::Null(NullKind::NaN)
        } else {
            Scalar::missing_for_dtype(out_dtype)
        });
    }

    match (left, right) {
        (Scalar::Timestamp(a), Scalar::Timestamp(b)) => a
            .checked_sub(*b)
            .map(Scalar::Timedelta)
            .ok_or(ColumnError::TemporalOverflow),
        (Scalar::Timestamp(a), Scalar::Timedelta(b)) => {
            let shifted = if op == ArithmeticOp::Add {
                a.checked_add(*b)
            } else {
                a.checked_sub(*b)
            };
            shifted
                .map(Scalar::Timestamp)
                .ok_or(ColumnError::TemporalOverflow)
        }
        (Scalar::Timedelta(a), Scalar::Timestamp(b)) => a
            .checked_add(*b)
            .map(Scalar::Timestamp)
            .ok_or(ColumnError::TemporalOverflow),
        (Scalar::Timedelta(a), Scalar::Timedelta(b)) => match op {
            ArithmeticOp::Add => a
                .checked_add(*b)
                .map(Scalar::Timedelta)
                .ok_or(ColumnError::TemporalOverflow),
            ArithmeticOp::Sub => a
                .checked_sub(*b)
                .map(Scalar::Timedelta)
                .ok_or(ColumnError::TemporalOverflow),
            _ => Ok(Scalar::Float64(*a as f64 / *b as f64)),
        },
        (Scalar::Utf8(a), Scalar::Utf8(b)) => Ok(Scalar::Utf8(format!("{a}{b}"))),
        _ => {
            let lhs = left.to_f64()?;
            let rhs = right.to_f64()?;
            let result = match op {
                ArithmeticOp::Add => lhs + rhs,
                ArithmeticOp::Sub => lhs - rhs,
                ArithmeticOp::Mul => lhs * rhs,
                ArithmeticOp::Div => lhs / rhs,
                ArithmeticOp::Mod => {
                    if rhs == 0.0 {
                        f64::NAN
                    } else {
                        ((lhs % rhs) + rhs) % rhs
                    }
                }
            };

            if matches!(out_dtype, DType::Int64)
                && result.is_finite()
                && result == result.trunc()
                && result >= i64::MIN as f64
                && result <= i64::MAX as f64
            {
                Ok(Scalar::Int64(result as i64))
            } else {
                Ok(Scalar::Float64(result))
            }
        }
    }
}

/// Elementwise comparison. Missing operands compare false (true for `!=`).
/// A string compared against a timestamp is parsed as a timestamp first.
pub fn scalar_compare(left: &Scalar, right: &Scalar, op: ComparisonOp) -> Result<bool, ColumnError> {
    if left.is_missing() || right.is_missing() {
        return Ok(op == ComparisonOp::Ne);
    }

    let coerced;
    let (left, right) = match (left, right) {
        (Scalar::Timestamp(_), Scalar::Utf8(text)) => {
            coerced = Scalar::Timestamp(parse_timestamp(text).ok_or_else(|| {
                TypeError::UnparseableTimestamp {
                    value: text.clone(),
                }
            })?);
            (left, &coerced)
        }
        (Scalar::Utf8(text), Scalar::Timestamp(_)) => {
            coerced = Scalar::Timestamp(parse_timestamp(text).ok_or_else(|| {
                TypeError::UnparseableTimestamp {
                    value: text.clone(),
                }
            })?);
            (&coerced, right)
        }
        _ => (left, right),
    };

    match compare_values(left, right) {
        Some(ordering) => Ok(match op {
            ComparisonOp::Gt => ordering == Ordering::Greater,
            ComparisonOp::Lt => ordering == Ordering::Less,
            ComparisonOp::Eq => ordering == Ordering::Equal,
            ComparisonOp::Ne => ordering != Ordering::Equal,
            ComparisonOp::Ge => ordering != Ordering::Less,
            ComparisonOp::Le => ordering != Ordering::Greater,
        }),
        None => match op {
            ComparisonOp::Eq => Ok(false),
            ComparisonOp::Ne => Ok(true),
            _ => Err(ColumnError::Unorderable {
                op: op.symbol(),
                left: left.dtype().type_name(),
                right: right.dtype().type_name(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use af_types::{DType, NANOS_PER_DAY, NullKind, Scalar};

    use super::{ArithmeticOp, Column, ColumnError, ComparisonOp, LogicalOp, ReduceOp};

    #[test]
    fn reindex_injects_missing_values() {
        let column = Column::from_values(vec![Scalar::Int64(10), Scalar::Int64(20)])
            .expect("column should build");

        let out = column
            .reindex_by_positions(&[Some(1), None, Some(0)])
            .expect("reindex should work");

        assert_eq!(
            out.values(),
            &[
                Scalar::Int64(20),
                Scalar::Null(NullKind::Null),
                Scalar::Int64(10)
            ]
        );
    }

    #[test]
    fn numeric_addition_propagates_missing() {
        let left = Column::from_values(vec![
            Scalar::Int64(1),
            Scalar::Null(NullKind::Null),
            Scalar::Float64(f64::NAN),
        ])
        .expect("left");
        let right = Column::from_values(vec![Scalar::Int64(2), Scalar::Int64(5), Scalar::Int64(3)])
            .expect("right");

        let out = left
            .binary(&right, ArithmeticOp::Add)
            .expect("add should pass");

        assert_eq!(out.values()[0], Scalar::Float64(3.0));
        assert!(out.values()[1].is_missing());
        assert!(out.values()[2].is_missing());
    }

    #[test]
    fn timestamp_difference_is_timedelta() {
        let later = Column::from_values(vec![Scalar::Timestamp(3 * NANOS_PER_DAY)]).expect("later");
        let earlier = Column::from_values(vec![Scalar::Timestamp(NANOS_PER_DAY)]).expect("earlier");
        let out = later.binary(&earlier, ArithmeticOp::Sub).expect("sub");
        assert_eq!(out.dtype(), DType::Timedelta);
        assert_eq!(out.values(), &[Scalar::Timedelta(2 * NANOS_PER_DAY)]);
    }

    #[test]
    fn string_minus_int_is_rejected() {
        let left = Column::from_values(vec![Scalar::from("2018Q3")]).expect("left");
        let right = Column::from_values(vec![Scalar::Int64(1)]).expect("right");
        let err = left.binary(&right, ArithmeticOp::Sub).expect_err("must fail");
        assert_eq!(
            err.to_string(),
            "unsupported operand types for -: 'object' and 'int64'"
        );
    }

    #[test]
    fn comparison_treats_missing_as_false_except_ne() {
        let column = Column::from_values(vec![Scalar::Int64(5), Scalar::Null(NullKind::Null)])
            .expect("column");
        let gt = column
            .compare_scalar(&Scalar::Int64(1), ComparisonOp::Gt)
            .expect("gt");
        assert_eq!(gt.values(), &[Scalar::Bool(true), Scalar::Bool(false)]);
        let ne = column
            .compare_scalar(&Scalar::Int64(5), ComparisonOp::Ne)
            .expect("ne");
        assert_eq!(ne.values(), &[Scalar::Bool(false), Scalar::Bool(true)]);
    }

    #[test]
    fn timestamp_compares_against_date_string() {
        let column = Column::from_values(vec![
            Scalar::Timestamp(0),
            Scalar::Timestamp(400 * NANOS_PER_DAY),
        ])
        .expect("column");
        let out = column
            .compare_scalar(&Scalar::from("1971-01-01"), ComparisonOp::Ge)
            .expect("compare");
        assert_eq!(out.values(), &[Scalar::Bool(false), Scalar::Bool(true)]);
    }

    #[test]
    fn ordering_strings_against_numbers_fails() {
        let column = Column::from_values(vec![Scalar::from("SP")]).expect("column");
        let err = column
            .compare_scalar(&Scalar::Int64(1), ComparisonOp::Gt)
            .expect_err("must fail");
        assert!(matches!(err, ColumnError::Unorderable { .. }));
    }

    #[test]
    fn kleene_logic_matches_three_valued_truth_table() {
        let left = Column::from_values(vec![
            Scalar::Bool(true),
            Scalar::Bool(false),
            Scalar::Null(NullKind::Null),
        ])
        .expect("left");
        let right = Column::from_values(vec![
            Scalar::Null(NullKind::Null),
            Scalar::Null(NullKind::Null),
            Scalar::Bool(true),
        ])
        .expect("right");

        let and = left.logical(&right, LogicalOp::And).expect("and");
        assert_eq!(
            and.values(),
            &[
                Scalar::Null(NullKind::Null),
                Scalar::Bool(false),
                Scalar::Null(NullKind::Null)
            ]
        );
        let or = left.logical(&right, LogicalOp::Or).expect("or");
        assert_eq!(
            or.values(),
            &[
                Scalar::Bool(true),
                Scalar::Null(NullKind::Null),
                Scalar::Bool(true)
            ]
        );
    }

    #[test]
    fn reductions_skip_missing_values() {
        let column = Column::from_values(vec![
            Scalar::Float64(1.0),
            Scalar::Float64(f64::NAN),
            Scalar::Float64(3.0),
        ])
        .expect("column");
        assert_eq!(column.reduce(ReduceOp::Sum).expect("sum"), Scalar::Float64(4.0));
        assert_eq!(column.reduce(ReduceOp::Mean).expect("mean"), Scalar::Float64(2.0));
        assert_eq!(column.reduce(ReduceOp::Count).expect("count"), Scalar::Int64(2));
        assert_eq!(column.reduce(ReduceOp::Max).expect("max"), Scalar::Float64(3.0));
    }

    #[test]
    fn empty_reductions_follow_pandas_identities() {
        let column = Column::new(DType::Float64, Vec::new()).expect("empty");
        assert_eq!(column.reduce(ReduceOp::Sum).expect("sum"), Scalar::Float64(0.0));
        assert!(column.reduce(ReduceOp::Mean).expect("mean").is_missing());
        assert!(column.reduce(ReduceOp::Max).expect("max").is_missing());
    }

    #[test]
    fn nunique_counts_distinct_present_values() {
        let column = Column::from_values(vec![
            Scalar::from("a"),
            Scalar::from("b"),
            Scalar::from("a"),
            Scalar::Null(NullKind::Null),
        ])
        .expect("column");
        assert_eq!(column.reduce(ReduceOp::Nunique).expect("nunique"), Scalar::Int64(2));
    }

    #[test]
    fn sort_positions_is_stable_with_missing_last() {
        let column = Column::from_values(vec![
            Scalar::Int64(2),
            Scalar::Null(NullKind::Null),
            Scalar::Int64(5),
            Scalar::Int64(2),
        ])
        .expect("column");
        assert_eq!(column.sort_positions(false), vec![2, 0, 3, 1]);
        assert_eq!(column.sort_positions(true), vec![0, 3, 2, 1]);
    }

    #[test]
    fn reduce_op_serializes_as_snake_case() {
        let json = serde_json::to_string(&ReduceOp::Nunique).expect("serialize");
        assert_eq!(json, "\"nunique\"");
        assert_eq!(ReduceOp::from_name("nunique"), Some(ReduceOp::Nunique));
    }
}
