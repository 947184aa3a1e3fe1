#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
pub const NANOS_PER_DAY: i64 = 86_400 * NANOS_PER_SECOND;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
    Timestamp,
    Timedelta,
}

impl DType {
    /// True for the dtypes `select_dtypes(include="number")` keeps.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }

    #[must_use]
    pub fn is_temporal(self) -> bool {
        matches!(self, Self::Timestamp | Self::Timedelta)
    }

    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Null => "NoneType",
            Self::Bool => "bool",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Utf8 => "object",
            Self::Timestamp => "datetime64[ns]",
            Self::Timedelta => "timedelta64[ns]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
    NaT,
}

/// A single cell value. Timestamps and timedeltas are nanosecond counts
/// (timestamps relative to the Unix epoch, no timezone).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Timestamp(i64),
    Timedelta(i64),
}

impl Scalar {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(_) => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
            Self::Timestamp(_) => DType::Timestamp,
            Self::Timedelta(_) => DType::Timedelta,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Null(NullKind::NaN)) || matches!(self, Self::Float64(v) if v.is_nan())
    }

    #[must_use]
    pub fn missing_for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::Float64 => Self::Null(NullKind::NaN),
            DType::Timestamp | DType::Timedelta => Self::Null(NullKind::NaT),
            DType::Null | DType::Bool | DType::Int64 | DType::Utf8 => Self::Null(NullKind::Null),
        }
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => (a.is_nan() && b.is_nan()) || (a == b),
            (Self::Null(NullKind::NaN), Self::Float64(v))
            | (Self::Float64(v), Self::Null(NullKind::NaN)) => v.is_nan(),
            _ => self == other,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind: *kind }),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Utf8,
            }),
            Self::Timestamp(_) | Self::Timedelta(_) => Err(TypeError::NonNumericValue {
                value: self.to_string(),
                dtype: self.dtype(),
            }),
        }
    }

    /// Python truthiness, used when a scalar lands in a boolean context.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null(_) => false,
            Self::Bool(v) => *v,
            Self::Int64(v) => *v != 0,
            Self::Float64(v) => *v != 0.0 && !v.is_nan(),
            Self::Utf8(v) => !v.is_empty(),
            Self::Timestamp(_) => true,
            Self::Timedelta(v) => *v != 0,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null(NullKind::Null) => write!(f, "None"),
            Self::Null(NullKind::NaN) => write!(f, "NaN"),
            Self::Null(NullKind::NaT) => write!(f, "NaT"),
            Self::Bool(v) => write!(f, "{}", if *v { "True" } else { "False" }),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) if v.is_nan() => write!(f, "NaN"),
            Self::Float64(v) => write!(f, "{v:?}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", format_timestamp(*v)),
            Self::Timedelta(v) => write!(f, "{}", format_timedelta(*v)),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("dtype coercion from {left:?} to {right:?} has no compatible common type")]
    IncompatibleDtypes { left: DType, right: DType },
    #[error("cannot cast scalar of dtype {from:?} to {to:?}")]
    InvalidCast { from: DType, to: DType },
    #[error("cannot cast float {value} to int64 without loss")]
    LossyFloatToInt { value: f64 },
    #[error("expected 0/1 for bool cast from int64 but found {value}")]
    InvalidBoolInt { value: i64 },
    #[error("expected 0.0/1.0 for bool cast from float64 but found {value}")]
    InvalidBoolFloat { value: f64 },
    #[error("value {value:?} has non-numeric dtype {dtype:?}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is missing ({kind:?})")]
    ValueIsMissing { kind: NullKind },
    #[error("could not parse {value:?} as a timestamp")]
    UnparseableTimestamp { value: String },
}

pub fn common_dtype(left: DType, right: DType) -> Result<DType, TypeError> {
    use DType::{Bool, Float64, Int64, Null};

    let out = match (left, right) {
        (a, b) if a == b => a,
        (Null, other) | (other, Null) => other,
        (Bool, Int64) | (Int64, Bool) => Int64,
        (Bool, Float64) | (Float64, Bool) => Float64,
        (Int64, Float64) | (Float64, Int64) => Float64,
        _ => return Err(TypeError::IncompatibleDtypes { left, right }),
    };

    Ok(out)
}

pub fn infer_dtype(values: &[Scalar]) -> Result<DType, TypeError> {
    let mut current = DType::Null;
    for value in values {
        current = common_dtype(current, value.dtype())?;
    }
    Ok(current)
}

pub fn cast_scalar(value: &Scalar, target: DType) -> Result<Scalar, TypeError> {
    cast_scalar_owned(value.clone(), target)
}

pub fn cast_scalar_owned(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    let from = value.dtype();
    if let Scalar::Null(_) = value {
        return Ok(Scalar::missing_for_dtype(target));
    }
    if from == target {
        return Ok(value);
    }

    match target {
        DType::Null => Ok(Scalar::Null(NullKind::Null)),
        DType::Bool => match value {
            Scalar::Int64(v) => match v {
                0 => Ok(Scalar::Bool(false)),
                1 => Ok(Scalar::Bool(true)),
                _ => Err(TypeError::InvalidBoolInt { value: v }),
            },
            Scalar::Float64(v) => {
                if v == 0.0 {
                    Ok(Scalar::Bool(false))
                } else if v == 1.0 {
                    Ok(Scalar::Bool(true))
                } else {
                    Err(TypeError::InvalidBoolFloat { value: v })
                }
            }
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Int64 => match value {
            Scalar::Bool(v) => Ok(Scalar::Int64(i64::from(v))),
            Scalar::Float64(v) => {
                if !v.is_finite() || v != v.trunc() {
                    return Err(TypeError::LossyFloatToInt { value: v });
                }
                if v < i64::MIN as f64 || v > i64::MAX as f64 {
                    return Err(TypeError::LossyFloatToInt { value: v });
                }
                Ok(Scalar::Int64(v as i64))
            }
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Float64 => match value {
            Scalar::Bool(v) => Ok(Scalar::Float64(if v { 1.0 } else { 0.0 })),
            Scalar::Int64(v) => Ok(Scalar::Float64(v as f64)),
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Utf8 => Err(TypeError::InvalidCast { from, to: target }),
        DType::Timestamp => match value {
            Scalar::Utf8(text) => parse_timestamp(&text)
                .map(Scalar::Timestamp)
                .ok_or(TypeError::UnparseableTimestamp { value: text }),
            Scalar::Int64(v) => Ok(Scalar::Timestamp(v)),
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Timedelta => match value {
            Scalar::Int64(v) => Ok(Scalar::Timedelta(v)),
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
    }
}

/// Ordering between two present values of compatible dtypes. Missing values
/// and cross-family pairs (string vs number, timestamp vs number) are
/// unordered.
#[must_use]
pub fn compare_values(left: &Scalar, right: &Scalar) -> Option<Ordering> {
    if left.is_missing() || right.is_missing() {
        return None;
    }
    match (left, right) {
        (Scalar::Int64(a), Scalar::Int64(b)) => Some(a.cmp(b)),
        (Scalar::Utf8(a), Scalar::Utf8(b)) => Some(a.cmp(b)),
        (Scalar::Timestamp(a), Scalar::Timestamp(b))
        | (Scalar::Timedelta(a), Scalar::Timedelta(b)) => Some(a.cmp(b)),
        (
            Scalar::Bool(_) | Scalar::Int64(_) | Scalar::Float64(_),
            Scalar::Bool(_) | Scalar::Int64(_) | Scalar::Float64(_),
        ) => {
            let a = left.to_f64().ok()?;
            let b = right.to_f64().ok()?;
            a.partial_cmp(&b)
        }
        _ => None,
    }
}

// ── Timestamps ─────────────────────────────────────────────────────────

#[must_use]
pub fn timestamp_to_datetime(nanos: i64) -> Option<NaiveDateTime> {
    let secs = nanos.div_euclid(NANOS_PER_SECOND);
    let sub = u32::try_from(nanos.rem_euclid(NANOS_PER_SECOND)).ok()?;
    DateTime::from_timestamp(secs, sub).map(|dt| dt.naive_utc())
}

#[must_use]
pub fn datetime_to_timestamp(value: NaiveDateTime) -> Option<i64> {
    value.and_utc().timestamp_nanos_opt()
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parse the timestamp spellings the dataset and generated expressions use:
/// full datetimes, plain dates, `YYYY-MM` and bare years.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return datetime_to_timestamp(parsed);
        }
    }
    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{trimmed}-01-01"), "%Y-%m-%d"))
        .ok()?;
    datetime_to_timestamp(date.and_hms_opt(0, 0, 0)?)
}

#[must_use]
pub fn format_timestamp(nanos: i64) -> String {
    match timestamp_to_datetime(nanos) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "NaT".to_owned(),
    }
}

#[must_use]
pub fn format_timedelta(nanos: i64) -> String {
    let days = nanos.div_euclid(NANOS_PER_DAY);
    let rest = nanos.rem_euclid(NANOS_PER_DAY) / NANOS_PER_SECOND;
    format!(
        "{days} days {:02}:{:02}:{:02}",
        rest / 3600,
        (rest % 3600) / 60,
        rest % 60
    )
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{
        DType, NANOS_PER_DAY, NullKind, Scalar, cast_scalar, common_dtype, compare_values,
        format_timedelta, format_timestamp, infer_dtype, parse_timestamp,
    };

    #[test]
    fn dtype_inference_coerces_numeric_values() {
        let values = vec![Scalar::Bool(true), Scalar::Int64(7), Scalar::Float64(3.5)];
        assert_eq!(
            infer_dtype(&values).expect("dtype should infer"),
            DType::Float64
        );
    }

    #[test]
    fn missing_values_get_target_missing_marker() {
        let missing = Scalar::Null(NullKind::Null);
        let cast = cast_scalar(&missing, DType::Float64).expect("missing casts");
        assert_eq!(cast, Scalar::Null(NullKind::NaN));

        let cast = cast_scalar(&missing, DType::Timestamp).expect("missing casts");
        assert_eq!(cast, Scalar::Null(NullKind::NaT));
    }

    #[test]
    fn semantic_eq_treats_nan_as_equal() {
        let left = Scalar::Float64(f64::NAN);
        let right = Scalar::Null(NullKind::NaN);
        assert!(left.semantic_eq(&right));
    }

    #[test]
    fn common_dtype_rejects_string_numeric_mix() {
        let err = common_dtype(DType::Utf8, DType::Int64).expect_err("must fail");
        assert_eq!(
            err.to_string(),
            "dtype coercion from Utf8 to Int64 has no compatible common type"
        );
    }

    #[test]
    fn timestamps_parse_common_spellings() {
        let full = parse_timestamp("2018-08-29 15:00:37").expect("full");
        assert_eq!(format_timestamp(full), "2018-08-29 15:00:37");

        let date = parse_timestamp("2018-08-29").expect("date");
        assert_eq!(format_timestamp(date), "2018-08-29 00:00:00");

        let month = parse_timestamp("2018-08").expect("month");
        assert_eq!(format_timestamp(month), "2018-08-01 00:00:00");

        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn utf8_casts_to_timestamp() {
        let cast = cast_scalar(&Scalar::from("2017-01-05"), DType::Timestamp).expect("cast");
        assert!(matches!(cast, Scalar::Timestamp(_)));
        assert!(cast_scalar(&Scalar::from("garbage"), DType::Timestamp).is_err());
    }

    #[test]
    fn compare_values_orders_within_families_only() {
        assert_eq!(
            compare_values(&Scalar::Int64(3), &Scalar::Float64(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare_values(&Scalar::from("RJ"), &Scalar::from("SP")),
            Some(Ordering::Less)
        );
        assert_eq!(compare_values(&Scalar::from("1"), &Scalar::Int64(1)), None);
        assert_eq!(
            compare_values(&Scalar::Null(NullKind::NaN), &Scalar::Int64(1)),
            None
        );
    }

    #[test]
    fn timedelta_renders_days_and_clock() {
        let delta = 3 * NANOS_PER_DAY + 4 * 3_600 * 1_000_000_000;
        assert_eq!(format_timedelta(delta), "3 days 04:00:00");
        assert_eq!(Scalar::Timedelta(delta).to_string(), "3 days 04:00:00");
    }

    #[test]
    fn scalar_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Scalar::from("SP")).expect("serialize");
        assert_eq!(json, r#"{"kind":"utf8","value":"SP"}"#);
    }

    #[test]
    fn float_display_keeps_decimal_point() {
        assert_eq!(Scalar::Float64(350.0).to_string(), "350.0");
        assert_eq!(Scalar::Float64(f64::NAN).to_string(), "NaN");
    }
}
