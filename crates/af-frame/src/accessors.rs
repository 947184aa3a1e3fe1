//! `.dt` and `.str` accessor kernels.

use af_columnar::ColumnError;
use af_types::{
    DType, NANOS_PER_DAY, NullKind, Scalar, datetime_to_timestamp, timestamp_to_datetime,
};
use chrono::{Datelike, Timelike};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::{FrameError, Series};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatetimeField {
    Year,
    Month,
    Day,
    Quarter,
    DayOfWeek,
    Hour,
    Date,
    Days,
}

impl DatetimeField {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "year" => Self::Year,
            "month" => Self::Month,
            "day" => Self::Day,
            "quarter" => Self::Quarter,
            "dayofweek" | "weekday" => Self::DayOfWeek,
            "hour" => Self::Hour,
            "date" => Self::Date,
            "days" => Self::Days,
            _ => return None,
        })
    }
}

/// Extract a calendar field from a timestamp, or whole days from a
/// timedelta. Missing input gives a missing output.
pub fn datetime_field(value: &Scalar, field: DatetimeField) -> Result<Scalar, ColumnError> {
    let mismatch = |dtype: DType| ColumnError::UnsupportedReduction {
        op: "dt",
        dtype: dtype.type_name(),
    };

    match (value, field) {
        (Scalar::Null(_), DatetimeField::Date) => Ok(Scalar::Null(NullKind::NaT)),
        (Scalar::Null(_), _) => Ok(Scalar::Null(NullKind::NaN)),
        (Scalar::Timedelta(nanos), DatetimeField::Days) => {
            Ok(Scalar::Int64(nanos.div_euclid(NANOS_PER_DAY)))
        }
        (Scalar::Timestamp(nanos), field) if field != DatetimeField::Days => {
            let Some(dt) = timestamp_to_datetime(*nanos) else {
                return Ok(Scalar::Null(NullKind::NaN));
            };
            Ok(match field {
                DatetimeField::Year => Scalar::Int64(i64::from(dt.year())),
                DatetimeField::Month => Scalar::Int64(i64::from(dt.month())),
                DatetimeField::Day => Scalar::Int64(i64::from(dt.day())),
                DatetimeField::Quarter => Scalar::Int64(i64::from((dt.month() - 1) / 3 + 1)),
                DatetimeField::DayOfWeek => {
                    Scalar::Int64(i64::from(dt.weekday().num_days_from_monday()))
                }
                DatetimeField::Hour => Scalar::Int64(i64::from(dt.hour())),
                DatetimeField::Date => dt
                    .date()
                    .and_hms_opt(0, 0, 0)
                    .and_then(datetime_to_timestamp)
                    .map_or(Scalar::Null(NullKind::NaT), Scalar::Timestamp),
                DatetimeField::Days => Scalar::Null(NullKind::NaN),
            })
        }
        (other, _) => Err(mismatch(other.dtype())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodFreq {
    Year,
    Quarter,
    Month,
    Day,
}

impl PeriodFreq {
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code.to_ascii_uppercase().as_str() {
            "Y" | "A" | "YE" => Self::Year,
            "Q" | "QE" => Self::Quarter,
            "M" | "ME" => Self::Month,
            "D" => Self::Day,
            _ => return None,
        })
    }
}

/// Period label of a timestamp: `2018`, `2018Q3`, `2018-07` or `2018-07-04`.
/// Labels of one frequency sort chronologically as text.
#[must_use]
pub fn period_label(nanos: i64, freq: PeriodFreq) -> Option<String> {
    let dt = timestamp_to_datetime(nanos)?;
    Some(match freq {
        PeriodFreq::Year => format!("{}", dt.year()),
        PeriodFreq::Quarter => format!("{}Q{}", dt.year(), (dt.month() - 1) / 3 + 1),
        PeriodFreq::Month => dt.format("%Y-%m").to_string(),
        PeriodFreq::Day => dt.format("%Y-%m-%d").to_string(),
    })
}

/// String kernels behind `.str`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StringOp {
    Lower,
    Upper,
    Strip,
    Len,
    Contains {
        pattern: String,
        case_sensitive: bool,
        regex: bool,
    },
    StartsWith { prefix: String },
    EndsWith { suffix: String },
}

impl Series {
    fn require_dtype(&self, accepted: &[DType], accessor: &str) -> Result<(), FrameError> {
        if self.dtype() == DType::Null || accepted.contains(&self.dtype()) {
            Ok(())
        } else {
            Err(FrameError::CompatibilityRejected(format!(
                "Can only use .{accessor} accessor with {} values",
                if accessor == "str" { "string" } else { "datetimelike" }
            )))
        }
    }

    pub fn dt_field(&self, field: DatetimeField) -> Result<Self, FrameError> {
        self.require_dtype(&[DType::Timestamp, DType::Timedelta], "dt")?;
        let fallback = if field == DatetimeField::Date {
            DType::Timestamp
        } else {
            DType::Int64
        };
        self.map_values(fallback, |value| datetime_field(value, field))
    }

    pub fn dt_to_period(&self, freq: PeriodFreq) -> Result<Self, FrameError> {
        self.require_dtype(&[DType::Timestamp], "dt")?;
        self.map_values(DType::Utf8, |value| {
            Ok(match value {
                Scalar::Timestamp(nanos) => period_label(*nanos, freq)
                    .map_or(Scalar::Null(NullKind::NaT), Scalar::Utf8),
                _ => Scalar::Null(NullKind::NaT),
            })
        })
    }

    pub fn str_op(&self, op: &StringOp) -> Result<Self, FrameError> {
        self.require_dtype(&[DType::Utf8], "str")?;

        let matcher = match op {
            StringOp::Contains {
                pattern,
                case_sensitive,
                regex,
            } => {
                let source = if *regex {
                    pattern.clone()
                } else {
                    regex::escape(pattern)
                };
                let compiled = RegexBuilder::new(&source)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|err| FrameError::CompatibilityRejected(err.to_string()))?;
                Some(compiled)
            }
            _ => None,
        };

        let fallback = match op {
            StringOp::Lower | StringOp::Upper | StringOp::Strip => DType::Utf8,
            StringOp::Len => DType::Int64,
            _ => DType::Bool,
        };

        self.map_values(fallback, |value| {
            let Scalar::Utf8(text) = value else {
                return Ok(Scalar::Null(NullKind::NaN));
            };
            Ok(match op {
                StringOp::Lower => Scalar::Utf8(text.to_lowercase()),
                StringOp::Upper => Scalar::Utf8(text.to_uppercase()),
                StringOp::Strip => Scalar::Utf8(text.trim().to_owned()),
                StringOp::Len => {
                    Scalar::Int64(i64::try_from(text.chars().count()).unwrap_or(i64::MAX))
                }
                StringOp::Contains { .. } => {
                    Scalar::Bool(matcher.as_ref().is_some_and(|re| re.is_match(text)))
                }
                StringOp::StartsWith { prefix } => Scalar::Bool(text.starts_with(prefix.as_str())),
                StringOp::EndsWith { suffix } => Scalar::Bool(text.ends_with(suffix.as_str())),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use af_types::{NANOS_PER_DAY, Scalar, parse_timestamp};

    use super::{DatetimeField, PeriodFreq, StringOp, datetime_field, period_label};
    use crate::Series;

    fn ts(text: &str) -> i64 {
        parse_timestamp(text).expect("timestamp")
    }

    #[test]
    fn quarter_and_period_labels() {
        let nanos = ts("2018-08-15 10:30:00");
        assert_eq!(
            datetime_field(&Scalar::Timestamp(nanos), DatetimeField::Quarter).expect("quarter"),
            Scalar::Int64(3)
        );
        assert_eq!(period_label(nanos, PeriodFreq::Quarter).as_deref(), Some("2018Q3"));
        assert_eq!(period_label(nanos, PeriodFreq::Month).as_deref(), Some("2018-08"));
    }

    #[test]
    fn timedelta_days_floor() {
        let value = Scalar::Timedelta(3 * NANOS_PER_DAY + 5);
        assert_eq!(
            datetime_field(&value, DatetimeField::Days).expect("days"),
            Scalar::Int64(3)
        );
    }

    #[test]
    fn dt_accessor_rejects_text() {
        let series =
            Series::from_values("s", vec![0_i64.into()], vec![Scalar::from("SP")]).expect("series");
        let err = series.dt_field(DatetimeField::Year).expect_err("text");
        assert!(err.to_string().contains("datetimelike"));
    }

    #[test]
    fn str_contains_honours_case_flag() {
        let series = Series::from_values(
            "category_name_en",
            vec![0_i64.into(), 1_i64.into()],
            vec![Scalar::from("Health_Beauty"), Scalar::from("toys")],
        )
        .expect("series");
        let op = StringOp::Contains {
            pattern: "health".into(),
            case_sensitive: false,
            regex: true,
        };
        let out = series.str_op(&op).expect("contains");
        assert_eq!(out.values(), &[Scalar::Bool(true), Scalar::Bool(false)]);
    }
}
