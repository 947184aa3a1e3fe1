#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use af_columnar::{Column, ColumnError};
use af_frame::{DataFrame, FrameError};
use af_index::Index;
use af_types::{DType, NullKind, Scalar, parse_timestamp};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("dataset is missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("column '{column}' must be numeric; found '{value}' at row {row}")]
    NonNumericColumn {
        column: String,
        value: String,
        row: usize,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// What a required column must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Timestamp,
    Numeric,
    /// Short categorical code, kept verbatim as text.
    Code,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredColumn {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub required: Vec<RequiredColumn>,
}

impl DatasetSchema {
    /// The merged Olist orders table.
    #[must_use]
    pub fn olist() -> Self {
        let column = |name: &str, kind| RequiredColumn {
            name: name.to_owned(),
            kind,
        };
        Self {
            required: vec![
                column("order_purchase_timestamp", ColumnKind::Timestamp),
                column("payment_value", ColumnKind::Numeric),
                column("review_score", ColumnKind::Numeric),
                column("customer_state", ColumnKind::Code),
                column("category_name_en", ColumnKind::String),
            ],
        }
    }

    /// No required columns; every column is inferred.
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.required
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.kind)
    }
}

/// Columns named like `*timestamp*` or `*date*` hold timestamps.
#[must_use]
pub fn is_temporal_name(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    lowered.contains("timestamp") || lowered.contains("date")
}

pub fn read_csv_path(path: &Path, schema: &DatasetSchema) -> Result<DataFrame, IoError> {
    let file = std::fs::File::open(path)?;
    read_csv(file, schema)
}

pub fn read_csv_str(input: &str, schema: &DatasetSchema) -> Result<DataFrame, IoError> {
    read_csv(input.as_bytes(), schema)
}

/// Parse CSV with a header row. Column order follows the header; later
/// duplicate header names get a `.N` suffix.
pub fn read_csv<R: Read>(input: R, schema: &DatasetSchema) -> Result<DataFrame, IoError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(IoError::MissingHeaders);
    }
    let names = dedupe_headers(headers.iter());

    let missing = schema
        .required
        .iter()
        .filter(|column| !names.contains(&column.name))
        .map(|column| column.name.clone())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(IoError::MissingColumns(missing));
    }

    let mut raw = vec![Vec::<String>::new(); names.len()];
    for row in reader.records() {
        let record = row?;
        for (idx, values) in raw.iter_mut().enumerate() {
            values.push(record.get(idx).unwrap_or_default().trim().to_owned());
        }
    }

    let row_count = raw.first().map_or(0, Vec::len);
    let mut columns = BTreeMap::new();
    for (name, values) in names.iter().zip(raw) {
        let column = match schema.kind_of(name) {
            Some(ColumnKind::Timestamp) => timestamp_column(&values)?,
            Some(ColumnKind::Numeric) => numeric_column(name, &values)?,
            Some(ColumnKind::Code | ColumnKind::String) => text_column(&values)?,
            None if is_temporal_name(name) => timestamp_column(&values)?,
            None => infer_column(&values)?,
        };
        columns.insert(name.clone(), column);
    }

    Ok(DataFrame::new_with_column_order(
        Index::range(row_count),
        columns,
        names,
    )?)
}

fn dedupe_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut names = Vec::new();
    for header in headers {
        let base = header.trim().to_owned();
        let count = seen.entry(base.clone()).or_insert(0);
        names.push(if *count == 0 {
            base
        } else {
            format!("{base}.{count}")
        });
        *count += 1;
    }
    names
}

fn timestamp_column(values: &[String]) -> Result<Column, IoError> {
    let parsed = values
        .iter()
        .map(|text| parse_timestamp(text).map_or(Scalar::Null(NullKind::NaT), Scalar::Timestamp))
        .collect();
    Ok(Column::new(DType::Timestamp, parsed)?)
}

fn parse_number(text: &str) -> Option<Scalar> {
    if let Ok(value) = text.parse::<i64>() {
        return Some(Scalar::Int64(value));
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_nan() => Some(Scalar::Null(NullKind::NaN)),
        Ok(value) => Some(Scalar::Float64(value)),
        Err(_) => None,
    }
}

fn is_missing_marker(text: &str) -> bool {
    matches!(text, "" | "NA" | "N/A" | "NaN" | "nan" | "null" | "NULL" | "None")
}

fn numeric_column(name: &str, values: &[String]) -> Result<Column, IoError> {
    let mut parsed = Vec::with_capacity(values.len());
    for (row, text) in values.iter().enumerate() {
        if is_missing_marker(text) {
            parsed.push(Scalar::Null(NullKind::NaN));
            continue;
        }
        let value = parse_number(text).ok_or_else(|| IoError::NonNumericColumn {
            column: name.to_owned(),
            value: text.clone(),
            row,
        })?;
        parsed.push(value);
    }
    // Missing cells force float storage, as with NaN in an integer column.
    if parsed.iter().any(Scalar::is_missing) {
        return Ok(Column::new(DType::Float64, parsed)?);
    }
    Ok(Column::from_values_or(DType::Float64, parsed)?)
}

fn text_column(values: &[String]) -> Result<Column, IoError> {
    let parsed = values
        .iter()
        .map(|text| {
            if text.is_empty() {
                Scalar::Null(NullKind::Null)
            } else {
                Scalar::Utf8(text.clone())
            }
        })
        .collect();
    Ok(Column::new(DType::Utf8, parsed)?)
}

/// Whole-column inference: integers, then floats, then booleans, else text.
fn infer_column(values: &[String]) -> Result<Column, IoError> {
    let present = || values.iter().filter(|text| !is_missing_marker(text));
    if present().next().is_some() && present().all(|text| parse_number(text).is_some()) {
        return numeric_column("", values);
    }
    let as_bool = |text: &str| match text {
        "True" | "true" => Some(true),
        "False" | "false" => Some(false),
        _ => None,
    };
    if present().next().is_some() && present().all(|text| as_bool(text).is_some()) {
        let parsed = values
            .iter()
            .map(|text| as_bool(text).map_or(Scalar::Null(NullKind::Null), Scalar::Bool))
            .collect();
        return Ok(Column::new(DType::Bool, parsed)?);
    }
    text_column(values)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use af_types::{DType, NullKind, Scalar, parse_timestamp};

    use super::{ColumnKind, DatasetSchema, IoError, RequiredColumn, read_csv_path, read_csv_str};

    const OLIST: &str = "\
order_id,customer_state,payment_value,review_score,order_purchase_timestamp,category_name_en,order_delivered_customer_date
o1,SP,100.5,5,2018-01-15 10:00:00,bed_bath_table,2018-01-20 09:00:00
o2,RJ,,4,2018-02-01 08:00:00,health_beauty,not a date
o3,SP,20,,2018-03-03 12:30:00,,
";

    #[test]
    fn olist_schema_types_columns() {
        let frame = read_csv_str(OLIST, &DatasetSchema::olist()).expect("read");
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.column_names()[0], "order_id");
        assert_eq!(frame.column_names()[6], "order_delivered_customer_date");

        let payments = frame.column("payment_value").expect("payments");
        assert_eq!(payments.dtype(), DType::Float64);
        assert!(payments.values()[1].is_missing());

        let scores = frame.column("review_score").expect("scores");
        assert_eq!(scores.dtype(), DType::Float64);
        assert_eq!(scores.values()[0], Scalar::Float64(5.0));

        let purchased = frame.column("order_purchase_timestamp").expect("ts");
        assert_eq!(purchased.dtype(), DType::Timestamp);
        assert_eq!(
            purchased.values()[0],
            Scalar::Timestamp(parse_timestamp("2018-01-15 10:00:00").expect("ts"))
        );

        let delivered = frame.column("order_delivered_customer_date").expect("date");
        assert_eq!(delivered.dtype(), DType::Timestamp);
        assert_eq!(delivered.values()[1], Scalar::Null(NullKind::NaT));
        assert_eq!(delivered.values()[2], Scalar::Null(NullKind::NaT));

        assert_eq!(frame.column("customer_state").expect("state").dtype(), DType::Utf8);
    }

    #[test]
    fn missing_required_columns_are_reported() {
        let err = read_csv_str("order_id,payment_value\no1,3\n", &DatasetSchema::olist())
            .expect_err("schema");
        let IoError::MissingColumns(missing) = &err else {
            panic!("unexpected error: {err}");
        };
        assert!(missing.contains(&"customer_state".to_owned()));
        assert!(!missing.contains(&"payment_value".to_owned()));
        assert!(err.to_string().starts_with("dataset is missing required column(s): "));
    }

    #[test]
    fn non_numeric_required_column_fails_loading() {
        let schema = DatasetSchema {
            required: vec![RequiredColumn {
                name: "payment_value".into(),
                kind: ColumnKind::Numeric,
            }],
        };
        let err = read_csv_str("payment_value\n1\nabc\n", &schema).expect_err("numeric");
        assert!(matches!(
            err,
            IoError::NonNumericColumn { ref value, row: 1, .. } if value == "abc"
        ));
    }

    #[test]
    fn permissive_schema_infers_by_column() {
        let frame = read_csv_str("a,b,c,d\n1,x,1.5,true\n2,,2,false\n", &DatasetSchema::permissive())
            .expect("read");
        assert_eq!(frame.column("a").expect("a").dtype(), DType::Int64);
        assert_eq!(frame.column("b").expect("b").dtype(), DType::Utf8);
        assert_eq!(frame.column("c").expect("c").dtype(), DType::Float64);
        assert_eq!(frame.column("d").expect("d").dtype(), DType::Bool);
    }

    #[test]
    fn duplicate_headers_get_suffixes() {
        let frame = read_csv_str("x,x,x\n1,2,3\n", &DatasetSchema::permissive()).expect("read");
        assert_eq!(frame.column_names(), ["x", "x.1", "x.2"]);
    }

    #[test]
    fn reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(OLIST.as_bytes()).expect("write");
        let frame = read_csv_path(file.path(), &DatasetSchema::olist()).expect("read");
        assert_eq!(frame.shape(), (3, 7));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = read_csv_path(&dir.path().join("absent.csv"), &DatasetSchema::olist())
            .expect_err("missing");
        assert!(matches!(err, IoError::Io(_)));
    }
}
