use std::collections::BTreeMap;
use std::fmt::Write as _;

use af_frame::{DataFrame, Series};
use af_types::Scalar;
use serde::{Deserialize, Serialize};

use crate::sandbox::QueryValue;

pub const EMPTY_ROWS_MESSAGE: &str =
    "Query returned no rows (empty result). Try a wider time window.";

/// Rows shown before rendering elides the middle of a long result.
const MAX_RENDERED_ROWS: usize = 60;
const ELIDED_EDGE_ROWS: usize = 5;

const BRAZILIAN_STATES: [(&str, &str); 27] = [
    ("AC", "Acre"),
    ("AL", "Alagoas"),
    ("AM", "Amazonas"),
    ("AP", "Amapá"),
    ("BA", "Bahia"),
    ("CE", "Ceará"),
    ("DF", "Distrito Federal"),
    ("ES", "Espírito Santo"),
    ("GO", "Goiás"),
    ("MA", "Maranhão"),
    ("MT", "Mato Grosso"),
    ("MS", "Mato Grosso do Sul"),
    ("MG", "Minas Gerais"),
    ("PA", "Pará"),
    ("PB", "Paraíba"),
    ("PR", "Paraná"),
    ("PE", "Pernambuco"),
    ("PI", "Piauí"),
    ("RJ", "Rio de Janeiro"),
    ("RN", "Rio Grande do Norte"),
    ("RS", "Rio Grande do Sul"),
    ("RO", "Rondônia"),
    ("RR", "Roraima"),
    ("SC", "Santa Catarina"),
    ("SP", "São Paulo"),
    ("SE", "Sergipe"),
    ("TO", "Tocantins"),
];

/// Display names for categorical codes, applied to scalar answers only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeMap {
    entries: BTreeMap<String, String>,
}

impl CodeMap {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// The 27 Brazilian federative units.
    #[must_use]
    pub fn brazilian_states() -> Self {
        Self {
            entries: BRAZILIAN_STATES
                .iter()
                .map(|(code, name)| ((*code).to_owned(), (*name).to_owned()))
                .collect(),
        }
    }

    /// Later entries replace earlier ones with the same code.
    #[must_use]
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (code, name) in overrides {
            self.entries.insert(code.into(), name.into());
        }
        self
    }

    #[must_use]
    pub fn display_name(&self, code: &str) -> Option<&str> {
        self.entries.get(code).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CodeMap {
    fn default() -> Self {
        Self::brazilian_states()
    }
}

/// What a host shows for one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DisplayValue {
    /// A code replaced by its display name.
    Text(String),
    Scalar(Scalar),
    Series(Series),
    Table(DataFrame),
    Empty(String),
}

impl DisplayValue {
    #[must_use]
    pub fn render_plain(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Scalar(value) => value.to_string(),
            Self::Series(series) => render_series(series),
            Self::Table(table) => render_table(table),
            Self::Empty(message) => format!("No data: {message}"),
        }
    }
}

/// Shape a successful value for display. Never rounds or formats numbers.
#[must_use]
pub fn normalize(value: QueryValue, code_map: &CodeMap) -> DisplayValue {
    match value {
        QueryValue::Scalar(Scalar::Utf8(text)) => match code_map.display_name(&text) {
            Some(name) => DisplayValue::Text(name.to_owned()),
            None => DisplayValue::Scalar(Scalar::Utf8(text)),
        },
        QueryValue::Scalar(scalar) => DisplayValue::Scalar(scalar),
        QueryValue::Series(series) if series.is_empty() => {
            DisplayValue::Empty(EMPTY_ROWS_MESSAGE.to_owned())
        }
        QueryValue::Series(series) => DisplayValue::Series(series),
        QueryValue::Table(table) if table.is_empty() => {
            DisplayValue::Empty(EMPTY_ROWS_MESSAGE.to_owned())
        }
        QueryValue::Table(table) => DisplayValue::Table(flatten_index(table)),
        QueryValue::EmptyResult(message) => DisplayValue::Empty(message),
    }
}

/// Fold named index levels into leading columns. A level whose name
/// collides with a column keeps the table as it was.
fn flatten_index(table: DataFrame) -> DataFrame {
    if !table.index().is_named() {
        return table;
    }
    table.reset_index().unwrap_or(table)
}

fn visible_rows(len: usize) -> Vec<Option<usize>> {
    if len <= MAX_RENDERED_ROWS {
        return (0..len).map(Some).collect();
    }
    let mut rows = (0..ELIDED_EDGE_ROWS).map(Some).collect::<Vec<_>>();
    rows.push(None);
    rows.extend((len - ELIDED_EDGE_ROWS..len).map(Some));
    rows
}

fn render_series(series: &Series) -> String {
    let labels = series
        .index()
        .labels()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let width = labels.iter().map(|label| label.chars().count()).max().unwrap_or(0);

    let mut out = String::new();
    if let Some(name) = series.index().name() {
        let _ = writeln!(out, "{name}");
    }
    for row in visible_rows(series.len()) {
        match row {
            Some(row) => {
                let _ = writeln!(out, "{:<width$}    {}", labels[row], series.values()[row]);
            }
            None => out.push_str("...\n"),
        }
    }
    let name = if series.name().is_empty() {
        String::new()
    } else {
        format!("Name: {}, ", series.name())
    };
    let _ = write!(out, "{name}dtype: {}", series.dtype().type_name());
    out
}

fn render_table(table: &DataFrame) -> String {
    let labels = table
        .index()
        .labels()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let names = table.column_names();
    let cells = names
        .iter()
        .map(|name| {
            table
                .column(name)
                .map(|column| column.values().iter().map(ToString::to_string).collect())
                .unwrap_or_default()
        })
        .collect::<Vec<Vec<String>>>();

    let label_width = labels.iter().map(|label| label.chars().count()).max().unwrap_or(0);
    let widths = names
        .iter()
        .zip(&cells)
        .map(|(name, column)| {
            column
                .iter()
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect::<Vec<_>>();

    let mut out = String::new();
    let _ = write!(out, "{:<label_width$}", "");
    for (name, &width) in names.iter().zip(&widths) {
        let _ = write!(out, "  {name:>width$}");
    }
    out.push('\n');
    for row in visible_rows(table.len()) {
        let Some(row) = row else {
            out.push_str("...\n");
            continue;
        };
        let _ = write!(out, "{:<label_width$}", labels[row]);
        for (column, &width) in cells.iter().zip(&widths) {
            let cell = column.get(row).map_or("", String::as_str);
            let _ = write!(out, "  {cell:>width$}");
        }
        out.push('\n');
    }
    let _ = write!(out, "[{} rows x {} columns]", table.len(), names.len());
    out
}

#[cfg(test)]
mod tests {
    use af_columnar::Column;
    use af_frame::{DataFrame, Series};
    use af_index::{Index, IndexLabel};
    use af_types::Scalar;

    use super::{CodeMap, DisplayValue, EMPTY_ROWS_MESSAGE, normalize};
    use crate::sandbox::QueryValue;

    fn grouped_table() -> DataFrame {
        let index = Index::new(vec![
            IndexLabel::Utf8("RJ".into()),
            IndexLabel::Utf8("SP".into()),
        ])
        .with_name(Some("customer_state".into()));
        let mut columns = std::collections::BTreeMap::new();
        columns.insert(
            "payment_value".to_owned(),
            Column::from_values(vec![Scalar::Float64(200.0), Scalar::Float64(150.0)])
                .expect("column"),
        );
        DataFrame::new(index, columns).expect("frame")
    }

    #[test]
    fn codes_map_to_display_names_and_others_pass_through() {
        let map = CodeMap::default();
        assert_eq!(map.len(), 27);
        assert_eq!(
            normalize(QueryValue::Scalar(Scalar::Utf8("SP".into())), &map),
            DisplayValue::Text("São Paulo".into())
        );
        assert_eq!(
            normalize(QueryValue::Scalar(Scalar::Utf8("health_beauty".into())), &map),
            DisplayValue::Scalar(Scalar::Utf8("health_beauty".into()))
        );
        assert_eq!(
            normalize(QueryValue::Scalar(Scalar::Int64(3)), &map),
            DisplayValue::Scalar(Scalar::Int64(3))
        );
    }

    #[test]
    fn overrides_replace_default_names() {
        let map = CodeMap::default().with_overrides([("SP", "Sao Paulo"), ("XX", "Elsewhere")]);
        assert_eq!(map.display_name("SP"), Some("Sao Paulo"));
        assert_eq!(map.display_name("XX"), Some("Elsewhere"));
        assert_eq!(map.display_name("RJ"), Some("Rio de Janeiro"));
        assert_eq!(CodeMap::empty().display_name("SP"), None);
    }

    #[test]
    fn empty_collections_become_the_empty_message() {
        let series = Series::from_values("x", Vec::new(), Vec::new()).expect("series");
        assert_eq!(
            normalize(QueryValue::Series(series), &CodeMap::default()),
            DisplayValue::Empty(EMPTY_ROWS_MESSAGE.into())
        );
        let table = grouped_table().head(0).expect("head");
        assert_eq!(
            normalize(QueryValue::Table(table), &CodeMap::default()),
            DisplayValue::Empty(EMPTY_ROWS_MESSAGE.into())
        );
    }

    #[test]
    fn named_index_is_folded_and_flat_tables_are_untouched() {
        let DisplayValue::Table(flat) =
            normalize(QueryValue::Table(grouped_table()), &CodeMap::default())
        else {
            panic!("expected a table");
        };
        assert_eq!(flat.column_names(), ["customer_state", "payment_value"]);
        assert!(!flat.index().is_named());

        let again = normalize(QueryValue::Table(flat.clone()), &CodeMap::default());
        assert_eq!(again, DisplayValue::Table(flat));
    }

    #[test]
    fn sentinels_pass_through_and_render_with_prefix() {
        let display = normalize(
            QueryValue::EmptyResult("nothing here".into()),
            &CodeMap::default(),
        );
        assert_eq!(display, DisplayValue::Empty("nothing here".into()));
        assert_eq!(display.render_plain(), "No data: nothing here");
    }

    #[test]
    fn plain_rendering_lists_labels_and_values() {
        let series = Series::from_values(
            "payment_value",
            vec![IndexLabel::Utf8("RJ".into()), IndexLabel::Utf8("SP".into())],
            vec![Scalar::Float64(200.0), Scalar::Float64(150.5)],
        )
        .expect("series");
        assert_eq!(
            DisplayValue::Series(series).render_plain(),
            "RJ    200.0\nSP    150.5\nName: payment_value, dtype: float64"
        );

        let rendered = DisplayValue::Table(grouped_table()).render_plain();
        assert!(rendered.starts_with("    payment_value\nRJ          200.0\n"));
        assert!(rendered.ends_with("[2 rows x 1 columns]"));
    }
}
