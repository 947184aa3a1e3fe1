#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use af_columnar::{Column, ColumnError, ReduceOp, ValueKey};
use af_frame::{DataFrame, FrameError, Series};
use af_index::{Index, IndexError, IndexLabel, align_union, validate_alignment_plan};
use af_types::{DType, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupByOptions {
    pub dropna: bool,
    /// Sort group labels; otherwise groups keep first-seen order.
    pub sort: bool,
}

impl Default for GroupByOptions {
    fn default() -> Self {
        Self {
            dropna: true,
            sort: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupAgg {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Count,
    Nunique,
    Std,
    First,
    Size,
}

impl GroupAgg {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name == "size" {
            return Some(Self::Size);
        }
        ReduceOp::from_name(name).map(Self::from)
    }

    fn reduce_op(self) -> Option<ReduceOp> {
        Some(match self {
            Self::Sum => ReduceOp::Sum,
            Self::Mean => ReduceOp::Mean,
            Self::Median => ReduceOp::Median,
            Self::Min => ReduceOp::Min,
            Self::Max => ReduceOp::Max,
            Self::Count => ReduceOp::Count,
            Self::Nunique => ReduceOp::Nunique,
            Self::Std => ReduceOp::Std,
            Self::First => ReduceOp::First,
            Self::Size => return None,
        })
    }

    fn numeric_only(self) -> bool {
        matches!(self, Self::Sum | Self::Mean | Self::Median | Self::Std)
    }
}

impl From<ReduceOp> for GroupAgg {
    fn from(op: ReduceOp) -> Self {
        match op {
            ReduceOp::Sum => Self::Sum,
            ReduceOp::Mean => Self::Mean,
            ReduceOp::Median => Self::Median,
            ReduceOp::Min => Self::Min,
            ReduceOp::Max => Self::Max,
            ReduceOp::Count => Self::Count,
            ReduceOp::Nunique => Self::Nunique,
            ReduceOp::Std => Self::Std,
            ReduceOp::First => Self::First,
        }
    }
}

#[derive(Debug, Error)]
pub enum GroupByError {
    #[error("grouper and values must have the same length: {keys} vs {values}")]
    LengthMismatch { keys: usize, values: usize },
    #[error("no group keys passed")]
    NoKeys,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Row membership of each group, with the output index the groups produce.
/// One key gives flat labels; several keys give composite labels named by
/// the key series.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPlan {
    index: Index,
    members: Vec<Vec<usize>>,
    row_index: Index,
}

impl GroupPlan {
    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn members(&self) -> &[Vec<usize>] {
        &self.members
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Row index of the grouped data, used to align value series.
    #[must_use]
    pub fn row_index(&self) -> &Index {
        &self.row_index
    }
}

pub fn plan_groups(keys: &[Series], options: GroupByOptions) -> Result<GroupPlan, GroupByError> {
    let Some(first) = keys.first() else {
        return Err(GroupByError::NoKeys);
    };
    for key in &keys[1..] {
        if key.len() != first.len() {
            return Err(GroupByError::LengthMismatch {
                keys: first.len(),
                values: key.len(),
            });
        }
    }

    let mut ordering = Vec::<Vec<ValueKey<'_>>>::new();
    let mut slot = HashMap::<Vec<ValueKey<'_>>, (IndexLabel, Vec<usize>)>::new();

    for row in 0..first.len() {
        let cells = keys.iter().map(|key| &key.values()[row]).collect::<Vec<_>>();
        if options.dropna && cells.iter().any(|cell| cell.is_missing()) {
            continue;
        }

        let key_id = cells
            .iter()
            .map(|cell| ValueKey::from_scalar(*cell))
            .collect::<Vec<_>>();
        let entry = slot.entry(key_id.clone()).or_insert_with(|| {
            ordering.push(key_id);
            let label = if cells.len() == 1 {
                IndexLabel::from_scalar(cells[0])
            } else {
                IndexLabel::Composite(cells.iter().map(|cell| IndexLabel::from_scalar(cell)).collect())
            };
            (label, Vec::new())
        });
        entry.1.push(row);
    }

    let mut groups = ordering
        .into_iter()
        .filter_map(|key| slot.remove(&key))
        .collect::<Vec<_>>();
    if options.sort {
        groups.sort_by(|a, b| a.0.cmp(&b.0));
    }

    let (labels, members): (Vec<_>, Vec<_>) = groups.into_iter().unzip();
    let names = keys
        .iter()
        .map(|key| (!key.name().is_empty()).then(|| key.name().to_owned()))
        .collect();
    Ok(GroupPlan {
        index: Index::new(labels).with_names(names),
        members,
        row_index: first.index().clone(),
    })
}

/// Values realigned to the grouping rows. Shared label sequences align
/// positionally, which admits duplicate labels.
fn align_to_plan(plan: &GroupPlan, values: &Series) -> Result<Column, GroupByError> {
    if values.index().labels() == plan.row_index.labels() {
        return Ok(values.column().clone());
    }
    if plan.row_index.has_duplicates() || values.index().has_duplicates() {
        return Err(FrameError::DuplicateLabels.into());
    }

    let alignment = align_union(&plan.row_index, values.index());
    validate_alignment_plan(&alignment)?;
    let positions = alignment.left_positions.iter().zip(&alignment.right_positions);
    let mut by_row = vec![None; plan.row_index.len()];
    for (left, right) in positions {
        if let Some(row) = left {
            by_row[*row] = *right;
        }
    }
    Ok(values.column().reindex_by_positions(&by_row)?)
}

fn aggregate_column(plan: &GroupPlan, column: &Column, agg: GroupAgg) -> Result<Column, GroupByError> {
    let mut out = Vec::with_capacity(plan.len());
    for rows in &plan.members {
        let value = match agg.reduce_op() {
            Some(op) => column.take(rows)?.reduce(op)?,
            None => Scalar::Int64(i64::try_from(rows.len()).unwrap_or(i64::MAX)),
        };
        out.push(value);
    }
    let fallback = match agg {
        GroupAgg::Count | GroupAgg::Nunique | GroupAgg::Size => DType::Int64,
        GroupAgg::Mean | GroupAgg::Median | GroupAgg::Std => DType::Float64,
        _ => column.dtype(),
    };
    Ok(Column::from_values_or(fallback, out)?)
}

/// `values.groupby(keys).<agg>()`.
pub fn groupby_agg(
    keys: &[Series],
    values: &Series,
    agg: GroupAgg,
    options: GroupByOptions,
) -> Result<Series, GroupByError> {
    let plan = plan_groups(keys, options)?;
    groupby_agg_planned(&plan, values, agg)
}

pub fn groupby_agg_planned(
    plan: &GroupPlan,
    values: &Series,
    agg: GroupAgg,
) -> Result<Series, GroupByError> {
    let aligned = align_to_plan(plan, values)?;
    let column = aggregate_column(plan, &aligned, agg)?;
    let name = if agg == GroupAgg::Size {
        String::new()
    } else {
        values.name().to_owned()
    };
    Ok(Series::new(name, plan.index.clone(), column)?)
}

/// `frame.groupby(keys)[columns].<agg>()`. Numeric statistics skip
/// non-numeric columns; `size` yields a single unnamed series.
pub fn groupby_agg_frame(
    plan: &GroupPlan,
    frame: &DataFrame,
    columns: &[String],
    agg: GroupAgg,
) -> Result<DataFrame, GroupByError> {
    let mut order = Vec::with_capacity(columns.len());
    let mut out = BTreeMap::new();
    for name in columns {
        let series = frame.column_series(name)?;
        if agg.numeric_only()
            && !matches!(series.dtype(), DType::Int64 | DType::Float64 | DType::Bool)
        {
            continue;
        }
        let aligned = align_to_plan(plan, &series)?;
        out.insert(name.clone(), aggregate_column(plan, &aligned, agg)?);
        order.push(name.clone());
    }
    Ok(DataFrame::new_with_column_order(plan.index.clone(), out, order)?)
}

/// `pd.pivot_table`-style reshape: group by `index` (+ `columns`), aggregate
/// `values`, then pivot the column key into column labels.
pub fn pivot_table(
    frame: &DataFrame,
    index: &[String],
    columns: Option<&str>,
    values: &str,
    agg: GroupAgg,
) -> Result<DataFrame, GroupByError> {
    let mut keys = index
        .iter()
        .map(|name| frame.column_series(name))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(column) = columns {
        keys.push(frame.column_series(column)?);
    }
    let grouped = groupby_agg(&keys, &frame.column_series(values)?, agg, GroupByOptions::default())?;
    if columns.is_some() {
        Ok(grouped.unstack()?)
    } else {
        Ok(grouped.to_frame(Some(values))?)
    }
}

#[cfg(test)]
mod tests {
    use af_frame::{DataFrame, Series};
    use af_index::IndexLabel;
    use af_types::{NullKind, Scalar};

    use super::{GroupAgg, GroupByOptions, groupby_agg, groupby_agg_frame, pivot_table, plan_groups};

    fn keyed(name: &str, values: Vec<Scalar>) -> Series {
        let labels = (0..values.len())
            .map(|idx| IndexLabel::Int64(i64::try_from(idx).expect("small")))
            .collect();
        Series::from_values(name, labels, values).expect("series")
    }

    fn orders() -> DataFrame {
        DataFrame::from_series(vec![
            keyed(
                "customer_state",
                vec![Scalar::from("SP"), Scalar::from("SP"), Scalar::from("RJ")],
            ),
            keyed(
                "payment_value",
                vec![
                    Scalar::Float64(100.0),
                    Scalar::Float64(50.0),
                    Scalar::Float64(200.0),
                ],
            ),
            keyed(
                "year",
                vec![Scalar::Int64(2017), Scalar::Int64(2018), Scalar::Int64(2018)],
            ),
        ])
        .expect("frame")
    }

    #[test]
    fn groupby_sum_sorts_keys_by_default() {
        let keys = keyed(
            "key",
            vec![Scalar::from("b"), Scalar::from("a"), Scalar::from("b"), Scalar::from("a")],
        );
        let values = keyed(
            "value",
            vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(3), Scalar::Int64(4)],
        );

        let out = groupby_agg(&[keys], &values, GroupAgg::Sum, GroupByOptions::default())
            .expect("groupby");

        assert_eq!(out.index().labels(), &["a".into(), "b".into()]);
        assert_eq!(out.index().name(), Some("key"));
        assert_eq!(out.name(), "value");
        assert_eq!(out.values(), &[Scalar::Int64(6), Scalar::Int64(4)]);
    }

    #[test]
    fn groupby_without_sort_preserves_first_seen_order() {
        let keys = keyed(
            "key",
            vec![Scalar::Int64(10), Scalar::Int64(5), Scalar::Int64(10), Scalar::Int64(-2)],
        );
        let values = keyed(
            "value",
            vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(3), Scalar::Int64(4)],
        );
        let options = GroupByOptions {
            dropna: true,
            sort: false,
        };
        let out = groupby_agg(&[keys], &values, GroupAgg::Sum, options).expect("groupby");
        assert_eq!(
            out.index().labels(),
            &[10_i64.into(), 5_i64.into(), (-2_i64).into()]
        );
    }

    #[test]
    fn dropna_false_keeps_missing_group() {
        let keys = keyed(
            "key",
            vec![Scalar::Int64(10), Scalar::Null(NullKind::Null), Scalar::Int64(10)],
        );
        let values = keyed("value", vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(3)]);
        let options = GroupByOptions {
            dropna: false,
            sort: true,
        };
        let out = groupby_agg(&[keys], &values, GroupAgg::Sum, options).expect("groupby");
        assert_eq!(out.index().labels(), &[IndexLabel::Missing, 10_i64.into()]);
        assert_eq!(out.values(), &[Scalar::Int64(2), Scalar::Int64(4)]);
    }

    #[test]
    fn multi_key_groups_produce_composite_named_index() {
        let frame = orders();
        let keys = vec![
            frame.column_series("customer_state").expect("state"),
            frame.column_series("year").expect("year"),
        ];
        let plan = plan_groups(&keys, GroupByOptions::default()).expect("plan");
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.index().nlevels(), 2);
        assert_eq!(
            plan.index().labels()[0],
            IndexLabel::Composite(vec!["RJ".into(), 2018_i64.into()])
        );
    }

    #[test]
    fn size_counts_rows_including_missing_values() {
        let keys = keyed("key", vec![Scalar::from("a"), Scalar::from("a")]);
        let values = keyed("value", vec![Scalar::Float64(f64::NAN), Scalar::Float64(1.0)]);
        let size = groupby_agg(&[keys.clone()], &values, GroupAgg::Size, GroupByOptions::default())
            .expect("size");
        assert_eq!(size.values(), &[Scalar::Int64(2)]);
        let count = groupby_agg(&[keys], &values, GroupAgg::Count, GroupByOptions::default())
            .expect("count");
        assert_eq!(count.values(), &[Scalar::Int64(1)]);
    }

    #[test]
    fn frame_aggregation_skips_text_for_sum() {
        let frame = orders();
        let plan = plan_groups(
            &[frame.column_series("customer_state").expect("state")],
            GroupByOptions::default(),
        )
        .expect("plan");
        let out = groupby_agg_frame(
            &plan,
            &frame,
            &["payment_value".to_owned()],
            GroupAgg::Sum,
        )
        .expect("agg");
        assert_eq!(
            out.column("payment_value").expect("payment_value").values(),
            &[Scalar::Float64(200.0), Scalar::Float64(150.0)]
        );
    }

    #[test]
    fn pivot_table_spreads_column_key() {
        let frame = orders();
        let pivot = pivot_table(
            &frame,
            &["customer_state".to_owned()],
            Some("year"),
            "payment_value",
            GroupAgg::Sum,
        )
        .expect("pivot");
        assert_eq!(pivot.column_names(), &["2017".to_owned(), "2018".to_owned()]);
        assert_eq!(pivot.index().labels(), &["RJ".into(), "SP".into()]);
        assert_eq!(
            pivot.column("2018").expect("2018").values(),
            &[Scalar::Float64(200.0), Scalar::Float64(50.0)]
        );
    }
}
