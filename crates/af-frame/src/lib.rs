#![forbid(unsafe_code)]

mod accessors;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use af_columnar::{ArithmeticOp, Column, ColumnError, ComparisonOp, LogicalOp, ReduceOp, ValueKey};
use af_index::{Index, IndexError, IndexLabel, align_union, resolve_position, validate_alignment_plan};
use af_types::{DType, NullKind, Scalar, TypeError, compare_values, infer_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use accessors::{DatetimeField, PeriodFreq, StringOp, datetime_field, period_label};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match column length ({column_len})")]
    LengthMismatch { index_len: usize, column_len: usize },
    #[error("cannot reindex on an axis with duplicate labels")]
    DuplicateLabels,
    #[error("column not found: '{0}'")]
    ColumnNotFound(String),
    #[error("attempt to get {op} of an empty sequence")]
    ExtremumOnEmpty { op: &'static str },
    #[error("boolean mask required for filter; found dtype {0}")]
    NonBooleanMask(&'static str),
    #[error("compatibility gate rejected operation: {0}")]
    CompatibilityRejected(String),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<TypeError> for FrameError {
    fn from(value: TypeError) -> Self {
        Self::Column(ColumnError::Type(value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    name: String,
    index: Index,
    column: Column,
}

impl Series {
    pub fn new(name: impl Into<String>, index: Index, column: Column) -> Result<Self, FrameError> {
        if index.len() != column.len() {
            return Err(FrameError::LengthMismatch {
                index_len: index.len(),
                column_len: column.len(),
            });
        }

        Ok(Self {
            name: name.into(),
            index,
            column,
        })
    }

    pub fn from_values(
        name: impl Into<String>,
        index_labels: Vec<IndexLabel>,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        let index = Index::new(index_labels);
        let column = Column::from_values(values)?;
        Self::new(name, index, column)
    }

    /// Series of the labels in `index`, positioned by the same index.
    pub fn from_index(index: &Index) -> Result<Self, FrameError> {
        let values = index.labels().iter().map(IndexLabel::to_scalar).collect();
        let column = Column::from_values_or(DType::Utf8, values)?;
        let name = index.name().unwrap_or_default().to_owned();
        Self::new(name, index.clone(), column)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn column(&self) -> &Column {
        &self.column
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        self.column.values()
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.column.dtype()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.column.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column.is_empty()
    }

    #[must_use]
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn with_column(&self, column: Column) -> Result<Self, FrameError> {
        Self::new(self.name.clone(), self.index.clone(), column)
    }

    /// Align two series on their labels. Identical label sequences align
    /// positionally, which also admits duplicate labels.
    fn aligned_pair(&self, other: &Self) -> Result<(Index, Column, Column), FrameError> {
        if self.index.labels() == other.index.labels() {
            return Ok((
                self.index.clone(),
                self.column.clone(),
                other.column.clone(),
            ));
        }
        if self.index.has_duplicates() || other.index.has_duplicates() {
            return Err(FrameError::DuplicateLabels);
        }

        let plan = align_union(&self.index, &other.index);
        validate_alignment_plan(&plan)?;
        let left = self.column.reindex_by_positions(&plan.left_positions)?;
        let right = other.column.reindex_by_positions(&plan.right_positions)?;
        Ok((plan.union_index, left, right))
    }

    fn combined_name(&self, other: &Self) -> String {
        if self.name == other.name {
            self.name.clone()
        } else {
            String::new()
        }
    }

    pub fn binary(&self, other: &Self, op: ArithmeticOp) -> Result<Self, FrameError> {
        let (index, left, right) = self.aligned_pair(other)?;
        let column = left.binary(&right, op)?;
        Self::new(self.combined_name(other), index, column)
    }

    /// `series <op> scalar`, or `scalar <op> series` when `scalar_on_left`.
    pub fn binary_scalar(
        &self,
        scalar: &Scalar,
        op: ArithmeticOp,
        scalar_on_left: bool,
    ) -> Result<Self, FrameError> {
        let broadcast = Column::broadcast(scalar, self.len())?;
        let column = if scalar_on_left {
            broadcast.binary(&self.column, op)?
        } else {
            self.column.binary(&broadcast, op)?
        };
        self.with_column(column)
    }

    pub fn compare(&self, other: &Self, op: ComparisonOp) -> Result<Self, FrameError> {
        let (index, left, right) = self.aligned_pair(other)?;
        let column = left.compare(&right, op)?;
        Self::new(self.combined_name(other), index, column)
    }

    pub fn compare_scalar(&self, scalar: &Scalar, op: ComparisonOp) -> Result<Self, FrameError> {
        let column = self.column.compare_scalar(scalar, op)?;
        self.with_column(column)
    }

    pub fn logical(&self, other: &Self, op: LogicalOp) -> Result<Self, FrameError> {
        let (index, left, right) = self.aligned_pair(other)?;
        let column = left.logical(&right, op)?;
        Self::new(self.combined_name(other), index, column)
    }

    pub fn not(&self) -> Result<Self, FrameError> {
        let column = self.column.not()?;
        self.with_column(column)
    }

    /// Positions selected by a boolean mask. Labels absent from the mask and
    /// missing mask values select nothing.
    pub fn mask_positions(index: &Index, mask: &Self) -> Result<Vec<usize>, FrameError> {
        if let Some(offending) = mask
            .values()
            .iter()
            .find(|value| !matches!(value, Scalar::Bool(_)) && !value.is_missing())
        {
            return Err(FrameError::NonBooleanMask(offending.dtype().type_name()));
        }

        if index.labels() == mask.index.labels() {
            return Ok(mask
                .values()
                .iter()
                .enumerate()
                .filter_map(|(idx, value)| matches!(value, Scalar::Bool(true)).then_some(idx))
                .collect());
        }

        let lookup = mask.index.position_map_first();
        Ok(index
            .labels()
            .iter()
            .enumerate()
            .filter_map(|(idx, label)| {
                let hit = lookup
                    .get(label)
                    .and_then(|pos| mask.values().get(*pos))
                    .is_some_and(|value| matches!(value, Scalar::Bool(true)));
                hit.then_some(idx)
            })
            .collect())
    }

    /// Select elements where `mask` is `True`, as `series[bool_series]`.
    pub fn filter(&self, mask: &Self) -> Result<Self, FrameError> {
        let positions = Self::mask_positions(&self.index, mask)?;
        self.take(&positions)
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let column = self.column.take(positions)?;
        Self::new(self.name.clone(), self.index.take(positions), column)
    }

    /// First `n` rows; a negative `n` drops that many from the end.
    pub fn head(&self, n: i64) -> Result<Self, FrameError> {
        let positions = head_positions(n, self.len());
        self.take(&positions)
    }

    /// Last `n` rows; a negative `n` drops that many from the start.
    pub fn tail(&self, n: i64) -> Result<Self, FrameError> {
        let positions = tail_positions(n, self.len());
        self.take(&positions)
    }

    pub fn iloc(&self, position: i64) -> Result<Scalar, FrameError> {
        let resolved = resolve_position(position, self.len())?;
        Ok(self.values()[resolved].clone())
    }

    pub fn iloc_slice(&self, start: Option<i64>, stop: Option<i64>) -> Result<Self, FrameError> {
        let positions = slice_positions(start, stop, self.len());
        self.take(&positions)
    }

    /// Positions holding `label`, in index order.
    #[must_use]
    pub fn loc_positions(&self, label: &IndexLabel) -> Vec<usize> {
        self.index
            .labels()
            .iter()
            .enumerate()
            .filter_map(|(idx, candidate)| (candidate == label).then_some(idx))
            .collect()
    }

    /// Stable sort by value; missing values last.
    pub fn sort_values(&self, ascending: bool) -> Result<Self, FrameError> {
        let order = self.column.sort_positions(ascending);
        self.take(&order)
    }

    pub fn sort_index(&self, ascending: bool) -> Result<Self, FrameError> {
        let mut order = (0..self.len()).collect::<Vec<_>>();
        let labels = self.index.labels();
        order.sort_by(|a, b| {
            let ordering = labels[*a].cmp(&labels[*b]);
            if ascending { ordering } else { ordering.reverse() }
        });
        self.take(&order)
    }

    /// The `n` largest values, descending. Missing values are excluded and
    /// ties keep their original order.
    pub fn nlargest(&self, n: usize) -> Result<Self, FrameError> {
        let order = self.present_sorted(false, n);
        self.take(&order)
    }

    pub fn nsmallest(&self, n: usize) -> Result<Self, FrameError> {
        let order = self.present_sorted(true, n);
        self.take(&order)
    }

    fn present_sorted(&self, ascending: bool, n: usize) -> Vec<usize> {
        let mut order = self.column.sort_positions(ascending);
        order.retain(|idx| !self.values()[*idx].is_missing());
        order.truncate(n);
        order
    }

    /// Position of the extreme value; the first occurrence wins ties.
    fn extremum_position(&self, largest: bool, op: &'static str) -> Result<usize, FrameError> {
        let mut best: Option<usize> = None;
        for (idx, value) in self.values().iter().enumerate() {
            if value.is_missing() {
                continue;
            }
            let Some(current) = best else {
                best = Some(idx);
                continue;
            };
            let incumbent = &self.values()[current];
            let ordering = compare_values(value, incumbent).ok_or(ColumnError::Unorderable {
                op: if largest { ">" } else { "<" },
                left: value.dtype().type_name(),
                right: incumbent.dtype().type_name(),
            })?;
            let better = if largest {
                ordering == Ordering::Greater
            } else {
                ordering == Ordering::Less
            };
            if better {
                best = Some(idx);
            }
        }
        best.ok_or(FrameError::ExtremumOnEmpty { op })
    }

    /// Label of the maximum value, skipping missing values.
    pub fn idxmax(&self) -> Result<IndexLabel, FrameError> {
        let position = self.extremum_position(true, "argmax")?;
        Ok(self.index.labels()[position].clone())
    }

    pub fn idxmin(&self) -> Result<IndexLabel, FrameError> {
        let position = self.extremum_position(false, "argmin")?;
        Ok(self.index.labels()[position].clone())
    }

    pub fn argmax(&self) -> Result<usize, FrameError> {
        self.extremum_position(true, "argmax")
    }

    pub fn argmin(&self) -> Result<usize, FrameError> {
        self.extremum_position(false, "argmin")
    }

    pub fn reduce(&self, op: ReduceOp) -> Result<Scalar, FrameError> {
        Ok(self.column.reduce(op)?)
    }

    /// Counts of each distinct present value, most frequent first; ties keep
    /// first-seen order.
    pub fn value_counts(&self) -> Result<Self, FrameError> {
        let mut order: Vec<IndexLabel> = Vec::new();
        let mut counts: HashMap<IndexLabel, i64> = HashMap::new();
        for value in self.values() {
            if value.is_missing() {
                continue;
            }
            let label = IndexLabel::from_scalar(value);
            let entry = counts.entry(label.clone()).or_insert(0);
            if *entry == 0 {
                order.push(label);
            }
            *entry += 1;
        }

        let mut ranked = order
            .into_iter()
            .map(|label| {
                let count = counts.get(&label).copied().unwrap_or(0);
                (label, count)
            })
            .collect::<Vec<_>>();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let index_name = (!self.name.is_empty()).then(|| self.name.clone());
        let (labels, values): (Vec<_>, Vec<_>) = ranked
            .into_iter()
            .map(|(label, count)| (label, Scalar::Int64(count)))
            .unzip();
        let index = Index::new(labels).with_name(index_name);
        let column = Column::new(DType::Int64, values)?;
        Self::new("count", index, column)
    }

    /// Distinct values in first-seen order, missing included once.
    #[must_use]
    pub fn unique(&self) -> Vec<Scalar> {
        let mut seen = HashSet::new();
        self.values()
            .iter()
            .filter(|value| seen.insert(ValueKey::from_scalar(*value)))
            .cloned()
            .collect()
    }

    pub fn dropna(&self) -> Result<Self, FrameError> {
        let positions = self
            .values()
            .iter()
            .enumerate()
            .filter_map(|(idx, value)| (!value.is_missing()).then_some(idx))
            .collect::<Vec<_>>();
        self.take(&positions)
    }

    pub fn fillna(&self, fill_value: &Scalar) -> Result<Self, FrameError> {
        let column = self.column.map_values(self.dtype(), |value| {
            Ok(if value.is_missing() {
                fill_value.clone()
            } else {
                value.clone()
            })
        })?;
        self.with_column(column)
    }

    pub fn isna(&self) -> Result<Self, FrameError> {
        let values = self
            .values()
            .iter()
            .map(|value| Scalar::Bool(value.is_missing()))
            .collect();
        self.with_column(Column::new(DType::Bool, values)?)
    }

    pub fn isin(&self, candidates: &[Scalar]) -> Result<Self, FrameError> {
        let keys = candidates
            .iter()
            .map(ValueKey::from_scalar)
            .collect::<HashSet<_>>();
        let values = self
            .values()
            .iter()
            .map(|value| {
                Scalar::Bool(!value.is_missing() && keys.contains(&ValueKey::from_scalar(value)))
            })
            .collect();
        self.with_column(Column::new(DType::Bool, values)?)
    }

    /// Inclusive range test on both ends.
    pub fn between(&self, lower: &Scalar, upper: &Scalar) -> Result<Self, FrameError> {
        let low = self.column.compare_scalar(lower, ComparisonOp::Ge)?;
        let high = self.column.compare_scalar(upper, ComparisonOp::Le)?;
        self.with_column(low.logical(&high, LogicalOp::And)?)
    }

    /// Half-to-even rounding, as numpy does.
    pub fn round(&self, decimals: i32) -> Result<Self, FrameError> {
        let column = self.column.map_values(self.dtype(), |value| round_scalar(value, decimals))?;
        self.with_column(column)
    }

    pub fn abs(&self) -> Result<Self, FrameError> {
        let column = self.column.map_values(self.dtype(), abs_scalar)?;
        self.with_column(column)
    }

    pub fn map_values<F>(&self, fallback: DType, func: F) -> Result<Self, FrameError>
    where
        F: FnMut(&Scalar) -> Result<Scalar, ColumnError>,
    {
        let column = self.column.map_values(fallback, func)?;
        self.with_column(column)
    }

    pub fn to_frame(&self, name: Option<&str>) -> Result<DataFrame, FrameError> {
        let column_name = name
            .map(str::to_owned)
            .unwrap_or_else(|| self.value_column_name());
        let mut columns = BTreeMap::new();
        columns.insert(column_name.clone(), self.column.clone());
        DataFrame::new_with_column_order(self.index.clone(), columns, vec![column_name])
    }

    fn value_column_name(&self) -> String {
        if self.name.is_empty() {
            "0".to_owned()
        } else {
            self.name.clone()
        }
    }

    /// Index levels become leading columns, followed by the values.
    pub fn reset_index(&self) -> Result<DataFrame, FrameError> {
        let mut order = Vec::new();
        let mut columns = BTreeMap::new();
        for (level, name) in index_level_names(&self.index).into_iter().enumerate() {
            let values = self.index.level_values(level);
            columns.insert(name.clone(), Column::from_values_or(DType::Utf8, values)?);
            order.push(name);
        }
        let value_name = self.value_column_name();
        columns.insert(value_name.clone(), self.column.clone());
        order.push(value_name);
        DataFrame::new_with_column_order(Index::range(self.len()), columns, order)
    }

    /// Pivot the innermost index level into columns. Row and column labels
    /// come out sorted, absent cells are missing.
    pub fn unstack(&self) -> Result<DataFrame, FrameError> {
        let levels = self.index.nlevels();
        if levels < 2 {
            return Err(FrameError::CompatibilityRejected(
                "unstack requires an index with at least two levels".to_owned(),
            ));
        }

        let split = |label: &IndexLabel| -> (IndexLabel, IndexLabel) {
            match label {
                IndexLabel::Composite(parts) if parts.len() == levels => {
                    let inner = parts[levels - 1].clone();
                    let outer = if levels == 2 {
                        parts[0].clone()
                    } else {
                        IndexLabel::Composite(parts[..levels - 1].to_vec())
                    };
                    (outer, inner)
                }
                other => (other.clone(), IndexLabel::Missing),
            }
        };

        let mut rows = BTreeSet::new();
        let mut cols = BTreeSet::new();
        let mut cells = HashMap::new();
        for (label, value) in self.index.labels().iter().zip(self.values()) {
            let (outer, inner) = split(label);
            rows.insert(outer.clone());
            cols.insert(inner.clone());
            cells.entry((outer, inner)).or_insert_with(|| value.clone());
        }

        let rows = rows.into_iter().collect::<Vec<_>>();
        let mut order = Vec::with_capacity(cols.len());
        let mut columns = BTreeMap::new();
        for inner in cols {
            let values = rows
                .iter()
                .map(|outer| {
                    cells
                        .get(&(outer.clone(), inner.clone()))
                        .cloned()
                        .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype()))
                })
                .collect::<Vec<_>>();
            let name = inner.to_string();
            columns.insert(name.clone(), Column::from_values_or(self.dtype(), values)?);
            order.push(name);
        }

        let names = self.index.names()[..levels - 1].to_vec();
        let index = Index::new(rows).with_names(names);
        DataFrame::new_with_column_order(index, columns, order)
    }
}

fn index_level_names(index: &Index) -> Vec<String> {
    let levels = index.nlevels();
    index
        .names()
        .iter()
        .enumerate()
        .map(|(level, name)| match name {
            Some(name) => name.clone(),
            None if levels == 1 => "index".to_owned(),
            None => format!("level_{level}"),
        })
        .collect()
}

pub fn round_scalar(value: &Scalar, decimals: i32) -> Result<Scalar, ColumnError> {
    Ok(match value {
        Scalar::Float64(v) if v.is_finite() => {
            let factor = 10_f64.powi(decimals);
            Scalar::Float64((v * factor).round_ties_even() / factor)
        }
        Scalar::Float64(_) | Scalar::Int64(_) | Scalar::Bool(_) | Scalar::Null(_) => value.clone(),
        other => {
            return Err(ColumnError::UnsupportedReduction {
                op: "round",
                dtype: other.dtype().type_name(),
            });
        }
    })
}

pub fn abs_scalar(value: &Scalar) -> Result<Scalar, ColumnError> {
    Ok(match value {
        Scalar::Int64(v) => Scalar::Int64(v.wrapping_abs()),
        Scalar::Float64(v) => Scalar::Float64(v.abs()),
        Scalar::Timedelta(v) => Scalar::Timedelta(v.wrapping_abs()),
        Scalar::Null(_) => value.clone(),
        other => {
            return Err(ColumnError::UnsupportedReduction {
                op: "abs",
                dtype: other.dtype().type_name(),
            });
        }
    })
}

fn head_positions(n: i64, len: usize) -> Vec<usize> {
    let take = if n >= 0 {
        usize::try_from(n).unwrap_or(usize::MAX).min(len)
    } else {
        len.saturating_sub(usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX))
    };
    (0..take).collect()
}

fn tail_positions(n: i64, len: usize) -> Vec<usize> {
    let start = if n >= 0 {
        len.saturating_sub(usize::try_from(n).unwrap_or(usize::MAX))
    } else {
        usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX).min(len)
    };
    (start..len).collect()
}

/// Python slice semantics for `[start:stop]` with step 1.
#[must_use]
pub fn slice_positions(start: Option<i64>, stop: Option<i64>, len: usize) -> Vec<usize> {
    let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |bound: i64| -> usize {
        let resolved = if bound < 0 { signed_len + bound } else { bound };
        usize::try_from(resolved.clamp(0, signed_len)).unwrap_or(0)
    };
    let begin = start.map_or(0, clamp);
    let end = stop.map_or(len, clamp);
    (begin..end.max(begin)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    index: Index,
    columns: BTreeMap<String, Column>,
    column_order: Vec<String>,
}

impl DataFrame {
    pub fn new(index: Index, columns: BTreeMap<String, Column>) -> Result<Self, FrameError> {
        let order = columns.keys().cloned().collect();
        Self::new_with_column_order(index, columns, order)
    }

    pub fn new_with_column_order(
        index: Index,
        columns: BTreeMap<String, Column>,
        column_order: Vec<String>,
    ) -> Result<Self, FrameError> {
        for column in columns.values() {
            if column.len() != index.len() {
                return Err(FrameError::LengthMismatch {
                    index_len: index.len(),
                    column_len: column.len(),
                });
            }
        }
        if column_order.len() != columns.len() {
            return Err(FrameError::CompatibilityRejected(
                "column order must name every column exactly once".to_owned(),
            ));
        }
        if let Some(missing) = column_order.iter().find(|name| !columns.contains_key(*name)) {
            return Err(FrameError::ColumnNotFound(missing.clone()));
        }

        Ok(Self {
            index,
            columns,
            column_order,
        })
    }

    /// Build from named columns in the given order over a default range index.
    pub fn from_columns(named: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let len = named.first().map_or(0, |(_, column)| column.len());
        let mut order = Vec::with_capacity(named.len());
        let mut columns = BTreeMap::new();
        for (name, column) in named {
            if columns.insert(name.clone(), column).is_none() {
                order.push(name);
            }
        }
        Self::new_with_column_order(Index::range(len), columns, order)
    }

    pub fn from_series(series_list: Vec<Series>) -> Result<Self, FrameError> {
        let mut series_iter = series_list.into_iter();
        let Some(first) = series_iter.next() else {
            return Self::new(Index::new(Vec::new()), BTreeMap::new());
        };
        let mut union_index = first.index.clone();

        let mut order = vec![first.name.clone()];
        let mut columns = BTreeMap::new();
        columns.insert(first.name, first.column);

        for series in series_iter {
            let plan = align_union(&union_index, &series.index);
            validate_alignment_plan(&plan)?;

            for column in columns.values_mut() {
                *column = column.reindex_by_positions(&plan.left_positions)?;
            }

            let aligned_column = series.column.reindex_by_positions(&plan.right_positions)?;
            if columns.insert(series.name.clone(), aligned_column).is_none() {
                order.push(series.name);
            }
            union_index = plan.union_index;
        }

        Self::new_with_column_order(union_index, columns, order)
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn columns(&self) -> &BTreeMap<String, Column> {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.columns.is_empty()
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.index.len(), self.columns.len())
    }

    pub fn column_series(&self, name: &str) -> Result<Series, FrameError> {
        let column = self
            .columns
            .get(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_owned()))?;
        Series::new(name, self.index.clone(), column.clone())
    }

    pub fn select_columns(&self, names: &[String]) -> Result<Self, FrameError> {
        let mut columns = BTreeMap::new();
        let mut order = Vec::with_capacity(names.len());
        for name in names {
            let column = self
                .columns
                .get(name)
                .ok_or_else(|| FrameError::ColumnNotFound(name.clone()))?;
            if columns.insert(name.clone(), column.clone()).is_none() {
                order.push(name.clone());
            }
        }
        Self::new_with_column_order(self.index.clone(), columns, order)
    }

    /// Columns whose dtype is Int64 or Float64, in frame order.
    pub fn select_numeric(&self) -> Result<Self, FrameError> {
        let names = self
            .column_order
            .iter()
            .filter(|name| {
                self.columns
                    .get(*name)
                    .is_some_and(|column| column.dtype().is_numeric())
            })
            .cloned()
            .collect::<Vec<_>>();
        self.select_columns(&names)
    }

    /// Add or replace a column; new columns go last.
    pub fn with_column(&self, name: &str, column: Column) -> Result<Self, FrameError> {
        let mut columns = self.columns.clone();
        let mut order = self.column_order.clone();
        if columns.insert(name.to_owned(), column).is_none() {
            order.push(name.to_owned());
        }
        Self::new_with_column_order(self.index.clone(), columns, order)
    }

    pub fn take_rows(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| -> Result<(String, Column), FrameError> {
                Ok((name.clone(), column.take(positions)?))
            })
            .collect::<Result<BTreeMap<_, _>, FrameError>>()?;
        Self::new_with_column_order(
            self.index.take(positions),
            columns,
            self.column_order.clone(),
        )
    }

    pub fn filter_rows(&self, mask: &Series) -> Result<Self, FrameError> {
        let positions = Series::mask_positions(&self.index, mask)?;
        self.take_rows(&positions)
    }

    pub fn head(&self, n: i64) -> Result<Self, FrameError> {
        self.take_rows(&head_positions(n, self.len()))
    }

    pub fn tail(&self, n: i64) -> Result<Self, FrameError> {
        self.take_rows(&tail_positions(n, self.len()))
    }

    pub fn iloc_slice(&self, start: Option<i64>, stop: Option<i64>) -> Result<Self, FrameError> {
        self.take_rows(&slice_positions(start, stop, self.len()))
    }

    /// One row as a series labelled by column name. Mixed dtypes fall back
    /// to their display text.
    pub fn iloc_row(&self, position: i64) -> Result<Series, FrameError> {
        let row = resolve_position(position, self.len())?;
        let values = self
            .column_order
            .iter()
            .map(|name| {
                self.columns
                    .get(name)
                    .and_then(|column| column.value(row))
                    .cloned()
                    .unwrap_or(Scalar::Null(NullKind::Null))
            })
            .collect::<Vec<_>>();
        let values = if infer_dtype(&values).is_ok() {
            values
        } else {
            values
                .into_iter()
                .map(|value| {
                    if value.is_missing() {
                        value
                    } else {
                        Scalar::Utf8(value.to_string())
                    }
                })
                .collect()
        };
        let labels = self
            .column_order
            .iter()
            .map(|name| IndexLabel::Utf8(name.clone()))
            .collect();
        let name = self.index.labels()[row].to_string();
        Series::from_values(name, labels, values)
    }

    /// Stable multi-key sort; missing values last for every key.
    pub fn sort_values(&self, by: &[String], ascending: &[bool]) -> Result<Self, FrameError> {
        let keys = by
            .iter()
            .map(|name| {
                self.columns
                    .get(name)
                    .ok_or_else(|| FrameError::ColumnNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut order = (0..self.len()).collect::<Vec<_>>();
        order.sort_by(|a, b| {
            for (key_idx, column) in keys.iter().enumerate() {
                let asc = ascending
                    .get(key_idx)
                    .or_else(|| ascending.first())
                    .copied()
                    .unwrap_or(true);
                let left = &column.values()[*a];
                let right = &column.values()[*b];
                let ordering = match (left.is_missing(), right.is_missing()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => {
                        let ordering = compare_values(left, right).unwrap_or(Ordering::Equal);
                        if asc { ordering } else { ordering.reverse() }
                    }
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        self.take_rows(&order)
    }

    pub fn nlargest(&self, n: usize, column: &str) -> Result<Self, FrameError> {
        let positions = self.column_series(column)?.present_sorted(false, n);
        self.take_rows(&positions)
    }

    pub fn nsmallest(&self, n: usize, column: &str) -> Result<Self, FrameError> {
        let positions = self.column_series(column)?.present_sorted(true, n);
        self.take_rows(&positions)
    }

    /// Drop rows with a missing value in any of `subset` (all columns when
    /// `None`).
    pub fn dropna(&self, subset: Option<&[String]>) -> Result<Self, FrameError> {
        let checked = self.resolve_subset(subset)?;
        let positions = (0..self.len())
            .filter(|row| {
                checked
                    .iter()
                    .all(|column| !column.values()[*row].is_missing())
            })
            .collect::<Vec<_>>();
        self.take_rows(&positions)
    }

    /// Keep the first row of each distinct combination of `subset` values.
    pub fn drop_duplicates(&self, subset: Option<&[String]>) -> Result<Self, FrameError> {
        let checked = self.resolve_subset(subset)?;
        let mut seen = HashSet::new();
        let positions = (0..self.len())
            .filter(|row| {
                let key = checked
                    .iter()
                    .map(|column| ValueKey::from_scalar(&column.values()[*row]))
                    .collect::<Vec<_>>();
                seen.insert(key)
            })
            .collect::<Vec<_>>();
        self.take_rows(&positions)
    }

    fn resolve_subset(&self, subset: Option<&[String]>) -> Result<Vec<&Column>, FrameError> {
        let names = subset.unwrap_or(&self.column_order);
        names
            .iter()
            .map(|name| {
                self.columns
                    .get(name)
                    .ok_or_else(|| FrameError::ColumnNotFound(name.clone()))
            })
            .collect()
    }

    /// Fold the index levels into leading columns and replace the index
    /// with a default range.
    pub fn reset_index(&self) -> Result<Self, FrameError> {
        let mut columns = self.columns.clone();
        let mut order = Vec::with_capacity(self.column_order.len() + self.index.nlevels());
        for (level, name) in index_level_names(&self.index).into_iter().enumerate() {
            if columns.contains_key(&name) {
                return Err(FrameError::CompatibilityRejected(format!(
                    "cannot insert {name}, already exists"
                )));
            }
            let values = self.index.level_values(level);
            columns.insert(name.clone(), Column::from_values_or(DType::Utf8, values)?);
            order.push(name);
        }
        order.extend(self.column_order.iter().cloned());
        Self::new_with_column_order(Index::range(self.len()), columns, order)
    }

    /// Row-wise sum over every column, skipping missing cells. A row with
    /// no present value sums to missing.
    pub fn sum_rows(&self) -> Result<Series, FrameError> {
        let mut values = Vec::with_capacity(self.len());
        for row in 0..self.len() {
            let mut total: Option<f64> = None;
            for name in &self.column_order {
                let Some(value) = self.columns.get(name).and_then(|column| column.value(row)) else {
                    continue;
                };
                if value.is_missing() {
                    continue;
                }
                let number = value.to_f64()?;
                total = Some(total.unwrap_or(0.0) + number);
            }
            values.push(total.map_or(Scalar::Null(NullKind::NaN), Scalar::Float64));
        }
        let column = Column::new(DType::Float64, values)?;
        Series::new("", self.index.clone(), column)
    }

    /// Column-wise reduction, one value per column. Statistics that need
    /// numbers skip non-numeric columns.
    pub fn reduce_columns(&self, op: ReduceOp) -> Result<Series, FrameError> {
        let numeric_only = matches!(
            op,
            ReduceOp::Sum | ReduceOp::Mean | ReduceOp::Median | ReduceOp::Std
        );
        let mut labels = Vec::new();
        let mut values = Vec::new();
        for name in &self.column_order {
            let Some(column) = self.columns.get(name) else {
                continue;
            };
            if numeric_only && !matches!(column.dtype(), DType::Int64 | DType::Float64 | DType::Bool)
            {
                continue;
            }
            labels.push(IndexLabel::Utf8(name.clone()));
            values.push(column.reduce(op)?);
        }
        let values = if infer_dtype(&values).is_ok() {
            values
        } else {
            values
                .into_iter()
                .map(|value| Scalar::Utf8(value.to_string()))
                .collect()
        };
        Series::from_values("", labels, values)
    }
}
