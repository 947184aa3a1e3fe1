#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use af_types::{NullKind, Scalar, format_timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single row label. Group keys over several columns produce
/// `Composite` labels, one component per level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexLabel {
    Missing,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Timestamp(i64),
    Composite(Vec<IndexLabel>),
}

impl IndexLabel {
    #[must_use]
    pub fn from_scalar(value: &Scalar) -> Self {
        match value {
            Scalar::Null(_) => Self::Missing,
            Scalar::Float64(v) if v.is_nan() => Self::Missing,
            Scalar::Bool(v) => Self::Bool(*v),
            Scalar::Int64(v) => Self::Int64(*v),
            Scalar::Float64(v) => Self::Float64(*v),
            Scalar::Utf8(v) => Self::Utf8(v.clone()),
            Scalar::Timestamp(v) => Self::Timestamp(*v),
            Scalar::Timedelta(v) => Self::Int64(*v),
        }
    }

    /// Scalar form of the label; composite labels flatten to their display
    /// text.
    #[must_use]
    pub fn to_scalar(&self) -> Scalar {
        match self {
            Self::Missing => Scalar::Null(NullKind::NaN),
            Self::Bool(v) => Scalar::Bool(*v),
            Self::Int64(v) => Scalar::Int64(*v),
            Self::Float64(v) => Scalar::Float64(*v),
            Self::Utf8(v) => Scalar::Utf8(v.clone()),
            Self::Timestamp(v) => Scalar::Timestamp(*v),
            Self::Composite(_) => Scalar::Utf8(self.to_string()),
        }
    }

    /// Component at `level`. A flat label is its own level 0.
    #[must_use]
    pub fn level(&self, level: usize) -> Option<&IndexLabel> {
        match self {
            Self::Composite(parts) => parts.get(level),
            flat if level == 0 => Some(flat),
            _ => None,
        }
    }

    #[must_use]
    pub fn nlevels(&self) -> usize {
        match self {
            Self::Composite(parts) => parts.len(),
            _ => 1,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Missing => 0,
            Self::Bool(_) => 1,
            Self::Int64(_) | Self::Float64(_) => 2,
            Self::Utf8(_) => 3,
            Self::Timestamp(_) => 4,
            Self::Composite(_) => 5,
        }
    }
}

fn normalized_bits(value: f64) -> u64 {
    if value == 0.0 { 0.0_f64.to_bits() } else { value.to_bits() }
}

impl PartialEq for IndexLabel {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Missing, Self::Missing) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) | (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => normalized_bits(*a) == normalized_bits(*b),
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Composite(a), Self::Composite(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for IndexLabel {}

impl Hash for IndexLabel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Missing => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) | Self::Timestamp(v) => v.hash(state),
            Self::Float64(v) => normalized_bits(*v).hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Composite(parts) => parts.hash(state),
        }
    }
}

impl PartialOrd for IndexLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) | (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => a.total_cmp(b),
            (Self::Int64(a), Self::Float64(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Self::Float64(a), Self::Int64(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Self::Utf8(a), Self::Utf8(b)) => a.cmp(b),
            (Self::Composite(a), Self::Composite(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<i64> for IndexLabel {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for IndexLabel {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for IndexLabel {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "NaN"),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v:?}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", format_timestamp(*v)),
            Self::Composite(parts) => {
                write!(f, "(")?;
                for (idx, part) in parts.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    labels: Vec<IndexLabel>,
    names: Vec<Option<String>>,
}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<IndexLabel>) -> Self {
        let levels = labels.first().map_or(1, IndexLabel::nlevels);
        Self {
            labels,
            names: vec![None; levels],
        }
    }

    /// The default `0..len` row index.
    #[must_use]
    pub fn range(len: usize) -> Self {
        Self::new(
            (0..len)
                .map(|idx| IndexLabel::Int64(i64::try_from(idx).unwrap_or(i64::MAX)))
                .collect(),
        )
    }

    #[must_use]
    pub fn from_i64(values: Vec<i64>) -> Self {
        Self::new(values.into_iter().map(IndexLabel::from).collect())
    }

    #[must_use]
    pub fn from_utf8(values: Vec<String>) -> Self {
        Self::new(values.into_iter().map(IndexLabel::from).collect())
    }

    #[must_use]
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.names = vec![name];
        self
    }

    #[must_use]
    pub fn with_names(mut self, names: Vec<Option<String>>) -> Self {
        self.names = if names.is_empty() { vec![None] } else { names };
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[IndexLabel] {
        &self.labels
    }

    #[must_use]
    pub fn names(&self) -> &[Option<String>] {
        &self.names
    }

    /// Name of a single-level index.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self.names.as_slice() {
            [Some(name)] => Some(name.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn nlevels(&self) -> usize {
        self.names.len()
    }

    /// True when any level carries a name, i.e. the labels came from
    /// grouping keys rather than row positions.
    #[must_use]
    pub fn is_named(&self) -> bool {
        self.names.iter().any(Option::is_some)
    }

    /// Labels of one level as scalars, ready to become a column.
    #[must_use]
    pub fn level_values(&self, level: usize) -> Vec<Scalar> {
        self.labels
            .iter()
            .map(|label| {
                label
                    .level(level)
                    .map_or(Scalar::Null(NullKind::NaN), IndexLabel::to_scalar)
            })
            .collect()
    }

    #[must_use]
    pub fn take(&self, positions: &[usize]) -> Self {
        let labels = positions
            .iter()
            .filter_map(|idx| self.labels.get(*idx).cloned())
            .collect();
        Self {
            labels,
            names: self.names.clone(),
        }
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        let mut seen = HashMap::<&IndexLabel, ()>::new();
        for label in &self.labels {
            if seen.insert(label, ()).is_some() {
                return true;
            }
        }
        false
    }

    #[must_use]
    pub fn position(&self, needle: &IndexLabel) -> Option<usize> {
        self.labels.iter().position(|label| label == needle)
    }

    #[must_use]
    pub fn position_map_first(&self) -> HashMap<IndexLabel, usize> {
        let mut positions = HashMap::with_capacity(self.labels.len());
        for (idx, label) in self.labels.iter().enumerate() {
            positions.entry(label.clone()).or_insert(idx);
        }
        positions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentPlan {
    pub union_index: Index,
    pub left_positions: Vec<Option<usize>>,
    pub right_positions: Vec<Option<usize>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("alignment vectors must have equal lengths")]
    InvalidAlignmentVectors,
    #[error("label {label} not found in index")]
    LabelNotFound { label: String },
    #[error("position {position} is out of bounds for length {len}")]
    OutOfBounds { position: i64, len: usize },
}

pub fn align_union(left: &Index, right: &Index) -> AlignmentPlan {
    let left_positions_map = left.position_map_first();
    let right_positions_map = right.position_map_first();

    let mut union_labels = left.labels.clone();
    for label in &right.labels {
        if !left_positions_map.contains_key(label) {
            union_labels.push(label.clone());
        }
    }

    let left_positions = union_labels
        .iter()
        .map(|label| left_positions_map.get(label).copied())
        .collect();

    let right_positions = union_labels
        .iter()
        .map(|label| right_positions_map.get(label).copied())
        .collect();

    let names = if left.names == right.names {
        left.names.clone()
    } else {
        vec![None; left.nlevels()]
    };

    AlignmentPlan {
        union_index: Index::new(union_labels).with_names(names),
        left_positions,
        right_positions,
    }
}

pub fn validate_alignment_plan(plan: &AlignmentPlan) -> Result<(), IndexError> {
    if plan.left_positions.len() != plan.right_positions.len()
        || plan.left_positions.len() != plan.union_index.len()
    {
        return Err(IndexError::InvalidAlignmentVectors);
    }

    Ok(())
}

/// Resolve a possibly negative position against `len`.
pub fn resolve_position(position: i64, len: usize) -> Result<usize, IndexError> {
    let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if position < 0 {
        signed_len + position
    } else {
        position
    };
    if resolved < 0 || resolved >= signed_len {
        return Err(IndexError::OutOfBounds { position, len });
    }
    usize::try_from(resolved).map_err(|_| IndexError::OutOfBounds { position, len })
}

#[cfg(test)]
mod tests {
    use af_types::Scalar;

    use super::{Index, IndexError, IndexLabel, align_union, resolve_position, validate_alignment_plan};

    #[test]
    fn union_alignment_preserves_left_then_right_unseen_order() {
        let left = Index::new(vec![1_i64.into(), 2_i64.into(), 4_i64.into()]);
        let right = Index::new(vec![2_i64.into(), 3_i64.into(), 4_i64.into()]);

        let plan = align_union(&left, &right);
        assert_eq!(
            plan.union_index.labels(),
            &[
                IndexLabel::Int64(1),
                IndexLabel::Int64(2),
                IndexLabel::Int64(4),
                IndexLabel::Int64(3),
            ]
        );
        assert_eq!(plan.left_positions, vec![Some(0), Some(1), Some(2), None]);
        assert_eq!(plan.right_positions, vec![None, Some(0), Some(2), Some(1)]);
        validate_alignment_plan(&plan).expect("plan must be valid");
    }

    #[test]
    fn alignment_keeps_shared_name() {
        let left = Index::from_utf8(vec!["SP".into()]).with_name(Some("customer_state".into()));
        let right = Index::from_utf8(vec!["RJ".into()]).with_name(Some("customer_state".into()));
        let plan = align_union(&left, &right);
        assert_eq!(plan.union_index.name(), Some("customer_state"));
    }

    #[test]
    fn duplicate_detection_matches_index_surface() {
        let index = Index::new(vec!["a".into(), "a".into(), "b".into()]);
        assert!(index.has_duplicates());
    }

    #[test]
    fn composite_labels_expose_levels() {
        let label = IndexLabel::Composite(vec!["SP".into(), IndexLabel::Int64(2018)]);
        assert_eq!(label.nlevels(), 2);
        assert_eq!(label.to_string(), "(SP, 2018)");
        let index = Index::new(vec![label]).with_names(vec![
            Some("customer_state".into()),
            Some("year".into()),
        ]);
        assert_eq!(index.nlevels(), 2);
        assert!(index.is_named());
        assert_eq!(index.level_values(1), vec![Scalar::Int64(2018)]);
    }

    #[test]
    fn float_labels_hash_and_compare_consistently() {
        let a = IndexLabel::from_scalar(&Scalar::Float64(5.0));
        let b = IndexLabel::Float64(5.0);
        assert_eq!(a, b);
        assert!(IndexLabel::Float64(1.0) < IndexLabel::Float64(4.5));
        assert_eq!(IndexLabel::from_scalar(&Scalar::Float64(f64::NAN)), IndexLabel::Missing);
    }

    #[test]
    fn range_index_is_unnamed() {
        let index = Index::range(3);
        assert_eq!(index.len(), 3);
        assert!(!index.is_named());
        assert_eq!(index.labels()[2], IndexLabel::Int64(2));
    }

    #[test]
    fn negative_positions_count_from_the_end() {
        assert_eq!(resolve_position(-1, 4), Ok(3));
        assert_eq!(
            resolve_position(4, 4),
            Err(IndexError::OutOfBounds { position: 4, len: 4 })
        );
    }

    #[test]
    fn labels_serialize_with_kind_tag() {
        let json = serde_json::to_string(&IndexLabel::from("SP")).expect("serialize");
        assert_eq!(json, r#"{"kind":"utf8","value":"SP"}"#);
    }
}
