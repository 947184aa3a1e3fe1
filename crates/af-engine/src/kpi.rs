use af_columnar::{ColumnError, ReduceOp};
use af_frame::DataFrame;
use af_types::Scalar;
use serde::{Deserialize, Serialize};

pub const ORDER_ID_COLUMN: &str = "order_id";
pub const REVENUE_COLUMN: &str = "payment_value";
pub const REVIEW_COLUMN: &str = "review_score";

/// Headline figures shown before the first question. A figure is `None`
/// when its column is absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    pub total_orders: Option<i64>,
    pub total_revenue: Option<f64>,
    pub average_review_score: Option<f64>,
}

impl Kpis {
    #[must_use]
    pub fn render_plain(&self) -> String {
        let orders = self
            .total_orders
            .map_or_else(|| "n/a".to_owned(), group_thousands);
        let revenue = self.total_revenue.map_or_else(
            || "n/a".to_owned(),
            |value| {
                if value.is_finite() {
                    group_thousands(value.round() as i64)
                } else {
                    value.to_string()
                }
            },
        );
        let review = self
            .average_review_score
            .map_or_else(|| "n/a".to_owned(), |value| format!("{value:.2}"));
        format!(
            "Total orders: {orders} | Total revenue (R$): {revenue} | Avg review score: {review}"
        )
    }
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

fn reduce_column(frame: &DataFrame, name: &str, op: ReduceOp) -> Result<Option<Scalar>, ColumnError> {
    frame
        .column(name)
        .map(|column| column.reduce(op))
        .transpose()
}

fn as_number(value: &Scalar) -> Result<f64, ColumnError> {
    if value.is_missing() {
        return Ok(f64::NAN);
    }
    value.to_f64().map_err(ColumnError::Type)
}

pub fn compute_kpis(frame: &DataFrame) -> Result<Kpis, ColumnError> {
    let total_orders = match reduce_column(frame, ORDER_ID_COLUMN, ReduceOp::Nunique)? {
        Some(Scalar::Int64(count)) => Some(count),
        Some(_) | None => None,
    };
    let total_revenue = reduce_column(frame, REVENUE_COLUMN, ReduceOp::Sum)?
        .map(|value| as_number(&value))
        .transpose()?;
    let average_review_score = reduce_column(frame, REVIEW_COLUMN, ReduceOp::Mean)?
        .map(|value| as_number(&value))
        .transpose()?;
    Ok(Kpis {
        total_orders,
        total_revenue,
        average_review_score,
    })
}

#[cfg(test)]
mod tests {
    use af_columnar::Column;
    use af_frame::DataFrame;
    use af_types::{NullKind, Scalar};

    use super::{Kpis, compute_kpis, group_thousands};

    #[test]
    fn computes_each_figure_from_its_column() {
        let frame = DataFrame::from_columns(vec![
            (
                "order_id".to_owned(),
                Column::from_values(vec!["o1".into(), "o1".into(), "o2".into()]).expect("ids"),
            ),
            (
                "payment_value".to_owned(),
                Column::from_values(vec![
                    Scalar::Float64(1_000.5),
                    Scalar::Float64(2_000.0),
                    Scalar::Null(NullKind::NaN),
                ])
                .expect("payments"),
            ),
            (
                "review_score".to_owned(),
                Column::from_values(vec![Scalar::Int64(5), Scalar::Int64(4), Scalar::Int64(3)])
                    .expect("scores"),
            ),
        ])
        .expect("frame");
        let kpis = compute_kpis(&frame).expect("kpis");
        assert_eq!(
            kpis,
            Kpis {
                total_orders: Some(2),
                total_revenue: Some(3_000.5),
                average_review_score: Some(4.0),
            }
        );
        assert_eq!(
            kpis.render_plain(),
            "Total orders: 2 | Total revenue (R$): 3,001 | Avg review score: 4.00"
        );
    }

    #[test]
    fn absent_columns_give_none() {
        let frame = DataFrame::from_columns(vec![(
            "customer_state".to_owned(),
            Column::from_values(vec!["SP".into()]).expect("state"),
        )])
        .expect("frame");
        let kpis = compute_kpis(&frame).expect("kpis");
        assert_eq!(kpis.total_orders, None);
        assert_eq!(kpis.total_revenue, None);
        assert_eq!(kpis.average_review_score, None);
        assert!(kpis.render_plain().contains("Total orders: n/a"));
    }

    #[test]
    fn thousands_are_grouped() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(16_008_872), "16,008,872");
        assert_eq!(group_thousands(-1_234), "-1,234");
    }
}
