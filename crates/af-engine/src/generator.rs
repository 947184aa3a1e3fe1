use thiserror::Error;

/// Columns listed in the prompt before the list is elided.
const MAX_PROMPT_COLUMNS: usize = 40;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("expression generator unavailable: {0}")]
    Unavailable(String),
    #[error("expression generator returned no expression")]
    Empty,
}

/// Turns a prompt into candidate expression text. The output is untrusted
/// and always goes through sanitization and the sandbox.
pub trait ExpressionGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GeneratorError>;
}

impl<F> ExpressionGenerator for F
where
    F: Fn(&str) -> Result<String, GeneratorError>,
{
    fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        self(prompt)
    }
}

/// The contract given to the generator: one expression over `df`, using
/// only the operations the sandbox evaluates.
#[must_use]
pub fn build_prompt(question: &str, columns: &[String]) -> String {
    let mut listed = columns
        .iter()
        .take(MAX_PROMPT_COLUMNS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if columns.len() > MAX_PROMPT_COLUMNS {
        listed.push_str(", ...");
    }

    format!(
        r#"You are a pandas data analyst.

Dataset (df) has columns:
{listed}

Task:
Write ONE valid pandas expression using df to answer the question below.

Question:
"""{question}"""

Guidelines:
1. Timestamp columns are already datetimes; use the .dt accessor directly.
2. If the question mentions "last quarter", interpret it as the last 3 months
   before the most recent purchase in the dataset:
      df['order_purchase_timestamp'].max() - pd.DateOffset(months=3)
3. Use vectorized pandas syntax only: no statements, assignments, prints or imports.
4. Prefer nlargest(1).index[0] instead of idxmax() for stability.
5. Return only the pandas expression (no explanation text)."#,
        question = question.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::{ExpressionGenerator, GeneratorError, build_prompt};

    #[test]
    fn prompt_states_the_contract() {
        let columns = vec!["order_purchase_timestamp".to_owned(), "payment_value".to_owned()];
        let prompt = build_prompt("  Which state sold most?  ", &columns);
        assert!(prompt.contains("order_purchase_timestamp, payment_value\n"));
        assert!(prompt.contains("\"\"\"Which state sold most?\"\"\""));
        assert!(prompt.contains("last 3 months"));
        assert!(prompt.contains("pd.DateOffset(months=3)"));
        assert!(prompt.contains("nlargest(1).index[0]"));
        assert!(prompt.contains("no statements, assignments, prints or imports"));
        assert!(prompt.starts_with(
            "You are a pandas data analyst.\n\nDataset (df) has columns:\norder_purchase_timestamp, payment_value\n\nTask:\n"
        ));
        assert!(prompt.ends_with("5. Return only the pandas expression (no explanation text)."));
    }

    #[test]
    fn long_column_lists_are_elided() {
        let columns = (0..50).map(|idx| format!("c{idx}")).collect::<Vec<_>>();
        let prompt = build_prompt("q", &columns);
        assert!(prompt.contains("c39, ..."));
        assert!(!prompt.contains("c40"));
    }

    #[test]
    fn closures_are_generators() {
        let generator = |prompt: &str| -> Result<String, GeneratorError> {
            Ok(format!("len({})", prompt.len()))
        };
        assert_eq!(generator.generate("abc").expect("generate"), "len(3)");
        let failing = |_: &str| -> Result<String, GeneratorError> { Err(GeneratorError::Empty) };
        assert!(matches!(failing.generate("x"), Err(GeneratorError::Empty)));
    }
}
