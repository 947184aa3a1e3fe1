/// Fragments generators emit that evaluate to something other than what the
/// question asked for, with their replacement.
pub const REWRITES: [(&str, &str); 2] = [
    (".to_period('Q') - 1", ".to_period('Q')"),
    (".to_period(\"Q\") - 1", ".to_period(\"Q\")"),
];

const FENCE_OPEN: &str = "```python";

/// Normalize raw generator output into one line of expression text.
///
/// Never fails, and `sanitize(&sanitize(x)) == sanitize(x)`.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    let unfenced = raw.replace(FENCE_OPEN, "").replace('`', "");
    let continued = unfenced.replace("\\\r\n", " ").replace("\\\n", " ");
    let joined = continued.lines().collect::<Vec<_>>().join(" ");
    let mut text = joined.trim().to_owned();

    // Each rewrite shortens the text, so this reaches a fixpoint.
    loop {
        let mut changed = false;
        for (fragment, replacement) in REWRITES {
            if text.contains(fragment) {
                text = text.replace(fragment, replacement);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(expression = %text, "sanitized expression");
    text
}

#[cfg(test)]
mod tests {
    use super::sanitize;

    #[test]
    fn strips_fences_and_backticks() {
        let raw = "```python\ndf['payment_value'].sum()\n```";
        assert_eq!(sanitize(raw), "df['payment_value'].sum()");
        assert_eq!(sanitize("`df.shape`"), "df.shape");
    }

    #[test]
    fn joins_continuations_and_lines() {
        let raw = "df[df['review_score'] > 3] \\\n  .groupby('customer_state')\n['payment_value'].sum()";
        assert_eq!(
            sanitize(raw),
            "df[df['review_score'] > 3]    .groupby('customer_state') ['payment_value'].sum()"
        );
        assert_eq!(sanitize("a\\\r\nb"), "a b");
    }

    #[test]
    fn rewrites_quarter_arithmetic() {
        assert_eq!(
            sanitize("df['ts'].dt.to_period('Q') - 1"),
            "df['ts'].dt.to_period('Q')"
        );
        assert_eq!(
            sanitize("df['ts'].dt.to_period(\"Q\") - 1 - 1"),
            "df['ts'].dt.to_period(\"Q\")"
        );
    }

    #[test]
    fn blank_input_stays_blank() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("  \n```\n  "), "");
    }
}
