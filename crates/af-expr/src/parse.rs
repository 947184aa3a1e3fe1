use af_columnar::ComparisonOp;
use af_types::{NullKind, Scalar};

use crate::{BinaryOp, Expr, ExprError, Keyword, SubscriptItem};

/// Longest accepted token stream. Generated expressions are a few hundred
/// tokens at most; the cap bounds AST depth for the recursive evaluator.
pub const MAX_TOKENS: usize = 4_096;

/// Deepest accepted bracket nesting.
pub const MAX_NESTING: usize = 48;

/// Deepest accepted expression tree, in nodes from the root. Long method
/// chains and operator runs nest without brackets, so this is checked on
/// the tree itself. The interpreter recurses once per level.
pub const MAX_DEPTH: usize = 32;

/// Parse a single expression.
///
/// Grammar (loosest binding first):
///   or_expr    → and_expr ( "or" and_expr )*
///   and_expr   → not_expr ( "and" not_expr )*
///   not_expr   → "not"* comparison
///   comparison → bit_or ( ("==" | "!=" | ">" | ">=" | "<" | "<=") bit_or )?
///   bit_or     → bit_and ( "|" bit_and )*
///   bit_and    → additive ( "&" additive )*
///   additive   → term ( ("+" | "-") term )*
///   term       → unary ( ("*" | "/" | "%") unary )*
///   unary      → ("-" | "~")* postfix
///   postfix    → atom ( "." IDENT | "(" args ")" | "[" subscript "]" )*
///   atom       → INT | FLOAT | STRING | True | False | None | IDENT
///              | "(" expr ")" | "[" expr ("," expr)* "]"
pub fn parse_expr(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    let mut pos = 0;
    let result = parse_or(&tokens, &mut pos)?;
    if pos < tokens.len() {
        return Err(ExprError::ParseError(format!(
            "unexpected token at position {pos}: {:?}",
            tokens[pos]
        )));
    }
    if result.depth() > MAX_DEPTH {
        return Err(ExprError::TooDeep);
    }
    Ok(result)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    // Comparison
    EqEq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    // Bitwise (elementwise logic)
    Amp,
    Pipe,
    Tilde,
    // Grouping and access
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Assign,
    // Logical (keywords)
    And,
    Or,
    Not,
}

fn number_token(text: &str) -> Result<Token, ExprError> {
    let cleaned = text.replace('_', "");
    if cleaned.contains(['.', 'e', 'E']) {
        cleaned
            .parse::<f64>()
            .map(Token::Float)
            .map_err(|_| ExprError::ParseError(format!("invalid float: {text}")))
    } else {
        cleaned
            .parse::<i64>()
            .map(Token::Int)
            .map_err(|_| ExprError::ParseError(format!("invalid integer: {text}")))
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut depth = 0_usize;
    let mut i = 0;
    while i < chars.len() {
        if tokens.len() > MAX_TOKENS {
            return Err(ExprError::ParseError("expression is too long".into()));
        }
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '&' => Some(Token::Amp),
            '|' => Some(Token::Pipe),
            '~' => Some(Token::Tilde),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            '(' | '[' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(ExprError::ParseError("expression nested too deeply".into()));
                }
                Some(if c == '(' { Token::LParen } else { Token::LBracket })
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                Some(if c == ')' { Token::RParen } else { Token::RBracket })
            }
            _ => None,
        };
        if let Some(token) = single {
            if token == Token::Star && chars.get(i + 1) == Some(&'*') {
                return Err(ExprError::ParseError("unsupported operator '**'".into()));
            }
            if token == Token::Slash && chars.get(i + 1) == Some(&'/') {
                return Err(ExprError::ParseError("unsupported operator '//'".into()));
            }
            tokens.push(token);
            i += 1;
            continue;
        }

        match c {
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    tokens.push(Token::Assign);
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    return Err(ExprError::ParseError(
                        "expected '!=' but found single '!'".into(),
                    ));
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '.' if !chars.get(i + 1).is_some_and(char::is_ascii_digit) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut text = String::new();
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(ExprError::ParseError("unterminated string literal".into()));
                    };
                    i += 1;
                    if ch == quote {
                        break;
                    }
                    if ch == '\\' {
                        let Some(&escaped) = chars.get(i) else {
                            return Err(ExprError::ParseError(
                                "unterminated string literal".into(),
                            ));
                        };
                        i += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    } else {
                        text.push(ch);
                    }
                }
                tokens.push(Token::Str(text));
            }
            _ if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() {
                    let ch = chars[i];
                    let exponent_sign = (ch == '+' || ch == '-')
                        && matches!(chars.get(i.wrapping_sub(1)), Some('e' | 'E'));
                    if ch.is_ascii_digit() || ch == '.' || ch == '_' || ch == 'e' || ch == 'E' || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(number_token(&text)?);
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "not" => tokens.push(Token::Not),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            _ => {
                return Err(ExprError::ParseError(format!(
                    "unexpected character: '{c}'"
                )));
            }
        }
    }
    Ok(tokens)
}

fn peek<'a>(tokens: &'a [Token], pos: &usize) -> Option<&'a Token> {
    tokens.get(*pos)
}

fn expect(tokens: &[Token], pos: &mut usize, token: &Token, what: &str) -> Result<(), ExprError> {
    if peek(tokens, pos) == Some(token) {
        *pos += 1;
        Ok(())
    } else {
        Err(ExprError::ParseError(format!("expected {what}")))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn parse_or(tokens: &[Token], pos: &mut usize) -> Result<Expr, ExprError> {
    let mut left = parse_and(tokens, pos)?;
    while peek(tokens, pos) == Some(&Token::Or) {
        *pos += 1;
        let right = parse_and(tokens, pos)?;
        left = Expr::Or {
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_and(tokens: &[Token], pos: &mut usize) -> Result<Expr, ExprError> {
    let mut left = parse_not(tokens, pos)?;
    while peek(tokens, pos) == Some(&Token::And) {
        *pos += 1;
        let right = parse_not(tokens, pos)?;
        left = Expr::And {
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_not(tokens: &[Token], pos: &mut usize) -> Result<Expr, ExprError> {
    let mut negations = 0_usize;
    while peek(tokens, pos) == Some(&Token::Not) {
        *pos += 1;
        negations += 1;
    }
    let mut inner = parse_comparison(tokens, pos)?;
    for _ in 0..negations {
        inner = Expr::Not {
            expr: Box::new(inner),
        };
    }
    Ok(inner)
}

fn parse_comparison(tokens: &[Token], pos: &mut usize) -> Result<Expr, ExprError> {
    let left = parse_bit_or(tokens, pos)?;
    let op = match peek(tokens, pos) {
        Some(Token::EqEq) => Some(ComparisonOp::Eq),
        Some(Token::NotEq) => Some(ComparisonOp::Ne),
        Some(Token::Gt) => Some(ComparisonOp::Gt),
        Some(Token::Ge) => Some(ComparisonOp::Ge),
        Some(Token::Lt) => Some(ComparisonOp::Lt),
        Some(Token::Le) => Some(ComparisonOp::Le),
        _ => None,
    };
    if let Some(op) = op {
        *pos += 1;
        let right = parse_bit_or(tokens, pos)?;
        return Ok(Expr::Compare {
            left: Box::new(left),
            right: Box::new(right),
            op,
        });
    }
    Ok(left)
}

fn parse_bit_or(tokens: &[Token], pos: &mut usize) -> Result<Expr, ExprError> {
    let mut left = parse_bit_and(tokens, pos)?;
    while peek(tokens, pos) == Some(&Token::Pipe) {
        *pos += 1;
        let right = parse_bit_and(tokens, pos)?;
        left = binary(BinaryOp::BitOr, left, right);
    }
    Ok(left)
}

fn parse_bit_and(tokens: &[Token], pos: &mut usize) -> Result<Expr, ExprError> {
    let mut left = parse_add(tokens, pos)?;
    while peek(tokens, pos) == Some(&Token::Amp) {
        *pos += 1;
        let right = parse_add(tokens, pos)?;
        left = binary(BinaryOp::BitAnd, left, right);
    }
    Ok(left)
}

fn parse_add(tokens: &[Token], pos: &mut usize) -> Result<Expr, ExprError> {
    let mut left = parse_mul(tokens, pos)?;
    loop {
        let op = match peek(tokens, pos) {
            Some(Token::Plus) => BinaryOp::Add,
            Some(Token::Minus) => BinaryOp::Sub,
            _ => break,
        };
        *pos += 1;
        let right = parse_mul(tokens, pos)?;
        left = binary(op, left, right);
    }
    Ok(left)
}

fn parse_mul(tokens: &[Token], pos: &mut usize) -> Result<Expr, ExprError> {
    let mut left = parse_unary(tokens, pos)?;
    loop {
        let op = match peek(tokens, pos) {
            Some(Token::Star) => BinaryOp::Mul,
            Some(Token::Slash) => BinaryOp::Div,
            Some(Token::Percent) => BinaryOp::Mod,
            _ => break,
        };
        *pos += 1;
        let right = parse_unary(tokens, pos)?;
        left = binary(op, left, right);
    }
    Ok(left)
}

fn parse_unary(tokens: &[Token], pos: &mut usize) -> Result<Expr, ExprError> {
    let mut prefixes = Vec::new();
    while let Some(token @ (Token::Minus | Token::Tilde | Token::Plus)) = peek(tokens, pos) {
        prefixes.push(token.clone());
        *pos += 1;
    }
    let mut inner = parse_postfix(tokens, pos)?;
    for prefix in prefixes.into_iter().rev() {
        inner = match (prefix, inner) {
            (Token::Minus, Expr::Literal { value: Scalar::Int64(v) }) => Expr::Literal {
                value: Scalar::Int64(v.wrapping_neg()),
            },
            (Token::Minus, Expr::Literal { value: Scalar::Float64(v) }) => Expr::Literal {
                value: Scalar::Float64(-v),
            },
            (Token::Minus, other) => Expr::Neg {
                expr: Box::new(other),
            },
            (Token::Tilde, other) => Expr::Invert {
                expr: Box::new(other),
            },
            (_, other) => other,
        };
    }
    Ok(inner)
}

fn parse_postfix(tokens: &[Token], pos: &mut usize) -> Result<Expr, ExprError> {
    let mut expr = parse_atom(tokens, pos)?;
    loop {
        match peek(tokens, pos) {
            Some(Token::Dot) => {
                *pos += 1;
                let Some(Token::Ident(attr)) = peek(tokens, pos) else {
                    return Err(ExprError::ParseError("expected attribute name after '.'".into()));
                };
                let attr = attr.clone();
                *pos += 1;
                expr = Expr::Attribute {
                    object: Box::new(expr),
                    attr,
                };
            }
            Some(Token::LParen) => {
                *pos += 1;
                let (args, kwargs) = parse_args(tokens, pos)?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            }
            Some(Token::LBracket) => {
                *pos += 1;
                let items = parse_subscript(tokens, pos)?;
                expr = Expr::Subscript {
                    object: Box::new(expr),
                    items,
                };
            }
            _ => return Ok(expr),
        }
    }
}

fn parse_args(tokens: &[Token], pos: &mut usize) -> Result<(Vec<Expr>, Vec<Keyword>), ExprError> {
    let mut args = Vec::new();
    let mut kwargs = Vec::new();
    while peek(tokens, pos) != Some(&Token::RParen) {
        let keyword = match (peek(tokens, pos), tokens.get(*pos + 1)) {
            (Some(Token::Ident(name)), Some(Token::Assign)) => Some(name.clone()),
            _ => None,
        };
        if let Some(name) = keyword {
            *pos += 2;
            let value = parse_or(tokens, pos)?;
            kwargs.push(Keyword { name, value });
        } else {
            if !kwargs.is_empty() {
                return Err(ExprError::ParseError(
                    "positional argument follows keyword argument".into(),
                ));
            }
            args.push(parse_or(tokens, pos)?);
        }
        if peek(tokens, pos) == Some(&Token::Comma) {
            *pos += 1;
        } else {
            break;
        }
    }
    expect(tokens, pos, &Token::RParen, "closing ')'")?;
    Ok((args, kwargs))
}

fn parse_subscript(tokens: &[Token], pos: &mut usize) -> Result<Vec<SubscriptItem>, ExprError> {
    let mut items = Vec::new();
    loop {
        let start = match peek(tokens, pos) {
            Some(Token::Colon) => None,
            _ => Some(parse_or(tokens, pos)?),
        };
        let item = if peek(tokens, pos) == Some(&Token::Colon) {
            *pos += 1;
            let stop = match peek(tokens, pos) {
                Some(Token::RBracket | Token::Comma) => None,
                _ => Some(parse_or(tokens, pos)?),
            };
            if peek(tokens, pos) == Some(&Token::Colon) {
                return Err(ExprError::ParseError("slice steps are not supported".into()));
            }
            SubscriptItem::Slice { start, stop }
        } else {
            match start {
                Some(expr) => SubscriptItem::Index { expr },
                None => return Err(ExprError::ParseError("empty subscript".into())),
            }
        };
        items.push(item);
        if peek(tokens, pos) == Some(&Token::Comma) {
            *pos += 1;
        } else {
            break;
        }
    }
    expect(tokens, pos, &Token::RBracket, "closing ']'")?;
    Ok(items)
}

fn parse_atom(tokens: &[Token], pos: &mut usize) -> Result<Expr, ExprError> {
    let Some(token) = peek(tokens, pos) else {
        return Err(ExprError::ParseError(
            "unexpected end of expression".into(),
        ));
    };
    match token {
        Token::Int(n) => {
            let val = *n;
            *pos += 1;
            Ok(Expr::Literal {
                value: Scalar::Int64(val),
            })
        }
        Token::Float(f) => {
            let val = *f;
            *pos += 1;
            Ok(Expr::Literal {
                value: Scalar::Float64(val),
            })
        }
        Token::Str(s) => {
            let mut val = s.clone();
            *pos += 1;
            // Adjacent literals concatenate, as in Python.
            while let Some(Token::Str(next)) = peek(tokens, pos) {
                val.push_str(next);
                *pos += 1;
            }
            Ok(Expr::Literal {
                value: Scalar::Utf8(val),
            })
        }
        Token::Ident(name) => {
            let expr = match name.as_str() {
                "True" => Expr::Literal {
                    value: Scalar::Bool(true),
                },
                "False" => Expr::Literal {
                    value: Scalar::Bool(false),
                },
                "None" => Expr::Literal {
                    value: Scalar::Null(NullKind::Null),
                },
                _ => Expr::Name { name: name.clone() },
            };
            *pos += 1;
            Ok(expr)
        }
        Token::LParen => {
            *pos += 1; // skip '('
            let inner = parse_or(tokens, pos)?;
            expect(tokens, pos, &Token::RParen, "closing ')'")?;
            Ok(inner)
        }
        Token::LBracket => {
            *pos += 1;
            let mut items = Vec::new();
            while peek(tokens, pos) != Some(&Token::RBracket) {
                items.push(parse_or(tokens, pos)?);
                if peek(tokens, pos) == Some(&Token::Comma) {
                    *pos += 1;
                } else {
                    break;
                }
            }
            expect(tokens, pos, &Token::RBracket, "closing ']'")?;
            Ok(Expr::List { items })
        }
        other => Err(ExprError::ParseError(format!(
            "unexpected token: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use af_columnar::ComparisonOp;
    use af_types::Scalar;

    use super::{MAX_DEPTH, MAX_NESTING, parse_expr};
    use crate::{BinaryOp, Expr, ExprError, SubscriptItem};

    #[test]
    fn parses_method_chain_with_subscripts() {
        let expr = parse_expr("df.groupby('customer_state')['payment_value'].sum().idxmax()")
            .expect("parse");
        let Expr::Call { func, args, kwargs } = &expr else {
            panic!("outermost node should be a call: {expr:?}");
        };
        assert!(args.is_empty() && kwargs.is_empty());
        assert!(matches!(func.as_ref(), Expr::Attribute { attr, .. } if attr == "idxmax"));
    }

    #[test]
    fn bitwise_binds_tighter_than_comparison() {
        let expr = parse_expr("a > 1 & b").expect("parse");
        let Expr::Compare { op, right, .. } = expr else {
            panic!("comparison expected");
        };
        assert_eq!(op, ComparisonOp::Gt);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::BitAnd, .. }));
    }

    #[test]
    fn keyword_arguments_and_slices() {
        let expr = parse_expr("df.sort_values(by='x', ascending=False).iloc[:5]").expect("parse");
        let Expr::Subscript { items, .. } = expr else {
            panic!("subscript expected");
        };
        assert!(matches!(
            items.as_slice(),
            [SubscriptItem::Slice { start: None, stop: Some(Expr::Literal { value: Scalar::Int64(5) }) }]
        ));
    }

    #[test]
    fn negative_literals_fold() {
        assert_eq!(
            parse_expr("-3").expect("parse"),
            Expr::Literal {
                value: Scalar::Int64(-3)
            }
        );
        assert!(matches!(parse_expr("-x").expect("parse"), Expr::Neg { .. }));
    }

    #[test]
    fn exponent_floats_tokenize() {
        assert_eq!(
            parse_expr("1.5e3").expect("parse"),
            Expr::Literal {
                value: Scalar::Float64(1500.0)
            }
        );
    }

    #[test]
    fn statements_are_not_expressions() {
        assert!(matches!(parse_expr("import os"), Err(ExprError::ParseError(_))));
        assert!(matches!(parse_expr("x = 1"), Err(ExprError::ParseError(_))));
        assert!(matches!(parse_expr("df.head(;"), Err(ExprError::ParseError(_))));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let text = format!("{}1{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        assert!(matches!(parse_expr(&text), Err(ExprError::ParseError(_))));
    }

    #[test]
    fn long_chains_are_rejected_by_depth() {
        let chain = format!("df{}", ".head()".repeat(MAX_DEPTH));
        assert!(matches!(parse_expr(&chain), Err(ExprError::TooDeep)));
        let sum = vec!["1"; MAX_DEPTH + 1].join("+");
        assert!(matches!(parse_expr(&sum), Err(ExprError::TooDeep)));
        let negations = format!("{}x", "-".repeat(MAX_DEPTH));
        assert!(matches!(parse_expr(&negations), Err(ExprError::TooDeep)));
    }

    #[test]
    fn depth_counts_nodes_on_the_longest_path() {
        assert_eq!(parse_expr("df").expect("parse").depth(), 1);
        assert_eq!(parse_expr("df.head()").expect("parse").depth(), 3);
        let sum = vec!["1"; MAX_DEPTH].join("+");
        assert_eq!(parse_expr(&sum).expect("parse").depth(), MAX_DEPTH);
        let query = "df[df['ts'] >= df['ts'].max() - pd.DateOffset(months=3)]\
                     .groupby('customer_state')['payment_value'].sum().idxmax()";
        assert!(parse_expr(query).expect("parse").depth() < MAX_DEPTH);
    }
}
