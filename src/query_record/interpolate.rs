//! Placeholder interpolation
//!
//! Rebuilds executable SQL from a prepared statement and its bound
//! arguments. Substitution is quote-aware: a `?` inside a string literal or
//! a backtick-quoted identifier is left alone. The output is diagnostic but
//! must never read as something other than the statement the client ran.

use super::stmt_args::{BindArg, BindValue};
use crate::error::{ProxyError, Result};

/// Replace each `?` placeholder in `sql` with the textual form of the
/// corresponding argument.
///
/// Errors if the number of substitutable placeholders does not match the
/// number of arguments.
pub fn interpolate(sql: &str, args: &[BindArg]) -> Result<String> {
    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let mut next_arg = args.iter();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars();

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                out.push(ch);
                if ch == '\\' && q != '`' {
                    // backslash escapes apply inside ' and " literals only
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    out.push(ch);
                }
                '?' => match next_arg.next() {
                    Some(arg) => out.push_str(&render_value(&arg.value)),
                    None => {
                        return Err(ProxyError::ParseArgs(
                            "more placeholders than bound arguments".into(),
                        ))
                    }
                },
                _ => out.push(ch),
            },
        }
    }

    if next_arg.next().is_some() {
        return Err(ProxyError::ParseArgs(
            "more bound arguments than placeholders".into(),
        ));
    }

    Ok(out)
}

/// Textual form of a bound value: integers verbatim, NULL as the literal,
/// strings single-quoted and escaped.
fn render_value(value: &BindValue) -> String {
    match value {
        BindValue::Null => "NULL".to_string(),
        BindValue::UInt(n) => n.to_string(),
        BindValue::Text(s) => format!("'{}'", escape_string(s)),
    }
}

/// MySQL string-literal escaping: backslash, both quote kinds, NUL, newline,
/// carriage return, and ctrl-Z.
fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\0' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\u{1a}' => escaped.push_str("\\Z"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
