//! Statement template formatting.
//!
//! Templates use printf-style specifiers:
//!
//! | specifier | output |
//! |---|---|
//! | `%s` | argument inserted verbatim |
//! | `%I` | argument quoted as an identifier when needed |
//! | `%L` | argument quoted as a string literal |
//! | `%%` | a literal `%` |
//!
//! ```rust
//! use pgmux_client::format::format;
//!
//! let sql = format("notify %I, %L", &[&"potato", &"it's done"]).unwrap();
//! assert_eq!(sql, "notify potato, 'it''s done'");
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// A template argument.
pub type Param<'a> = &'a (dyn fmt::Display + Sync);

/// A function rendering a template and its arguments into a statement.
pub type Formatter = Arc<dyn Fn(&str, &[Param<'_>]) -> Result<String> + Send + Sync>;

/// Keywords that must be quoted when used as identifiers.
const RESERVED: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "natural", "not", "notnull", "null", "offset", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "returning", "right",
    "select", "session_user", "similar", "some", "symmetric", "table", "tablesample",
    "then", "to", "trailing", "true", "union", "unique", "user", "using", "variadic",
    "verbose", "when", "where", "window", "with",
];

/// Render `template` with `params` using the default escaping rules.
pub fn format(template: &str, params: &[Param<'_>]) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16 * params.len());
    let mut args = params.iter();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let spec = match chars.next() {
            Some('%') => {
                out.push('%');
                continue;
            }
            Some(spec @ ('s' | 'I' | 'L')) => spec,
            Some(other) => {
                return Err(Error::Format(format!(
                    "unsupported format specifier %{other}"
                )));
            }
            None => return Err(Error::Format("template ends with a lone %".into())),
        };

        let arg = args.next().ok_or_else(|| {
            Error::Format(format!(
                "template expects more than {} argument(s)",
                params.len()
            ))
        })?;
        let text = arg.to_string();

        match spec {
            'I' => out.push_str(&quote_ident(&text)),
            'L' => out.push_str(&quote_literal(&text)),
            _ => out.push_str(&text),
        }
    }

    if args.next().is_some() {
        return Err(Error::Format(format!(
            "{} argument(s) supplied but the template uses fewer",
            params.len()
        )));
    }

    Ok(out)
}

/// The default [`Formatter`].
#[must_use]
pub fn default_formatter() -> Formatter {
    Arc::new(format)
}

/// Quote an identifier if it is not a plain lowercase name.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    if is_plain_identifier(ident) && !RESERVED.contains(&ident) {
        return ident.to_string();
    }

    let mut quoted = String::with_capacity(ident.len() + 2);
    quoted.push('"');
    for c in ident.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Quote a string literal.
///
/// Values containing backslashes use the `E'...'` escape-string form so the
/// result is independent of `standard_conforming_strings`.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    let escape = value.contains('\\');
    let mut quoted = String::with_capacity(value.len() + 3);
    if escape {
        quoted.push('E');
    }
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_raw_arguments() {
        let sql = format("select %s as %s;", &[&"1", &"value"]).unwrap();
        assert_eq!(sql, "select 1 as value;");
    }

    #[test]
    fn test_display_arguments() {
        let sql = format("select %s + %L", &[&1, &2.5]).unwrap();
        assert_eq!(sql, "select 1 + '2.5'");
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(quote_ident("potato"), "potato");
        assert_eq!(quote_ident("_tbl$1"), "_tbl$1");
        assert_eq!(quote_ident("Potato"), "\"Potato\"");
        assert_eq!(quote_ident("also invalid"), "\"also invalid\"");
        assert_eq!(quote_ident("select"), "\"select\"");
        assert_eq!(quote_ident("1st"), "\"1st\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident(""), "\"\"");
    }

    #[test]
    fn test_literal_quoting() {
        assert_eq!(quote_literal("lemon"), "'lemon'");
        assert_eq!(quote_literal("o'clock"), "'o''clock'");
        assert_eq!(quote_literal("a\\b"), "E'a\\\\b'");
        assert_eq!(quote_literal(""), "''");
    }

    #[test]
    fn test_notify_statement() {
        let sql = format("notify %I, %L", &[&"potato", &"lemon"]).unwrap();
        assert_eq!(sql, "notify potato, 'lemon'");
    }

    #[test]
    fn test_percent_escape() {
        let sql = format("select '100%%' as %I", &[&"pct"]).unwrap();
        assert_eq!(sql, "select '100%' as pct");
    }

    #[test]
    fn test_argument_count_mismatch() {
        assert!(matches!(format("select %s, %s", &[&1]), Err(Error::Format(_))));
        assert!(matches!(format("select 1", &[&1]), Err(Error::Format(_))));
    }

    #[test]
    fn test_bad_specifiers() {
        assert!(matches!(format("select %d", &[&1]), Err(Error::Format(_))));
        assert!(matches!(format("select 5%", &[]), Err(Error::Format(_))));
    }

    fn unquote_literal(quoted: &str) -> String {
        let (escape, body) = match quoted.strip_prefix('E') {
            Some(rest) => (true, rest),
            None => (false, quoted),
        };
        let body = &body[1..body.len() - 1];
        let mut out = String::new();
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    chars.next();
                    out.push('\'');
                }
                '\\' if escape => {
                    chars.next();
                    out.push('\\');
                }
                c => out.push(c),
            }
        }
        out
    }

    proptest! {
        #[test]
        fn prop_literal_quoting_is_reversible(value in ".*") {
            let quoted = quote_literal(&value);
            prop_assert_eq!(unquote_literal(&quoted), value);
        }

        #[test]
        fn prop_quoted_identifiers_are_delimited(ident in "[A-Za-z0-9_ \"]{0,16}") {
            let quoted = quote_ident(&ident);
            if quoted != ident {
                prop_assert!(quoted.starts_with('"') && quoted.ends_with('"'));
                prop_assert_eq!(quoted.matches('"').count(), ident.matches('"').count() * 2 + 2);
            }
        }
    }
}
