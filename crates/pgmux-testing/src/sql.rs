//! Minimal statement parsing for the mock backend.
//!
//! Only the handful of commands the workspace's tests issue are understood.
//! Identifiers and literals follow server quoting rules so that output of
//! the client's formatter parses back to the original values.

/// A recognized command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Begin,
    Commit,
    Rollback,
    Savepoint,
    RollbackToSavepoint,
    SetTransaction,
    SelectTrue,
    SelectOne,
    SelectLiteral { value: String, alias: String },
    SelectAll { table: String },
    Insert { table: String, value: String },
    Listen { channel: String },
    Unlisten { channel: Option<String> },
    Notify { channel: String, payload: String },
}

/// Parse one statement. Trailing semicolons and surrounding whitespace are
/// ignored. Returns a syntax error message on failure.
pub(crate) fn parse(statement: &str) -> Result<Command, String> {
    let stmt = statement.trim().trim_end_matches(';').trim();
    let lower = stmt.to_lowercase();
    let (keyword, rest) = split_word(stmt);

    match keyword.to_lowercase().as_str() {
        "begin" | "start" => Ok(Command::Begin),
        "commit" | "end" => Ok(Command::Commit),
        "rollback" | "abort" => {
            if lower.contains(" to ") {
                Ok(Command::RollbackToSavepoint)
            } else {
                Ok(Command::Rollback)
            }
        }
        "savepoint" => Ok(Command::Savepoint),
        "set" if lower.starts_with("set transaction") => Ok(Command::SetTransaction),
        "select" => parse_select(rest),
        "insert" => parse_insert(rest),
        "listen" => {
            let (channel, rest) = ident(rest)?;
            expect_end(rest)?;
            Ok(Command::Listen { channel })
        }
        "unlisten" => {
            if rest.trim() == "*" {
                return Ok(Command::Unlisten { channel: None });
            }
            let (channel, rest) = ident(rest)?;
            expect_end(rest)?;
            Ok(Command::Unlisten {
                channel: Some(channel),
            })
        }
        "notify" => {
            let (channel, rest) = ident(rest)?;
            let rest = rest.trim_start();
            if rest.is_empty() {
                return Ok(Command::Notify {
                    channel,
                    payload: String::new(),
                });
            }
            let rest = rest
                .strip_prefix(',')
                .ok_or_else(|| syntax_error(rest))?;
            let (payload, rest) = literal(rest)?;
            expect_end(rest)?;
            Ok(Command::Notify { channel, payload })
        }
        _ => Err(syntax_error(stmt)),
    }
}

fn parse_select(rest: &str) -> Result<Command, String> {
    let body = rest.trim();
    let lower = body.to_lowercase();

    if let Some(args) = lower.strip_prefix("pg_notify(").and(body.get("pg_notify(".len()..)) {
        let (channel, args) = literal(args)?;
        let args = args
            .trim_start()
            .strip_prefix(',')
            .ok_or_else(|| syntax_error(args))?;
        let (payload, args) = literal(args)?;
        let args = args
            .trim_start()
            .strip_prefix(')')
            .ok_or_else(|| syntax_error(args))?;
        expect_end(args)?;
        return Ok(Command::Notify { channel, payload });
    }

    if let Some(from) = lower.strip_prefix("* from ").and(body.get("* from ".len()..)) {
        let (table, rest) = ident(from)?;
        expect_end(rest)?;
        return Ok(Command::SelectAll { table });
    }

    match lower.as_str() {
        "true" => return Ok(Command::SelectTrue),
        "1" => return Ok(Command::SelectOne),
        _ => {}
    }

    if body.starts_with('\'') || body.starts_with("E'") {
        let (value, rest) = literal(body)?;
        let rest = rest.trim_start();
        let alias = match split_word(rest) {
            (kw, after) if kw.eq_ignore_ascii_case("as") => {
                let (alias, after) = ident(after)?;
                expect_end(after)?;
                alias
            }
            ("", _) => "?column?".to_string(),
            _ => return Err(syntax_error(rest)),
        };
        return Ok(Command::SelectLiteral { value, alias });
    }

    Err(syntax_error(body))
}

fn parse_insert(rest: &str) -> Result<Command, String> {
    let (into, rest) = split_word(rest);
    if !into.eq_ignore_ascii_case("into") {
        return Err(syntax_error(rest));
    }
    let (table, rest) = ident(rest)?;
    let (values, rest) = split_word(rest);
    if !values.eq_ignore_ascii_case("values") {
        return Err(syntax_error(rest));
    }
    let rest = rest
        .trim_start()
        .strip_prefix('(')
        .ok_or_else(|| syntax_error(rest))?;
    let (value, rest) = literal(rest)?;
    let rest = rest
        .trim_start()
        .strip_prefix(')')
        .ok_or_else(|| syntax_error(rest))?;
    expect_end(rest)?;
    Ok(Command::Insert { table, value })
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    let end = s
        .find(|c: char| c.is_whitespace() || c == '(' || c == ',')
        .unwrap_or(s.len());
    s.split_at(end)
}

/// Parse an identifier, returning its value and the remaining input.
///
/// Unquoted identifiers fold to lowercase; quoted ones keep their case and
/// use `""` for an embedded quote.
pub(crate) fn ident(s: &str) -> Result<(String, &str), String> {
    let s = s.trim_start();
    if let Some(body) = s.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = body.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '"' {
                if chars.next_if(|(_, c)| *c == '"').is_some() {
                    out.push('"');
                    continue;
                }
                return Ok((out, &body[i + 1..]));
            }
            out.push(c);
        }
        return Err("unterminated quoted identifier".into());
    }

    let end = s
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(s.len());
    if end == 0 {
        return Err(syntax_error(s));
    }
    Ok((s[..end].to_lowercase(), &s[end..]))
}

/// Parse a string literal (`'...'` or `E'...'`), returning its value and
/// the remaining input.
pub(crate) fn literal(s: &str) -> Result<(String, &str), String> {
    let s = s.trim_start();
    let (escape, body) = match s.strip_prefix("E'").or_else(|| s.strip_prefix("e'")) {
        Some(body) => (true, body),
        None => match s.strip_prefix('\'') {
            Some(body) => (false, body),
            None => return Err(syntax_error(s)),
        },
    };

    let mut out = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\'' => {
                if chars.next_if(|(_, c)| *c == '\'').is_some() {
                    out.push('\'');
                    continue;
                }
                return Ok((out, &body[i + 1..]));
            }
            '\\' if escape => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, c)) => out.push(c),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err("unterminated quoted string".into())
}

fn expect_end(rest: &str) -> Result<(), String> {
    if rest.trim().is_empty() {
        Ok(())
    } else {
        Err(syntax_error(rest))
    }
}

fn syntax_error(near: &str) -> String {
    let near = near.trim();
    let token = near.split_whitespace().next().unwrap_or(near);
    format!("syntax error at or near \"{token}\"")
}
