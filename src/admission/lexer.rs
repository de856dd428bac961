//! Comment stripping and statement splitting.
//!
//! The scanner follows the engine's lexical rules closely enough that what it
//! removes as a comment is also a comment to the engine:
//! - `--` runs to end of line, `/* */` nests
//! - comment markers and `;` inside `'...'`, `E'...'`, `"..."` and
//!   `$tag$...$tag$` are literal text
//! - each comment becomes a single space so surrounding tokens stay apart
//!
//! Anything left open at end of input is an error rather than a guess.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("unterminated quoted section")]
    UnterminatedQuote,
}

/// Strip comments and split on top-level `;`.
///
/// Returns the non-empty statements, trimmed, in source order.
pub fn split_statements(text: &str) -> Result<Vec<String>, ScanError> {
    let chars: Vec<char> = text.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                current.push(' ');
            }
            '/' if next == Some('*') => {
                i = skip_block_comment(&chars, i)?;
                current.push(' ');
            }
            '\'' => {
                let backslash_escapes = is_escape_string_prefix(&chars, i);
                i = copy_quoted(&chars, i, '\'', backslash_escapes, &mut current)?;
            }
            '"' => {
                i = copy_quoted(&chars, i, '"', false, &mut current)?;
            }
            '$' => match dollar_tag(&chars, i) {
                Some(tag_len) => {
                    i = copy_dollar_quoted(&chars, i, tag_len, &mut current)?;
                }
                None => {
                    current.push(c);
                    i += 1;
                }
            },
            ';' => {
                push_statement(&mut statements, &mut current);
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    push_statement(&mut statements, &mut current);

    Ok(statements)
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

/// Returns the index just past the closing `*/` of the comment at `start`
fn skip_block_comment(chars: &[char], start: usize) -> Result<usize, ScanError> {
    let mut depth = 1usize;
    let mut i = start + 2;

    while depth > 0 {
        match (chars.get(i), chars.get(i + 1)) {
            (None, _) => return Err(ScanError::UnterminatedComment),
            (Some('/'), Some('*')) => {
                depth += 1;
                i += 2;
            }
            (Some('*'), Some('/')) => {
                depth -= 1;
                i += 2;
            }
            _ => i += 1,
        }
    }

    Ok(i)
}

/// `E'...'` / `e'...'` where the `E` is a standalone prefix, not the tail of
/// an identifier
fn is_escape_string_prefix(chars: &[char], quote: usize) -> bool {
    if quote == 0 || !matches!(chars[quote - 1], 'E' | 'e') {
        return false;
    }
    quote < 2 || !is_ident_char(chars[quote - 2])
}

/// Copies a quoted section (quotes included) into `out`, returning the index
/// just past the closing quote. A doubled quote is an escaped quote.
fn copy_quoted(
    chars: &[char],
    start: usize,
    quote: char,
    backslash_escapes: bool,
    out: &mut String,
) -> Result<usize, ScanError> {
    out.push(quote);
    let mut i = start + 1;

    loop {
        let c = *chars.get(i).ok_or(ScanError::UnterminatedQuote)?;
        out.push(c);

        if backslash_escapes && c == '\\' {
            let escaped = *chars.get(i + 1).ok_or(ScanError::UnterminatedQuote)?;
            out.push(escaped);
            i += 2;
            continue;
        }

        if c == quote {
            if chars.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }

        i += 1;
    }
}

/// Length of a `$tag$` opener at `start`, if there is one
fn dollar_tag(chars: &[char], start: usize) -> Option<usize> {
    // `a$b` is an identifier; `$1` is a parameter
    if start > 0 && is_ident_char(chars[start - 1]) {
        return None;
    }

    let mut i = start + 1;
    if let Some(&first) = chars.get(i) {
        if first != '$' && !(first.is_alphabetic() || first == '_') {
            return None;
        }
    }

    while let Some(&c) = chars.get(i) {
        if c == '$' {
            return Some(i - start + 1);
        }
        if !is_ident_char(c) {
            return None;
        }
        i += 1;
    }

    None
}

fn copy_dollar_quoted(
    chars: &[char],
    start: usize,
    tag_len: usize,
    out: &mut String,
) -> Result<usize, ScanError> {
    let tag = &chars[start..start + tag_len];
    out.extend(tag.iter());

    let mut i = start + tag_len;
    while i + tag_len <= chars.len() {
        if &chars[i..i + tag_len] == tag {
            out.extend(tag.iter());
            return Ok(i + tag_len);
        }
        out.push(chars[i]);
        i += 1;
    }

    Err(ScanError::UnterminatedQuote)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_comment_stripped() {
        let stmts = split_statements("SELECT 1 -- trailing note\nFROM t").unwrap();
        assert_eq!(stmts, vec!["SELECT 1  \nFROM t"]);
    }

    #[test]
    fn test_block_comment_becomes_space() {
        let stmts = split_statements("SELECT/**/1").unwrap();
        assert_eq!(stmts, vec!["SELECT 1"]);

        let stmts = split_statements("DR/* x */OP").unwrap();
        assert_eq!(stmts, vec!["DR OP"]);
    }

    #[test]
    fn test_nested_block_comments() {
        let stmts = split_statements("SELECT 1 /* outer /* inner */ still comment */ AS x").unwrap();
        assert_eq!(stmts, vec!["SELECT 1   AS x"]);
    }

    #[test]
    fn test_unterminated_block_comment_rejected() {
        assert_eq!(
            split_statements("SELECT 1 /* DROP TABLE t"),
            Err(ScanError::UnterminatedComment)
        );
        // inner opener leaves the outer comment open
        assert_eq!(
            split_statements("SELECT 1 /* /* */ DROP TABLE t"),
            Err(ScanError::UnterminatedComment)
        );
    }

    #[test]
    fn test_block_opener_inside_line_comment_is_inert() {
        let stmts = split_statements("SELECT 1 -- /* not a block\nFROM t").unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].ends_with("FROM t"));
    }

    #[test]
    fn test_line_marker_inside_block_comment_is_inert() {
        let stmts = split_statements("SELECT 1 /* -- */ DROP").unwrap();
        assert_eq!(stmts, vec!["SELECT 1   DROP"]);
    }

    #[test]
    fn test_comment_markers_inside_string_are_literal() {
        let stmts = split_statements("SELECT '--', pg_sleep(100)").unwrap();
        assert_eq!(stmts, vec!["SELECT '--', pg_sleep(100)"]);

        let stmts = split_statements("SELECT '/*' AS a, 1").unwrap();
        assert_eq!(stmts, vec!["SELECT '/*' AS a, 1"]);
    }

    #[test]
    fn test_semicolon_inside_quotes_does_not_split() {
        assert_eq!(split_statements("SELECT 'a;b'").unwrap().len(), 1);
        assert_eq!(split_statements("SELECT \"odd;name\" FROM t").unwrap().len(), 1);
        assert_eq!(split_statements("SELECT $$a;b$$").unwrap().len(), 1);
        assert_eq!(split_statements("SELECT $q$a;b$q$").unwrap().len(), 1);
    }

    #[test]
    fn test_doubled_and_backslash_quotes() {
        assert_eq!(split_statements("SELECT 'it''s; fine'").unwrap().len(), 1);
        assert_eq!(split_statements(r"SELECT E'it\'s; fine'").unwrap().len(), 1);
        // plain strings do not treat backslash as an escape
        assert_eq!(split_statements(r"SELECT 'a\'; SELECT 2").unwrap().len(), 2);
    }

    #[test]
    fn test_unterminated_quotes_rejected() {
        assert_eq!(
            split_statements("SELECT 'abc; DROP TABLE t"),
            Err(ScanError::UnterminatedQuote)
        );
        assert_eq!(
            split_statements("SELECT $$abc"),
            Err(ScanError::UnterminatedQuote)
        );
    }

    #[test]
    fn test_positional_parameter_is_not_dollar_quote() {
        let stmts = split_statements("SELECT $1; SELECT 2").unwrap();
        assert_eq!(stmts, vec!["SELECT $1", "SELECT 2"]);
    }

    #[test]
    fn test_multiple_statements_and_empty_pieces() {
        let stmts = split_statements("SELECT * FROM t; DROP TABLE t;").unwrap();
        assert_eq!(stmts, vec!["SELECT * FROM t", "DROP TABLE t"]);

        let stmts = split_statements("SELECT 1;;  ;").unwrap();
        assert_eq!(stmts, vec!["SELECT 1"]);
    }

    #[test]
    fn test_only_comments_yields_nothing() {
        assert!(split_statements("-- just a note").unwrap().is_empty());
        assert!(split_statements("/* a */ /* b */").unwrap().is_empty());
        assert!(split_statements("   \n\t").unwrap().is_empty());
    }
}
