/// User-facing engine error messages.
///
/// Engine diagnostics can carry server file paths and source line references;
/// neither is forwarded.
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest message passed through, in characters
pub const MAX_MESSAGE_CHARS: usize = 300;

pub const GENERIC_EXECUTION_MESSAGE: &str = "Query execution failed.";

static FILE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[^\s]+\.\w+").unwrap());
static LINE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bline \d+").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

pub fn sanitize_engine_message(raw: &str) -> String {
    let message = FILE_PATH.replace_all(raw, "[file]");
    let message = LINE_REF.replace_all(&message, "");
    let message = WHITESPACE.replace_all(&message, " ");
    let message = message.trim();

    if message.is_empty() {
        return GENERIC_EXECUTION_MESSAGE.to_string();
    }

    if message.chars().count() > MAX_MESSAGE_CHARS {
        let mut cut: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
        cut.push_str("...");
        return cut;
    }

    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_file_paths() {
        let out = sanitize_engine_message(
            "could not open file /var/lib/postgresql/16/main/base/1/2619.1: no such file",
        );
        assert_eq!(out, "could not open file [file]: no such file");
    }

    #[test]
    fn test_strips_line_references() {
        let out = sanitize_engine_message("syntax error at or near \"FORM\" LINE 1: SELECT * FORM t");
        assert!(!out.to_lowercase().contains("line 1"));
        assert!(out.starts_with("syntax error at or near \"FORM\""));
    }

    #[test]
    fn test_plain_message_unchanged() {
        assert_eq!(
            sanitize_engine_message("canceling statement due to statement timeout"),
            "canceling statement due to statement timeout"
        );
    }

    #[test]
    fn test_empty_becomes_generic() {
        assert_eq!(sanitize_engine_message("  line 3 "), GENERIC_EXECUTION_MESSAGE);
    }

    #[test]
    fn test_long_messages_bounded() {
        let long = "x".repeat(1000);
        let out = sanitize_engine_message(&long);
        assert_eq!(out.chars().count(), MAX_MESSAGE_CHARS + 3);
    }
}
