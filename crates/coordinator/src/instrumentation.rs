//! Tracing helpers for coordinator operations.
//!
//! Statements are logged through `tracing`, never raw: literals are replaced
//! with a placeholder and the text is truncated, so parameter values that
//! were inlined into SQL do not end up in log files.
//!
//! ## Span names
//!
//! - `coordinator.query`: one query from acquire to release
//! - `coordinator.transaction`: one transaction from begin to commit/rollback
//! - `coordinator.release`: reset chain plus return/destroy
//! - `coordinator.close`: drain plus teardown

/// Span names for coordinator operations.
pub mod span_names {
    /// Span name for a pooled query.
    pub const QUERY: &str = "coordinator.query";
    /// Span name for a pooled transaction.
    pub const TRANSACTION: &str = "coordinator.transaction";
    /// Span name for returning a connection.
    pub const RELEASE: &str = "coordinator.release";
    /// Span name for closing the coordinator.
    pub const CLOSE: &str = "coordinator.close";
}

/// Configuration for SQL statement sanitization.
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Whether to sanitize SQL statements.
    pub enabled: bool,
    /// Maximum length of statement to record.
    pub max_length: usize,
    /// Placeholder to use for sanitized values.
    pub placeholder: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_length: 2048,
            placeholder: "?".to_string(),
        }
    }
}

impl SanitizationConfig {
    /// Create a configuration that doesn't sanitize statements.
    #[must_use]
    pub fn no_sanitization() -> Self {
        Self {
            enabled: false,
            max_length: usize::MAX,
            placeholder: String::new(),
        }
    }

    /// Sanitize a SQL statement according to the configuration.
    #[must_use]
    pub fn sanitize(&self, sql: &str) -> String {
        if !self.enabled {
            return truncate_string(sql, self.max_length);
        }

        let sanitized = sanitize_sql(sql, &self.placeholder);
        truncate_string(&sanitized, self.max_length)
    }
}

/// Replace string and numeric literals with `placeholder`.
fn sanitize_sql(sql: &str, placeholder: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                // Doubled quote is an escaped quote inside the literal.
                if chars.peek() == Some(&q) {
                    chars.next();
                    continue;
                }
                quote = None;
                result.push_str(placeholder);
            }
            continue;
        }

        if c == '\'' || c == '"' {
            quote = Some(c);
            continue;
        }

        // Digits that start a token are literals; `$1`, `t2` and `@p1` are not.
        if c.is_ascii_digit()
            && !result.ends_with(|ch: char| ch.is_alphanumeric() || matches!(ch, '_' | '$' | '@'))
        {
            while chars
                .peek()
                .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.')
            {
                chars.next();
            }
            result.push_str(placeholder);
            continue;
        }

        result.push(c);
    }

    if quote.is_some() {
        result.push_str(placeholder);
    }

    result
}

/// Truncate to at most `max_len` bytes on a character boundary.
///
/// The cut is marked with `...` when there is room for it.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let (limit, marker) = if max_len < 3 {
        (max_len, "")
    } else {
        (max_len - 3, "...")
    };
    let end = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|i| *i <= limit)
        .last()
        .unwrap_or(0);
    format!("{}{marker}", &s[..end])
}

/// Extract the operation keyword from a SQL statement.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" | "WITH" => "SELECT",
        "INSERT" => "INSERT",
        "UPDATE" => "UPDATE",
        "DELETE" => "DELETE",
        "EXEC" | "EXECUTE" | "CALL" => "EXECUTE",
        "BEGIN" | "START" => "BEGIN",
        "COMMIT" => "COMMIT",
        "ROLLBACK" => "ROLLBACK",
        "CREATE" => "CREATE",
        "ALTER" => "ALTER",
        "DROP" => "DROP",
        _ => "OTHER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_operation() {
        assert_eq!(extract_operation("SELECT * FROM users"), "SELECT");
        assert_eq!(extract_operation("  select id from t"), "SELECT");
        assert_eq!(extract_operation("WITH cte AS (SELECT 1) SELECT * FROM cte"), "SELECT");
        assert_eq!(extract_operation("INSERT INTO t VALUES (1)"), "INSERT");
        assert_eq!(extract_operation("BEGIN"), "BEGIN");
        assert_eq!(extract_operation("START TRANSACTION"), "BEGIN");
        assert_eq!(extract_operation("EXEC sp_reset_connection"), "EXECUTE");
        assert_eq!(extract_operation("ROLLBACK;"), "ROLLBACK");
        assert_eq!(extract_operation("VACUUM"), "OTHER");
        assert_eq!(extract_operation(""), "OTHER");
    }

    #[test]
    fn test_sanitize_sql() {
        assert_eq!(
            sanitize_sql("SELECT * FROM users WHERE name = 'alice'", "?"),
            "SELECT * FROM users WHERE name = ?"
        );
        assert_eq!(
            sanitize_sql("SELECT * FROM t WHERE id = 42 AND x = 1.5", "?"),
            "SELECT * FROM t WHERE id = ? AND x = ?"
        );
        assert_eq!(
            sanitize_sql("SELECT 'it''s'", "?"),
            "SELECT ?"
        );
    }

    #[test]
    fn test_sanitize_keeps_placeholders_and_identifiers() {
        assert_eq!(
            sanitize_sql("SELECT c1 FROM t2 WHERE id = $1 OR id = @p2", "?"),
            "SELECT c1 FROM t2 WHERE id = $1 OR id = @p2"
        );
    }

    #[test]
    fn test_sanitize_unterminated_string() {
        assert_eq!(sanitize_sql("SELECT 'oops", "?"), "SELECT ?");
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("exactly ten", 11), "exactly ten");
        assert_eq!(truncate_string("this is too long", 10), "this is...");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let truncated = truncate_string("héllo wörld", 6);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 6);
    }

    #[test]
    fn test_truncate_below_marker_length() {
        assert_eq!(truncate_string("abcdef", 2), "ab");
        assert_eq!(truncate_string("abcdef", 0), "");
        assert_eq!(truncate_string("éa", 1), "");
        assert_eq!(truncate_string("abcdef", 3), "...");
    }

    #[test]
    fn test_sanitization_config_default() {
        let config = SanitizationConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_length, 2048);
        assert_eq!(config.placeholder, "?");
    }

    #[test]
    fn test_sanitization_config_no_sanitization() {
        let config = SanitizationConfig::no_sanitization();
        assert_eq!(
            config.sanitize("SELECT * FROM t WHERE id = 7"),
            "SELECT * FROM t WHERE id = 7"
        );
    }
}
