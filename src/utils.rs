// ABOUTME: Utility functions for SQL quoting, retries and error condensation
// ABOUTME: Shared by the transfer, view and report code paths

use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Maximum length of an error reason shown in a report cell.
pub const REPORT_MESSAGE_LIMIT: usize = 60;

/// Maximum length of a condensed error written to the log.
pub const LOG_MESSAGE_LIMIT: usize = 200;

/// Upper bound for the delay between two retry attempts.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Retry an async operation with exponential backoff
///
/// Runs `operation` up to `max_attempts` times (at least once). The attempt
/// number (1-based) is passed in so callers can log or record it. The delay
/// doubles after every failed attempt, up to [`MAX_RETRY_BACKOFF`].
///
/// # Returns
///
/// The first successful result, or the error of the last attempt.
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use std::time::Duration;
/// # use oracle_duckdb_loader::utils::retry_with_backoff;
/// # async fn example() -> Result<()> {
/// let result = retry_with_backoff(
///     "EMP",
///     |_attempt| async { Ok("success") },
///     3,
///     Duration::from_millis(500),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T>(
    label: &str,
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < max_attempts {
                    tracing::warn!(
                        "{}: attempt {}/{} failed ({}), retrying in {:?}...",
                        label,
                        attempt,
                        max_attempts,
                        condense_error(&e, LOG_MESSAGE_LIMIT),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_backoff(delay);
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("{}: operation failed after retries", label)))
}

/// Double `delay`, saturating at [`MAX_RETRY_BACKOFF`].
pub fn next_backoff(delay: Duration) -> Duration {
    delay.saturating_mul(2).min(MAX_RETRY_BACKOFF)
}

/// Quote an identifier with double quotes
///
/// Escapes embedded quotes by doubling them. Works for both Oracle and DuckDB.
///
/// # Examples
///
/// ```
/// use oracle_duckdb_loader::utils::quote_ident;
/// assert_eq!(quote_ident("EMP"), "\"EMP\"");
/// assert_eq!(quote_ident("A\"B"), "\"A\"\"B\"");
/// ```
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Quote a SQL string literal (for use in SQL statements)
///
/// Escapes single quotes by doubling them and wraps the string in single quotes.
/// Use this for string values in SQL, not for identifiers.
///
/// # Examples
///
/// ```
/// use oracle_duckdb_loader::utils::quote_literal;
/// assert_eq!(quote_literal("TEST"), "'TEST'");
/// assert_eq!(quote_literal("it's"), "'it''s'");
/// assert_eq!(quote_literal(""), "''");
/// ```
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push('\'');
        }
        quoted.push(ch);
    }
    quoted.push('\'');
    quoted
}

/// Collapse every whitespace run into a single space and trim.
///
/// An input that is blank after collapsing becomes `UNKNOWN`.
pub fn normalize_message(message: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    let cleaned = re.replace_all(message, " ");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "UNKNOWN".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// One condensed line describing an error.
///
/// Walks the cause chain down to the deepest non-blank message, then
/// normalizes whitespace and truncates to `max` characters.
pub fn condense_error(err: &anyhow::Error, max: usize) -> String {
    let deepest = err
        .chain()
        .map(|cause| cause.to_string())
        .filter(|message| !message.trim().is_empty())
        .last()
        .unwrap_or_else(|| err.to_string());
    normalize_message(truncate_chars(&deepest, max))
}
