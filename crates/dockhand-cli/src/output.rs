//! Formatted output helpers for CLI commands.
//!
//! ANSI styling constants, human-readable durations, and the argument
//! parsers shared by subcommands.

use std::time::Duration;

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const RED: &str = "\x1b[31m";
pub const RESET: &str = "\x1b[0m";

/// Parses a duration such as `250ms`, `10s`, `2m`. A bare number is seconds.
///
/// # Errors
///
/// Returns a message if the number or unit is not recognised.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration {input:?}: expected e.g. 500ms, 30s, 2m"))?;
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        other => Err(format!("invalid duration unit {other:?} (expected ms, s or m)")),
    }
}

/// Parses a `KEY=VALUE` pair.
///
/// # Errors
///
/// Returns a message if there is no `=` or the key is empty.
pub fn parse_key_value(input: &str) -> Result<(String, String), String> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {input:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {input:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Formats an elapsed time, e.g. "850ms" or "2.4s".
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        format!("{}ms", elapsed.as_millis())
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

/// Colored marker for an available / unavailable item.
#[must_use]
pub fn status_marker(ok: bool) -> String {
    if ok {
        format!("{GREEN}●{RESET}")
    } else {
        format!("{RED}○{RESET}")
    }
}
