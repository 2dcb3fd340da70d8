//! Readiness predicates evaluated over a container's log.
//!
//! A predicate sees every line exactly once, in order, starting from the
//! first line the container wrote. It keeps only the state it needs to
//! decide, never the lines themselves.

use dockhand_common::error::{DockhandError, Result};
use dockhand_common::types::{LogLine, LogStream};
use regex::Regex;

/// An incremental condition over the ordered log of a container.
pub trait ReadinessPredicate: Send {
    /// Feeds the next line.
    fn observe(&mut self, line: &LogLine);

    /// Returns whether the condition has been met.
    fn is_satisfied(&self) -> bool;

    /// Human-readable description used in logs and errors.
    fn describe(&self) -> String;
}

impl<P: ReadinessPredicate + ?Sized> ReadinessPredicate for Box<P> {
    fn observe(&mut self, line: &LogLine) {
        (**self).observe(line);
    }

    fn is_satisfied(&self) -> bool {
        (**self).is_satisfied()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<P: ReadinessPredicate + ?Sized> ReadinessPredicate for &mut P {
    fn observe(&mut self, line: &LogLine) {
        (**self).observe(line);
    }

    fn is_satisfied(&self) -> bool {
        (**self).is_satisfied()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// How a line is compared against a log message pattern.
#[derive(Debug, Clone)]
pub enum LinePattern {
    /// The whole line equals the text.
    Exact(String),
    /// The line contains the text.
    Contains(String),
    /// The regular expression matches somewhere in the line.
    Regex(Regex),
}

impl LinePattern {
    /// Returns whether `text` matches.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Exact(expected) => text == expected,
            Self::Contains(needle) => text.contains(needle.as_str()),
            Self::Regex(re) => re.is_match(text),
        }
    }
}

impl std::fmt::Display for LinePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(s) => write!(f, "line {s:?}"),
            Self::Contains(s) => write!(f, "line containing {s:?}"),
            Self::Regex(re) => write!(f, "line matching /{}/", re.as_str()),
        }
    }
}

/// Waits until a pattern has matched at least `times` lines.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pattern: LinePattern,
    stream: Option<LogStream>,
    times: usize,
    seen: usize,
}

impl LogMessage {
    /// Matches `pattern` once, on any stream.
    #[must_use]
    pub const fn new(pattern: LinePattern) -> Self {
        Self {
            pattern,
            stream: None,
            times: 1,
            seen: 0,
        }
    }

    /// Requires `times` matching lines. Zero is satisfied immediately.
    #[must_use]
    pub const fn times(mut self, times: usize) -> Self {
        self.times = times;
        self
    }

    /// Only considers lines from `stream`.
    #[must_use]
    pub const fn on_stream(mut self, stream: LogStream) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Number of matching lines seen so far.
    #[must_use]
    pub const fn matched(&self) -> usize {
        self.seen
    }
}

impl ReadinessPredicate for LogMessage {
    fn observe(&mut self, line: &LogLine) {
        if self.is_satisfied() {
            return;
        }
        if self.stream.is_some_and(|s| s != line.stream) {
            return;
        }
        if self.pattern.matches(&line.text) {
            self.seen += 1;
            tracing::debug!(seq = line.seq, matched = self.seen, needed = self.times, "readiness line matched");
        }
    }

    fn is_satisfied(&self) -> bool {
        self.seen >= self.times
    }

    fn describe(&self) -> String {
        let mut text = self.pattern.to_string();
        if let Some(stream) = self.stream {
            text.push_str(&format!(" on {stream}"));
        }
        if self.times != 1 {
            text.push_str(&format!(" {} times", self.times));
        }
        text
    }
}

/// Satisfied once every inner predicate is.
pub struct AllOf(Vec<Box<dyn ReadinessPredicate>>);

/// Satisfied once any inner predicate is.
pub struct AnyOf(Vec<Box<dyn ReadinessPredicate>>);

impl ReadinessPredicate for AllOf {
    fn observe(&mut self, line: &LogLine) {
        for p in &mut self.0 {
            p.observe(line);
        }
    }

    fn is_satisfied(&self) -> bool {
        self.0.iter().all(|p| p.is_satisfied())
    }

    fn describe(&self) -> String {
        join(&self.0, " and ")
    }
}

impl ReadinessPredicate for AnyOf {
    fn observe(&mut self, line: &LogLine) {
        for p in &mut self.0 {
            p.observe(line);
        }
    }

    fn is_satisfied(&self) -> bool {
        self.0.iter().any(|p| p.is_satisfied())
    }

    fn describe(&self) -> String {
        join(&self.0, " or ")
    }
}

fn join(predicates: &[Box<dyn ReadinessPredicate>], sep: &str) -> String {
    let parts: Vec<String> = predicates.iter().map(|p| p.describe()).collect();
    format!("({})", parts.join(sep))
}

impl std::fmt::Debug for AllOf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AllOf").field(&self.describe()).finish()
    }
}

impl std::fmt::Debug for AnyOf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AnyOf").field(&self.describe()).finish()
    }
}

/// Constructors for the common readiness predicates.
#[derive(Debug, Clone, Copy)]
pub struct WaitFor;

impl WaitFor {
    /// A line exactly equal to `line`. A trailing newline is ignored.
    #[must_use]
    pub fn log_line(line: impl Into<String>) -> LogMessage {
        let mut line = line.into();
        if line.ends_with('\n') {
            let _ = line.pop();
            if line.ends_with('\r') {
                let _ = line.pop();
            }
        }
        LogMessage::new(LinePattern::Exact(line))
    }

    /// A line containing `needle`.
    #[must_use]
    pub fn contains(needle: impl Into<String>) -> LogMessage {
        LogMessage::new(LinePattern::Contains(needle.into()))
    }

    /// A line in which `pattern` finds a match.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Config`] if the expression does not compile.
    pub fn regex(pattern: &str) -> Result<LogMessage> {
        let re = Regex::new(pattern).map_err(|e| DockhandError::Config {
            message: format!("invalid readiness pattern /{pattern}/: {e}"),
        })?;
        Ok(LogMessage::new(LinePattern::Regex(re)))
    }

    /// Satisfied when every predicate is.
    #[must_use]
    pub fn all_of(predicates: Vec<Box<dyn ReadinessPredicate>>) -> AllOf {
        AllOf(predicates)
    }

    /// Satisfied when any predicate is.
    #[must_use]
    pub fn any_of(predicates: Vec<Box<dyn ReadinessPredicate>>) -> AnyOf {
        AnyOf(predicates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(seq: u64, text: &str) -> LogLine {
        LogLine::new(seq, LogStream::Stdout, text)
    }

    fn feed(p: &mut dyn ReadinessPredicate, lines: &[&str]) {
        for (i, text) in lines.iter().enumerate() {
            p.observe(&line(i as u64, text));
        }
    }

    #[test]
    fn exact_line_ignores_trailing_newline() {
        let mut p = WaitFor::log_line("Hello World!\n");
        feed(&mut p, &["Starting", "Hello World!!", "Hello World! "]);
        assert!(!p.is_satisfied());
        feed(&mut p, &["Hello World!"]);
        assert!(p.is_satisfied());
    }

    #[test]
    fn times_counts_matching_lines() {
        let mut p = WaitFor::contains("ready").times(2);
        feed(&mut p, &["ready 1", "noise"]);
        assert!(!p.is_satisfied());
        assert_eq!(p.matched(), 1);
        feed(&mut p, &["ready 2", "ready 3"]);
        assert!(p.is_satisfied());
        assert_eq!(p.matched(), 2);
    }

    #[test]
    fn zero_times_is_satisfied_immediately() {
        let p = WaitFor::log_line("never").times(0);
        assert!(p.is_satisfied());
    }

    #[test]
    fn stream_filter_skips_other_streams() {
        let mut p = WaitFor::contains("listening").on_stream(LogStream::Stderr);
        p.observe(&LogLine::new(0, LogStream::Stdout, "listening on :80"));
        assert!(!p.is_satisfied());
        p.observe(&LogLine::new(1, LogStream::Stderr, "listening on :80"));
        assert!(p.is_satisfied());
    }

    #[test]
    fn regex_searches_within_line() {
        let mut p = WaitFor::regex(r"started in \d+ms").unwrap();
        feed(&mut p, &["app started in 412ms (pid 7)"]);
        assert!(p.is_satisfied());
    }

    #[test]
    fn invalid_regex_is_a_config_error() {
        let err = WaitFor::regex("(unclosed").unwrap_err();
        assert!(matches!(err, DockhandError::Config { .. }));
    }

    #[test]
    fn combinators() {
        let mut all = WaitFor::all_of(vec![
            Box::new(WaitFor::contains("db up")),
            Box::new(WaitFor::contains("http up")),
        ]);
        let mut any = WaitFor::any_of(vec![
            Box::new(WaitFor::contains("db up")),
            Box::new(WaitFor::contains("http up")),
        ]);
        feed(&mut all, &["db up"]);
        feed(&mut any, &["db up"]);
        assert!(!all.is_satisfied());
        assert!(any.is_satisfied());
        feed(&mut all, &["http up"]);
        assert!(all.is_satisfied());
        assert_eq!(
            all.describe(),
            "(line containing \"db up\" and line containing \"http up\")"
        );
    }

    #[test]
    fn describe_mentions_count_and_stream() {
        let p = WaitFor::log_line("ok").times(3).on_stream(LogStream::Stdout);
        assert_eq!(p.describe(), "line \"ok\" on stdout 3 times");
    }
}
