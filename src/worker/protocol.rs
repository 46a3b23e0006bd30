//! Line protocol spoken by the worker on its stderr.
//!
//! ```text
//! PROGRESS: <decimal>
//! MESSAGE: <text>
//! ERROR: <text>
//! ```
//!
//! Prefixes are case-sensitive. Anything else is a free-form log line.

use std::sync::LazyLock;

use regex::Regex;

pub const PROGRESS_PREFIX: &str = "PROGRESS: ";
pub const MESSAGE_PREFIX: &str = "MESSAGE: ";
pub const ERROR_PREFIX: &str = "ERROR: ";

/// Leading decimal of a progress value. Trailing junk such as `%` is ignored.
static PROGRESS_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)")
        .expect("valid progress regex")
});

/// One parsed stderr line.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusLine {
    Progress(f64),
    Message(String),
    Error(String),
    Log(String),
}

impl StatusLine {
    /// Parse a single line. Blank lines yield `None`.
    ///
    /// Text after the `MESSAGE: ` and `ERROR: ` prefixes is kept verbatim,
    /// apart from a trailing carriage return. A `PROGRESS: ` line without a
    /// readable number is treated as a log line.
    pub fn parse(line: &str) -> Option<StatusLine> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return None;
        }

        if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
            return Some(
                parse_progress(rest)
                    .map(StatusLine::Progress)
                    .unwrap_or_else(|| StatusLine::Log(line.to_string())),
            );
        }
        if let Some(rest) = line.strip_prefix(MESSAGE_PREFIX) {
            return Some(StatusLine::Message(rest.to_string()));
        }
        if let Some(rest) = line.strip_prefix(ERROR_PREFIX) {
            return Some(StatusLine::Error(rest.to_string()));
        }
        Some(StatusLine::Log(line.to_string()))
    }
}

fn parse_progress(value: &str) -> Option<f64> {
    let caps = PROGRESS_VALUE.captures(value)?;
    caps.get(1)?
        .as_str()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// A protocol update surfaced to the progress sink.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Progress(f64),
    Message(String),
    Error(String),
}

/// The result of parsing one read from the worker's stderr.
///
/// Only the last occurrence of each kind of update survives; updates are
/// ordered by where that last occurrence appeared in the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusBatch {
    pub updates: Vec<StatusUpdate>,
    pub log_lines: Vec<String>,
}

impl StatusBatch {
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut progress: Option<(usize, f64)> = None;
        let mut message: Option<(usize, String)> = None;
        let mut error: Option<(usize, String)> = None;
        let mut log_lines = Vec::new();

        for (idx, line) in lines.into_iter().enumerate() {
            match StatusLine::parse(line.as_ref()) {
                Some(StatusLine::Progress(v)) => progress = Some((idx, v)),
                Some(StatusLine::Message(m)) => message = Some((idx, m)),
                Some(StatusLine::Error(e)) => error = Some((idx, e)),
                Some(StatusLine::Log(l)) => log_lines.push(l),
                None => {}
            }
        }

        let mut ordered: Vec<(usize, StatusUpdate)> = Vec::with_capacity(3);
        if let Some((idx, v)) = progress {
            ordered.push((idx, StatusUpdate::Progress(v)));
        }
        if let Some((idx, m)) = message {
            ordered.push((idx, StatusUpdate::Message(m)));
        }
        if let Some((idx, e)) = error {
            ordered.push((idx, StatusUpdate::Error(e)));
        }
        ordered.sort_by_key(|(idx, _)| *idx);

        Self {
            updates: ordered.into_iter().map(|(_, u)| u).collect(),
            log_lines,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.updates.iter().find_map(|u| match u {
            StatusUpdate::Error(e) => Some(e.as_str()),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.log_lines.is_empty()
    }
}

/// Longest partial line held back while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Splits a byte stream into lines, carrying partial lines across reads.
///
/// Bytes that are not valid UTF-8 are replaced, never rejected. A partial
/// line longer than the cap is flushed as a line of its own.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line: max_line.max(1),
        }
    }

    /// Append a chunk and return every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        if let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') {
            let rest = self.pending.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.pending, rest);
            lines.extend(
                complete[..complete.len() - 1]
                    .split(|b| *b == b'\n')
                    .map(|line| String::from_utf8_lossy(line).into_owned()),
            );
        }
        if self.pending.len() > self.max_line {
            let oversized = std::mem::take(&mut self.pending);
            lines.push(String::from_utf8_lossy(&oversized).into_owned());
        }
        lines
    }

    /// The trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
