//! Memory log and its durable store
//!
//! The log is plain text: entries separated by a blank line, replayed verbatim
//! into every prompt. Only entry headings are ever read back, to continue
//! cycle numbering.

use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::directive::Directive;
use crate::dispatch::{truncate_output, ExecutionResult};

/// Heading that starts every entry
const ENTRY_HEADING: &str = "### Cycle ";

/// One cycle's record
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub model_output: String,
    pub directive: Directive,
    pub result: ExecutionResult,
}

impl MemoryEntry {
    /// Record a cycle; the model output is bounded like action output
    pub fn new(
        cycle: u64,
        model_output: &str,
        directive: &Directive,
        result: &ExecutionResult,
        max_chars: usize,
    ) -> Self {
        Self {
            cycle,
            timestamp: Utc::now(),
            model_output: truncate_output(model_output.trim(), max_chars),
            directive: directive.clone(),
            result: result.clone(),
        }
    }
}

/// Indent body lines that would read as an entry heading
fn escape_headings(text: &str) -> Cow<'_, str> {
    if !text.lines().any(|l| l.starts_with(ENTRY_HEADING)) {
        return Cow::Borrowed(text);
    }

    let escaped: Vec<String> = text
        .split('\n')
        .map(|l| {
            if l.starts_with(ENTRY_HEADING) {
                format!("  {}", l)
            } else {
                l.to_string()
            }
        })
        .collect();
    Cow::Owned(escaped.join("\n"))
}

/// Cycle number of a `### Cycle <n> @ <timestamp>` heading
fn heading_cycle(line: &str) -> Option<u64> {
    let (number, _) = line.strip_prefix(ENTRY_HEADING)?.split_once(" @ ")?;
    number.parse().ok()
}

impl fmt::Display for MemoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}{} @ {}",
            ENTRY_HEADING,
            self.cycle,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        writeln!(f, "Model: {}", escape_headings(&self.model_output))?;
        writeln!(f, "Directive: {}", self.directive.summary())?;
        writeln!(f, "Status: {}", self.result.status_label())?;
        writeln!(f, "Output:")?;
        write!(f, "{}", escape_headings(self.result.output.trim_end()))
    }
}

/// Append-only text log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLog {
    text: String,
}

impl MemoryLog {
    /// Wrap previously persisted text
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Append an entry, separated from the previous one by a blank line
    pub fn append(&mut self, entry: &MemoryEntry) {
        if !self.text.is_empty() {
            while !self.text.ends_with("\n\n") {
                self.text.push('\n');
            }
        }
        self.text.push_str(&entry.to_string());
        self.text.push('\n');
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Cycle numbers of entry headings, in log order.
    ///
    /// A heading only counts at the start of the log or after a blank line;
    /// heading-like lines inside entry bodies are indented on write.
    fn entry_cycles(&self) -> impl Iterator<Item = u64> + '_ {
        let mut after_blank = true;
        self.text.lines().filter_map(move |line| {
            let cycle = if after_blank { heading_cycle(line) } else { None };
            after_blank = line.trim().is_empty();
            cycle
        })
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_cycles().count() as u64
    }

    /// Highest recorded cycle number, used to continue numbering across runs
    pub fn last_cycle(&self) -> u64 {
        self.entry_cycles().max().unwrap_or(0)
    }
}

/// Single plain-text file holding the memory log
#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file written before the atomic rename
    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Previously saved text, or `""` when nothing was saved yet
    pub fn load(&self) -> Result<String> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                debug!(path = %self.path.display(), bytes = bytes.len(), "Loaded memory");
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    /// Write `text` to a temp file and rename it over the target
    pub fn save(&self, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let tmp = self.temp_path();
        fs::write(&tmp, text).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to move {} to {}", tmp.display(), self.path.display())
        })?;

        debug!(path = %self.path.display(), bytes = text.len(), "Saved memory");
        Ok(())
    }

    /// Remove the memory file; returns whether one existed
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}
