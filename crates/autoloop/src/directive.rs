//! Directive parsing: turn free-form model output into one (kind, argument) pair
//!
//! Markers are recognised only at the start of a line (after optional spaces or
//! tabs) and must be followed by whitespace or the end of the line, so
//! `$exec_internet` never matches as `$exec` and prose that merely mentions
//! `$exec` mid-sentence is ignored.

use std::fmt;

/// What the model asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    ShellExec,
    DocLookup,
    HttpFetch,
    SelfUpgrade,
    None,
}

impl DirectiveKind {
    /// Resolution order when a reply carries more than one marker
    pub const PRIORITY: [DirectiveKind; 4] = [
        DirectiveKind::ShellExec,
        DirectiveKind::DocLookup,
        DirectiveKind::HttpFetch,
        DirectiveKind::SelfUpgrade,
    ];

    /// Marker text introducing this directive
    pub fn marker(self) -> Option<&'static str> {
        match self {
            DirectiveKind::ShellExec => Some("$exec"),
            DirectiveKind::DocLookup => Some("$browse_docs"),
            DirectiveKind::HttpFetch => Some("$exec_internet"),
            DirectiveKind::SelfUpgrade => Some("$upgrade"),
            DirectiveKind::None => None,
        }
    }

    fn from_marker(word: &str) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|k| k.marker() == Some(word))
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DirectiveKind::ShellExec => "ShellExec",
            DirectiveKind::DocLookup => "DocLookup",
            DirectiveKind::HttpFetch => "HttpFetch",
            DirectiveKind::SelfUpgrade => "SelfUpgrade",
            DirectiveKind::None => "None",
        };
        f.write_str(label)
    }
}

/// A parsed instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// Trimmed text following the marker on its line; may be empty
    pub argument: String,
}

impl Directive {
    pub fn new(kind: DirectiveKind, argument: impl Into<String>) -> Self {
        Self {
            kind,
            argument: argument.into(),
        }
    }

    /// The "no marker found" outcome
    pub fn none() -> Self {
        Self::new(DirectiveKind::None, String::new())
    }

    pub fn is_none(&self) -> bool {
        self.kind == DirectiveKind::None
    }

    /// One-line description for logs and memory entries
    pub fn summary(&self) -> String {
        match (self.kind, self.argument.is_empty()) {
            (DirectiveKind::None, _) => "None".to_string(),
            (kind, true) => format!("{} <empty>", kind),
            (kind, false) => format!("{} {}", kind, self.argument),
        }
    }
}

/// A marker occurrence found by [`tokenize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerToken<'a> {
    pub kind: DirectiveKind,
    /// Zero-based line index
    pub line: usize,
    pub argument: &'a str,
}

/// Every line-anchored marker in `text`, in line order
pub fn tokenize(text: &str) -> Vec<MarkerToken<'_>> {
    text.lines()
        .enumerate()
        .filter_map(|(line, content)| {
            let (kind, argument) = match_line(content)?;
            Some(MarkerToken {
                kind,
                line,
                argument,
            })
        })
        .collect()
}

/// Recognise a marker at the start of one line
fn match_line(line: &str) -> Option<(DirectiveKind, &str)> {
    let body = line.trim_start_matches([' ', '\t']);
    if !body.starts_with('$') {
        return None;
    }

    let word_end = body.find(char::is_whitespace).unwrap_or(body.len());
    let kind = DirectiveKind::from_marker(&body[..word_end])?;
    Some((kind, body[word_end..].trim()))
}

/// Extract exactly one directive from raw model output.
///
/// For each kind in [`DirectiveKind::PRIORITY`] order, the first line-anchored
/// occurrence is taken; the first kind that occurs at all wins. Text without
/// any marker yields [`Directive::none`].
pub fn parse(text: &str) -> Directive {
    let tokens = tokenize(text);

    DirectiveKind::PRIORITY
        .iter()
        .find_map(|kind| tokens.iter().find(|t| t.kind == *kind))
        .map(|t| Directive::new(t.kind, t.argument))
        .unwrap_or_else(Directive::none)
}
