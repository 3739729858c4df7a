//! Instruction block and prompt composition

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Built-in operating instructions; the markers here must match `directive.rs`
pub const BASE_INSTRUCTIONS: &str = "\
You are an autonomous agent running in a loop on a Linux machine.
Every turn, reply with a short plan followed by at most one directive on its own line:

$exec <command>            run a shell command
$browse_docs <topic>       read the manual page for a topic
$exec_internet <url>       fetch a URL over HTTP
$upgrade <instruction>     add a standing instruction for yourself

The directive must start the line. The result is appended to your memory below
and shown to you on the next turn. A reply without a directive does nothing.";

/// Instruction text prepended to every prompt.
///
/// Amendments from `$upgrade` live only in memory for the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionBlock {
    text: String,
    amendments: usize,
}

impl InstructionBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            amendments: 0,
        }
    }

    /// Built-in instructions followed by the operator's base prompt file, if any
    pub fn load(prompt_file: Option<&Path>) -> Result<Self> {
        let mut text = BASE_INSTRUCTIONS.to_string();

        if let Some(path) = prompt_file {
            if !path.exists() {
                anyhow::bail!("Missing prompt file {}. Please create it.", path.display());
            }
            let extra = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let extra = extra.trim();
            if !extra.is_empty() {
                text.push_str("\n\n");
                text.push_str(extra);
            }
        }

        Ok(Self::new(text))
    }

    /// Append an instruction for the rest of the run
    pub fn amend(&mut self, instruction: &str) {
        self.text.push('\n');
        self.text.push_str(instruction.trim());
        self.amendments += 1;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of amendments applied this run
    pub fn amendments(&self) -> usize {
        self.amendments
    }
}

/// Prompt layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptTemplate {
    /// Instructions, separator and memory as bare text
    Plain,
    /// `<|system|>` / `<|user|>` / `<|assistant|>` role tags
    #[default]
    Chat,
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptTemplate::Plain => write!(f, "plain"),
            PromptTemplate::Chat => write!(f, "chat"),
        }
    }
}

/// Combines the instruction block with the memory log
#[derive(Debug, Clone)]
pub struct PromptComposer {
    template: PromptTemplate,
    separator: String,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(PromptTemplate::default(), "### Memory")
    }
}

impl PromptComposer {
    pub fn new(template: PromptTemplate, separator: impl Into<String>) -> Self {
        Self {
            template,
            separator: separator.into(),
        }
    }

    /// Build the next query text. Pure: same inputs give the same prompt.
    pub fn compose(&self, instructions: &InstructionBlock, memory: &str) -> String {
        let memory = memory.trim_end();
        let memory = if memory.is_empty() { "(empty)" } else { memory };

        match self.template {
            PromptTemplate::Plain => format!(
                "{}\n\n{}\n{}\n",
                instructions.text(),
                self.separator,
                memory
            ),
            PromptTemplate::Chat => format!(
                "<|system|>\n{}\n<|user|>\n{}\n{}\n<|assistant|>\n",
                instructions.text(),
                self.separator,
                memory
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compose_is_deterministic() {
        let composer = PromptComposer::default();
        let block = InstructionBlock::new("Do things.");
        let memory = "### Cycle 1\nOutput:\nhi\n";

        assert_eq!(composer.compose(&block, memory), composer.compose(&block, memory));
    }

    #[test]
    fn test_chat_template_layout() {
        let composer = PromptComposer::default();
        let block = InstructionBlock::new("Do things.");

        let prompt = composer.compose(&block, "entry one\n\n");
        assert_eq!(
            prompt,
            "<|system|>\nDo things.\n<|user|>\n### Memory\nentry one\n<|assistant|>\n"
        );
    }

    #[test]
    fn test_plain_template_with_empty_memory() {
        let composer = PromptComposer::new(PromptTemplate::Plain, "---");
        let block = InstructionBlock::new("Rules.");

        assert_eq!(composer.compose(&block, ""), "Rules.\n\n---\n(empty)\n");
    }

    #[test]
    fn test_amend_changes_prompt() {
        let composer = PromptComposer::default();
        let mut block = InstructionBlock::new("Rules.");
        let before = composer.compose(&block, "");

        block.amend("  Never use sudo. ");
        let after = composer.compose(&block, "");

        assert_ne!(before, after);
        assert!(after.contains("Rules.\nNever use sudo.\n"));
        assert_eq!(block.amendments(), 1);
    }

    #[test]
    fn test_load_with_prompt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "Explore the system.\n").unwrap();

        let block = InstructionBlock::load(Some(&path)).unwrap();
        assert!(block.text().starts_with(BASE_INSTRUCTIONS));
        assert!(block.text().ends_with("Explore the system."));
    }

    #[test]
    fn test_load_missing_prompt_file() {
        let dir = TempDir::new().unwrap();
        let err = InstructionBlock::load(Some(&dir.path().join("prompt.txt"))).unwrap_err();
        assert!(err.to_string().contains("Missing prompt file"));

        let block = InstructionBlock::load(None).unwrap();
        assert_eq!(block.text(), BASE_INSTRUCTIONS);
    }

    #[test]
    fn test_base_instructions_mention_every_marker() {
        for kind in crate::directive::DirectiveKind::PRIORITY {
            let marker = kind.marker().unwrap();
            assert!(BASE_INSTRUCTIONS.contains(&format!("\n{} ", marker)), "{}", marker);
        }
    }
}
