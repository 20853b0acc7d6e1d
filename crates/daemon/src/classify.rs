//! Output classification tables.
//!
//! Two questions are asked of pane output: is a chunk *meaningful* (anything
//! other than control sequences, whitespace and spinner glyphs), and does the
//! recent scrollback look like the agent is waiting for an approval. Both are
//! answered from declarative pattern tables behind [`ActivityClassifier`], so
//! the detection strategy can change without touching the protocol code.

use std::collections::HashSet;

use regex::Regex;

/// Spinner and progress glyphs commonly emitted by agent CLIs while busy.
pub const DEFAULT_SPINNER_GLYPHS: &str =
    "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏⣾⣽⣻⢿⡿⣟⣯⣷◐◓◑◒◴◷◶◵·✢✳✶✻✽|/-\\";

/// Escape sequences: CSI, OSC (BEL or ST terminated), and two-byte escapes.
const ANSI_PATTERN: &str =
    r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-_]|\x1b";

/// Prompts that mean an agent is blocked on a human decision.
const APPROVAL_PATTERNS: &[&str] = &[
    r"(?i)do you want to (?:proceed|continue|make this edit|create|run|allow)",
    r"(?i)\[y/n\]|\(y/n\)|\[yes/no\]",
    r"(?i)allow (?:this|the) (?:command|tool|action)",
    r"(?i)waiting for (?:your )?(?:approval|confirmation)",
    r"(?i)press enter to (?:continue|confirm)",
    r"(?i)approve\?|requires? (?:your )?approval",
    r"❯\s*1\.\s*yes",
];

/// How much of the scrollback tail is inspected for approval prompts.
pub const APPROVAL_TAIL_BYTES: usize = 2048;

/// Decides whether output is meaningful and whether a pane awaits approval.
pub trait ActivityClassifier: Send + Sync {
    /// Returns true if the chunk contains anything beyond control sequences,
    /// whitespace and spinner glyphs.
    fn is_meaningful(&self, chunk: &str) -> bool;

    /// Returns true if the tail of a pane's scrollback shows an approval prompt.
    fn awaiting_approval(&self, tail: &str) -> bool;
}

/// Regex-table implementation of [`ActivityClassifier`].
pub struct PatternClassifier {
    ansi: Regex,
    spinner: HashSet<char>,
    approval: Vec<Regex>,
}

impl PatternClassifier {
    /// Builds a classifier with the given spinner allowlist.
    pub fn new(spinner_glyphs: &str) -> Result<Self, regex::Error> {
        let approval = APPROVAL_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            ansi: Regex::new(ANSI_PATTERN)?,
            spinner: spinner_glyphs.chars().collect(),
            approval,
        })
    }

    /// Removes escape sequences from `text`.
    pub fn strip_ansi(&self, text: &str) -> String {
        self.ansi.replace_all(text, "").into_owned()
    }

    fn is_cosmetic_char(&self, c: char) -> bool {
        c.is_whitespace() || c.is_control() || self.spinner.contains(&c)
    }
}

impl ActivityClassifier for PatternClassifier {
    fn is_meaningful(&self, chunk: &str) -> bool {
        self.strip_ansi(chunk)
            .chars()
            .any(|c| !self.is_cosmetic_char(c))
    }

    fn awaiting_approval(&self, tail: &str) -> bool {
        let plain = self.strip_ansi(tail);
        self.approval.iter().any(|re| re.is_match(&plain))
    }
}

/// Returns at most `max_bytes` from the end of `text`, cut at a char boundary.
pub fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> PatternClassifier {
        PatternClassifier::new(DEFAULT_SPINNER_GLYPHS).unwrap()
    }

    #[test]
    fn test_plain_text_is_meaningful() {
        assert!(classifier().is_meaningful("Compiling agentmux v0.3.0\r\n"));
    }

    #[test]
    fn test_control_sequences_are_cosmetic() {
        let c = classifier();
        assert!(!c.is_meaningful("\x1b[2K\x1b[1G"));
        assert!(!c.is_meaningful("\x1b]0;title\x07"));
        assert!(!c.is_meaningful("\r\n\t  "));
        assert!(!c.is_meaningful(""));
    }

    #[test]
    fn test_spinner_frames_are_cosmetic() {
        let c = classifier();
        assert!(!c.is_meaningful("\x1b[1G⠋ \x1b[0K"));
        assert!(!c.is_meaningful("✻"));
        assert!(!c.is_meaningful(" | / - \\ "));
    }

    #[test]
    fn test_spinner_with_text_is_meaningful() {
        assert!(classifier().is_meaningful("⠙ Reading src/main.rs"));
    }

    #[test]
    fn test_custom_allowlist() {
        let c = PatternClassifier::new("#").unwrap();
        assert!(!c.is_meaningful("###"));
        // Outside the allowlist, glyphs count as real output.
        assert!(c.is_meaningful("⠋"));
    }

    #[test]
    fn test_strip_ansi() {
        let c = classifier();
        assert_eq!(c.strip_ansi("\x1b[31mred\x1b[0m"), "red");
        assert_eq!(c.strip_ansi("a\x1b]0;t\x1b\\b"), "ab");
    }

    #[test]
    fn test_approval_prompts() {
        let c = classifier();
        assert!(c.awaiting_approval("Do you want to proceed?\n❯ 1. Yes\n  2. No"));
        assert!(c.awaiting_approval("Overwrite file? [y/N]"));
        assert!(c.awaiting_approval("\x1b[1mAllow this command\x1b[0m to run?"));
        assert!(!c.awaiting_approval("All tests passed."));
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("hello", 10), "hello");
        assert_eq!(tail("hello", 3), "llo");
        // 'é' is two bytes; cutting into it moves forward.
        assert_eq!(tail("aé", 1), "");
        assert_eq!(tail("aé", 2), "é");
    }
}
