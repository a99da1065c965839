use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::normalize::SPINNER_GLYPHS;

/// Number of trailing non-empty lines every check is restricted to
pub const LINE_WINDOW: usize = 15;

/// Trailing lines inspected for a highlighted option row
const OPTION_ROW_WINDOW: usize = 3;

/// Trailing lines inspected for a bare or suggesting prompt
const PROMPT_WINDOW: usize = 2;

/// Trailing lines inspected for a prompt after a completion phrase
const COMPLETION_PROMPT_WINDOW: usize = 3;

/// Raw classification of a block of pane content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Signal {
    #[default]
    None,
    Busy,
    Approval,
    Ready,
}

/// Agent CLI running inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Claude,
    Codex,
    Gemini,
    Aider,
    OpenCode,
    #[default]
    Unknown,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Claude => "claude",
            Tool::Codex => "codex",
            Tool::Gemini => "gemini",
            Tool::Aider => "aider",
            Tool::OpenCode => "opencode",
            Tool::Unknown => "unknown",
        }
    }

    /// Infer the tool from the pane's foreground command, then from content
    pub fn detect(command: Option<&str>, content: &str) -> Tool {
        if let Some(tool) = command.and_then(Self::from_command) {
            return tool;
        }

        let lower = content.to_lowercase();
        if lower.contains("claude code") || lower.contains("welcome to claude") {
            Tool::Claude
        } else if lower.contains("openai codex") {
            Tool::Codex
        } else if lower.contains("gemini cli") || lower.contains("gemini-") {
            Tool::Gemini
        } else if lower.contains("aider v") {
            Tool::Aider
        } else if lower.contains("opencode") {
            Tool::OpenCode
        } else {
            Tool::Unknown
        }
    }

    fn from_command(command: &str) -> Option<Tool> {
        let base = command.rsplit('/').next().unwrap_or(command);
        match base {
            "claude" => Some(Tool::Claude),
            "codex" => Some(Tool::Codex),
            "gemini" => Some(Tool::Gemini),
            "aider" => Some(Tool::Aider),
            "opencode" => Some(Tool::OpenCode),
            _ => None,
        }
    }

    /// Tool-specific confirmation phrases, lowercase
    fn approval_patterns(&self) -> &'static [&'static str] {
        match self {
            Tool::Codex => &["allow command?", "approve this command", "yes, proceed"],
            Tool::Gemini => &["allow execution", "waiting for user confirmation"],
            Tool::Aider => &["(y)es/(n)o", "add file to the chat?"],
            Tool::OpenCode => &["permission required"],
            Tool::Claude | Tool::Unknown => &[],
        }
    }
}

/// Confirmation phrases shared by every tool, lowercase
const APPROVAL_PATTERNS: &[&str] = &[
    "do you want to proceed?",
    "do you want to make this edit",
    "do you want to create",
    "yes, allow once",
    "yes, allow always",
    "yes, and don't ask again",
    "no, and tell claude what to do differently",
    "do you trust the files in this folder?",
    "trust this folder",
    "would you like to proceed?",
    "would you like to run",
    "approve this plan",
    "(y/n)",
    "[y/n]",
    "↑/↓ to navigate",
    "↑↓ to select",
    "use arrow keys",
    "press enter to confirm",
];

const INTERRUPT_HINTS: &[&str] = &["ctrl+c to interrupt", "esc to interrupt"];

const PROMPT_GLYPHS: &[char] = &['❯', '>', '›'];

const COMPLETION_PHRASES: &[&str] = &[
    "task completed",
    "task complete",
    "done.",
    "done!",
    "finished",
    "what else",
    "anything else",
    "all set",
];

/// `❯ 1. Yes` style selected rows of a choice dialog
static RE_OPTION_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[❯›>]\s*\d+\.\s+\S").unwrap());

/// `> Try "..."` style prompts offering a suggestion
static RE_SUGGESTION_PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^[❯›>]\s+(?i:try\s+"|type your message|ask\s|implement\s|find and fix|explain this|write tests|summarize\s)"#,
    )
    .unwrap()
});

/// Whimsical status words shown while an agent works, e.g. `✻ Cogitating…`
static RE_STATUS_WORD: Lazy<Regex> = Lazy::new(|| {
    let spinners: String = SPINNER_GLYPHS.iter().collect();
    let words = [
        "Thinking", "Processing", "Working", "Pondering", "Cogitating", "Ruminating",
        "Reticulating", "Brewing", "Churning", "Computing", "Conjuring", "Crafting",
        "Deliberating", "Forging", "Generating", "Hatching", "Incubating", "Marinating",
        "Mulling", "Musing", "Noodling", "Percolating", "Simmering", "Spinning",
        "Synthesizing", "Tinkering", "Vibing", "Wrangling", "Zigzagging", "Analyzing",
        "Clauding", "Booping", "Schlepping", "Finagling", "Moseying", "Puttering",
    ];
    Regex::new(&format!(r"^(?:[{}] )?(?:{})(?:…|\.\.\.)", spinners, words.join("|"))).unwrap()
});

/// Classifies pane content for one agent tool.
///
/// Priority order is Approval > Busy > Ready > None.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detector {
    tool: Tool,
}

impl Detector {
    pub fn new(tool: Tool) -> Self {
        Self { tool }
    }

    pub fn classify(&self, content: &str) -> Signal {
        let lines = recent_lines(content, LINE_WINDOW);
        let recent_lower = lines.join("\n").to_lowercase();

        if self.is_approval(&lines, &recent_lower) {
            return Signal::Approval;
        }

        if self.is_busy_lines(&lines, &recent_lower) {
            return Signal::Busy;
        }

        if is_ready(&lines, &recent_lower) {
            return Signal::Ready;
        }

        Signal::None
    }

    /// Textual busy hints anywhere in the capture, including scrollback
    pub fn has_busy_hint(&self, content: &str) -> bool {
        let lower = content.to_lowercase();
        has_textual_busy_hint(&lower)
    }

    fn is_approval(&self, lines: &[&str], recent_lower: &str) -> bool {
        let matched = APPROVAL_PATTERNS
            .iter()
            .chain(self.tool.approval_patterns())
            .any(|p| recent_lower.contains(p));
        if matched {
            return true;
        }

        tail(lines, OPTION_ROW_WINDOW)
            .iter()
            .any(|line| RE_OPTION_ROW.is_match(&clean_line(line)))
    }

    fn is_busy_lines(&self, lines: &[&str], recent_lower: &str) -> bool {
        if has_textual_busy_hint(recent_lower) {
            return true;
        }

        lines.iter().any(|line| {
            let trimmed = line.trim_start();
            if trimmed.chars().next().is_some_and(is_box_drawing) {
                return false;
            }
            trimmed.contains(SPINNER_GLYPHS) || RE_STATUS_WORD.is_match(trimmed)
        })
    }
}

fn has_textual_busy_hint(lower: &str) -> bool {
    if INTERRUPT_HINTS.iter().any(|h| lower.contains(h)) {
        return true;
    }
    (lower.contains("thinking") || lower.contains("connecting")) && lower.contains("tokens")
}

fn is_ready(lines: &[&str], recent_lower: &str) -> bool {
    let prompt_line = tail(lines, PROMPT_WINDOW).iter().any(|line| {
        let line = clean_line(line);
        is_bare_prompt(&line) || RE_SUGGESTION_PROMPT.is_match(&line)
    });
    if prompt_line {
        return true;
    }

    COMPLETION_PHRASES.iter().any(|p| recent_lower.contains(p))
        && tail(lines, COMPLETION_PROMPT_WINDOW)
            .iter()
            .any(|line| is_bare_prompt(&clean_line(line)))
}

fn is_bare_prompt(line: &str) -> bool {
    let mut chars = line.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if PROMPT_GLYPHS.contains(&c))
}

/// Last `n` non-empty lines, oldest first
fn recent_lines(content: &str, n: usize) -> Vec<&str> {
    let mut lines: Vec<&str> = content
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .take(n)
        .collect();
    lines.reverse();
    lines
}

fn tail<'a, 'b>(lines: &'b [&'a str], n: usize) -> &'b [&'a str] {
    &lines[lines.len().saturating_sub(n)..]
}

/// Trim and replace non-breaking spaces
fn clean_line(line: &str) -> String {
    line.replace('\u{a0}', " ").trim().to_string()
}

fn is_box_drawing(c: char) -> bool {
    ('\u{2500}'..='\u{257f}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(content: &str) -> Signal {
        Detector::default().classify(content)
    }

    #[test]
    fn test_spinner_is_busy() {
        assert_eq!(classify("⠙ Processing your request..."), Signal::Busy);
    }

    #[test]
    fn test_interrupt_hint_is_busy() {
        assert_eq!(
            classify("Thinking... (45s · 1234 tokens · ctrl+c to interrupt)"),
            Signal::Busy
        );
        assert_eq!(classify("some output\n  esc to interrupt"), Signal::Busy);
    }

    #[test]
    fn test_status_word_is_busy() {
        assert_eq!(classify("output\nPercolating…"), Signal::Busy);
        assert_eq!(classify("output\n✶ Noodling..."), Signal::Busy);
    }

    #[test]
    fn test_thinking_with_tokens_is_busy() {
        assert_eq!(classify("model is THINKING\n1.2k Tokens used"), Signal::Busy);
    }

    #[test]
    fn test_box_drawing_line_is_not_spinner() {
        assert_eq!(classify("│ ⠙ not a spinner"), Signal::None);
        assert_eq!(classify("output\n  ╭ ⠙ Working..."), Signal::None);
    }

    #[test]
    fn test_allow_dialog_is_approval() {
        assert_eq!(classify("Yes, allow once\nYes, allow always"), Signal::Approval);
    }

    #[test]
    fn test_approval_beats_busy() {
        let content = "⠙ Running tool\nDo you want to proceed?\n❯ 1. Yes\n  2. No";
        assert_eq!(classify(content), Signal::Approval);
    }

    #[test]
    fn test_highlighted_option_row_is_approval() {
        assert_eq!(classify("Pick one\n❯\u{a0}1. Keep going\n  2. Stop"), Signal::Approval);
    }

    #[test]
    fn test_yes_no_confirmation_is_approval() {
        assert_eq!(classify("Overwrite file? (Y/n)"), Signal::Approval);
    }

    #[test]
    fn test_tool_specific_approval() {
        let content = "Allow command? ls -la";
        assert_eq!(Detector::new(Tool::Codex).classify(content), Signal::Approval);
        assert_eq!(Detector::new(Tool::Claude).classify(content), Signal::None);
    }

    #[test]
    fn test_bare_prompt_is_ready() {
        assert_eq!(classify("Done.\n❯"), Signal::Ready);
        assert_eq!(classify("output\n> \n"), Signal::Ready);
        assert_eq!(classify("output\n›\u{a0}"), Signal::Ready);
    }

    #[test]
    fn test_suggestion_prompt_is_ready() {
        assert_eq!(classify("hello\n> Try \"fix lint errors\""), Signal::Ready);
    }

    #[test]
    fn test_completion_phrase_extends_prompt_window() {
        let content = "All finished here.\n❯\n────────\n? for shortcuts";
        assert_eq!(classify(content), Signal::Ready);

        let without_phrase = "Some output\n❯\n────────\n? for shortcuts";
        assert_eq!(classify(without_phrase), Signal::None);
    }

    #[test]
    fn test_busy_never_reported_ready() {
        assert_eq!(classify("⠋ Thinking...\n❯"), Signal::Busy);
    }

    #[test]
    fn test_stale_scrollback_outside_window_is_ignored() {
        let mut content = String::from("Do you want to proceed?\n");
        for i in 0..LINE_WINDOW {
            content.push_str(&format!("line {}\n", i));
        }
        content.push('❯');
        assert_eq!(classify(&content), Signal::Ready);
    }

    #[test]
    fn test_busy_hint_in_scrollback() {
        let mut content = String::from("Connecting... 0 tokens\n");
        for i in 0..LINE_WINDOW {
            content.push_str(&format!("streamed {}\n", i));
        }
        let detector = Detector::default();
        assert_eq!(detector.classify(&content), Signal::None);
        assert!(detector.has_busy_hint(&content));
    }

    #[test]
    fn test_plain_output_is_none() {
        assert_eq!(classify("compiling crate foo\nwarning: unused"), Signal::None);
    }

    #[test]
    fn test_detect_tool() {
        assert_eq!(Tool::detect(Some("claude"), ""), Tool::Claude);
        assert_eq!(Tool::detect(Some("/usr/local/bin/codex"), ""), Tool::Codex);
        assert_eq!(Tool::detect(Some("zsh"), "✻ Welcome to Claude Code!"), Tool::Claude);
        assert_eq!(Tool::detect(None, "aider v0.50.1"), Tool::Aider);
        assert_eq!(Tool::detect(Some("bash"), "$ ls"), Tool::Unknown);
    }
}
