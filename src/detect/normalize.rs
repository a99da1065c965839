//! Content normalization for change detection.
//!
//! Captured pane text is full of noise that changes every frame without the
//! agent doing anything: spinner animation, elapsed-time counters, progress
//! bars, clocks. [`normalize`] removes or masks all of it so that
//! [`fingerprint`] only changes when the screen changes meaningfully.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Animated spinner glyphs used by the supported agent CLIs
pub const SPINNER_GLYPHS: &[char] = &[
    '⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏', '✻', '✽', '✶', '✳', '✢',
];

/// C1 control introducer equivalent to `ESC [`
const C1_CSI: char = '\u{9b}';

/// SHA-256 of normalized content
pub type Fingerprint = [u8; 32];

/// `(12s · ↑ 1.2k tokens · esc to interrupt)` style status blocks
static RE_STATUS_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\([^()\n]*(?:\d+(?:\.\d+)?[ \t]*(?:ms|s|m|h)\b|tokens?\b)[^()\n]*\)").unwrap()
});

/// `Cogitating…` banners left behind once the spinner glyph is removed
static RE_THINKING_BANNER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)\p{Lu}\p{Ll}+ing(?:…|\.\.\.)").unwrap());

static RE_BLOCK_PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[█▉▊▋▌▍▎▏▓▒░]+").unwrap());

static RE_ASCII_PROGRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[=#>\- ]{3,}\]").unwrap());

/// `12.5 MB` or `12.5 MB/40 MB` transfer sizes
static RE_BYTES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b\d+(?:\.\d+)?[ \t]*(?:[kmgt]i?b|b|bytes)\b(?:[ \t]*/[ \t]*\d+(?:\.\d+)?[ \t]*(?:[kmgt]i?b|b|bytes)\b)?",
    )
    .unwrap()
});

static RE_PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+(?:\.\d+)?%").unwrap());

static RE_CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}:\d{2}(?::\d{2})?\b").unwrap());

/// Remove CSI, OSC and two-byte escape sequences.
///
/// The 8-bit CSI introducer (U+009B) is scanned with the same rules as `ESC [`.
pub fn strip_ansi(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.next() {
                Some('[') => skip_csi(&mut chars),
                Some(']') => skip_osc(&mut chars),
                // Any other two-byte escape, or a dangling ESC at the end
                _ => {}
            },
            C1_CSI => skip_csi(&mut chars),
            _ => result.push(c),
        }
    }

    result
}

fn skip_csi(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for c in chars.by_ref() {
        if c.is_ascii_alphabetic() {
            break;
        }
    }
}

fn skip_osc(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while let Some(c) = chars.next() {
        match c {
            '\x07' => break,
            '\x1b' => {
                if chars.peek() == Some(&'\\') {
                    chars.next();
                }
                break;
            }
            _ => {}
        }
    }
}

/// Produce a stable rendition of captured content.
///
/// Idempotent: `normalize(&normalize(x)) == normalize(x)`. Every mask is
/// digit-free and none of the patterns can match it again, and no pattern
/// spans a line break, so trimming on the first pass changes nothing later.
pub fn normalize(raw: &str) -> String {
    let stripped = strip_ansi(raw);

    let cleaned: String = stripped
        .chars()
        .filter(|c| !c.is_ascii_control() || matches!(c, '\t' | '\n' | '\r'))
        .filter(|c| !SPINNER_GLYPHS.contains(c))
        .collect();

    let text = RE_STATUS_BLOCK.replace_all(&cleaned, "(STATUS)");
    let text = RE_THINKING_BANNER.replace_all(&text, "${1}WORKING…");
    let text = RE_BLOCK_PROGRESS.replace_all(&text, "PROGRESS");
    let text = RE_ASCII_PROGRESS.replace_all(&text, "[PROGRESS]");
    let text = RE_BYTES.replace_all(&text, "<SIZE>");
    let text = RE_PERCENT.replace_all(&text, "N%");
    let text = RE_CLOCK.replace_all(&text, "HH:MM");

    collapse_blank_lines(&text)
}

/// Trim trailing whitespace per line and cap blank runs at two lines
fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = 0;

    for line in text.split('\n') {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push(line);
    }

    out.join("\n")
}

/// Hash of already-normalized content
pub fn fingerprint(normalized: &str) -> Fingerprint {
    Sha256::digest(normalized.as_bytes()).into()
}

/// Lowercase hex rendition, for logs
pub fn fingerprint_hex(fp: &Fingerprint) -> String {
    fp.iter().map(|b| format!("{:02x}", b)).collect()
}
