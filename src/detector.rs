//! Idle-prompt detection.
//!
//! The console is considered idle when the last line of the rolling context
//! is exactly a shell prompt. Only the last line is inspected so prompt-shaped
//! text in scrollback cannot trigger, and the match is anchored to the end of
//! the buffer so a prompt already followed by more output does not count.
//!
//! The prompt embeds a session-unique token (e.g. the container name
//! `logos_ab12`) so that model output echoing a prompt-like string is unlikely
//! to collide with the real one.

use regex::Regex;
use thiserror::Error;

/// Generic pattern for a root shell inside a `logos_*` container.
pub const DEFAULT_PROMPT_PATTERN: &str = r"root@logos_[a-zA-Z0-9_]+:\S+ \$ ";

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("invalid prompt pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Matches the trailing form of an idle prompt.
#[derive(Debug, Clone)]
pub struct PromptDetector {
    pattern: Regex,
    source: String,
}

impl PromptDetector {
    /// Compile `pattern`; it is implicitly anchored to the end of the text.
    pub fn new(pattern: &str) -> Result<Self, DetectorError> {
        let anchored = format!(r"(?:{pattern})\z");
        let compiled = Regex::new(&anchored).map_err(|source| DetectorError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: compiled,
            source: pattern.to_string(),
        })
    }

    /// Prompt of a root shell whose hostname is exactly `token`.
    pub fn for_session(token: &str) -> Self {
        let pattern = format!(r"root@{}:\S+ \$ ", regex::escape(token));
        // An escaped literal wrapped in a fixed template always compiles.
        Self::new(&pattern).unwrap_or_default()
    }

    /// The pattern as configured (without the end anchor).
    pub fn pattern(&self) -> &str {
        &self.source
    }

    /// Whether the console is sitting at an idle prompt.
    pub fn is_awaiting_input(&self, context: &str) -> bool {
        if context.is_empty() {
            return false;
        }
        let last_line = match context.rfind('\n') {
            Some(pos) => &context[pos + 1..],
            None => context,
        };
        if last_line.is_empty() {
            return false;
        }
        self.pattern.is_match(&strip_ansi(last_line))
    }
}

impl Default for PromptDetector {
    fn default() -> Self {
        Self {
            pattern: Regex::new(&format!(r"(?:{DEFAULT_PROMPT_PATTERN})\z"))
                .expect("default prompt pattern compiles"),
            source: DEFAULT_PROMPT_PATTERN.to_string(),
        }
    }
}

/// Strip ANSI escape sequences from PTY output.
pub fn strip_ansi(input: &str) -> String {
    // Matches CSI sequences (ESC [ ... final byte), OSC sequences (ESC ] ... ST),
    // and simple two-byte escapes (ESC + one char).
    static ANSI_RE: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[^\[\]]").unwrap()
    });
    ANSI_RE.replace_all(input, "").to_string()
}
