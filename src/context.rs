//! Rolling session context.
//!
//! Holds the trailing window of the console transcript (shell output plus
//! injected input) that is shown to the model. Older text is dropped from the
//! front, so the buffer is always a suffix of everything appended.

/// Default window size in characters.
pub const DEFAULT_WINDOW: usize = 5000;

/// Bounded, suffix-preserving transcript buffer.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    text: String,
    chars: usize,
    limit: usize,
    /// Trailing bytes of an incomplete UTF-8 sequence from the last chunk.
    pending: Vec<u8>,
}

impl ContextWindow {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            limit,
            pending: Vec::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len_chars(&self) -> usize {
        self.chars
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Append text and trim to the window.
    pub fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
        self.chars += s.chars().count();
        self.truncate_front();
    }

    /// Append a raw PTY chunk.
    ///
    /// A multi-byte character split across chunks is held back until its
    /// remaining bytes arrive; invalid sequences decode to U+FFFD.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut decoded = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    decoded.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        self.push_str(&decoded);
    }

    fn truncate_front(&mut self) {
        if self.chars <= self.limit {
            return;
        }
        let excess = self.chars - self.limit;
        let cut = self
            .text
            .char_indices()
            .nth(excess)
            .map(|(idx, _)| idx)
            .unwrap_or(self.text.len());
        self.text.drain(..cut);
        self.chars -= excess;
    }
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
