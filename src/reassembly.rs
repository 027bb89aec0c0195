//! Incremental line reassembly for console output.
//!
//! Console output arrives in chunks with no alignment to line boundaries.
//! [`LineReassembler`] buffers the unresolved tail and emits complete lines,
//! splitting on `\n` and on the daemon marker. The daemon writes its own
//! status banner into the stream without a preceding newline, so the marker
//! starts a new line wherever it appears past the first character.
//!
//! The marker itself is never discarded: it stays in the buffer as the start
//! of the next line and is emitted once that line is terminated.

/// Banner prefix the daemon injects into console output.
pub const DEFAULT_DAEMON_MARKER: &str = "[Pterodactyl Daemon]:";

/// Buffers partial console output and yields complete lines.
#[derive(Debug, Clone)]
pub struct LineReassembler {
    buffer: String,
    marker: String,
}

impl LineReassembler {
    /// Create a reassembler splitting on `marker` as well as `\n`.
    /// An empty marker disables marker splitting.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            buffer: String::new(),
            marker: marker.into(),
        }
    }

    /// Append a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        // The retained tail holds no delimiter, so only new text needs a look
        let mut scanned = self.buffer.len();
        self.buffer.push_str(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some((end, resume)) = self.next_split(start, scanned) {
            lines.push(self.buffer[start..end].to_string());
            start = resume;
            scanned = resume;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Text received but not yet terminated.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Discard the unterminated tail (reconnect, stop, explicit clear).
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Find the next split in `buffer[start..]`. `buffer[start..scanned]` is
    /// known to hold no newline and no complete marker.
    ///
    /// Returns `(line_end, resume)` as absolute byte offsets: the line is
    /// `buffer[start..line_end]` and scanning continues at `resume`. A newline
    /// is consumed; a marker is not.
    fn next_split(&self, start: usize, scanned: usize) -> Option<(usize, usize)> {
        let rest = &self.buffer[start..];
        let clean = scanned - start;
        let newline = rest[clean..].find('\n').map(|n| clean + n);
        // A marker only wins if it comes before the newline
        let window = &rest[..newline.unwrap_or(rest.len())];
        match self.find_marker(window, clean) {
            Some(m) => Some((start + m, start + m)),
            None => newline.map(|n| (start + n, start + n + 1)),
        }
    }

    /// Marker offset in `window`, skipping the first character so a marker
    /// at the head of the buffer opens a line instead of closing an empty one.
    /// A marker can straddle `clean`, so the search backs up by its length.
    fn find_marker(&self, window: &str, clean: usize) -> Option<usize> {
        if self.marker.is_empty() {
            return None;
        }
        let skip = window.chars().next()?.len_utf8();
        let mut from = clean.saturating_sub(self.marker.len() - 1).max(skip);
        while !window.is_char_boundary(from) {
            from -= 1;
        }
        window[from..].find(&self.marker).map(|i| i + from)
    }
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_DAEMON_MARKER)
    }
}
