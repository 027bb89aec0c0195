//! Ring buffer of console lines for a UI to render from.
//!
//! [`ConsoleLog`] stores sequenced [`ConsoleLine`]s. When full, the oldest
//! lines are evicted. A renderer remembers the last `seq` it drew and calls
//! [`ConsoleLog::read_since`] to get what is new.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::session::ConsoleEvent;

/// A single sequenced console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    /// Monotonically increasing, never reused (survives `clear`).
    pub seq: u64,
    pub text: String,
    /// Unix timestamp in milliseconds when the line was stored.
    pub timestamp_ms: u64,
}

impl ConsoleLine {
    /// Whitespace-only lines are kept but renderers may skip them.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Bounded store of the lines currently visible in a console view.
#[derive(Debug)]
pub struct ConsoleLog {
    lines: VecDeque<ConsoleLine>,
    next_seq: u64,
    max_lines: usize,
}

impl ConsoleLog {
    /// Create a log that holds at most `max_lines` lines.
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            lines: VecDeque::with_capacity(max_lines.min(256)),
            next_seq: 1,
            max_lines,
        }
    }

    /// Fold a session event into the log. Returns `true` if the visible
    /// content changed.
    pub fn apply(&mut self, event: &ConsoleEvent) -> bool {
        match event {
            ConsoleEvent::Lines(lines) => {
                self.extend(lines.iter().cloned());
                !lines.is_empty()
            }
            ConsoleEvent::Cleared => {
                self.clear();
                true
            }
            _ => false,
        }
    }

    /// Append lines, evicting the oldest if full.
    pub fn extend(&mut self, lines: impl IntoIterator<Item = String>) {
        #[allow(clippy::cast_possible_truncation)]
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);

        for text in lines {
            if self.lines.len() >= self.max_lines {
                self.lines.pop_front();
            }
            self.lines.push_back(ConsoleLine {
                seq: self.next_seq,
                text,
                timestamp_ms,
            });
            self.next_seq += 1;
        }
    }

    /// Read all lines with `seq > since`.
    ///
    /// Returns `(lines, dropped_count)` where `dropped_count > 0` if lines
    /// between `since` and the oldest retained line were evicted.
    pub fn read_since(&self, since: u64) -> (Vec<ConsoleLine>, u64) {
        let oldest_available = self.lines.front().map_or(self.next_seq, |l| l.seq);
        let dropped = if oldest_available > since.saturating_add(1) {
            oldest_available - since - 1
        } else {
            0
        };

        let lines = self
            .lines
            .iter()
            .filter(|l| l.seq > since)
            .cloned()
            .collect();

        (lines, dropped)
    }

    /// Sequence number of the newest line, or 0 if nothing was ever stored.
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Remove every visible line. Sequence numbers keep counting.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
