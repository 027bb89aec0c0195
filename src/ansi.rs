//! ANSI escape sequence removal for console output.
//!
//! The daemon forwards process output verbatim, colour codes included, and
//! colours its own banner. Sequences can be cut in half by chunking, so the
//! stripper keeps its parser state between calls.

/// Parser position inside an escape sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Text,
    /// Saw `ESC`.
    Escape,
    /// Inside `ESC [ … final`.
    Csi,
    /// Inside `ESC ] …`, terminated by `BEL` or `ESC \`.
    Osc,
    /// Saw `ESC` inside an OSC string.
    OscEscape,
    /// `ESC (` / `ESC )` charset designation, one more char to swallow.
    Charset,
}

/// Stateful stripper; feed it chunks in arrival order.
#[derive(Debug, Clone, Default)]
pub struct AnsiStripper {
    state: State,
}

impl AnsiStripper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `chunk` with escape sequences removed. An unfinished sequence
    /// at the end of the chunk is swallowed by the next call.
    pub fn strip(&mut self, chunk: &str) -> String {
        let mut out = String::with_capacity(chunk.len());
        for c in chunk.chars() {
            self.state = match (self.state, c) {
                (State::Text, '\x1b') => State::Escape,
                (State::Text, c) => {
                    out.push(c);
                    State::Text
                }
                (State::Escape, '[') => State::Csi,
                (State::Escape, ']') => State::Osc,
                (State::Escape, '(' | ')') => State::Charset,
                // A repeated ESC restarts the sequence
                (State::Escape, '\x1b') => State::Escape,
                (State::Escape | State::Charset, _) => State::Text,
                (State::Csi, '\x40'..='\x7e') => State::Text,
                (State::Csi, _) => State::Csi,
                (State::Osc, '\x07') | (State::OscEscape, '\\') => State::Text,
                (State::Osc, '\x1b') => State::OscEscape,
                (State::Osc | State::OscEscape, _) => State::Osc,
            };
        }
        out
    }

    /// Forget any partially parsed sequence.
    pub fn reset(&mut self) {
        self.state = State::Text;
    }
}

/// Strip a complete string in one go.
pub fn strip_ansi(input: &str) -> String {
    AnsiStripper::new().strip(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passthrough() {
        assert_eq!(strip_ansi("hello world\n"), "hello world\n");
    }

    #[test]
    fn strips_sgr_colours() {
        assert_eq!(
            strip_ansi("\x1b[33m\x1b[1m[Pterodactyl Daemon]:\x1b[39m Checking server disk space...\x1b[0m"),
            "[Pterodactyl Daemon]: Checking server disk space..."
        );
    }

    #[test]
    fn strips_cursor_and_erase_sequences() {
        assert_eq!(strip_ansi("\x1b[2K\rprogress 50%\x1b[1A"), "\rprogress 50%");
    }

    #[test]
    fn strips_osc_title_with_bel_and_st() {
        assert_eq!(strip_ansi("\x1b]0;title\x07ok"), "ok");
        assert_eq!(strip_ansi("\x1b]2;other\x1b\\ok"), "ok");
    }

    #[test]
    fn strips_charset_designation() {
        assert_eq!(strip_ansi("\x1b(Bplain"), "plain");
    }

    #[test]
    fn strips_two_char_escape() {
        assert_eq!(strip_ansi("a\x1b7b\x1b8c"), "abc");
    }

    #[test]
    fn doubled_escape_does_not_leak_sequence() {
        assert_eq!(strip_ansi("\x1b\x1b[31mred\x1b[0m"), "red");
        let mut s = AnsiStripper::new();
        assert_eq!(s.strip("a\x1b"), "a");
        assert_eq!(s.strip("\x1b[1mb"), "b");
    }

    #[test]
    fn sequence_split_across_chunks() {
        let mut s = AnsiStripper::new();
        assert_eq!(s.strip("red: \x1b[3"), "red: ");
        assert_eq!(s.strip("1mtext\x1b"), "text");
        assert_eq!(s.strip("[0m done"), " done");
    }

    #[test]
    fn reset_drops_partial_sequence() {
        let mut s = AnsiStripper::new();
        assert_eq!(s.strip("x\x1b[3"), "x");
        s.reset();
        assert_eq!(s.strip("1m"), "1m");
    }

    #[test]
    fn multibyte_text_survives() {
        assert_eq!(strip_ansi("\x1b[32mcafé ✓\x1b[0m"), "café ✓");
    }
}
