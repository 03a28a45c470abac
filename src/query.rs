//! Terminal status-query scanner.
//!
//! ConPTY actively parses the byte stream it hosts and emits its own
//! device-status and device-attribute queries, in addition to whatever the
//! child sends. With no real terminal on the other side nobody answers
//! them, and the pseudo-console stalls waiting. This scanner watches the
//! child-output direction for the small set of queries that matter and
//! produces canned replies to be written back into the child input channel.
//!
//! The replies are fixed values with no cursor or screen model behind them
//! (the cursor is always reported at row 1, column 1). That is enough to
//! unblock startup queries; it is a deliberate simplification, not an
//! attempt at terminal emulation.

/// Reply to a recognized terminal query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Cursor position report: always row 1, column 1.
    CursorPosition,
    /// Device status report: "device OK".
    DeviceOk,
    /// Primary device attributes: VT100 with advanced video option.
    PrimaryAttributes,
    /// Secondary device attributes.
    SecondaryAttributes,
}

impl Reply {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Reply::CursorPosition => b"\x1b[1;1R",
            Reply::DeviceOk => b"\x1b[0n",
            Reply::PrimaryAttributes => b"\x1b[?1;2c",
            Reply::SecondaryAttributes => b"\x1b[>1;10;0c",
        }
    }
}

/// Accumulation bound for bytes between `ESC [` and the final byte. None of
/// the recognized queries come close; longer sequences are consumed but can
/// never match.
const MAX_SEQUENCE: usize = 16;

#[derive(Clone, Copy, Default, PartialEq)]
enum State {
    #[default]
    Ground,
    Escape,
    Csi,
}

/// Streaming scanner for terminal status queries in the child's output.
///
/// State persists across `scan` calls, so sequences split at arbitrary
/// chunk boundaries behave exactly like unsplit input. The automaton resets
/// to ground after any final byte (recognized or not) and after any byte
/// that breaks an `ESC [` pairing.
#[derive(Default)]
pub struct QueryScanner {
    state: State,
    seq: Vec<u8>,
}

impl QueryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of child output. `emit` is invoked once per complete
    /// recognized query. The chunk itself is not modified or filtered;
    /// callers forward it to the external output as-is.
    pub fn scan<F: FnMut(Reply)>(&mut self, bytes: &[u8], mut emit: F) {
        for &byte in bytes {
            self.feed(byte, &mut emit);
        }
    }

    fn feed<F: FnMut(Reply)>(&mut self, byte: u8, emit: &mut F) {
        match self.state {
            State::Ground => {
                if byte == 0x1b {
                    self.state = State::Escape;
                }
            }
            State::Escape => match byte {
                b'[' => {
                    self.state = State::Csi;
                    self.seq.clear();
                }
                // A second ESC restarts the introducer.
                0x1b => {}
                _ => self.state = State::Ground,
            },
            State::Csi => {
                if (0x40..=0x7e).contains(&byte) {
                    if let Some(reply) = recognize(&self.seq, byte) {
                        emit(reply);
                    }
                    self.state = State::Ground;
                } else if self.seq.len() < MAX_SEQUENCE {
                    self.seq.push(byte);
                }
                // Overflow is truncation: keep consuming until the final
                // byte, the sequence just cannot match anymore.
            }
        }
    }
}

fn recognize(seq: &[u8], final_byte: u8) -> Option<Reply> {
    match final_byte {
        // DSR - Device Status Report
        b'n' => match seq {
            b"6" => Some(Reply::CursorPosition),
            b"5" => Some(Reply::DeviceOk),
            _ => None,
        },
        // DA - Device Attributes
        b'c' => {
            if seq.first() == Some(&b'>') {
                Some(Reply::SecondaryAttributes)
            } else if seq.is_empty() || seq == b"0" {
                Some(Reply::PrimaryAttributes)
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(scanner: &mut QueryScanner, bytes: &[u8]) -> Vec<Reply> {
        let mut replies = Vec::new();
        scanner.scan(bytes, |r| replies.push(r));
        replies
    }

    #[test]
    fn cursor_position_query() {
        let mut scanner = QueryScanner::new();
        let replies = collect(&mut scanner, b"before\x1b[6nafter");
        assert_eq!(replies, vec![Reply::CursorPosition]);
        assert_eq!(Reply::CursorPosition.as_bytes(), b"\x1b[1;1R");
        // Automaton is back in ground: a later query is still recognized.
        assert_eq!(collect(&mut scanner, b"\x1b[6n"), vec![Reply::CursorPosition]);
    }

    #[test]
    fn device_status_query() {
        let mut scanner = QueryScanner::new();
        assert_eq!(collect(&mut scanner, b"\x1b[5n"), vec![Reply::DeviceOk]);
    }

    #[test]
    fn primary_attributes_with_and_without_param() {
        let mut scanner = QueryScanner::new();
        assert_eq!(collect(&mut scanner, b"\x1b[c"), vec![Reply::PrimaryAttributes]);
        assert_eq!(collect(&mut scanner, b"\x1b[0c"), vec![Reply::PrimaryAttributes]);
    }

    #[test]
    fn secondary_attributes() {
        let mut scanner = QueryScanner::new();
        assert_eq!(
            collect(&mut scanner, b"\x1b[>c"),
            vec![Reply::SecondaryAttributes]
        );
        assert_eq!(
            collect(&mut scanner, b"\x1b[>0c"),
            vec![Reply::SecondaryAttributes]
        );
    }

    #[test]
    fn unrecognized_final_byte_produces_nothing() {
        let mut scanner = QueryScanner::new();
        assert!(collect(&mut scanner, b"\x1b[2J\x1b[1;5H\x1b[31m").is_empty());
        // Still functional afterwards.
        assert_eq!(collect(&mut scanner, b"\x1b[6n"), vec![Reply::CursorPosition]);
    }

    #[test]
    fn escape_without_bracket_resets() {
        let mut scanner = QueryScanner::new();
        // ESC followed by a non-'[' byte is not a sequence, and the
        // following bytes are processed fresh from ground.
        assert!(collect(&mut scanner, b"\x1bX[6n").is_empty());
        // A second ESC restarts the introducer rather than aborting it.
        assert_eq!(collect(&mut scanner, b"\x1b\x1b[6n"), vec![Reply::CursorPosition]);
    }

    #[test]
    fn split_chunks_match_unsplit() {
        let input: &[u8] = b"text\x1b[6nmore\x1b[>c\x1b[5ntail\x1b[0c";

        let mut whole = QueryScanner::new();
        let expected = collect(&mut whole, input);
        assert_eq!(expected.len(), 4);

        // Byte-at-a-time.
        let mut split = QueryScanner::new();
        let mut got = Vec::new();
        for chunk in input.chunks(1) {
            split.scan(chunk, |r| got.push(r));
        }
        assert_eq!(got, expected);

        // Every other split point.
        for at in 1..input.len() {
            let mut scanner = QueryScanner::new();
            let mut got = Vec::new();
            scanner.scan(&input[..at], |r| got.push(r));
            scanner.scan(&input[at..], |r| got.push(r));
            assert_eq!(got, expected, "split at {at}");
        }
    }

    #[test]
    fn oversized_sequence_is_consumed_without_match() {
        let mut scanner = QueryScanner::new();
        let mut input = b"\x1b[".to_vec();
        input.extend(std::iter::repeat(b'1').take(64));
        input.push(b'n');
        assert!(collect(&mut scanner, &input).is_empty());
        // Back to ground afterwards.
        assert_eq!(collect(&mut scanner, b"\x1b[6n"), vec![Reply::CursorPosition]);
    }
}
