//! Text/JSON command line framer
//!
//! Operators type commands on a terminal, so the framer echoes every byte
//! back and handles backspace. Host tools send JSON objects instead, which
//! may span several lines; those complete when the brace depth returns to
//! zero rather than on a line terminator.
//!
//! The classification of a unit is decided by its first byte: `{` starts a
//! JSON unit, anything else a plain-text unit. A unit that reaches the
//! staging capacity without completing is discarded silently. For text the
//! rest of that line is swallowed up to its terminator, so no fragment of
//! an oversized line is ever emitted.

use tracing::debug;

use crate::{RxStatus, StreamFramer};

/// Fixed per-transport staging capacity for one command unit
pub const MAX_CMD_LENGTH: usize = 0x100;

const BACKSPACE: u8 = 0x08;
const BACKSPACE_ECHO: &[u8] = b"\x08 \x08";

/// What kind of unit is being staged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// No byte of the next unit has arrived yet
    Undetermined,
    /// Plain-text command, completes on `\r` or `\n`
    Text,
    /// JSON object, completes when brace depth returns to 0
    Json,
}

/// Streaming framer for console input
#[derive(Debug, Clone)]
pub struct LineFramer {
    kind: Classification,
    staging: Vec<u8>,
    depth: u32,
    capacity: usize,
    discarding: bool,
}

impl LineFramer {
    /// Create a framer with the standard staging capacity
    pub fn new() -> Self {
        Self::with_capacity(MAX_CMD_LENGTH)
    }

    /// Create a framer with a custom staging capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            kind: Classification::Undetermined,
            staging: Vec::with_capacity(capacity),
            depth: 0,
            capacity: capacity.max(1),
            discarding: false,
        }
    }

    /// Current classification of the unit being staged
    pub fn classification(&self) -> Classification {
        self.kind
    }

    /// Bytes staged for the unit in flight
    pub fn pending(&self) -> &[u8] {
        &self.staging
    }

    /// Current JSON brace depth (0 outside JSON units)
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// True while the tail of an oversized text line is being swallowed
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    fn reset(&mut self) {
        self.kind = Classification::Undetermined;
        self.staging.clear();
        self.depth = 0;
    }

    fn complete(&mut self, units: &mut Vec<u8>) {
        units.extend_from_slice(&self.staging);
        units.push(b'\n');
        self.reset();
    }

    fn backspace(&mut self) {
        if let Some(removed) = self.staging.pop() {
            if self.kind == Classification::Json {
                match removed {
                    b'{' => self.depth = self.depth.saturating_sub(1),
                    b'}' => self.depth += 1,
                    _ => {}
                }
            }
            if self.staging.is_empty() {
                self.reset();
            }
        }
    }

    /// Process one byte, returning true if it completed a unit
    pub fn push_byte(
        &mut self,
        byte: u8,
        echo: &mut dyn FnMut(&[u8]),
        units: &mut Vec<u8>,
    ) -> bool {
        if byte == BACKSPACE {
            echo(BACKSPACE_ECHO);
            self.backspace();
            return false;
        }

        echo(&[byte]);

        if self.discarding {
            if byte == b'\n' || byte == b'\r' {
                self.discarding = false;
            }
            return false;
        }

        if byte == b'\n' || byte == b'\r' {
            // Terminators only close text units; inside JSON they are dropped
            if self.kind == Classification::Text && !self.staging.is_empty() {
                self.complete(units);
                return true;
            }
            return false;
        }

        if self.kind == Classification::Undetermined {
            self.kind = if byte == b'{' {
                Classification::Json
            } else {
                Classification::Text
            };
        }

        self.staging.push(byte);

        if self.kind == Classification::Json {
            match byte {
                b'{' => self.depth += 1,
                b'}' => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
            if self.depth == 0 {
                self.complete(units);
                return true;
            }
        }

        if self.staging.len() >= self.capacity {
            debug!(
                "Discarding {:?} unit of {} bytes: staging buffer full",
                self.kind,
                self.staging.len()
            );
            self.discarding = self.kind == Classification::Text;
            self.reset();
        }

        false
    }

    /// Consume a run of bytes and append every completed unit to `units`
    ///
    /// Returns [`RxStatus::CommandReady`] if at least one unit completed
    /// during this call, [`RxStatus::NoData`] otherwise.
    pub fn feed<I>(&mut self, input: I, echo: &mut dyn FnMut(&[u8]), units: &mut Vec<u8>) -> RxStatus
    where
        I: IntoIterator<Item = u8>,
    {
        let mut ready = false;
        for byte in input {
            ready |= self.push_byte(byte, echo, units);
        }
        if ready {
            RxStatus::CommandReady
        } else {
            RxStatus::NoData
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFramer for LineFramer {
    fn feed_dyn(
        &mut self,
        input: &mut dyn Iterator<Item = u8>,
        echo: &mut dyn FnMut(&[u8]),
        units: &mut Vec<u8>,
    ) -> RxStatus {
        self.feed(input, echo, units)
    }

    fn clear(&mut self) {
        self.discarding = false;
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run(framer: &mut LineFramer, input: &[u8]) -> (RxStatus, Vec<u8>, Vec<u8>) {
        let mut echoed = Vec::new();
        let mut units = Vec::new();
        let status = framer.feed(
            input.iter().copied(),
            &mut |b: &[u8]| echoed.extend_from_slice(b),
            &mut units,
        );
        (status, units, echoed)
    }

    #[test]
    fn test_text_command_completes_on_newline() {
        let mut framer = LineFramer::new();
        let (status, units, echoed) = run(&mut framer, b"stat\n");
        assert_eq!(status, RxStatus::CommandReady);
        assert_eq!(units, b"stat\n");
        assert_eq!(echoed, b"stat\n");
        assert_eq!(framer.classification(), Classification::Undetermined);
    }

    #[test]
    fn test_text_command_split_across_calls() {
        let mut framer = LineFramer::new();
        let (status, units, _) = run(&mut framer, b"HE");
        assert_eq!(status, RxStatus::NoData);
        assert!(units.is_empty());
        assert_eq!(framer.classification(), Classification::Text);

        let (status, units, _) = run(&mut framer, b"LP\r");
        assert_eq!(status, RxStatus::CommandReady);
        assert_eq!(units, b"HELP\n");
    }

    #[test]
    fn test_multiple_units_in_one_call() {
        let mut framer = LineFramer::new();
        let (status, units, _) = run(&mut framer, b"stop\r\nstat\r\n");
        assert_eq!(status, RxStatus::CommandReady);
        assert_eq!(units, b"stop\nstat\n");
    }

    #[test]
    fn test_bare_terminators_are_ignored() {
        let mut framer = LineFramer::new();
        let (status, units, echoed) = run(&mut framer, b"\r\n\r\n");
        assert_eq!(status, RxStatus::NoData);
        assert!(units.is_empty());
        assert_eq!(echoed, b"\r\n\r\n");
    }

    #[test]
    fn test_backspace_removes_last_byte() {
        let mut framer = LineFramer::new();
        let (status, units, echoed) = run(&mut framer, b"staX\x08t\n");
        assert_eq!(status, RxStatus::CommandReady);
        assert_eq!(units, b"stat\n");
        assert_eq!(echoed, b"staX\x08 \x08t\n");
    }

    #[test]
    fn test_backspace_on_empty_line() {
        let mut framer = LineFramer::new();
        let (status, units, echoed) = run(&mut framer, b"\x08\x08");
        assert_eq!(status, RxStatus::NoData);
        assert!(units.is_empty());
        assert_eq!(echoed, b"\x08 \x08\x08 \x08");
        assert_eq!(framer.classification(), Classification::Undetermined);
    }

    #[test]
    fn test_json_unit_completes_on_balance() {
        let mut framer = LineFramer::new();
        let (status, units, _) = run(&mut framer, br#"{"CMD":"STAT","PARAMS":{"A":1}}"#);
        assert_eq!(status, RxStatus::CommandReady);
        assert_eq!(units, b"{\"CMD\":\"STAT\",\"PARAMS\":{\"A\":1}}\n");
    }

    #[test]
    fn test_json_drops_embedded_line_breaks() {
        let mut framer = LineFramer::new();
        let (status, units, _) = run(&mut framer, b"{\"CMD\":\r\n\"STAT\"}");
        assert_eq!(status, RxStatus::CommandReady);
        assert_eq!(units, b"{\"CMD\":\"STAT\"}\n");
    }

    #[test]
    fn test_json_trailing_newline_is_not_a_unit() {
        let mut framer = LineFramer::new();
        let (status, units, _) = run(&mut framer, b"{\"MC\":\"LISTENER2\",\"MP\":{}}\n");
        assert_eq!(status, RxStatus::CommandReady);
        assert_eq!(units, b"{\"MC\":\"LISTENER2\",\"MP\":{}}\n");
    }

    #[test]
    fn test_long_line_is_discarded() {
        let mut framer = LineFramer::new();
        let long = vec![b'A'; 300];
        let (status, units, _) = run(&mut framer, &long);
        assert_eq!(status, RxStatus::NoData);
        assert!(units.is_empty());

        assert!(framer.is_discarding());

        let (status, units, _) = run(&mut framer, b"\nstat\n");
        assert_eq!(status, RxStatus::CommandReady);
        assert_eq!(units, b"stat\n");
        assert!(!framer.is_discarding());
    }

    #[test]
    fn test_exactly_capacity_resets() {
        let mut framer = LineFramer::with_capacity(8);
        let (status, units, _) = run(&mut framer, b"ABCDEFGH");
        assert_eq!(status, RxStatus::NoData);
        assert!(units.is_empty());
        assert!(framer.pending().is_empty());
        assert!(framer.is_discarding());
    }

    #[test]
    fn test_unclosed_json_resets_cleanly() {
        let mut framer = LineFramer::with_capacity(16);
        let (status, _, _) = run(&mut framer, b"{{{{{{{{{{{{{{{{");
        assert_eq!(status, RxStatus::NoData);
        assert_eq!(framer.classification(), Classification::Undetermined);
        assert_eq!(framer.depth(), 0);

        let (status, units, _) = run(&mut framer, b"stat\n");
        assert_eq!(status, RxStatus::CommandReady);
        assert_eq!(units, b"stat\n");
    }

    #[test]
    fn test_clear_drops_partial_unit() {
        let mut framer = LineFramer::new();
        run(&mut framer, b"{\"CMD\"");
        StreamFramer::clear(&mut framer);
        assert_eq!(framer.classification(), Classification::Undetermined);
        assert!(framer.pending().is_empty());
    }

    fn json_object() -> impl Strategy<Value = String> {
        let leaf = "[A-Z0-9]{0,6}".prop_map(|s| format!("\"{}\"", s));
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop::collection::vec(("[A-Z]{1,4}", inner), 0..4).prop_map(|fields| {
                let body: Vec<String> = fields
                    .into_iter()
                    .map(|(k, v)| format!("\"{}\":{}", k, v))
                    .collect();
                format!("{{{}}}", body.join(","))
            })
        })
        .prop_map(|v| if v.starts_with('{') { v } else { format!("{{\"V\":{}}}", v) })
    }

    proptest! {
        #[test]
        fn prop_balanced_json_yields_one_identical_unit(obj in json_object()) {
            prop_assume!(obj.len() < MAX_CMD_LENGTH);
            let mut framer = LineFramer::new();
            let (status, units, _) = run(&mut framer, obj.as_bytes());
            prop_assert_eq!(status, RxStatus::CommandReady);
            let mut expected = obj.clone().into_bytes();
            expected.push(b'\n');
            prop_assert_eq!(units, expected);
        }

        #[test]
        fn prop_unclosed_json_never_emits(extra in 1usize..40) {
            let mut framer = LineFramer::with_capacity(64);
            let input: Vec<u8> = std::iter::once(b'{')
                .chain(std::iter::repeat(b'{').take(extra))
                .chain(std::iter::repeat(b'X').take(64))
                .collect();
            let (status, units, _) = run(&mut framer, &input[..64]);
            prop_assert_eq!(status, RxStatus::NoData);
            prop_assert!(units.is_empty());

            let (status, units, _) = run(&mut framer, b"\rHELP\r");
            prop_assert_eq!(status, RxStatus::CommandReady);
            prop_assert_eq!(units, b"HELP\n".to_vec());
        }

        #[test]
        fn prop_text_lines_roundtrip(lines in prop::collection::vec("[A-Z0-9 ]{1,40}", 1..6)) {
            let lines: Vec<String> = lines.into_iter().filter(|l| !l.trim().is_empty()).collect();
            prop_assume!(!lines.is_empty());
            let mut framer = LineFramer::new();
            let input: String = lines.iter().map(|l| format!("{}\r", l)).collect();
            let (_, units, _) = run(&mut framer, input.as_bytes());
            let expected: String = lines.iter().map(|l| format!("{}\n", l)).collect();
            prop_assert_eq!(units, expected.into_bytes());
        }
    }
}
