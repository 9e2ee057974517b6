//! Line classification
//!
//! Lines carry no type tag, so they are sorted by shape: length plus
//! leading characters. Every input lands in exactly one variant.

/// Length of a `P####` / `R####` switch event
pub const SWITCH_EVENT_LEN: usize = 5;
/// Length of a `^K###LL` load level event
pub const LOAD_EVENT_LEN: usize = 7;
/// Length of a `^G` load bitmap reply
pub const LOAD_BULK_LEN: usize = 48;
/// Length of a `^H` switch bitmap reply
pub const SWITCH_BULK_LEN: usize = 96;

const LOAD_EVENT_TAG: &str = "^K";

/// What a line turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// `P####`: a physical switch went down
    SwitchPressed(u16),
    /// `R####`: a physical switch came back up
    SwitchReleased(u16),
    /// `^K###LL`: a load changed level (unscaled 0-99)
    LoadChanged {
        /// Load number
        id: u16,
        /// Level 0-99
        level: u8,
    },
    /// 48 hex digits answering `^G`
    LoadBulkStatus(&'a str),
    /// 96 hex digits answering `^H`
    SwitchBulkStatus(&'a str),
    /// Any other line while a command is waiting for its answer
    CommandReply(&'a str),
    /// Everything else
    Unrecognized(&'a str),
}

impl Frame<'_> {
    /// Check if this frame is an unsolicited push event
    pub fn is_push_event(&self) -> bool {
        matches!(
            self,
            Frame::SwitchPressed(_) | Frame::SwitchReleased(_) | Frame::LoadChanged { .. }
        )
    }
}

/// Classify a CR-stripped line
///
/// `reply_pending` tells whether a command is currently waiting for an
/// answer; without one, lines of no known shape are `Unrecognized`.
pub fn classify(line: &str, reply_pending: bool) -> Frame<'_> {
    let len = line.chars().count();

    if len == SWITCH_EVENT_LEN {
        let tag = line.as_bytes()[0];
        if tag == b'P' || tag == b'R' {
            return match parse_digits::<u16>(&line[1..]) {
                Some(id) if tag == b'P' => Frame::SwitchPressed(id),
                Some(id) => Frame::SwitchReleased(id),
                None => Frame::Unrecognized(line),
            };
        }
    }

    if len == LOAD_EVENT_LEN {
        if let Some(rest) = line.strip_prefix(LOAD_EVENT_TAG) {
            let parsed = rest
                .get(0..3)
                .and_then(parse_digits::<u16>)
                .zip(rest.get(3..5).and_then(parse_digits::<u8>));
            return match parsed {
                Some((id, level)) => Frame::LoadChanged { id, level },
                None => Frame::Unrecognized(line),
            };
        }
    }

    match len {
        LOAD_BULK_LEN => Frame::LoadBulkStatus(line),
        SWITCH_BULK_LEN => Frame::SwitchBulkStatus(line),
        0 => Frame::Unrecognized(line),
        _ if reply_pending => Frame::CommandReply(line),
        _ => Frame::Unrecognized(line),
    }
}

fn parse_digits<T: std::str::FromStr>(s: &str) -> Option<T> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_events() {
        assert_eq!(classify("P0075", false), Frame::SwitchPressed(75));
        assert_eq!(classify("R0075", true), Frame::SwitchReleased(75));
        assert_eq!(classify("P1106", false), Frame::SwitchPressed(1106));
    }

    #[test]
    fn test_switch_shape_with_bad_digits() {
        assert_eq!(classify("P00X5", false), Frame::Unrecognized("P00X5"));
        // Not a switch tag, so falls through to the reply rule
        assert_eq!(classify("Q0075", true), Frame::CommandReply("Q0075"));
    }

    #[test]
    fn test_load_change_event() {
        assert_eq!(
            classify("^K00345", false),
            Frame::LoadChanged { id: 3, level: 45 }
        );
        assert_eq!(classify("^K0034X", true), Frame::Unrecognized("^K0034X"));
    }

    #[test]
    fn test_push_events_never_become_replies() {
        for line in ["P0001", "R0002", "^K00199"] {
            assert!(classify(line, true).is_push_event(), "{line}");
        }
    }

    #[test]
    fn test_bulk_status_by_length() {
        let loads = "0".repeat(48);
        let switches = "F".repeat(96);
        assert_eq!(classify(&loads, false), Frame::LoadBulkStatus(&loads));
        assert_eq!(classify(&switches, true), Frame::SwitchBulkStatus(&switches));
    }

    #[test]
    fn test_reply_depends_on_pending() {
        assert_eq!(classify("45", true), Frame::CommandReply("45"));
        assert_eq!(classify("45", false), Frame::Unrecognized("45"));
    }

    #[test]
    fn test_empty_line_is_unrecognized() {
        assert_eq!(classify("", true), Frame::Unrecognized(""));
        assert_eq!(classify("", false), Frame::Unrecognized(""));
    }

    #[test]
    fn test_length_counts_characters() {
        // Five characters, seven bytes
        let line = "P\u{FFFD}075";
        assert_eq!(classify(line, false), Frame::Unrecognized(line));
    }

    #[test]
    fn test_every_length_classifies() {
        for len in 0..=120 {
            for pending in [false, true] {
                let line = "9".repeat(len);
                let frame = classify(&line, pending);
                let expected_bulk = len == 48 || len == 96;
                match frame {
                    Frame::LoadBulkStatus(_) | Frame::SwitchBulkStatus(_) => assert!(expected_bulk),
                    Frame::CommandReply(_) => assert!(pending && len > 0 && !expected_bulk),
                    Frame::Unrecognized(_) => assert!(!pending || len == 0),
                    other => panic!("unexpected {other:?} for len {len}"),
                }
            }
        }
    }
}
