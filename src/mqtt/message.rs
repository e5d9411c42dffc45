use chrono::{DateTime, Local};
use std::fmt;

/// Payload text matched for switching the output on.
pub const ON_PAYLOAD: &[u8] = b"1";
/// Payload text matched for switching the output off.
pub const OFF_PAYLOAD: &[u8] = b"0";

/// One notification from the broker. Borrows topic and payload from the
/// client's packet and is dropped once the event is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InboundMessage<'a> {
    pub topic: &'a [u8],
    pub payload: &'a [u8],
    pub received_at: DateTime<Local>,
}

impl<'a> InboundMessage<'a> {
    pub fn new(topic: &'a [u8], payload: &'a [u8]) -> Self {
        InboundMessage {
            topic,
            payload,
            received_at: Local::now(),
        }
    }

    pub fn command(&self) -> Command<'a> {
        Command::parse(self.payload)
    }
}

impl fmt::Display for InboundMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {}: {}",
            self.received_at.naive_local(),
            String::from_utf8_lossy(self.topic),
            String::from_utf8_lossy(self.payload)
        )
    }
}

/// What a payload asks the device to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    On,
    Off,
    Unrecognized(&'a [u8]),
}

impl<'a> Command<'a> {
    /// Whole-slice comparison: the payload length must match exactly, so
    /// `"10"` or an empty payload never count as `"1"`.
    pub fn parse(payload: &'a [u8]) -> Self {
        if payload == ON_PAYLOAD {
            Command::On
        } else if payload == OFF_PAYLOAD {
            Command::Off
        } else {
            Command::Unrecognized(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exact_digits_parse() {
        assert_eq!(Command::parse(b"1"), Command::On);
        assert_eq!(Command::parse(b"0"), Command::Off);
    }

    #[test]
    fn prefixes_and_padding_do_not_match() {
        for payload in [&b"10"[..], b"01", b"1 ", b" 0", b"", b"on", b"1\0"] {
            assert_eq!(Command::parse(payload), Command::Unrecognized(payload));
        }
    }

    #[test]
    fn display_is_lossy_for_binary_payloads() {
        let msg = InboundMessage::new(b"/led", &[0xff, b'1']);
        assert!(msg.to_string().ends_with("/led: \u{fffd}1"));
    }

    proptest! {
        #[test]
        fn anything_but_single_digit_is_unrecognized(payload in proptest::collection::vec(any::<u8>(), 0..16)) {
            let cmd = Command::parse(&payload);
            match payload.as_slice() {
                b"1" => prop_assert_eq!(cmd, Command::On),
                b"0" => prop_assert_eq!(cmd, Command::Off),
                other => prop_assert_eq!(cmd, Command::Unrecognized(other)),
            }
        }
    }
}
