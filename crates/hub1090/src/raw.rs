//! RAW frame lines: `*` + hex + `;`
//!
//! Tolerated inbound variants: `<HEX;` (bare) and `@MLAT+HEX;` where the
//! 12 hex digit MLAT timestamp is consumed and the frame flagged; frames
//! are always re-broadcast in the canonical `*HEX;` form.

/// Zero-payload frame keeping RAW clients alive
pub const HEARTBEAT: &str = "*0000;\n";

/// The heartbeat is sent five times in a row, once every 60 s
pub fn heartbeat_burst() -> String {
    HEARTBEAT.repeat(5)
}

/// Canonical serialization of a validated frame
pub fn to_line(frame: &[u8]) -> String {
    let mut line = String::with_capacity(frame.len() * 2 + 3);
    line.push('*');
    for byte in frame {
        line.push_str(&format!("{byte:02X}"));
    }
    line.push_str(";\n");
    line
}

/// A frame parsed from an inbound RAW line
#[derive(Debug, PartialEq, Eq)]
pub struct InboundFrame {
    pub bytes: Vec<u8>,
    pub mlat: bool,
}

/// Outcome of parsing one inbound line
#[derive(Debug, PartialEq, Eq)]
pub enum RawLine {
    Frame(InboundFrame),
    /// Empty lines, comments and heartbeats
    Ignored,
    /// Counted as unrecognized and dropped
    Invalid,
}

const MLAT_TIMESTAMP_DIGITS: usize = 12;

pub fn parse_line(line: &str) -> RawLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return RawLine::Ignored;
    }

    let Some(body) = line.strip_suffix(';') else {
        return RawLine::Invalid;
    };

    let (hex, mlat) = if let Some(rest) = body.strip_prefix('*') {
        (rest, false)
    } else if let Some(rest) = body.strip_prefix('<') {
        (rest, false)
    } else if let Some(rest) = body.strip_prefix('@') {
        if rest.len() <= MLAT_TIMESTAMP_DIGITS {
            return RawLine::Invalid;
        }
        (&rest[MLAT_TIMESTAMP_DIGITS..], true)
    } else {
        return RawLine::Invalid;
    };

    if hex == "0000" {
        // heartbeat
        return RawLine::Ignored;
    }

    if hex.len() != 14 && hex.len() != 28 {
        return RawLine::Invalid;
    }

    match hex::decode(hex) {
        Ok(bytes) => RawLine::Frame(InboundFrame { bytes, mlat }),
        Err(_) => RawLine::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexlit::hex;

    #[test]
    fn raw_line_roundtrip() {
        let frame = hex!("8d406b902015a678d4d220aa4bda");
        let line = to_line(&frame);
        assert_eq!(line, "*8D406B902015A678D4D220AA4BDA;\n");

        match parse_line(&line) {
            RawLine::Frame(inbound) => {
                assert_eq!(inbound.bytes, frame);
                assert!(!inbound.mlat);
                // re-emission yields the same bytes
                assert_eq!(to_line(&inbound.bytes), line);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn tolerated_prefixes() {
        let bare = parse_line("<2A00516D492B80;");
        assert_eq!(
            bare,
            RawLine::Frame(InboundFrame {
                bytes: hex!("2a00516d492b80").to_vec(),
                mlat: false,
            })
        );

        let mlat = parse_line("@0123456789AB8D406B902015A678D4D220AA4BDA;");
        assert_eq!(
            mlat,
            RawLine::Frame(InboundFrame {
                bytes: hex!("8d406b902015a678d4d220aa4bda").to_vec(),
                mlat: true,
            })
        );
    }

    #[test]
    fn noise_is_ignored_not_counted() {
        assert_eq!(parse_line(""), RawLine::Ignored);
        assert_eq!(parse_line("# a comment"), RawLine::Ignored);
        assert_eq!(parse_line("*0000;"), RawLine::Ignored);
    }

    #[test]
    fn garbage_is_unrecognized() {
        assert_eq!(parse_line("MSG,3,1,1"), RawLine::Invalid);
        assert_eq!(parse_line("*8D40;"), RawLine::Invalid);
        assert_eq!(parse_line("*ZZZZZZZZZZZZZZ;"), RawLine::Invalid);
        assert_eq!(parse_line("@8D406B90;"), RawLine::Invalid);
    }
}
