//! STOMP wire encoding.
//!
//! Wire format (text, one frame):
//!
//! ```text
//! COMMAND\n
//! header-key:header-value\n
//! ...
//! \n
//! body
//! \0
//! ```
//!
//! A message consisting only of line endings is a server heartbeat.
//!
//! # Framing
//!
//! WebSocket brokers usually send one frame per message, but some batch
//! several frames (or a frame followed by heartbeat EOLs) into one message.
//! [`decode_all`] scans for frame boundaries: a valid `content-length`
//! bounds the body exactly, otherwise the body runs to the first NUL.
//!
//! # Escaping
//!
//! STOMP 1.2 header escaping (`\\`, `\n`, `\r`, `\c`) is applied to every
//! frame except CONNECT and CONNECTED. STOMP 1.1 has no `\r` escape, so
//! [`encode_for`] writes carriage returns verbatim once a 1.1 session is
//! negotiated. Decoding accepts all four escapes. Colons in header *values*
//! are written verbatim; decoding splits a header line on its first colon
//! only.

use crate::constants::{header, NUL};
use crate::frame::{Command, Frame, Headers, Version};

/// One decoded unit of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame.
    Frame(Frame),
    /// A server heartbeat (empty command line).
    Heartbeat,
    /// A frame whose command the client does not know. Carries the command
    /// line; the frame itself is skipped.
    Unknown(String),
}

/// Encode a frame to wire text using STOMP 1.2 escaping.
///
/// Content-length and content-type are not injected here; the command API
/// sets them where STOMP expects them.
#[must_use]
pub fn encode(frame: &Frame) -> String {
    encode_for(frame, Version::V1_2)
}

/// Encode a frame for a session speaking `version`.
#[must_use]
pub fn encode_for(frame: &Frame, version: Version) -> String {
    let body_len = frame.body.as_ref().map_or(0, String::len);
    let mut out = String::with_capacity(32 + frame.headers.len() * 24 + body_len);

    out.push_str(frame.command.as_str());
    out.push('\n');

    let raw = frame.command.raw_headers();
    let escape_cr = version == Version::V1_2;
    for (key, value) in &frame.headers {
        if raw {
            out.push_str(key);
            out.push(':');
            out.push_str(value);
        } else {
            escape_into(&mut out, key, true, escape_cr);
            out.push(':');
            escape_into(&mut out, value, false, escape_cr);
        }
        out.push('\n');
    }

    out.push('\n');
    if let Some(body) = &frame.body {
        out.push_str(body);
    }
    out.push(NUL);
    out
}

/// Decode the first unit of an inbound message.
///
/// Returns `None` for an empty message.
#[must_use]
pub fn decode(text: &str) -> Option<Decoded> {
    decode_all(text).into_iter().next()
}

/// Decode every frame contained in an inbound message.
///
/// Leading line endings and stray NULs between frames are skipped. When the
/// message holds no frame but at least one line ending, a single
/// [`Decoded::Heartbeat`] is returned. A frame with an unknown command
/// becomes [`Decoded::Unknown`] and decoding resumes after its NUL.
#[must_use]
pub fn decode_all(text: &str) -> Vec<Decoded> {
    let mut decoded = Vec::new();
    let mut rest = text;
    let mut saw_eol = false;

    loop {
        let trimmed = rest.trim_start_matches(['\r', '\n', NUL]);
        saw_eol |= rest[..rest.len() - trimmed.len()].contains('\n');
        rest = trimmed;
        if rest.is_empty() {
            break;
        }

        let (unit, remaining) = parse_frame(rest);
        decoded.push(unit);
        rest = remaining;
    }

    if decoded.is_empty() && saw_eol {
        decoded.push(Decoded::Heartbeat);
    }
    decoded
}

/// Parse one frame from the start of `text`, returning it with the
/// unconsumed remainder.
fn parse_frame(text: &str) -> (Decoded, &str) {
    let mut pos = 0;
    let line = next_line(text, &mut pos);
    let Ok(command) = line.parse::<Command>() else {
        let end = text.find(NUL).map_or(text.len(), |nul| nul + 1);
        log::warn!("[Stomp] Skipping frame with unknown command: {line}");
        return (Decoded::Unknown(line.to_string()), &text[end..]);
    };
    let raw = command.raw_headers();

    let mut headers = Headers::new();
    let mut has_body = false;
    loop {
        let rest = &text[pos..];
        if rest.is_empty() || rest.starts_with(NUL) {
            break;
        }
        let line = next_line(text, &mut pos);
        if line.is_empty() {
            has_body = true;
            break;
        }
        match line.split_once(':') {
            Some((key, value)) if raw => {
                headers.insert(key.to_string(), value.to_string());
            }
            Some((key, value)) => {
                headers.insert(unescape(key), unescape(value));
            }
            None => log::trace!("[Stomp] Ignoring header line without colon: {line}"),
        }
    }

    let mut body = None;
    if has_body {
        let rest = &text[pos..];
        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&len| {
                rest.get(..len).is_some() && rest[len..].starts_with(NUL)
            });
        let end = content_length.unwrap_or_else(|| rest.find(NUL).unwrap_or(rest.len()));
        if end > 0 {
            body = Some(rest[..end].to_string());
        }
        pos += end;
    }

    if text[pos..].starts_with(NUL) {
        pos += 1;
    }

    let frame = Frame {
        command,
        headers,
        body,
    };
    (Decoded::Frame(frame), &text[pos..])
}

/// Read the line starting at `*pos`, advancing past its `\n`.
///
/// Stops before a NUL without consuming it. A trailing `\r` is dropped.
fn next_line<'a>(text: &'a str, pos: &mut usize) -> &'a str {
    let rest = &text[*pos..];
    let end = rest.find(['\n', NUL]).unwrap_or(rest.len());
    *pos += end;
    if rest[end..].starts_with('\n') {
        *pos += 1;
    }
    let line = &rest[..end];
    line.strip_suffix('\r').unwrap_or(line)
}

fn escape_into(out: &mut String, s: &str, is_key: bool, escape_cr: bool) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' if escape_cr => out.push_str("\\r"),
            ':' if is_key => out.push_str("\\c"),
            c => out.push(c),
        }
    }
}

fn unescape(s: &str) -> String {
    if !s.contains('\\') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                log::warn!("[Stomp] Unrecognised header escape: \\{other}");
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_frame(text: &str) -> Frame {
        match decode(text) {
            Some(Decoded::Frame(frame)) => frame,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_send_frame_layout() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/queue/a")
            .header("content-length", "2")
            .body("hi");
        assert_eq!(
            encode(&frame),
            "SEND\ncontent-length:2\ndestination:/queue/a\n\nhi\0"
        );
    }

    #[test]
    fn test_encode_without_body_ends_with_blank_line_and_nul() {
        let frame = Frame::new(Command::Begin).header("transaction", "tx1");
        assert_eq!(encode(&frame), "BEGIN\ntransaction:tx1\n\n\0");
    }

    #[test]
    fn test_encode_connect_headers_are_not_escaped() {
        let frame = Frame::new(Command::Connect).header("passcode", "a:b\\c");
        assert_eq!(encode(&frame), "CONNECT\npasscode:a:b\\c\n\n\0");
    }

    #[test]
    fn test_encode_escapes_newlines_and_key_colons() {
        let frame = Frame::new(Command::Send).header("x:y", "line1\nline2");
        assert_eq!(encode(&frame), "SEND\nx\\cy:line1\\nline2\n\n\0");
    }

    #[test]
    fn test_encode_for_stomp_1_1_keeps_carriage_returns() {
        let frame = Frame::new(Command::Send).header("k", "a\rb\nc");
        assert_eq!(encode_for(&frame, Version::V1_1), "SEND\nk:a\rb\\nc\n\n\0");
        assert_eq!(encode_for(&frame, Version::V1_2), "SEND\nk:a\\rb\\nc\n\n\0");
    }

    #[test]
    fn test_decode_message_frame() {
        let frame = only_frame(
            "MESSAGE\ndestination:/topic/a\nmessage-id:7\nsubscription:sub-0\n\nhello\0",
        );
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.destination(), "/topic/a");
        assert_eq!(frame.get("message-id"), Some("7"));
        assert_eq!(frame.body.as_deref(), Some("hello"));
    }

    #[test]
    fn test_decode_header_value_keeps_further_colons() {
        let frame = only_frame("MESSAGE\nurl:http://example.com:8080/x\n\n\0");
        assert_eq!(frame.get("url"), Some("http://example.com:8080/x"));
    }

    #[test]
    fn test_decode_ignores_header_without_colon() {
        let frame = only_frame("RECEIPT\ngarbage\nreceipt-id:r1\n\n\0");
        assert_eq!(frame.headers.len(), 1);
        assert_eq!(frame.get("receipt-id"), Some("r1"));
    }

    #[test]
    fn test_decode_duplicate_header_last_wins() {
        let frame = only_frame("MESSAGE\nfoo:1\nfoo:2\n\n\0");
        assert_eq!(frame.get("foo"), Some("2"));
    }

    #[test]
    fn test_decode_drops_leading_empty_line() {
        let frame = only_frame("\nCONNECTED\nsession:abc123\nversion:1.2\n\n\0");
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.get("session"), Some("abc123"));
        assert_eq!(frame.body, None);
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        let frame = only_frame("ERROR\r\nmessage:boom\r\n\r\ndetails\0");
        assert_eq!(frame.command, Command::Error);
        assert_eq!(frame.get("message"), Some("boom"));
        assert_eq!(frame.body.as_deref(), Some("details"));
    }

    #[test]
    fn test_decode_single_newline_is_heartbeat() {
        assert_eq!(decode("\n"), Some(Decoded::Heartbeat));
        assert_eq!(decode("\r\n\n"), Some(Decoded::Heartbeat));
    }

    #[test]
    fn test_decode_empty_message_is_nothing() {
        assert_eq!(decode(""), None);
        assert!(decode_all("\0").is_empty());
    }

    #[test]
    fn test_decode_unknown_command_is_reported() {
        assert_eq!(decode("BOGUS\n\n\0"), Some(Decoded::Unknown("BOGUS".into())));
    }

    #[test]
    fn test_decode_all_skips_unknown_frame_in_batch() {
        let text = "MESSAGE\ndestination:/a\n\none\0\nNACK\nid:1\n\n\0\nMESSAGE\ndestination:/b\n\ntwo\0";
        let decoded = decode_all(text);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1], Decoded::Unknown("NACK".into()));
        let (Decoded::Frame(first), Decoded::Frame(last)) = (&decoded[0], &decoded[2]) else {
            panic!("expected frames around the unknown one, got {decoded:?}");
        };
        assert_eq!(first.body.as_deref(), Some("one"));
        assert_eq!(last.destination(), "/b");
        assert_eq!(last.body.as_deref(), Some("two"));
    }

    #[test]
    fn test_decode_body_keeps_newlines() {
        let frame = only_frame("MESSAGE\ndestination:/q\n\nline1\nline2\n\0");
        assert_eq!(frame.body.as_deref(), Some("line1\nline2\n"));
    }

    #[test]
    fn test_decode_content_length_allows_embedded_nul() {
        let frame = only_frame("MESSAGE\ncontent-length:3\n\na\0b\0");
        assert_eq!(frame.body.as_deref(), Some("a\0b"));
    }

    #[test]
    fn test_decode_wrong_content_length_falls_back_to_nul() {
        let frame = only_frame("MESSAGE\ncontent-length:99\n\nabc\0");
        assert_eq!(frame.body.as_deref(), Some("abc"));
    }

    #[test]
    fn test_decode_unescapes_headers() {
        let frame = only_frame("MESSAGE\nk\\cey:a\\nb\\\\c\n\n\0");
        assert_eq!(frame.get("k:ey"), Some("a\nb\\c"));
    }

    #[test]
    fn test_decode_connected_headers_stay_raw() {
        let frame = only_frame("CONNECTED\nserver:x\\y\n\n\0");
        assert_eq!(frame.get("server"), Some("x\\y"));
    }

    #[test]
    fn test_decode_frame_without_blank_line() {
        let frame = only_frame("RECEIPT\nreceipt-id:77\0");
        assert_eq!(frame.get("receipt-id"), Some("77"));
        assert_eq!(frame.body, None);
    }

    #[test]
    fn test_decode_all_splits_batched_frames() {
        let text = "MESSAGE\ndestination:/a\n\none\0\nMESSAGE\ndestination:/b\n\ntwo\0\n";
        let decoded = decode_all(text);
        assert_eq!(decoded.len(), 2);
        let Decoded::Frame(second) = &decoded[1] else {
            panic!("expected frame");
        };
        assert_eq!(second.destination(), "/b");
        assert_eq!(second.body.as_deref(), Some("two"));
    }

    #[test]
    fn test_decode_all_trailing_eol_is_not_heartbeat() {
        let decoded = decode_all("RECEIPT\nreceipt-id:1\n\n\0\n");
        assert_eq!(decoded.len(), 1);
        assert!(matches!(decoded[0], Decoded::Frame(_)));
    }

    #[test]
    fn test_round_trip_preserves_frame() {
        let frame = Frame::new(Command::Message)
            .header("destination", "/topic/prices")
            .header("weird:key", "v\\al\r\nue")
            .header("url", "ws://host:61614/stomp")
            .body("{\"price\": 42}\nsecond line");
        assert_eq!(only_frame(&encode(&frame)), frame);
    }
}
