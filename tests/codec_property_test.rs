//! Property tests for the STOMP wire codec.

use proptest::prelude::*;
use stomp_ws::codec::{decode, decode_all, encode, Decoded};
use stomp_ws::{Command, Frame, Headers};

/// Commands whose headers are escaped on the wire.
fn escaped_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Send),
        Just(Command::Subscribe),
        Just(Command::Unsubscribe),
        Just(Command::Begin),
        Just(Command::Commit),
        Just(Command::Abort),
        Just(Command::Ack),
        Just(Command::Disconnect),
        Just(Command::Message),
        Just(Command::Receipt),
        Just(Command::Error),
    ]
}

fn headers() -> impl Strategy<Value = Headers> {
    let key = "[a-zA-Z0-9:\\\\\r\n-]{1,12}".prop_filter("reserved", |k| k != "content-length");
    let value = "[^\\x00]{0,20}";
    prop::collection::btree_map(key, value, 0..6)
}

fn frame() -> impl Strategy<Value = Frame> {
    (
        escaped_command(),
        headers(),
        prop::option::of("[^\\x00]{1,40}"),
    )
        .prop_map(|(command, headers, body)| Frame {
            command,
            headers,
            body,
        })
}

proptest! {
    #[test]
    fn encode_then_decode_recovers_frame(frame in frame()) {
        let text = encode(&frame);
        prop_assert!(text.ends_with('\0'));
        prop_assert_eq!(decode(&text), Some(Decoded::Frame(frame)));
    }

    #[test]
    fn batched_frames_decode_in_order(frames in prop::collection::vec(frame(), 1..4)) {
        let text: String = frames.iter().map(encode).collect::<Vec<_>>().join("\n");
        let expected: Vec<Decoded> = frames.into_iter().map(Decoded::Frame).collect();
        prop_assert_eq!(decode_all(&text), expected);
    }

    #[test]
    fn line_endings_only_is_one_heartbeat(
        eols in prop::collection::vec(prop_oneof![Just("\n"), Just("\r\n")], 1..5)
    ) {
        prop_assert_eq!(decode_all(&eols.concat()), vec![Decoded::Heartbeat]);
    }
}
