fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use wardbell_protocol::{
        CallBellRequest, ChatMessage, Command, Frame, HeartBeat, InboundMessage, MessageKind,
        OutgoingChatMessage, ReadReceiptNotification, decode_frames,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent comparison).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  backend: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    // --- Application payloads ---

    #[test]
    fn fixture_chat_message() {
        let msg: ChatMessage = roundtrip_test("chat_message.json");
        assert_eq!(msg.chat_room_id, "1_5");
        assert_eq!(msg.message_id, Some(301));
        assert_eq!(msg.sender_id.as_deref(), Some("5"));
        assert_eq!(msg.is_read, Some(false));
        assert_eq!(msg.extra.get("type"), Some(&serde_json::json!("MESSAGE")));
    }

    #[test]
    fn fixture_call_bell_request() {
        let req: CallBellRequest = roundtrip_test("call_bell_request.json");
        assert_eq!(req.request_id, Some(17));
        assert_eq!(req.patient_name.as_deref(), Some("Kim"));
        assert_eq!(req.status.as_deref(), Some("PENDING"));
        // Fields the client does not model survive untouched.
        assert_eq!(req.extra.get("roomNumber"), Some(&serde_json::json!("304")));
    }

    #[test]
    fn fixture_read_receipt() {
        let receipt: ReadReceiptNotification = roundtrip_test("read_receipt.json");
        assert_eq!(receipt.reader_id.as_deref(), Some("nurse-3"));
        assert_eq!(receipt.last_read_message_id, Some(301));
    }

    #[test]
    fn fixture_outgoing_chat_message() {
        let msg: OutgoingChatMessage = roundtrip_test("outgoing_chat_message.json");
        assert_eq!(msg, OutgoingChatMessage::text("1_5", "nurse-3", "on my way"));
    }

    #[test]
    fn fixtures_classify_by_discriminant() {
        let cases = [
            ("chat_message.json", MessageKind::Chat),
            ("call_bell_request.json", MessageKind::CallBell),
            ("read_receipt.json", MessageKind::ReadReceipt),
        ];
        for (name, kind) in cases {
            let msg = InboundMessage::decode(&read_fixture(name))
                .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
            assert_eq!(msg.kind(), Some(kind), "{name}");
        }
    }

    #[test]
    fn outgoing_message_is_not_an_inbound_kind() {
        // A publish body carries messageType TEXT, which no inbound shape claims.
        let msg = InboundMessage::decode(&read_fixture("outgoing_chat_message.json")).unwrap();
        assert!(matches!(msg, InboundMessage::Unknown(_)));
    }

    // --- STOMP frames ---

    #[test]
    fn fixture_connected_frame() {
        let frame = Frame::decode(&read_fixture("connected.stomp")).unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.header("version"), Some("1.2"));
        assert_eq!(
            frame.heart_beat().unwrap(),
            HeartBeat {
                outgoing_ms: 4000,
                incoming_ms: 4000,
            }
        );
    }

    #[test]
    fn fixture_message_frame_carries_chat() {
        let frame = Frame::decode(&read_fixture("message.stomp")).unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("subscription"), Some("sub-0"));
        assert_eq!(frame.header("destination"), Some("/sub/chat/room/1_5"));

        match InboundMessage::decode(&frame.body).unwrap() {
            InboundMessage::Chat(msg) => assert_eq!(msg.message_content, "hi"),
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[test]
    fn fixture_error_frame() {
        let frame = Frame::decode(&read_fixture("error.stomp")).unwrap();
        assert_eq!(frame.command, Command::Error);
        assert_eq!(frame.error_message(), "Session closed.");
    }

    #[test]
    fn fixture_batched_frames() {
        let frames = decode_frames(&read_fixture("batched.stomp")).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.command == Command::Message));

        let first = InboundMessage::decode(&frames[0].body).unwrap();
        assert_eq!(first.kind(), Some(MessageKind::CallBell));
        // A broken body is a per-message failure, not a framing one.
        assert!(InboundMessage::decode(&frames[1].body).is_err());
    }

    #[test]
    fn encoded_send_frame_decodes_back() {
        let body = serde_json::to_string(&OutgoingChatMessage::text("1_5", "nurse-3", "ok")).unwrap();
        let wire = Frame::send("/pub/chat/message", body.clone()).encode();

        let frame = Frame::decode(&wire).unwrap();
        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.header("destination"), Some("/pub/chat/message"));
        assert_eq!(frame.body, body);
    }
}
