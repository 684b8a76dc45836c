//! Fuzz target for stream event decoding
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary data straight into the decoder
//! - Envelopes: well-formed CBOR maps with arbitrary tags and payloads
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - Decoded inserts always carry a server id
//! - Anything that decodes re-encodes and decodes to the same event

#![no_main]

use arbitrary::Arbitrary;
use ciborium::Value;
use huddle_proto::StreamEvent;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Input {
    Raw(Vec<u8>),
    Envelope { tag: Tag, fields: Vec<(String, Field)> },
}

#[derive(Debug, Arbitrary)]
enum Tag {
    Insert,
    Update,
    Delete,
    Reaction,
    Other(String),
}

#[derive(Debug, Arbitrary)]
enum Field {
    Text(String),
    Int(i64),
    Bool(bool),
    Null,
    Bytes(Vec<u8>),
}

fn tag_name(tag: Tag) -> String {
    match tag {
        Tag::Insert => "insert".into(),
        Tag::Update => "update".into(),
        Tag::Delete => "delete".into(),
        Tag::Reaction => "reaction".into(),
        Tag::Other(name) => name,
    }
}

fn field_value(field: Field) -> Value {
    match field {
        Field::Text(text) => Value::Text(text),
        Field::Int(n) => Value::Integer(n.into()),
        Field::Bool(b) => Value::Bool(b),
        Field::Null => Value::Null,
        Field::Bytes(bytes) => Value::Bytes(bytes),
    }
}

fn check(bytes: &[u8]) {
    let Ok(event) = StreamEvent::decode(bytes) else {
        return;
    };
    if let StreamEvent::Insert(message) = &event {
        assert!(message.id.server().is_some(), "insert decoded with local id");
    }
    let encoded = event.encode().expect("decoded event must re-encode");
    let again = StreamEvent::decode(&encoded).expect("re-encoded event must decode");
    assert_eq!(again, event);
}

fuzz_target!(|input: Input| {
    match input {
        Input::Raw(bytes) => check(&bytes),
        Input::Envelope { tag, fields } => {
            let payload = Value::Map(fields.into_iter().map(|(k, v)| (Value::Text(k), field_value(v))).collect());
            let envelope = Value::Map(vec![
                (Value::Text("type".into()), Value::Text(tag_name(tag))),
                (Value::Text("payload".into()), payload),
            ]);
            let mut bytes = Vec::new();
            if ciborium::ser::into_writer(&envelope, &mut bytes).is_ok() {
                check(&bytes);
            }
        },
    }
});
