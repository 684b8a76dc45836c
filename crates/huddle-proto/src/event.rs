//! Live-stream events.
//!
//! The stream collaborator delivers `{type, payload}` envelopes. Each tag maps
//! to exactly one payload shape; anything else is rejected at decode time so
//! the engine never guesses at an unknown event.
//!
//! # Wire format
//!
//! CBOR map `{ "type": text, "payload": any }`. The payload is decoded only
//! after the tag is matched, which lets an unknown tag be reported as such
//! instead of as a generic decode failure.

use ciborium::Value;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    errors::{ProtocolError, Result},
    ids::MessageId,
    message::{Message, Reaction},
};

/// Payload of an `update` event: the message body was edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEdit {
    /// Server id of the edited message.
    pub id: String,
    /// New body.
    pub text: String,
    /// Edit time in Unix milliseconds.
    pub edited_at: u64,
}

/// Payload of a `delete` event: the message was soft-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeletion {
    /// Server id of the deleted message.
    pub id: String,
    /// Deletion time in Unix milliseconds.
    pub deleted_at: u64,
}

/// Payload of a `reaction` event: the full reaction multiset after a toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionChange {
    /// Server id of the message.
    pub id: String,
    /// Authoritative reaction multiset.
    pub reactions: Vec<Reaction>,
}

/// Event delivered on a room's live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A message was persisted.
    Insert(Message),
    /// A message was edited.
    Update(MessageEdit),
    /// A message was soft-deleted.
    Delete(MessageDeletion),
    /// A message's reactions changed.
    Reaction(ReactionChange),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
    payload: Value,
}

impl StreamEvent {
    /// Wire tag of this event.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
            Self::Reaction(_) => "reaction",
        }
    }

    /// Id of the message the event targets.
    pub fn target(&self) -> MessageId {
        match self {
            Self::Insert(message) => message.id.clone(),
            Self::Update(edit) => MessageId::Server(edit.id.clone()),
            Self::Delete(deletion) => MessageId::Server(deletion.id.clone()),
            Self::Reaction(change) => MessageId::Server(change.id.clone()),
        }
    }

    /// Encode into a CBOR envelope.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Self::Insert(message) => Value::serialized(message),
            Self::Update(edit) => Value::serialized(edit),
            Self::Delete(deletion) => Value::serialized(deletion),
            Self::Reaction(change) => Value::serialized(change),
        }
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;

        let envelope = Envelope { tag: self.tag().to_string(), payload };
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&envelope, &mut buf)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode a CBOR envelope.
    ///
    /// # Errors
    ///
    /// - `Malformed` if the bytes are not an envelope
    /// - `UnknownEventType` if the tag is not one of the four known tags
    /// - `InvalidPayload` if the payload does not match the tag, or an insert
    ///   carries a local id
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope =
            ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        match envelope.tag.as_str() {
            "insert" => {
                let message: Message = decode_payload(&envelope.payload, "insert")?;
                if message.id.server().is_none() {
                    return Err(ProtocolError::InvalidPayload {
                        tag: "insert",
                        reason: format!("inserted message carries local id {}", message.id),
                    });
                }
                Ok(Self::Insert(message))
            },
            "update" => Ok(Self::Update(decode_payload(&envelope.payload, "update")?)),
            "delete" => Ok(Self::Delete(decode_payload(&envelope.payload, "delete")?)),
            "reaction" => Ok(Self::Reaction(decode_payload(&envelope.payload, "reaction")?)),
            _ => Err(ProtocolError::UnknownEventType(envelope.tag)),
        }
    }
}

fn decode_payload<T: DeserializeOwned>(value: &Value, tag: &'static str) -> Result<T> {
    value.deserialized().map_err(|e| ProtocolError::InvalidPayload { tag, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{RoomId, UserId};

    fn inserted() -> StreamEvent {
        StreamEvent::Insert(Message {
            id: MessageId::Server("m1".into()),
            room_id: RoomId::public("general").unwrap(),
            sender_id: UserId::new("alice").unwrap(),
            text: "hi".into(),
            created_at: 10,
            attachment: None,
            reactions: Vec::new(),
            edited_at: None,
            deleted_at: None,
        })
    }

    fn raw_envelope(tag: &str, payload: Value) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&Envelope { tag: tag.into(), payload }, &mut buf).unwrap();
        buf
    }

    #[test]
    fn insert_survives_encoding() {
        let event = inserted();
        let bytes = event.encode().unwrap();
        assert_eq!(StreamEvent::decode(&bytes).unwrap(), event);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let bytes = raw_envelope("typing", Value::Null);
        assert_eq!(
            StreamEvent::decode(&bytes),
            Err(ProtocolError::UnknownEventType("typing".into()))
        );
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let bytes = raw_envelope("delete", Value::Text("oops".into()));
        assert!(matches!(
            StreamEvent::decode(&bytes),
            Err(ProtocolError::InvalidPayload { tag: "delete", .. })
        ));
    }

    #[test]
    fn insert_with_local_id_is_rejected() {
        let StreamEvent::Insert(mut message) = inserted() else { unreachable!() };
        message.id = MessageId::Local(3);
        let bytes = raw_envelope("insert", Value::serialized(&message).unwrap());
        assert!(matches!(
            StreamEvent::decode(&bytes),
            Err(ProtocolError::InvalidPayload { tag: "insert", .. })
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(StreamEvent::decode(&[0xff, 0x00, 0x13]), Err(ProtocolError::Malformed(_))));
    }
}
