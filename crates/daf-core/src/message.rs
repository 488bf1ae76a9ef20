//! Message model
//!
//! A `Message` is a tagged value bag: identity, sender, recipient (a queue
//! name), a wire kind, and an ordered key→value payload. Two identities are
//! reserved for the remote dequeue protocol: `REMOVE_MSG` asks the owning
//! node to pop one message from a queue, and `RETURN_MSG` carries the popped
//! message back under the `"message"` key.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Identity of a remote dequeue request.
pub const REMOVE_MSG: &str = "REMOVE_MSG";

/// Identity of the reply to a remote dequeue request.
pub const RETURN_MSG: &str = "RETURN_MSG";

/// Key under which a `RETURN_MSG` carries the dequeued message.
pub const RETURN_VALUE_KEY: &str = "message";

// ----------------------------------------------------------------------------
// Message Kind
// ----------------------------------------------------------------------------

/// Wire encoding selected for a message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Uncompressed = 0x00,
    Compressed = 0x01,
}

impl MessageKind {
    /// Wire tag for this kind
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(MessageKind::Uncompressed),
            0x01 => Some(MessageKind::Compressed),
            _ => None,
        }
    }
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Uncompressed
    }
}

// ----------------------------------------------------------------------------
// Message Values
// ----------------------------------------------------------------------------

/// A single payload value
///
/// The closed set keeps the wire format self-describing. `Message` nests a
/// whole message and exists for the remove/return protocol, but is available
/// to application payloads as well.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageValue {
    Str(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Message(Box<Message>),
}

impl MessageValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MessageValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MessageValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MessageValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            MessageValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MessageValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            MessageValue::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Unwrap a nested message, consuming the value
    pub fn into_message(self) -> Option<Message> {
        match self {
            MessageValue::Message(m) => Some(*m),
            _ => None,
        }
    }
}

impl From<&str> for MessageValue {
    fn from(value: &str) -> Self {
        MessageValue::Str(value.to_string())
    }
}

impl From<String> for MessageValue {
    fn from(value: String) -> Self {
        MessageValue::Str(value)
    }
}

impl From<Vec<u8>> for MessageValue {
    fn from(value: Vec<u8>) -> Self {
        MessageValue::Bytes(value)
    }
}

impl From<i64> for MessageValue {
    fn from(value: i64) -> Self {
        MessageValue::Int(value)
    }
}

impl From<f64> for MessageValue {
    fn from(value: f64) -> Self {
        MessageValue::Float(value)
    }
}

impl From<bool> for MessageValue {
    fn from(value: bool) -> Self {
        MessageValue::Bool(value)
    }
}

impl From<Message> for MessageValue {
    fn from(value: Message) -> Self {
        MessageValue::Message(Box::new(value))
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// A typed, ordered value-bag message
///
/// Values keep insertion order; setting an existing key replaces the value in
/// place. Most payloads carry only a handful of entries, so the map lives in
/// a `SmallVec`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: String,
    sender: String,
    recipient: String,
    kind: MessageKind,
    values: SmallVec<[(String, MessageValue); 4]>,
}

impl Message {
    /// Create an empty message with the given identity and kind
    pub fn new(id: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            id: id.into(),
            sender: String::new(),
            recipient: String::new(),
            kind,
            values: SmallVec::new(),
        }
    }

    /// Build a remote dequeue request for `to_queue` on behalf of `from_task`
    pub fn remove_request(from_task: &str, to_queue: &str) -> Self {
        let mut msg = Message::new(REMOVE_MSG, MessageKind::Uncompressed);
        msg.set_sender(from_task);
        msg.set_recipient(to_queue);
        msg
    }

    /// Build the reply to a dequeue request, wrapping the popped message
    ///
    /// Sender and recipient are swapped relative to the request: the reply is
    /// addressed to the requesting task, "from" the queue it asked about.
    pub fn return_reply(request: &Message, payload: Message) -> Self {
        let mut msg = Message::new(RETURN_MSG, MessageKind::Uncompressed);
        msg.set_sender(request.recipient());
        msg.set_recipient(request.sender());
        msg.set_value(RETURN_VALUE_KEY, payload);
        msg
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn set_sender(&mut self, sender: impl Into<String>) {
        self.sender = sender.into();
    }

    pub fn set_recipient(&mut self, recipient: impl Into<String>) {
        self.recipient = recipient.into();
    }

    pub fn is_remove(&self) -> bool {
        self.id == REMOVE_MSG
    }

    pub fn is_return(&self) -> bool {
        self.id == RETURN_MSG
    }

    /// Set a value, replacing in place if the key already exists
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<MessageValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.values.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.values.push((key, value));
        }
    }

    pub fn value(&self, key: &str) -> Option<&MessageValue> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Remove and return a value, preserving the order of the rest
    pub fn take_value(&mut self, key: &str) -> Option<MessageValue> {
        let idx = self.values.iter().position(|(k, _)| k == key)?;
        Some(self.values.remove(idx).1)
    }

    /// Values in insertion order
    pub fn values(&self) -> impl Iterator<Item = (&str, &MessageValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn push_value_unchecked(&mut self, key: String, value: MessageValue) {
        self.values.push((key, value));
    }
}

// ----------------------------------------------------------------------------
// Message Factory
// ----------------------------------------------------------------------------

/// Per-node factory for application messages
///
/// Stamps a fresh v4 UUID identity and the node's configured default wire
/// kind. Sender and recipient are left blank; ports fill them in on send.
#[derive(Debug, Clone)]
pub struct MessageFactory {
    default_kind: MessageKind,
}

impl MessageFactory {
    pub fn new(default_kind: MessageKind) -> Self {
        Self { default_kind }
    }

    /// Create a message with the node's default kind
    pub fn create(&self) -> Message {
        self.create_with_kind(self.default_kind)
    }

    pub fn create_with_kind(&self, kind: MessageKind) -> Message {
        Message::new(uuid::Uuid::new_v4().to_string(), kind)
    }

    pub fn default_kind(&self) -> MessageKind {
        self.default_kind
    }
}
