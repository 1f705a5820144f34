//! Opt-in decode tracing.
//!
//! When a schema sets `option debug = true;`, [`Codec::decode_traced`](crate::Codec::decode_traced)
//! reports each structural step of the decode to a [`DecodeTrace`]. Raw byte
//! slices are the exact input bytes consumed for that step.

use std::fmt;

/// Receives decode events in input order.
pub trait DecodeTrace {
    /// A message body starts (`name` is the flattened type name).
    fn enter(&mut self, name: &str);
    /// Raw bytes of a field tag.
    fn tag(&mut self, raw: &[u8]);
    /// The tag matched a declared field.
    fn field(&mut self, name: &str);
    /// Raw bytes of a length prefix.
    fn size(&mut self, raw: &[u8]);
    /// Raw bytes of one decoded value.
    fn scalar(&mut self, type_name: &str, raw: &[u8]);
    fn exit(&mut self, name: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Enter(String),
    Tag(Vec<u8>),
    Field(String),
    Size(Vec<u8>),
    Scalar(String, Vec<u8>),
    Exit(String),
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Enter(name) => write!(f, "enter {}", name),
            TraceEvent::Tag(raw) => write!(f, "tag {}", hex(raw)),
            TraceEvent::Field(name) => write!(f, "field {}", name),
            TraceEvent::Size(raw) => write!(f, "size {}", hex(raw)),
            TraceEvent::Scalar(ty, raw) => write!(f, "{} {}", ty, hex(raw)),
            TraceEvent::Exit(name) => write!(f, "exit {}", name),
        }
    }
}

/// Upper-case, space separated hex (`08 96 01`).
pub fn hex(raw: &[u8]) -> String {
    raw.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

/// Records every event.
#[derive(Debug, Default, Clone)]
pub struct TraceLog {
    pub events: Vec<TraceEvent>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// One line per event.
    pub fn lines(&self) -> Vec<String> {
        self.events.iter().map(ToString::to_string).collect()
    }
}

impl DecodeTrace for TraceLog {
    fn enter(&mut self, name: &str) {
        self.events.push(TraceEvent::Enter(name.to_string()));
    }

    fn tag(&mut self, raw: &[u8]) {
        self.events.push(TraceEvent::Tag(raw.to_vec()));
    }

    fn field(&mut self, name: &str) {
        self.events.push(TraceEvent::Field(name.to_string()));
    }

    fn size(&mut self, raw: &[u8]) {
        self.events.push(TraceEvent::Size(raw.to_vec()));
    }

    fn scalar(&mut self, type_name: &str, raw: &[u8]) {
        self.events.push(TraceEvent::Scalar(type_name.to_string(), raw.to_vec()));
    }

    fn exit(&mut self, name: &str) {
        self.events.push(TraceEvent::Exit(name.to_string()));
    }
}

/// Discards everything; used when the schema does not enable tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrace;

impl DecodeTrace for NoTrace {
    fn enter(&mut self, _name: &str) {}
    fn tag(&mut self, _raw: &[u8]) {}
    fn field(&mut self, _name: &str) {}
    fn size(&mut self, _raw: &[u8]) {}
    fn scalar(&mut self, _type_name: &str, _raw: &[u8]) {}
    fn exit(&mut self, _name: &str) {}
}
