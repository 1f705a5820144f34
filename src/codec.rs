//! Encode/decode messages of a resolved [`Schema`] in the protobuf wire format.
//!
//! Fields are written in ascending index order. Repeated numeric, bool and
//! enum fields share one length-delimited payload unless declared
//! `[packed=false]`, which emits one tag per element. The decoder accepts both
//! framings for packable repeated fields, skips indices the schema does not
//! declare and rejects everything else that does not match the declared wire
//! class. Embedded messages nest at most [`Codec::recursion_limit`] deep.

use std::io::Cursor;
use std::sync::Arc;

use crate::ir::{Label, ScalarType, MAX_FIELD_INDEX};
use crate::resolve::{FieldDescriptor, FieldKind, MessageId, Schema};
use crate::trace::{DecodeTrace, NoTrace};
use crate::value::{MessageValue, Value};
use crate::wire::{
    decode_varint, encode_varint, make_tag, read_fixed32, read_fixed64, read_length_delimited, skip_value,
    split_tag, write_fixed32, write_fixed64, write_length_delimited, zigzag_decode32, zigzag_decode64,
    zigzag_encode32, zigzag_encode64, WireType,
};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unknown message: {0}")]
    UnknownMessage(String),
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Field not set: {0}")]
    FieldNotSet(String),
    #[error("{field} is not in an extension range of {message}")]
    NotExtension { message: String, field: String },
    #[error("Missing required field {message}.{field}")]
    MissingRequired { message: String, field: String },
    #[error("Type mismatch for {field}: expected {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },
    #[error("Truncated {0}")]
    Truncated(&'static str),
    #[error("Varint longer than 10 bytes")]
    VarintOverflow,
    #[error("Invalid tag {0:#x}")]
    InvalidTag(u64),
    #[error("Wire type mismatch for {message}.{field}: expected {expected}, got {found}")]
    WireTypeMismatch {
        message: String,
        field: String,
        expected: u8,
        found: u8,
    },
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(String),
    #[error("Messages nested deeper than {0}")]
    RecursionLimit(usize),
}

/// Default nesting depth of embedded messages accepted by the decoder.
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

/// Schema-driven codec. Cheap to clone; the schema is shared.
#[derive(Debug, Clone)]
pub struct Codec {
    schema: Arc<Schema>,
    recursion_limit: usize,
}

impl Codec {
    pub fn new(schema: Schema) -> Self {
        Self::from_shared(Arc::new(schema))
    }

    pub fn from_shared(schema: Arc<Schema>) -> Self {
        Codec {
            schema,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    /// Maximum number of embedded messages enclosing any decoded value.
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Empty instance of the named message (flattened or dotted name).
    pub fn message(&self, name: &str) -> Result<MessageValue, CodecError> {
        let id = self.message_id(name)?;
        Ok(MessageValue::new(self.schema.clone(), id))
    }

    fn message_id(&self, name: &str) -> Result<MessageId, CodecError> {
        self.schema
            .message_id(name)
            .ok_or_else(|| CodecError::UnknownMessage(name.to_string()))
    }

    /// Encode a message. Every required field must be set.
    pub fn encode(&self, message: &MessageValue) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        self.encode_into(message, &mut out)?;
        Ok(out)
    }

    /// Append the encoding of `message` to `out`. On error `out` is left as it was.
    pub fn encode_into(&self, message: &MessageValue, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let mut body = Vec::new();
        encode_message(message, &mut body)?;
        out.extend_from_slice(&body);
        Ok(())
    }

    /// Decode one message by name. Any malformed input fails the whole decode.
    pub fn decode(&self, name: &str, bytes: &[u8]) -> Result<MessageValue, CodecError> {
        self.decode_traced(name, bytes, &mut NoTrace)
    }

    /// Decode, reporting structural events to `trace` when the schema has
    /// `option debug = true;`.
    pub fn decode_traced(
        &self,
        name: &str,
        bytes: &[u8],
        trace: &mut dyn DecodeTrace,
    ) -> Result<MessageValue, CodecError> {
        let id = self.message_id(name)?;
        let mut silent = NoTrace;
        let sink: &mut dyn DecodeTrace = if self.schema.debug() { trace } else { &mut silent };
        let mut decoder = Decoder {
            schema: &self.schema,
            trace: sink,
            depth: 0,
            limit: self.recursion_limit,
        };
        decoder.decode_message(id, bytes)
    }
}

fn encode_message(message: &MessageValue, out: &mut Vec<u8>) -> Result<(), CodecError> {
    let descriptor = message.descriptor();
    for field in &descriptor.fields {
        match message.raw(field.index) {
            Some(value) => encode_field(field, value, out)?,
            None if field.label == Label::Required => {
                return Err(CodecError::MissingRequired {
                    message: descriptor.fullname.clone(),
                    field: field.name.clone(),
                })
            }
            None => {}
        }
    }
    Ok(())
}

fn encode_field(field: &FieldDescriptor, value: &Value, out: &mut Vec<u8>) -> Result<(), CodecError> {
    if !field.is_repeated() {
        encode_varint(out, make_tag(field.index, field.element_wire_type()));
        return encode_element(field, value, out);
    }
    let items = value.as_list().ok_or_else(|| CodecError::TypeMismatch {
        field: field.name.clone(),
        expected: "list".to_string(),
        found: value.kind_name().to_string(),
    })?;
    if field.packed {
        if items.is_empty() {
            return Ok(());
        }
        let mut payload = Vec::new();
        for item in items {
            encode_element(field, item, &mut payload)?;
        }
        encode_varint(out, make_tag(field.index, WireType::LengthDelimited));
        write_length_delimited(out, &payload);
        return Ok(());
    }
    for item in items {
        encode_varint(out, make_tag(field.index, field.element_wire_type()));
        encode_element(field, item, out)?;
    }
    Ok(())
}

/// One value without its tag.
fn encode_element(field: &FieldDescriptor, value: &Value, out: &mut Vec<u8>) -> Result<(), CodecError> {
    match (field.kind, value) {
        (FieldKind::Scalar(scalar), value) => encode_scalar(field, scalar, value, out),
        (FieldKind::Enum(_), Value::Enum(n)) => {
            encode_varint(out, *n as i64 as u64);
            Ok(())
        }
        (FieldKind::Message(_), Value::Message(m)) => {
            let mut payload = Vec::new();
            encode_message(m, &mut payload)?;
            write_length_delimited(out, &payload);
            Ok(())
        }
        (_, other) => Err(mismatch(field, other)),
    }
}

fn encode_scalar(field: &FieldDescriptor, scalar: ScalarType, value: &Value, out: &mut Vec<u8>) -> Result<(), CodecError> {
    match (scalar, value) {
        // Negative int32 values are sign-extended to ten bytes.
        (ScalarType::Int32, Value::I32(v)) => encode_varint(out, *v as i64 as u64),
        (ScalarType::Int64, Value::I64(v)) => encode_varint(out, *v as u64),
        (ScalarType::UInt32, Value::U32(v)) => encode_varint(out, u64::from(*v)),
        (ScalarType::UInt64, Value::U64(v)) => encode_varint(out, *v),
        (ScalarType::SInt32, Value::I32(v)) => encode_varint(out, u64::from(zigzag_encode32(*v))),
        (ScalarType::SInt64, Value::I64(v)) => encode_varint(out, zigzag_encode64(*v)),
        (ScalarType::Bool, Value::Bool(b)) => encode_varint(out, u64::from(*b)),
        (ScalarType::Fixed32, Value::U32(v)) => write_fixed32(out, *v),
        (ScalarType::SFixed32, Value::I32(v)) => write_fixed32(out, *v as u32),
        (ScalarType::Float, Value::F32(v)) => write_fixed32(out, v.to_bits()),
        (ScalarType::Fixed64, Value::U64(v)) => write_fixed64(out, *v),
        (ScalarType::SFixed64, Value::I64(v)) => write_fixed64(out, *v as u64),
        (ScalarType::Double, Value::F64(v)) => write_fixed64(out, v.to_bits()),
        (ScalarType::String, Value::String(s)) => write_length_delimited(out, s.as_bytes()),
        (ScalarType::Bytes, Value::Bytes(b)) => write_length_delimited(out, b),
        (_, other) => return Err(mismatch(field, other)),
    }
    Ok(())
}

fn mismatch(field: &FieldDescriptor, found: &Value) -> CodecError {
    CodecError::TypeMismatch {
        field: field.name.clone(),
        expected: field.type_name.clone(),
        found: found.kind_name().to_string(),
    }
}

struct Decoder<'a> {
    schema: &'a Arc<Schema>,
    trace: &'a mut dyn DecodeTrace,
    /// Embedded messages currently open.
    depth: usize,
    limit: usize,
}

impl Decoder<'_> {
    fn decode_message(&mut self, id: MessageId, bytes: &[u8]) -> Result<MessageValue, CodecError> {
        let schema = self.schema;
        let descriptor = schema.message(id);
        let mut message = MessageValue::new(schema.clone(), id);
        self.trace.enter(&descriptor.fullname);
        let mut r = Cursor::new(bytes);
        while (r.position() as usize) < bytes.len() {
            let start = r.position() as usize;
            let tag = decode_varint(&mut r)?;
            self.trace.tag(&bytes[start..r.position() as usize]);
            let (index, wire) = split_tag(tag);
            if index == 0 || index > u64::from(MAX_FIELD_INDEX) {
                return Err(CodecError::InvalidTag(tag));
            }
            let wire_type = WireType::try_from(wire).map_err(|_| CodecError::InvalidTag(tag))?;
            let Some(field) = descriptor.field_by_index(index as u32) else {
                tracing::trace!(message = %descriptor.fullname, index, "skipping undeclared field");
                skip_value(&mut r, wire_type)?;
                continue;
            };
            self.trace.field(&field.name);
            if field.is_packable() && wire_type == WireType::LengthDelimited {
                for value in self.decode_packed(field, &mut r)? {
                    message.push_raw(field.index, value);
                }
                continue;
            }
            if wire_type != field.element_wire_type() {
                return Err(CodecError::WireTypeMismatch {
                    message: descriptor.fullname.clone(),
                    field: field.name.clone(),
                    expected: field.element_wire_type().as_u8(),
                    found: wire,
                });
            }
            let value = self.decode_element(field, &mut r)?;
            if field.is_repeated() {
                message.push_raw(field.index, value);
            } else {
                message.insert_raw(field.index, value);
            }
        }
        self.trace.exit(&descriptor.fullname);
        Ok(message)
    }

    fn decode_embedded(&mut self, id: MessageId, payload: &[u8]) -> Result<Value, CodecError> {
        if self.depth >= self.limit {
            return Err(CodecError::RecursionLimit(self.limit));
        }
        self.depth += 1;
        let message = self.decode_message(id, payload)?;
        self.depth -= 1;
        Ok(Value::Message(message))
    }

    fn decode_packed(&mut self, field: &FieldDescriptor, r: &mut Cursor<&[u8]>) -> Result<Vec<Value>, CodecError> {
        let payload = self.read_sized(r)?;
        let mut inner = Cursor::new(payload);
        let mut values = Vec::new();
        while (inner.position() as usize) < payload.len() {
            values.push(self.decode_element(field, &mut inner)?);
        }
        Ok(values)
    }

    /// Read a length-delimited payload, reporting its size prefix.
    fn read_sized<'b>(&mut self, r: &mut Cursor<&'b [u8]>) -> Result<&'b [u8], CodecError> {
        let bytes: &'b [u8] = *r.get_ref();
        let start = r.position() as usize;
        let payload = read_length_delimited(r)?;
        let prefix_end = r.position() as usize - payload.len();
        self.trace.size(&bytes[start..prefix_end]);
        Ok(payload)
    }

    /// One element of `field`'s type, read with its element wire class.
    fn decode_element(&mut self, field: &FieldDescriptor, r: &mut Cursor<&[u8]>) -> Result<Value, CodecError> {
        let bytes: &[u8] = *r.get_ref();
        let start = r.position() as usize;
        let value = match field.element_wire_type() {
            WireType::Varint => {
                let raw = decode_varint(r)?;
                match field.kind {
                    FieldKind::Scalar(s) => from_varint(s, raw),
                    FieldKind::Enum(_) => Value::Enum(raw as i32),
                    FieldKind::Message(_) => return Err(CodecError::InvalidTag(raw)),
                }
            }
            WireType::Fixed32 => {
                let raw = read_fixed32(r)?;
                match field.kind {
                    FieldKind::Scalar(ScalarType::Float) => Value::F32(f32::from_bits(raw)),
                    FieldKind::Scalar(ScalarType::SFixed32) => Value::I32(raw as i32),
                    _ => Value::U32(raw),
                }
            }
            WireType::Fixed64 => {
                let raw = read_fixed64(r)?;
                match field.kind {
                    FieldKind::Scalar(ScalarType::Double) => Value::F64(f64::from_bits(raw)),
                    FieldKind::Scalar(ScalarType::SFixed64) => Value::I64(raw as i64),
                    _ => Value::U64(raw),
                }
            }
            WireType::LengthDelimited => {
                let payload = self.read_sized(r)?;
                return match field.kind {
                    FieldKind::Message(id) => self.decode_embedded(id, payload),
                    FieldKind::Scalar(ScalarType::String) => {
                        self.trace.scalar(&field.type_name, payload);
                        String::from_utf8(payload.to_vec())
                            .map(Value::String)
                            .map_err(|_| CodecError::InvalidUtf8(field.name.clone()))
                    }
                    _ => {
                        self.trace.scalar(&field.type_name, payload);
                        Ok(Value::Bytes(payload.to_vec()))
                    }
                };
            }
        };
        self.trace.scalar(&field.type_name, &bytes[start..r.position() as usize]);
        Ok(value)
    }
}

/// Varint payload reinterpreted as the reading field's type. Narrowing keeps
/// the low bits, so an unsigned 2^31 read as int32 is -2^31.
fn from_varint(scalar: ScalarType, raw: u64) -> Value {
    match scalar {
        ScalarType::Int32 => Value::I32(raw as i32),
        ScalarType::Int64 => Value::I64(raw as i64),
        ScalarType::UInt32 => Value::U32(raw as u32),
        ScalarType::SInt32 => Value::I32(zigzag_decode32(raw as u32)),
        ScalarType::SInt64 => Value::I64(zigzag_decode64(raw)),
        ScalarType::Bool => Value::Bool(raw != 0),
        _ => Value::U64(raw),
    }
}
