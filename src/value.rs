//! Runtime values for encoding/decoding (codec representation).
//!
//! A [`MessageValue`] is one instance of a compiled message type: a map from
//! field index to [`Value`], where a missing entry means "absent". Repeated
//! fields are always present (possibly empty).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::CodecError;
use crate::ir::{Label, ScalarType};
use crate::resolve::{FieldDescriptor, FieldKind, MessageDescriptor, MessageId, Schema};

/// A single field value (or list element).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    Bool(bool),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Enum value number.
    Enum(i32),
    Message(MessageValue),
    List(Vec<Value>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U32(x) => Some(*x as u64),
            Value::U64(x) => Some(*x),
            Value::I32(x) => (*x).try_into().ok(),
            Value::I64(x) => (*x).try_into().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(x) | Value::Enum(x) => Some(*x as i64),
            Value::I64(x) => Some(*x),
            Value::U32(x) => Some(*x as i64),
            Value::U64(x) => (*x).try_into().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(x) => Some(*x as f64),
            Value::F64(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessageValue> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// List of values, each converted with `Into<Value>`.
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::Bool(_) => "bool",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
            Value::Message(_) => "message",
            Value::List(_) => "list",
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v.into())
            }
        })*
    };
}

value_from! {
    i32 => I32,
    i64 => I64,
    u32 => U32,
    u64 => U64,
    bool => Bool,
    f32 => F32,
    f64 => F64,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
    &[u8] => Bytes,
    MessageValue => Message,
}

/// Field address for the extension view: by name or by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKey<'a> {
    Name(&'a str),
    Index(u32),
}

impl<'a> From<&'a str> for FieldKey<'a> {
    fn from(name: &'a str) -> Self {
        FieldKey::Name(name)
    }
}

impl From<u32> for FieldKey<'_> {
    fn from(index: u32) -> Self {
        FieldKey::Index(index)
    }
}

impl fmt::Display for FieldKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::Name(n) => f.write_str(n),
            FieldKey::Index(i) => write!(f, "#{}", i),
        }
    }
}

/// One instance of a compiled message type.
#[derive(Debug, Clone)]
pub struct MessageValue {
    schema: Arc<Schema>,
    id: MessageId,
    fields: BTreeMap<u32, Value>,
}

impl MessageValue {
    pub(crate) fn new(schema: Arc<Schema>, id: MessageId) -> Self {
        let fields = schema
            .message(id)
            .fields
            .iter()
            .filter(|f| f.label == Label::Repeated)
            .map(|f| (f.index, Value::List(Vec::new())))
            .collect();
        MessageValue { schema, id, fields }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        self.schema.message(self.id)
    }

    /// Flattened (underscore-joined) type name.
    pub fn type_name(&self) -> &str {
        &self.descriptor().fullname
    }

    fn field(&self, name: &str) -> Result<&FieldDescriptor, CodecError> {
        self.descriptor()
            .field(name)
            .ok_or_else(|| CodecError::UnknownField(format!("{}.{}", self.type_name(), name)))
    }

    /// Assign a field, converting `value` to the field's canonical variant.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), CodecError> {
        let field = self.field(name)?;
        let index = field.index;
        let value = coerce_field(&self.schema, field, value.into())?;
        self.fields.insert(index, value);
        Ok(())
    }

    /// Read a field. Absent optional and required fields are `FieldNotSet`.
    pub fn get(&self, name: &str) -> Result<&Value, CodecError> {
        let field = self.field(name)?;
        self.fields
            .get(&field.index)
            .ok_or_else(|| CodecError::FieldNotSet(format!("{}.{}", self.type_name(), name)))
    }

    pub fn has(&self, name: &str) -> bool {
        self.descriptor()
            .field(name)
            .map(|f| self.fields.contains_key(&f.index))
            .unwrap_or(false)
    }

    /// Make a field absent again. Repeated fields become empty.
    pub fn clear(&mut self, name: &str) -> Result<(), CodecError> {
        let field = self.field(name)?;
        let (index, repeated) = (field.index, field.label == Label::Repeated);
        if repeated {
            self.fields.insert(index, Value::List(Vec::new()));
        } else {
            self.fields.remove(&index);
        }
        Ok(())
    }

    /// The field's value, else its declared default, else the type's zero.
    pub fn get_or_default(&self, name: &str) -> Result<Value, CodecError> {
        let field = self.field(name)?;
        if let Some(v) = self.fields.get(&field.index) {
            return Ok(v.clone());
        }
        if let Some(d) = &field.default {
            return Ok(d.clone());
        }
        Ok(zero_value(&self.schema, field))
    }

    /// Empty instance of the message type of field `name`.
    pub fn new_child(&self, name: &str) -> Result<MessageValue, CodecError> {
        let field = self.field(name)?;
        match field.kind {
            FieldKind::Message(id) => Ok(MessageValue::new(self.schema.clone(), id)),
            _ => Err(CodecError::TypeMismatch {
                field: name.to_string(),
                expected: "message field".to_string(),
                found: field.type_name.clone(),
            }),
        }
    }

    /// Read view over the fields in this type's extension ranges.
    pub fn extensions(&self) -> Extensions<'_> {
        Extensions { message: self }
    }

    pub fn extensions_mut(&mut self) -> ExtensionsMut<'_> {
        ExtensionsMut { message: self }
    }

    /// Present fields in ascending index order.
    pub fn present(&self) -> impl Iterator<Item = (&FieldDescriptor, &Value)> {
        let descriptor = self.descriptor();
        self.fields
            .iter()
            .filter_map(move |(index, value)| descriptor.field_by_index(*index).map(|f| (f, value)))
    }

    pub(crate) fn raw(&self, index: u32) -> Option<&Value> {
        self.fields.get(&index)
    }

    pub(crate) fn insert_raw(&mut self, index: u32, value: Value) {
        self.fields.insert(index, value);
    }

    pub(crate) fn push_raw(&mut self, index: u32, value: Value) {
        match self.fields.entry(index).or_insert_with(|| Value::List(Vec::new())) {
            Value::List(items) => items.push(value),
            slot => *slot = Value::List(vec![value]),
        }
    }

    fn extension_name(&self, key: FieldKey<'_>) -> Result<String, CodecError> {
        let descriptor = self.descriptor();
        let name = match key {
            FieldKey::Name(n) => descriptor.extended.contains_key(n).then(|| n.to_string()),
            FieldKey::Index(i) => descriptor
                .extended
                .iter()
                .find(|(_, idx)| **idx == i)
                .map(|(n, _)| n.clone()),
        };
        name.ok_or_else(|| CodecError::NotExtension {
            message: descriptor.fullname.clone(),
            field: key.to_string(),
        })
    }
}

/// Same compiled schema instance, same message type, same field values.
impl PartialEq for MessageValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema) && self.id == other.id && self.fields == other.fields
    }
}

/// Dynamic access to extended fields. Keys outside every declared range fail.
pub struct Extensions<'a> {
    message: &'a MessageValue,
}

impl Extensions<'_> {
    pub fn get<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<&Value, CodecError> {
        let name = self.message.extension_name(key.into())?;
        self.message.get(&name)
    }

    pub fn has<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<bool, CodecError> {
        let name = self.message.extension_name(key.into())?;
        Ok(self.message.has(&name))
    }

    /// Extended field names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.message.descriptor().extended.keys().map(String::as_str)
    }
}

pub struct ExtensionsMut<'a> {
    message: &'a mut MessageValue,
}

impl ExtensionsMut<'_> {
    pub fn get<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<&Value, CodecError> {
        let name = self.message.extension_name(key.into())?;
        self.message.get(&name)
    }

    pub fn set<'k>(&mut self, key: impl Into<FieldKey<'k>>, value: impl Into<Value>) -> Result<(), CodecError> {
        let name = self.message.extension_name(key.into())?;
        self.message.set(&name, value)
    }

    pub fn clear<'k>(&mut self, key: impl Into<FieldKey<'k>>) -> Result<(), CodecError> {
        let name = self.message.extension_name(key.into())?;
        self.message.clear(&name)
    }
}

fn coerce_field(schema: &Arc<Schema>, field: &FieldDescriptor, value: Value) -> Result<Value, CodecError> {
    if field.label == Label::Repeated {
        return match value {
            Value::List(items) => items
                .into_iter()
                .map(|v| coerce_element(schema, field, v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            other => Err(mismatch(field, "list", &other)),
        };
    }
    coerce_element(schema, field, value)
}

/// Convert one element to the canonical variant for the field's kind.
pub(crate) fn coerce_element(schema: &Arc<Schema>, field: &FieldDescriptor, value: Value) -> Result<Value, CodecError> {
    let converted = match field.kind {
        FieldKind::Scalar(scalar) => coerce_scalar(scalar, &value),
        FieldKind::Enum(_) => match &value {
            Value::Enum(n) | Value::I32(n) => Some(Value::Enum(*n)),
            _ => None,
        },
        FieldKind::Message(id) => match &value {
            Value::Message(m) if m.id == id && Arc::ptr_eq(&m.schema, schema) => Some(value.clone()),
            _ => None,
        },
    };
    converted.ok_or_else(|| mismatch(field, &field.type_name, &value))
}

fn coerce_scalar(scalar: ScalarType, value: &Value) -> Option<Value> {
    if matches!(value, Value::Enum(_) | Value::List(_) | Value::Message(_)) {
        return None;
    }
    match scalar {
        ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32 => {
            value.as_i64().and_then(|v| i32::try_from(v).ok()).map(Value::I32)
        }
        ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64 => value.as_i64().map(Value::I64),
        ScalarType::UInt32 | ScalarType::Fixed32 => {
            value.as_u64().and_then(|v| u32::try_from(v).ok()).map(Value::U32)
        }
        ScalarType::UInt64 | ScalarType::Fixed64 => value.as_u64().map(Value::U64),
        ScalarType::Float => value.as_f64().map(|v| Value::F32(v as f32)),
        ScalarType::Double => value.as_f64().map(Value::F64),
        ScalarType::Bool => value.as_bool().map(Value::Bool),
        ScalarType::String => value.as_str().map(|s| Value::String(s.to_string())),
        ScalarType::Bytes => value.as_bytes().map(|b| Value::Bytes(b.to_vec())),
    }
}

fn mismatch(field: &FieldDescriptor, expected: &str, found: &Value) -> CodecError {
    CodecError::TypeMismatch {
        field: field.name.clone(),
        expected: expected.to_string(),
        found: found.kind_name().to_string(),
    }
}

/// Zero value of a field's type (what a reader sees for an absent field
/// without a declared default).
pub(crate) fn zero_value(schema: &Arc<Schema>, field: &FieldDescriptor) -> Value {
    if field.label == Label::Repeated {
        return Value::List(Vec::new());
    }
    match field.kind {
        FieldKind::Scalar(s) => match s {
            ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32 => Value::I32(0),
            ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64 => Value::I64(0),
            ScalarType::UInt32 | ScalarType::Fixed32 => Value::U32(0),
            ScalarType::UInt64 | ScalarType::Fixed64 => Value::U64(0),
            ScalarType::Float => Value::F32(0.0),
            ScalarType::Double => Value::F64(0.0),
            ScalarType::Bool => Value::Bool(false),
            ScalarType::String => Value::String(String::new()),
            ScalarType::Bytes => Value::Bytes(Vec::new()),
        },
        FieldKind::Enum(id) => Value::Enum(schema.enumeration(id).values.first().map(|v| v.number).unwrap_or(0)),
        FieldKind::Message(id) => Value::Message(MessageValue::new(schema.clone(), id)),
    }
}
