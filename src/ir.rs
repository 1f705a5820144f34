//! Semantic IR for schemas: protocols, messages, fields, enums, extension
//! ranges, properties and services.
//!
//! Nodes are produced by the builders in [`crate::builder`] and are immutable
//! once built. Cross-type references stay symbolic ([`TypeRef`]) here and are
//! turned into stable handles by [`crate::resolve`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;

use crate::error::CompileError;
use crate::wire::WireType;

/// Largest field index the wire format can carry (29 bits).
pub const MAX_FIELD_INDEX: u32 = (1 << 29) - 1;

/// What to do when a compound declares the same name twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Keep the later declaration and log a warning.
    #[default]
    Warn,
    /// Fail the compilation.
    Error,
}

impl DuplicatePolicy {
    pub(crate) fn admit(
        self,
        kind: &'static str,
        name: &str,
        container: &str,
    ) -> Result<(), CompileError> {
        match self {
            DuplicatePolicy::Warn => {
                tracing::warn!(kind, name, container, "duplicate declaration overwrites the earlier one");
                Ok(())
            }
            DuplicatePolicy::Error => Err(CompileError::Duplicate {
                kind,
                name: name.to_string(),
                container: container.to_string(),
            }),
        }
    }
}

/// Field cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Required,
    Optional,
    Repeated,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Required => "required",
            Label::Optional => "optional",
            Label::Repeated => "repeated",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "required" => Some(Label::Required),
            "optional" => Some(Label::Optional),
            "repeated" => Some(Label::Repeated),
            _ => None,
        }
    }
}

/// Primitive field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    pub fn from_keyword(s: &str) -> Option<Self> {
        Some(match s {
            "double" => ScalarType::Double,
            "float" => ScalarType::Float,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "uint32" => ScalarType::UInt32,
            "uint64" => ScalarType::UInt64,
            "sint32" => ScalarType::SInt32,
            "sint64" => ScalarType::SInt64,
            "fixed32" => ScalarType::Fixed32,
            "fixed64" => ScalarType::Fixed64,
            "sfixed32" => ScalarType::SFixed32,
            "sfixed64" => ScalarType::SFixed64,
            "bool" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::UInt32 => "uint32",
            ScalarType::UInt64 => "uint64",
            ScalarType::SInt32 => "sint32",
            ScalarType::SInt64 => "sint64",
            ScalarType::Fixed32 => "fixed32",
            ScalarType::Fixed64 => "fixed64",
            ScalarType::SFixed32 => "sfixed32",
            ScalarType::SFixed64 => "sfixed64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
        }
    }

    /// Wire class of a single value of this type.
    pub fn wire_type(self) -> WireType {
        match self {
            ScalarType::Int32
            | ScalarType::Int64
            | ScalarType::UInt32
            | ScalarType::UInt64
            | ScalarType::SInt32
            | ScalarType::SInt64
            | ScalarType::Bool => WireType::Varint,
            ScalarType::Fixed64 | ScalarType::SFixed64 | ScalarType::Double => WireType::Fixed64,
            ScalarType::String | ScalarType::Bytes => WireType::LengthDelimited,
            ScalarType::Fixed32 | ScalarType::SFixed32 | ScalarType::Float => WireType::Fixed32,
        }
    }

    /// Whether repeated fields of this type may use packed framing.
    pub fn is_packable(self) -> bool {
        self.wire_type() != WireType::LengthDelimited
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A possibly-dotted reference to a message or enum, as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// Written with a leading `.`: resolved from the root only.
    pub absolute: bool,
    pub segments: Vec<String>,
}

impl TypeRef {
    pub fn new(path: &str) -> Self {
        let absolute = path.starts_with('.');
        TypeRef {
            absolute,
            segments: path
                .trim_start_matches('.')
                .split('.')
                .map(str::to_string)
                .collect(),
        }
    }

    /// Underscore-joined flat name (`Outer.Inner` -> `Outer_Inner`).
    pub fn joined(&self) -> String {
        self.segments.join("_")
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str(".")?;
        }
        f.write_str(&self.segments.join("."))
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Scalar(ScalarType),
    Named(TypeRef),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(s) => s.fmt(f),
            FieldType::Named(r) => r.fmt(f),
        }
    }
}

/// Constant as written in the schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    /// Non-negative literal above `i64::MAX`.
    UInt(u64),
    Float(f64),
    Bool(bool),
    String(String),
    /// Bare identifier, e.g. an enum value name used as a default.
    Ident(String),
}

impl Literal {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Literal::Int(i) => (*i).try_into().ok(),
            Literal::UInt(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Literal::Int(i) => Some(*i),
            Literal::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Float(x) => Some(*x),
            Literal::Int(i) => Some(*i as f64),
            Literal::UInt(u) => Some(*u as f64),
            Literal::Ident(s) if s == "inf" => Some(f64::INFINITY),
            Literal::Ident(s) if s == "nan" => Some(f64::NAN),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) | Literal::Ident(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(i) => write!(f, "{}", i),
            Literal::UInt(u) => write!(f, "{}", u),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::Ident(s) => f.write_str(s),
        }
    }
}

/// Bracketed field options. `default` and `packed` are interpreted; anything
/// else is carried for renderers. `packed` is `None` when not written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldOptions {
    pub default: Option<Literal>,
    pub packed: Option<bool>,
    pub other: BTreeMap<String, Literal>,
}

impl FieldOptions {
    pub fn from_pairs(
        field: &str,
        pairs: impl IntoIterator<Item = (String, Literal)>,
    ) -> Result<Self, CompileError> {
        let mut options = FieldOptions::default();
        for (key, value) in pairs {
            match key.as_str() {
                "default" => options.default = Some(value),
                "packed" => {
                    options.packed = Some(value.as_bool().ok_or_else(|| CompileError::InvalidOption {
                        field: field.to_string(),
                        option: key.clone(),
                        reason: format!("expected true or false, got {}", value),
                    })?);
                }
                _ => {
                    options.other.insert(key, value);
                }
            }
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub index: u32,
    pub name: String,
    pub ty: FieldType,
    pub label: Label,
    pub options: FieldOptions,
}

/// Upper bound of an extension range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionEnd {
    Index(u32),
    /// Open-ended: the highest declared field index at resolution time.
    Max,
}

/// `extensions start [to end];`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extension {
    pub start: u32,
    pub end: ExtensionEnd,
}

impl Extension {
    pub fn single(index: u32) -> Self {
        Extension {
            start: index,
            end: ExtensionEnd::Index(index),
        }
    }

    /// Concrete indices covered, closing an open end at `max_index`.
    pub fn range(&self, max_index: u32) -> RangeInclusive<u32> {
        let end = match self.end {
            ExtensionEnd::Index(end) => end,
            ExtensionEnd::Max => max_index,
        };
        self.start..=end
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            ExtensionEnd::Index(end) if end == self.start => write!(f, "{}", self.start),
            ExtensionEnd::Index(end) => write!(f, "{} to {}", self.start, end),
            ExtensionEnd::Max => write!(f, "{} to max", self.start),
        }
    }
}

/// Extension ranges of a message with open ends closed, and the fields they cover.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledExtensions {
    pub ranges: Vec<RangeInclusive<u32>>,
    /// Covered field name to index.
    pub extended: BTreeMap<String, u32>,
}

impl CompiledExtensions {
    pub fn contains(&self, index: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(&index))
    }
}

/// Fields whose index lies in the union of `ranges`, keyed by name.
/// Open ranges end at the highest index among `fields`.
pub fn compile_extensions<'a, I>(ranges: &[Extension], fields: I) -> CompiledExtensions
where
    I: IntoIterator<Item = (&'a str, u32)>,
{
    let fields: Vec<(&str, u32)> = fields.into_iter().collect();
    let max_index = fields.iter().map(|(_, index)| *index).max().unwrap_or(0);
    let mut compiled = CompiledExtensions {
        ranges: ranges.iter().map(|r| r.range(max_index)).collect(),
        extended: BTreeMap::new(),
    };
    for (name, index) in fields {
        if compiled.contains(index) {
            compiled.extended.insert(name.to_string(), index);
        }
    }
    compiled
}

/// `option a.b.c = value;`
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub path: Vec<String>,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Value(Literal),
    Record(Properties),
}

/// Nested property record. Multi-segment paths create intermediate records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: BTreeMap<String, PropertyValue>,
}

impl Properties {
    pub fn set(&mut self, path: &[String], value: Literal) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };
        if rest.is_empty() {
            self.entries.insert(first.clone(), PropertyValue::Value(value));
            return;
        }
        let slot = self
            .entries
            .entry(first.clone())
            .or_insert_with(|| PropertyValue::Record(Properties::default()));
        if let PropertyValue::Value(old) = slot {
            tracing::warn!(property = %first, old = %old, "property value replaced by a nested record");
            *slot = PropertyValue::Record(Properties::default());
        }
        if let PropertyValue::Record(inner) = slot {
            inner.set(rest, value);
        }
    }

    /// Look up a dotted path.
    pub fn get(&self, path: &str) -> Option<&PropertyValue> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.entries.get(first)?;
        for segment in segments {
            match current {
                PropertyValue::Record(r) => current = r.entries.get(segment)?,
                PropertyValue::Value(_) => return None,
            }
        }
        Some(current)
    }

    pub fn value(&self, path: &str) -> Option<&Literal> {
        match self.get(path)? {
            PropertyValue::Value(v) => Some(v),
            PropertyValue::Record(_) => None,
        }
    }

    /// True only for a boolean `true` at `path`.
    pub fn flag(&self, path: &str) -> bool {
        self.value(path).and_then(Literal::as_bool).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub name: String,
    pub number: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enum {
    pub name: String,
    pub values: Vec<EnumValue>,
    pub properties: Properties,
}

impl Enum {
    pub fn value(&self, name: &str) -> Option<&EnumValue> {
        self.values.iter().find(|v| v.name == name)
    }
}

/// `extend Target { fields }`
#[derive(Debug, Clone, PartialEq)]
pub struct Extend {
    pub target: TypeRef,
    pub fields: Vec<Field>,
}

/// Messages and enums declared directly inside a protocol or message.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    messages: HashMap<String, Message>,
    message_order: Vec<String>,
    enums: HashMap<String, Enum>,
    enum_order: Vec<String>,
}

impl Namespace {
    pub fn message(&self, name: &str) -> Option<&Message> {
        self.messages.get(name)
    }

    pub fn enum_type(&self, name: &str) -> Option<&Enum> {
        self.enums.get(name)
    }

    /// Messages in declaration order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.message_order.iter().filter_map(|n| self.messages.get(n))
    }

    pub fn enums(&self) -> impl Iterator<Item = &Enum> {
        self.enum_order.iter().filter_map(|n| self.enums.get(n))
    }

    pub fn message_names(&self) -> &[String] {
        &self.message_order
    }

    pub(crate) fn insert_message(
        &mut self,
        message: Message,
        policy: DuplicatePolicy,
        container: &str,
    ) -> Result<(), CompileError> {
        if self.messages.contains_key(&message.name) {
            policy.admit("message", &message.name, container)?;
        } else {
            self.message_order.push(message.name.clone());
        }
        self.messages.insert(message.name.clone(), message);
        Ok(())
    }

    pub(crate) fn insert_enum(
        &mut self,
        en: Enum,
        policy: DuplicatePolicy,
        container: &str,
    ) -> Result<(), CompileError> {
        if self.enums.contains_key(&en.name) {
            policy.admit("enum", &en.name, container)?;
        } else {
            self.enum_order.push(en.name.clone());
        }
        self.enums.insert(en.name.clone(), en);
        Ok(())
    }

    /// Flatten `other` into this namespace (imports).
    pub(crate) fn merge(
        &mut self,
        other: Namespace,
        policy: DuplicatePolicy,
        container: &str,
    ) -> Result<(), CompileError> {
        let Namespace {
            mut messages,
            message_order,
            mut enums,
            enum_order,
        } = other;
        for name in message_order {
            if let Some(m) = messages.remove(&name) {
                self.insert_message(m, policy, container)?;
            }
        }
        for name in enum_order {
            if let Some(e) = enums.remove(&name) {
                self.insert_enum(e, policy, container)?;
            }
        }
        Ok(())
    }

    /// Root-anchored dotted lookup. An enum in the middle of the path, or any
    /// missing segment, yields `None`.
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Option<Entity<'_>> {
        let (first, rest) = path.split_first()?;
        let first = first.as_ref();
        if let Some(message) = self.messages.get(first) {
            if rest.is_empty() {
                return Some(Entity::Message(message));
            }
            return message.nested.find(rest);
        }
        match self.enums.get(first) {
            Some(en) if rest.is_empty() => Some(Entity::Enum(en)),
            _ => None,
        }
    }
}

/// A named type reachable by lookup.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Message(&'a Message),
    Enum(&'a Enum),
}

impl Entity<'_> {
    pub fn wire_type(&self) -> WireType {
        match self {
            Entity::Message(_) => WireType::LengthDelimited,
            Entity::Enum(_) => WireType::Varint,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entity::Message(m) => &m.name,
            Entity::Enum(e) => &e.name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub name: String,
    /// Verbatim declaration text.
    pub doc: String,
    /// Declared fields sorted by index.
    pub fields: Vec<Field>,
    pub nested: Namespace,
    pub extensions: Vec<Extension>,
    pub extends: Vec<Extend>,
    pub properties: Properties,
    by_name: HashMap<String, usize>,
    by_index: HashMap<u32, usize>,
}

impl Message {
    /// Sorts `fields` by index and indexes them. Callers guarantee unique
    /// names and indices.
    pub(crate) fn new(
        name: String,
        doc: String,
        mut fields: Vec<Field>,
        nested: Namespace,
        extensions: Vec<Extension>,
        extends: Vec<Extend>,
        properties: Properties,
    ) -> Self {
        fields.sort_by_key(|f| f.index);
        let by_name = fields.iter().enumerate().map(|(i, f)| (f.name.clone(), i)).collect();
        let by_index = fields.iter().enumerate().map(|(i, f)| (f.index, i)).collect();
        Message {
            name,
            doc,
            fields,
            nested,
            extensions,
            extends,
            properties,
            by_name,
            by_index,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn field_by_index(&self, index: u32) -> Option<&Field> {
        self.by_index.get(&index).map(|&i| &self.fields[i])
    }

    /// Fields of one cardinality, ordered by index.
    pub fn partition(&self, label: Label) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(move |f| f.label == label)
    }

    pub fn max_index(&self) -> u32 {
        self.fields.last().map(|f| f.index).unwrap_or(0)
    }

    /// Declared fields covered by this message's extension ranges.
    pub fn extended_fields(&self) -> BTreeMap<String, u32> {
        compile_extensions(&self.extensions, self.fields.iter().map(|f| (f.name.as_str(), f.index))).extended
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rpc {
    pub name: String,
    pub input: TypeRef,
    pub output: TypeRef,
    pub properties: Properties,
}

/// Parsed service. Carried as metadata only.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub name: String,
    pub rpcs: Vec<Rpc>,
    pub properties: Properties,
}

/// An imported file, already built into its own protocol.
#[derive(Debug, Clone)]
pub struct Import {
    pub path: PathBuf,
    pub protocol: Protocol,
}

/// Root of one compiled schema file, with imports already flattened in.
#[derive(Debug, Clone, Default)]
pub struct Protocol {
    pub properties: Properties,
    pub namespace: Namespace,
    pub services: Vec<Service>,
    pub extends: Vec<Extend>,
    /// Resolved paths of the files imported (directly) by this one.
    pub imports: Vec<PathBuf>,
}

impl Protocol {
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Option<Entity<'_>> {
        self.namespace.find(path)
    }

    /// Look up a message by dotted path from the root.
    pub fn message(&self, dotted: &str) -> Option<&Message> {
        let path: Vec<&str> = dotted.split('.').collect();
        match self.find(&path)? {
            Entity::Message(m) => Some(m),
            Entity::Enum(_) => None,
        }
    }

    pub fn package(&self) -> Option<&str> {
        self.properties.value("package").and_then(Literal::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(index: u32, name: &str) -> Field {
        Field {
            index,
            name: name.to_string(),
            ty: FieldType::Scalar(ScalarType::Int32),
            label: Label::Required,
            options: FieldOptions::default(),
        }
    }

    fn message(name: &str, fields: Vec<Field>, nested: Namespace, extensions: Vec<Extension>) -> Message {
        Message::new(
            name.to_string(),
            String::new(),
            fields,
            nested,
            extensions,
            Vec::new(),
            Properties::default(),
        )
    }

    #[test]
    fn wire_classes_of_scalars() {
        assert_eq!(ScalarType::SInt64.wire_type(), WireType::Varint);
        assert_eq!(ScalarType::Bool.wire_type(), WireType::Varint);
        assert_eq!(ScalarType::Double.wire_type(), WireType::Fixed64);
        assert_eq!(ScalarType::SFixed32.wire_type(), WireType::Fixed32);
        assert_eq!(ScalarType::Bytes.wire_type(), WireType::LengthDelimited);
        assert!(!ScalarType::String.is_packable());
        assert!(ScalarType::Float.is_packable());
    }

    #[test]
    fn type_ref_joins_with_underscores() {
        let r = TypeRef::new("Outer.Inner");
        assert!(!r.absolute);
        assert_eq!(r.joined(), "Outer_Inner");
        assert_eq!(r.to_string(), "Outer.Inner");
        assert!(TypeRef::new(".Root").absolute);
    }

    #[test]
    fn fields_sorted_and_partitioned() {
        let mut f = field(1, "a");
        f.label = Label::Optional;
        let m = message("M", vec![field(3, "c"), f, field(2, "b")], Namespace::default(), vec![]);
        let order: Vec<u32> = m.fields.iter().map(|f| f.index).collect();
        assert_eq!(order, vec![1, 2, 3]);
        let required: Vec<&str> = m.partition(Label::Required).map(|f| f.name.as_str()).collect();
        assert_eq!(required, vec!["b", "c"]);
        assert_eq!(m.field_by_index(2).map(|f| f.name.as_str()), Some("b"));
        assert_eq!(m.max_index(), 3);
    }

    #[test]
    fn extension_ranges_compile_against_declared_fields() {
        let m = message(
            "M",
            vec![field(1, "a"), field(2, "b"), field(5, "e")],
            Namespace::default(),
            vec![Extension::single(1)],
        );
        let ext = m.extended_fields();
        assert_eq!(ext.len(), 1);
        assert_eq!(ext.get("a"), Some(&1));

        let open = message(
            "Open",
            vec![field(4, "d"), field(9, "i")],
            Namespace::default(),
            vec![Extension { start: 5, end: ExtensionEnd::Max }],
        );
        let ext = open.extended_fields();
        assert_eq!(ext.keys().collect::<Vec<_>>(), vec!["i"]);

        let compiled = compile_extensions(&open.extensions, [("d", 4), ("i", 9)]);
        assert_eq!(compiled.ranges, vec![5..=9]);
        assert!(compiled.contains(9) && !compiled.contains(10));
        assert_eq!(compiled.extended, ext);
    }

    #[test]
    fn properties_create_intermediate_records() {
        let mut props = Properties::default();
        props.set(&["outer".to_string(), "inner".to_string()], Literal::Int(3));
        props.set(&["debug".to_string()], Literal::Bool(true));
        assert_eq!(props.value("outer.inner"), Some(&Literal::Int(3)));
        assert!(matches!(props.get("outer"), Some(PropertyValue::Record(_))));
        assert!(props.flag("debug"));
        assert!(!props.flag("immutable"));
        assert!(props.value("outer.inner.deeper").is_none());
    }

    #[test]
    fn dotted_find_stops_at_enums() {
        let mut inner_ns = Namespace::default();
        inner_ns
            .insert_enum(
                Enum {
                    name: "Kind".to_string(),
                    values: vec![],
                    properties: Properties::default(),
                },
                DuplicatePolicy::Warn,
                "Outer",
            )
            .expect("enum");
        let mut root = Namespace::default();
        root.insert_message(message("Outer", vec![], inner_ns, vec![]), DuplicatePolicy::Warn, "root")
            .expect("message");
        assert!(matches!(root.find(&["Outer"]), Some(Entity::Message(_))));
        assert!(matches!(root.find(&["Outer", "Kind"]), Some(Entity::Enum(_))));
        assert!(root.find(&["Outer", "Kind", "X"]).is_none());
        assert!(root.find(&["Missing"]).is_none());
        assert!(root.find::<&str>(&[]).is_none());
    }

    #[test]
    fn duplicate_policy_controls_overwrite() {
        let mut ns = Namespace::default();
        ns.insert_message(message("M", vec![field(1, "a")], Namespace::default(), vec![]), DuplicatePolicy::Warn, "root")
            .expect("first");
        ns.insert_message(message("M", vec![field(2, "b")], Namespace::default(), vec![]), DuplicatePolicy::Warn, "root")
            .expect("overwrite");
        assert_eq!(ns.message_names(), &["M".to_string()]);
        assert!(ns.message("M").and_then(|m| m.field("b")).is_some());

        let err = ns
            .insert_message(message("M", vec![], Namespace::default(), vec![]), DuplicatePolicy::Error, "root")
            .unwrap_err();
        assert!(matches!(err, CompileError::Duplicate { kind: "message", .. }));
    }
}
