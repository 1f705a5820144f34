//! Name resolution: turns a built [`Protocol`] into an immutable [`Schema`].
//!
//! Every message and enum gets a stable handle ([`MessageId`] / [`EnumId`]).
//! Field type names are resolved against the [`NamespaceStack`] active while
//! the enclosing message is visited, so nested types see their siblings and
//! ancestors by short name. `extend` blocks are merged into their targets and
//! extension ranges are compiled into the `extended` field map.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::path::PathBuf;

use tracing::{debug, trace, warn};

use crate::error::CompileError;
use crate::ir::{
    compile_extensions, CompiledExtensions, DuplicatePolicy, EnumValue, Extend, ExtensionEnd, Field, FieldType, Label, Literal, Message,
    Namespace, Properties, Protocol, ScalarType, Service, TypeRef, MAX_FIELD_INDEX,
};
use crate::value::Value;
use crate::wire::{make_tag, WireType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumId(usize);

/// What a resolved type name points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Message(MessageId),
    Enum(EnumId),
}

impl Symbol {
    pub fn wire_type(self) -> WireType {
        match self {
            Symbol::Message(_) => WireType::LengthDelimited,
            Symbol::Enum(_) => WireType::Varint,
        }
    }
}

/// Decoder identity of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarType),
    Message(MessageId),
    Enum(EnumId),
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub index: u32,
    pub name: String,
    pub label: Label,
    pub kind: FieldKind,
    /// Scalar keyword or the flattened name of the referenced type.
    pub type_name: String,
    pub packed: bool,
    /// Index lies in one of the message's extension ranges.
    pub extended: bool,
    pub default: Option<Value>,
    /// Options other than `default` and `packed`.
    pub options: BTreeMap<String, Literal>,
}

impl FieldDescriptor {
    /// Wire class of one element.
    pub fn element_wire_type(&self) -> WireType {
        match self.kind {
            FieldKind::Scalar(s) => s.wire_type(),
            FieldKind::Message(_) => WireType::LengthDelimited,
            FieldKind::Enum(_) => WireType::Varint,
        }
    }

    /// Wire class in the tag: length-delimited when packed.
    pub fn wire_type(&self) -> WireType {
        if self.packed {
            WireType::LengthDelimited
        } else {
            self.element_wire_type()
        }
    }

    pub fn tag(&self) -> u64 {
        make_tag(self.index, self.wire_type())
    }

    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated
    }

    /// Repeated field whose elements may travel packed.
    pub fn is_packable(&self) -> bool {
        self.is_repeated()
            && match self.kind {
                FieldKind::Scalar(s) => s.is_packable(),
                FieldKind::Enum(_) => true,
                FieldKind::Message(_) => false,
            }
    }
}

#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    pub name: String,
    /// Underscore-joined path from the root.
    pub fullname: String,
    pub path: Vec<String>,
    pub doc: String,
    pub parent: Option<MessageId>,
    /// Sorted by index; includes fields merged from `extend` blocks.
    pub fields: Vec<FieldDescriptor>,
    pub messages: Vec<MessageId>,
    pub enums: Vec<EnumId>,
    /// Extension ranges with open ends closed at resolution time.
    pub extensions: Vec<RangeInclusive<u32>>,
    /// Extended field name to index.
    pub extended: BTreeMap<String, u32>,
    pub properties: Properties,
    by_name: HashMap<String, usize>,
    by_index: HashMap<u32, usize>,
}

impl MessageDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn field_by_index(&self, index: u32) -> Option<&FieldDescriptor> {
        self.by_index.get(&index).map(|&i| &self.fields[i])
    }

    pub fn partition(&self, label: Label) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(move |f| f.label == label)
    }

    pub fn max_index(&self) -> u32 {
        self.fields.last().map(|f| f.index).unwrap_or(0)
    }

    pub fn is_extension_index(&self, index: u32) -> bool {
        self.extensions.iter().any(|r| r.contains(&index))
    }
}

#[derive(Debug, Clone)]
pub struct EnumDescriptor {
    pub name: String,
    pub fullname: String,
    pub values: Vec<EnumValue>,
    pub properties: Properties,
}

impl EnumDescriptor {
    pub fn number(&self, name: &str) -> Option<i32> {
        self.values.iter().find(|v| v.name == name).map(|v| v.number)
    }

    pub fn name_of(&self, number: i32) -> Option<&str> {
        self.values.iter().find(|v| v.number == number).map(|v| v.name.as_str())
    }
}

/// Fully resolved schema. Immutable; share it through `Arc`.
#[derive(Debug, Clone)]
pub struct Schema {
    pub properties: Properties,
    pub services: Vec<Service>,
    pub imports: Vec<PathBuf>,
    messages: Vec<MessageDescriptor>,
    enums: Vec<EnumDescriptor>,
    roots: Vec<MessageId>,
    root_enums: Vec<EnumId>,
    by_fullname: HashMap<String, MessageId>,
    symbols: HashMap<Vec<String>, Symbol>,
}

impl Schema {
    pub fn message(&self, id: MessageId) -> &MessageDescriptor {
        &self.messages[id.0]
    }

    pub fn enumeration(&self, id: EnumId) -> &EnumDescriptor {
        &self.enums[id.0]
    }

    /// All messages, parents before children.
    pub fn messages(&self) -> impl Iterator<Item = (MessageId, &MessageDescriptor)> {
        self.messages.iter().enumerate().map(|(i, m)| (MessageId(i), m))
    }

    pub fn enums(&self) -> impl Iterator<Item = (EnumId, &EnumDescriptor)> {
        self.enums.iter().enumerate().map(|(i, e)| (EnumId(i), e))
    }

    /// Top-level messages in declaration order.
    pub fn roots(&self) -> &[MessageId] {
        &self.roots
    }

    pub fn root_enums(&self) -> &[EnumId] {
        &self.root_enums
    }

    /// Find a message by flattened name (`Outer_Inner`) or dotted path
    /// (`Outer.Inner`).
    pub fn message_id(&self, name: &str) -> Option<MessageId> {
        if let Some(id) = self.by_fullname.get(name) {
            return Some(*id);
        }
        match self.find(name)? {
            Symbol::Message(id) => Some(id),
            Symbol::Enum(_) => None,
        }
    }

    /// Root-anchored dotted lookup.
    pub fn find(&self, dotted: &str) -> Option<Symbol> {
        let path: Vec<String> = dotted.trim_start_matches('.').split('.').map(str::to_string).collect();
        self.symbols.get(&path).copied()
    }

    /// Decode tracing is enabled by `option debug = true;`.
    pub fn debug(&self) -> bool {
        self.properties.flag("debug")
    }

    pub fn package(&self) -> Option<&str> {
        self.properties.value("package").and_then(Literal::as_str)
    }
}

/// Enclosing message names during a resolution pass, innermost last.
#[derive(Debug, Clone, Default)]
pub struct NamespaceStack {
    names: Vec<String>,
}

impl NamespaceStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_path(names: Vec<String>) -> Self {
        NamespaceStack { names }
    }

    pub fn push(&mut self, name: &str) {
        self.names.push(name.to_string());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.names.pop()
    }

    pub fn path(&self) -> &[String] {
        &self.names
    }

    /// Flattened name of the innermost scope.
    pub fn fullname(&self) -> String {
        self.names.join("_")
    }

    /// Try `stack[..k] ++ name` for `k` from the full depth down to the root.
    /// Absolute names are only tried at the root.
    pub fn lookup(
        &self,
        symbols: &HashMap<Vec<String>, Symbol>,
        name: &TypeRef,
    ) -> Result<Symbol, CompileError> {
        let depths = if name.absolute { 0..=0 } else { 0..=self.names.len() };
        for depth in depths.rev() {
            let mut candidate = self.names[..depth].to_vec();
            candidate.extend(name.segments.iter().cloned());
            if let Some(symbol) = symbols.get(&candidate) {
                trace!(name = %name, scope = %self.names.join("."), depth, "resolved type name");
                return Ok(*symbol);
            }
        }
        Err(CompileError::Name {
            name: name.to_string(),
            scope: if self.names.is_empty() {
                "<root>".to_string()
            } else {
                self.names.join(".")
            },
        })
    }
}

/// Placement of one message found by the declaration pass.
#[derive(Debug, Default)]
struct Outline {
    parent: Option<MessageId>,
    messages: Vec<MessageId>,
    enums: Vec<EnumId>,
}

struct Resolver<'p> {
    policy: DuplicatePolicy,
    symbols: HashMap<Vec<String>, Symbol>,
    outlines: Vec<Outline>,
    sources: Vec<&'p Message>,
    paths: Vec<Vec<String>>,
    messages: Vec<Option<MessageDescriptor>>,
    enums: Vec<EnumDescriptor>,
    extends: Vec<(Vec<String>, &'p Extend)>,
    merged: HashMap<MessageId, Vec<(Vec<String>, &'p Field)>>,
}

/// Resolve every type reference in `protocol` and compile its extensions.
pub fn resolve(protocol: &Protocol, policy: DuplicatePolicy) -> Result<Schema, CompileError> {
    let mut resolver = Resolver {
        policy,
        symbols: HashMap::new(),
        outlines: Vec::new(),
        sources: Vec::new(),
        paths: Vec::new(),
        messages: Vec::new(),
        enums: Vec::new(),
        extends: protocol.extends.iter().map(|e| (Vec::new(), e)).collect(),
        merged: HashMap::new(),
    };
    let (roots, root_enums) = resolver.declare(&protocol.namespace, &mut Vec::new(), None)?;
    debug!(
        messages = resolver.messages.len(),
        enums = resolver.enums.len(),
        "declared schema types"
    );
    resolver.merge_extends()?;
    resolver.resolve_namespace(&protocol.namespace, &mut NamespaceStack::new())?;

    let Resolver {
        messages,
        enums,
        symbols,
        ..
    } = resolver;
    let messages = messages
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| CompileError::syntax("message left unresolved"))?;
    let mut by_fullname = HashMap::new();
    for (i, m) in messages.iter().enumerate() {
        if let Some(prev) = by_fullname.insert(m.fullname.clone(), MessageId(i)) {
            warn!(
                fullname = %m.fullname,
                earlier = %messages[prev.0].path.join("."),
                later = %m.path.join("."),
                "two messages flatten to the same name"
            );
        }
    }
    Ok(Schema {
        properties: protocol.properties.clone(),
        services: protocol.services.clone(),
        imports: protocol.imports.clone(),
        messages,
        enums,
        roots,
        root_enums,
        by_fullname,
        symbols,
    })
}

impl<'p> Resolver<'p> {
    /// Assign handles in pre-order and record every type's path.
    fn declare(
        &mut self,
        ns: &'p Namespace,
        path: &mut Vec<String>,
        parent: Option<MessageId>,
    ) -> Result<(Vec<MessageId>, Vec<EnumId>), CompileError> {
        let mut message_ids = Vec::new();
        for message in ns.messages() {
            let id = MessageId(self.messages.len());
            self.messages.push(None);
            self.outlines.push(Outline {
                parent,
                ..Outline::default()
            });
            self.sources.push(message);
            path.push(message.name.clone());
            self.paths.push(path.clone());
            self.define(path, Symbol::Message(id))?;
            for extend in &message.extends {
                self.extends.push((path.clone(), extend));
            }
            let (messages, enums) = self.declare(&message.nested, path, Some(id))?;
            self.outlines[id.0].messages = messages;
            self.outlines[id.0].enums = enums;
            path.pop();
            message_ids.push(id);
        }
        let mut enum_ids = Vec::new();
        for en in ns.enums() {
            let id = EnumId(self.enums.len());
            path.push(en.name.clone());
            self.define(path, Symbol::Enum(id))?;
            self.enums.push(EnumDescriptor {
                name: en.name.clone(),
                fullname: path.join("_"),
                values: en.values.clone(),
                properties: en.properties.clone(),
            });
            path.pop();
            enum_ids.push(id);
        }
        Ok((message_ids, enum_ids))
    }

    fn define(&mut self, path: &[String], symbol: Symbol) -> Result<(), CompileError> {
        if self.symbols.contains_key(path) {
            let (name, container) = match path.split_last() {
                Some((name, parents)) if !parents.is_empty() => (name.as_str(), parents.join(".")),
                Some((name, _)) => (name.as_str(), "protocol".to_string()),
                None => ("", "protocol".to_string()),
            };
            self.policy.admit("type", name, &container)?;
        }
        self.symbols.insert(path.to_vec(), symbol);
        Ok(())
    }

    /// Queue `extend` fields on their targets after checking their ranges.
    fn merge_extends(&mut self) -> Result<(), CompileError> {
        let extends = std::mem::take(&mut self.extends);
        for (scope, extend) in extends {
            let stack = NamespaceStack::from_path(scope.clone());
            let target = match stack.lookup(&self.symbols, &extend.target)? {
                Symbol::Message(id) => id,
                Symbol::Enum(_) => {
                    return Err(CompileError::Name {
                        name: format!("{} (an enum cannot be extended)", extend.target),
                        scope: scope.join("."),
                    })
                }
            };
            let ranges = self.declared_ranges(target);
            for field in &extend.fields {
                let covered = ranges.iter().any(|(start, end)| (*start..=*end).contains(&field.index));
                if !covered {
                    return Err(CompileError::ExtendOutOfRange {
                        target: extend.target.to_string(),
                        field: field.name.clone(),
                        index: field.index,
                    });
                }
                debug!(target = %extend.target, field = %field.name, index = field.index, "merging extend field");
                self.merged.entry(target).or_default().push((scope.clone(), field));
            }
        }
        Ok(())
    }

    /// Declared ranges of a message, open ends taken as the largest index.
    fn declared_ranges(&self, id: MessageId) -> Vec<(u32, u32)> {
        self.sources[id.0]
            .extensions
            .iter()
            .map(|e| match e.end {
                ExtensionEnd::Index(end) => (e.start, end),
                ExtensionEnd::Max => (e.start, MAX_FIELD_INDEX),
            })
            .collect()
    }

    fn resolve_namespace(&mut self, ns: &'p Namespace, stack: &mut NamespaceStack) -> Result<(), CompileError> {
        for message in ns.messages() {
            stack.push(&message.name);
            // The path symbol may have been overwritten by a same-named enum.
            let id = match self.sources.iter().position(|m| std::ptr::eq(*m, message)) {
                Some(i) => MessageId(i),
                None => return Err(CompileError::syntax(format!("message {} was not declared", stack.fullname()))),
            };
            let descriptor = self.describe(message, id, stack)?;
            self.messages[id.0] = Some(descriptor);
            self.resolve_namespace(&message.nested, stack)?;
            stack.pop();
        }
        Ok(())
    }

    fn describe(
        &mut self,
        message: &'p Message,
        id: MessageId,
        stack: &NamespaceStack,
    ) -> Result<MessageDescriptor, CompileError> {
        let fullname = stack.fullname();
        let mut fields = Vec::with_capacity(message.fields.len());
        for field in &message.fields {
            fields.push(self.resolve_field(field, stack, &fullname)?);
        }
        for (scope, field) in self.merged.remove(&id).unwrap_or_default() {
            let descriptor = self.resolve_field(field, &NamespaceStack::from_path(scope), &fullname)?;
            if let Some(existing) = fields.iter().position(|f| f.index == descriptor.index) {
                return Err(CompileError::DuplicateIndex {
                    message: fullname,
                    index: descriptor.index,
                    first: fields[existing].name.clone(),
                    second: descriptor.name,
                });
            }
            if let Some(existing) = fields.iter().position(|f| f.name == descriptor.name) {
                self.policy.admit("field", &descriptor.name, &fullname)?;
                fields.remove(existing);
            }
            fields.push(descriptor);
        }
        fields.sort_by_key(|f| f.index);

        let CompiledExtensions { ranges: extensions, extended } =
            compile_extensions(&message.extensions, fields.iter().map(|f| (f.name.as_str(), f.index)));
        for field in fields.iter_mut() {
            field.extended = extended.contains_key(&field.name);
        }
        let by_name = fields.iter().enumerate().map(|(i, f)| (f.name.clone(), i)).collect();
        let by_index = fields.iter().enumerate().map(|(i, f)| (f.index, i)).collect();
        let outline = std::mem::take(&mut self.outlines[id.0]);
        debug!(message = %fullname, fields = fields.len(), extended = extended.len(), "resolved message");
        Ok(MessageDescriptor {
            name: message.name.clone(),
            fullname,
            path: stack.path().to_vec(),
            doc: message.doc.clone(),
            parent: outline.parent,
            fields,
            messages: outline.messages,
            enums: outline.enums,
            extensions,
            extended,
            properties: message.properties.clone(),
            by_name,
            by_index,
        })
    }

    fn resolve_field(
        &self,
        field: &Field,
        stack: &NamespaceStack,
        message: &str,
    ) -> Result<FieldDescriptor, CompileError> {
        let qualified = format!("{}.{}", message, field.name);
        let (kind, type_name) = match &field.ty {
            FieldType::Scalar(s) => (FieldKind::Scalar(*s), s.name().to_string()),
            FieldType::Named(r) => match stack.lookup(&self.symbols, r)? {
                Symbol::Message(id) => (FieldKind::Message(id), self.message_fullname(id)),
                Symbol::Enum(id) => (FieldKind::Enum(id), self.enums[id.0].fullname.clone()),
            },
        };
        let packable = field.label == Label::Repeated
            && match kind {
                FieldKind::Scalar(s) => s.is_packable(),
                FieldKind::Enum(_) => true,
                FieldKind::Message(_) => false,
            };
        if field.options.packed == Some(true) && !packable {
            return Err(CompileError::InvalidOption {
                field: qualified,
                option: "packed".to_string(),
                reason: "only repeated numeric, bool or enum fields can be packed".to_string(),
            });
        }
        let default = match &field.options.default {
            None => None,
            Some(_) if field.label == Label::Repeated => {
                return Err(CompileError::InvalidOption {
                    field: qualified,
                    option: "default".to_string(),
                    reason: "repeated fields cannot have a default".to_string(),
                })
            }
            Some(literal) => Some(self.default_value(kind, literal).ok_or_else(|| CompileError::InvalidOption {
                field: qualified.clone(),
                option: "default".to_string(),
                reason: format!("{} is not a valid {}", literal, type_name),
            })?),
        };
        trace!(field = %qualified, index = field.index, ty = %type_name, "resolved field");
        Ok(FieldDescriptor {
            index: field.index,
            name: field.name.clone(),
            label: field.label,
            kind,
            type_name,
            packed: packable && field.options.packed.unwrap_or(true),
            extended: false,
            default,
            options: field.options.other.clone(),
        })
    }

    fn message_fullname(&self, id: MessageId) -> String {
        self.paths[id.0].join("_")
    }

    fn default_value(&self, kind: FieldKind, literal: &Literal) -> Option<Value> {
        match kind {
            FieldKind::Scalar(s) => scalar_default(s, literal),
            FieldKind::Enum(id) => match literal {
                Literal::Ident(name) => self.enums[id.0].number(name).map(Value::Enum),
                other => other.as_i64().and_then(|n| i32::try_from(n).ok()).map(Value::Enum),
            },
            FieldKind::Message(_) => None,
        }
    }
}

fn scalar_default(scalar: ScalarType, literal: &Literal) -> Option<Value> {
    match scalar {
        ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32 => {
            literal.as_i64().and_then(|v| i32::try_from(v).ok()).map(Value::I32)
        }
        ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64 => literal.as_i64().map(Value::I64),
        ScalarType::UInt32 | ScalarType::Fixed32 => {
            literal.as_u64().and_then(|v| u32::try_from(v).ok()).map(Value::U32)
        }
        ScalarType::UInt64 | ScalarType::Fixed64 => literal.as_u64().map(Value::U64),
        ScalarType::Float => literal.as_f64().map(|v| Value::F32(v as f32)),
        ScalarType::Double => literal.as_f64().map(Value::F64),
        ScalarType::Bool => literal.as_bool().map(Value::Bool),
        ScalarType::String => match literal {
            Literal::String(s) => Some(Value::String(s.clone())),
            _ => None,
        },
        ScalarType::Bytes => match literal {
            Literal::String(s) => Some(Value::Bytes(s.clone().into_bytes())),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> Vec<String> {
        p.split('.').map(str::to_string).collect()
    }

    fn symbols() -> HashMap<Vec<String>, Symbol> {
        let mut s = HashMap::new();
        s.insert(path("Inner"), Symbol::Message(MessageId(0)));
        s.insert(path("Outer"), Symbol::Message(MessageId(1)));
        s.insert(path("Outer.Inner"), Symbol::Message(MessageId(2)));
        s.insert(path("Outer.Mid.Kind"), Symbol::Enum(EnumId(0)));
        s
    }

    #[test]
    fn innermost_scope_wins() {
        let mut stack = NamespaceStack::new();
        stack.push("Outer");
        stack.push("Mid");
        assert_eq!(stack.fullname(), "Outer_Mid");
        let found = stack.lookup(&symbols(), &TypeRef::new("Inner")).expect("lookup");
        assert_eq!(found, Symbol::Message(MessageId(2)));
        let kind = stack.lookup(&symbols(), &TypeRef::new("Kind")).expect("lookup");
        assert_eq!(kind.wire_type(), WireType::Varint);
    }

    #[test]
    fn root_is_tried_last() {
        let stack = NamespaceStack::from_path(path("Elsewhere"));
        let found = stack.lookup(&symbols(), &TypeRef::new("Inner")).expect("lookup");
        assert_eq!(found, Symbol::Message(MessageId(0)));
    }

    #[test]
    fn absolute_names_skip_enclosing_scopes() {
        let stack = NamespaceStack::from_path(path("Outer"));
        let found = stack.lookup(&symbols(), &TypeRef::new(".Inner")).expect("lookup");
        assert_eq!(found, Symbol::Message(MessageId(0)));
    }

    #[test]
    fn unresolved_name_reports_scope() {
        let mut stack = NamespaceStack::new();
        stack.push("Outer");
        match stack.lookup(&symbols(), &TypeRef::new("Missing")) {
            Err(CompileError::Name { name, scope }) => {
                assert_eq!(name, "Missing");
                assert_eq!(scope, "Outer");
            }
            other => panic!("expected name error, got {:?}", other),
        }
        stack.pop();
        assert!(stack.path().is_empty());
    }
}
