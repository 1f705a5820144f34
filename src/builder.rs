//! Tree-to-IR builder.
//!
//! A depth-first walk over the syntax tree. [`dispatch`] maps a grammar rule
//! to a handler; rules without one flatten into their children. Handlers
//! return IR [`Fragment`]s, and compound handlers attach every child fragment
//! to a [`Container`] builder that yields an immutable IR node on `finish`.

use std::fs;
use std::path::{Path, PathBuf};

use pest::iterators::Pair;
use tracing::debug;

use crate::error::CompileError;
use crate::ir::{
    DuplicatePolicy, Enum, EnumValue, Extend, Extension, ExtensionEnd, Field, FieldOptions, FieldType,
    Import, Label, Literal, Message, Namespace, Properties, Property, Protocol, Rpc, ScalarType, Service,
    TypeRef, MAX_FIELD_INDEX,
};
use crate::parser::{restore_comments, Rule, SchemaSource};

/// One piece of IR produced by a handler.
#[derive(Debug, Clone)]
pub enum Fragment {
    Literal(Literal),
    Name(String),
    Type(FieldType),
    Label(Label),
    Max,
    Option(String, Literal),
    Field(Field),
    Extension(Extension),
    Property(Property),
    Import(Box<Import>),
    Message(Message),
    Enum(Enum),
    EnumValue(EnumValue),
    Service(Service),
    Rpc(Rpc),
    Extend(Extend),
    Protocol(Protocol),
}

impl Fragment {
    pub fn kind(&self) -> &'static str {
        match self {
            Fragment::Literal(_) => "literal",
            Fragment::Name(_) => "name",
            Fragment::Type(_) => "type",
            Fragment::Label(_) => "label",
            Fragment::Max => "`max`",
            Fragment::Option(..) => "field option",
            Fragment::Field(_) => "field",
            Fragment::Extension(_) => "extension range",
            Fragment::Property(_) => "option",
            Fragment::Import(_) => "import",
            Fragment::Message(_) => "message",
            Fragment::Enum(_) => "enum",
            Fragment::EnumValue(_) => "enum value",
            Fragment::Service(_) => "service",
            Fragment::Rpc(_) => "rpc",
            Fragment::Extend(_) => "extend",
            Fragment::Protocol(_) => "protocol",
        }
    }
}

/// Something IR fragments can be attached to. Every kind a container does not
/// accept is rejected as misplaced.
pub trait Container {
    /// Human-readable name for diagnostics.
    fn describe(&self) -> String;

    fn misplaced(&self, fragment: &'static str) -> CompileError {
        CompileError::Misplaced {
            fragment,
            container: self.describe(),
        }
    }

    fn add_field(&mut self, _field: Field) -> Result<(), CompileError> {
        Err(self.misplaced("field"))
    }
    fn add_message(&mut self, _message: Message) -> Result<(), CompileError> {
        Err(self.misplaced("message"))
    }
    fn add_enum(&mut self, _en: Enum) -> Result<(), CompileError> {
        Err(self.misplaced("enum"))
    }
    fn add_enum_value(&mut self, _value: EnumValue) -> Result<(), CompileError> {
        Err(self.misplaced("enum value"))
    }
    fn add_extension(&mut self, _extension: Extension) -> Result<(), CompileError> {
        Err(self.misplaced("extension range"))
    }
    fn add_property(&mut self, _property: Property) -> Result<(), CompileError> {
        Err(self.misplaced("option"))
    }
    fn add_import(&mut self, _import: Import) -> Result<(), CompileError> {
        Err(self.misplaced("import"))
    }
    fn add_service(&mut self, _service: Service) -> Result<(), CompileError> {
        Err(self.misplaced("service"))
    }
    fn add_rpc(&mut self, _rpc: Rpc) -> Result<(), CompileError> {
        Err(self.misplaced("rpc"))
    }
    fn add_extend(&mut self, _extend: Extend) -> Result<(), CompileError> {
        Err(self.misplaced("extend"))
    }

    /// Route a fragment to the matching `add_*` method.
    fn attach(&mut self, fragment: Fragment) -> Result<(), CompileError> {
        match fragment {
            Fragment::Field(f) => self.add_field(f),
            Fragment::Message(m) => self.add_message(m),
            Fragment::Enum(e) => self.add_enum(e),
            Fragment::EnumValue(v) => self.add_enum_value(v),
            Fragment::Extension(e) => self.add_extension(e),
            Fragment::Property(p) => self.add_property(p),
            Fragment::Import(i) => self.add_import(*i),
            Fragment::Service(s) => self.add_service(s),
            Fragment::Rpc(r) => self.add_rpc(r),
            Fragment::Extend(e) => self.add_extend(e),
            other => Err(self.misplaced(other.kind())),
        }
    }
}

pub struct MessageBuilder {
    name: String,
    doc: String,
    policy: DuplicatePolicy,
    fields: Vec<Field>,
    nested: Namespace,
    extensions: Vec<Extension>,
    extends: Vec<Extend>,
    properties: Properties,
}

impl MessageBuilder {
    pub fn new(name: String, doc: String, policy: DuplicatePolicy) -> Self {
        MessageBuilder {
            name,
            doc,
            policy,
            fields: Vec::new(),
            nested: Namespace::default(),
            extensions: Vec::new(),
            extends: Vec::new(),
            properties: Properties::default(),
        }
    }

    pub fn finish(self) -> Message {
        Message::new(
            self.name,
            self.doc,
            self.fields,
            self.nested,
            self.extensions,
            self.extends,
            self.properties,
        )
    }
}

impl Container for MessageBuilder {
    fn describe(&self) -> String {
        format!("message {}", self.name)
    }

    fn add_field(&mut self, field: Field) -> Result<(), CompileError> {
        if let Some(pos) = self.fields.iter().position(|f| f.name == field.name) {
            self.policy.admit("field", &field.name, &self.describe())?;
            self.fields.remove(pos);
        }
        if let Some(other) = self.fields.iter().find(|f| f.index == field.index) {
            return Err(CompileError::DuplicateIndex {
                message: self.name.clone(),
                index: field.index,
                first: other.name.clone(),
                second: field.name,
            });
        }
        self.fields.push(field);
        Ok(())
    }

    fn add_message(&mut self, message: Message) -> Result<(), CompileError> {
        let container = self.describe();
        self.nested.insert_message(message, self.policy, &container)
    }

    fn add_enum(&mut self, en: Enum) -> Result<(), CompileError> {
        let container = self.describe();
        self.nested.insert_enum(en, self.policy, &container)
    }

    fn add_extension(&mut self, extension: Extension) -> Result<(), CompileError> {
        let reason = match extension.end {
            _ if extension.start > MAX_FIELD_INDEX => Some(format!("{} exceeds {}", extension.start, MAX_FIELD_INDEX)),
            ExtensionEnd::Index(end) if end > MAX_FIELD_INDEX => Some(format!("{} exceeds {}", end, MAX_FIELD_INDEX)),
            ExtensionEnd::Index(end) if end < extension.start => {
                Some(format!("end {} is below start {}", end, extension.start))
            }
            _ => None,
        };
        if let Some(reason) = reason {
            return Err(CompileError::InvalidExtension {
                message: self.name.clone(),
                reason,
            });
        }
        self.extensions.push(extension);
        Ok(())
    }

    fn add_property(&mut self, property: Property) -> Result<(), CompileError> {
        self.properties.set(&property.path, property.value);
        Ok(())
    }

    fn add_extend(&mut self, extend: Extend) -> Result<(), CompileError> {
        self.extends.push(extend);
        Ok(())
    }
}

pub struct EnumBuilder {
    name: String,
    policy: DuplicatePolicy,
    values: Vec<EnumValue>,
    properties: Properties,
}

impl EnumBuilder {
    pub fn new(name: String, policy: DuplicatePolicy) -> Self {
        EnumBuilder {
            name,
            policy,
            values: Vec::new(),
            properties: Properties::default(),
        }
    }

    pub fn finish(self) -> Enum {
        Enum {
            name: self.name,
            values: self.values,
            properties: self.properties,
        }
    }
}

impl Container for EnumBuilder {
    fn describe(&self) -> String {
        format!("enum {}", self.name)
    }

    fn add_enum_value(&mut self, value: EnumValue) -> Result<(), CompileError> {
        if let Some(pos) = self.values.iter().position(|v| v.name == value.name) {
            self.policy.admit("enum value", &value.name, &self.describe())?;
            self.values.remove(pos);
        }
        self.values.push(value);
        Ok(())
    }

    fn add_property(&mut self, property: Property) -> Result<(), CompileError> {
        self.properties.set(&property.path, property.value);
        Ok(())
    }
}

pub struct ServiceBuilder {
    name: String,
    policy: DuplicatePolicy,
    rpcs: Vec<Rpc>,
    properties: Properties,
}

impl ServiceBuilder {
    pub fn new(name: String, policy: DuplicatePolicy) -> Self {
        ServiceBuilder {
            name,
            policy,
            rpcs: Vec::new(),
            properties: Properties::default(),
        }
    }

    pub fn finish(self) -> Service {
        Service {
            name: self.name,
            rpcs: self.rpcs,
            properties: self.properties,
        }
    }
}

impl Container for ServiceBuilder {
    fn describe(&self) -> String {
        format!("service {}", self.name)
    }

    fn add_rpc(&mut self, rpc: Rpc) -> Result<(), CompileError> {
        if let Some(pos) = self.rpcs.iter().position(|r| r.name == rpc.name) {
            self.policy.admit("rpc", &rpc.name, &self.describe())?;
            self.rpcs.remove(pos);
        }
        self.rpcs.push(rpc);
        Ok(())
    }

    fn add_property(&mut self, property: Property) -> Result<(), CompileError> {
        self.properties.set(&property.path, property.value);
        Ok(())
    }
}

/// Collects the top-level declarations of one file.
pub struct ProtocolBuilder {
    policy: DuplicatePolicy,
    protocol: Protocol,
}

impl ProtocolBuilder {
    pub fn new(policy: DuplicatePolicy) -> Self {
        ProtocolBuilder {
            policy,
            protocol: Protocol::default(),
        }
    }

    pub fn finish(self) -> Protocol {
        self.protocol
    }

    fn insert_service(&mut self, service: Service) -> Result<(), CompileError> {
        let services = &mut self.protocol.services;
        if let Some(pos) = services.iter().position(|s| s.name == service.name) {
            self.policy.admit("service", &service.name, "protocol")?;
            services.remove(pos);
        }
        services.push(service);
        Ok(())
    }
}

impl Container for ProtocolBuilder {
    fn describe(&self) -> String {
        "protocol".to_string()
    }

    fn add_message(&mut self, message: Message) -> Result<(), CompileError> {
        self.protocol.namespace.insert_message(message, self.policy, "protocol")
    }

    fn add_enum(&mut self, en: Enum) -> Result<(), CompileError> {
        self.protocol.namespace.insert_enum(en, self.policy, "protocol")
    }

    fn add_property(&mut self, property: Property) -> Result<(), CompileError> {
        self.protocol.properties.set(&property.path, property.value);
        Ok(())
    }

    /// Flatten the imported protocol's types and services into this one.
    fn add_import(&mut self, import: Import) -> Result<(), CompileError> {
        let Import { path, protocol } = import;
        let container = format!("protocol (importing {})", path.display());
        self.protocol.namespace.merge(protocol.namespace, self.policy, &container)?;
        for service in protocol.services {
            self.insert_service(service)?;
        }
        self.protocol.extends.extend(protocol.extends);
        self.protocol.imports.push(path);
        Ok(())
    }

    fn add_service(&mut self, service: Service) -> Result<(), CompileError> {
        self.insert_service(service)
    }

    fn add_extend(&mut self, extend: Extend) -> Result<(), CompileError> {
        self.protocol.extends.push(extend);
        Ok(())
    }
}

/// A rule handler.
pub type Handler = for<'i> fn(&mut TreeBuilder, Pair<'i, Rule>) -> Result<Vec<Fragment>, CompileError>;

/// The dispatch table. `None` means "flatten into children".
pub fn dispatch(rule: Rule) -> Option<Handler> {
    let handler: Handler = match rule {
        Rule::ident => TreeBuilder::on_ident,
        Rule::full_ident => TreeBuilder::on_full_ident,
        Rule::user_type => TreeBuilder::on_user_type,
        Rule::scalar_type => TreeBuilder::on_scalar_type,
        Rule::number => TreeBuilder::on_number,
        Rule::string => TreeBuilder::on_string,
        Rule::boolean => TreeBuilder::on_boolean,
        Rule::constant => TreeBuilder::on_constant,
        Rule::max => TreeBuilder::on_max,
        Rule::label => TreeBuilder::on_label,
        Rule::field_option => TreeBuilder::on_field_option,
        Rule::field_tail => TreeBuilder::on_field_tail,
        Rule::field => TreeBuilder::on_field,
        Rule::extension => TreeBuilder::on_extension,
        Rule::option => TreeBuilder::on_option,
        Rule::package => TreeBuilder::on_package,
        Rule::import => TreeBuilder::on_import,
        Rule::enum_value => TreeBuilder::on_enum_value,
        Rule::enum_def => TreeBuilder::on_enum,
        Rule::message => TreeBuilder::on_message,
        Rule::extend => TreeBuilder::on_extend,
        Rule::rpc => TreeBuilder::on_rpc,
        Rule::service => TreeBuilder::on_service,
        Rule::file => TreeBuilder::on_file,
        _ => return None,
    };
    Some(handler)
}

/// Walks one file's syntax tree. Imports recurse through a fresh builder that
/// shares the lookup directory and the chain of files being built.
pub struct TreeBuilder {
    policy: DuplicatePolicy,
    lookup_dir: PathBuf,
    chain: Vec<PathBuf>,
}

impl TreeBuilder {
    pub fn new(lookup_dir: impl Into<PathBuf>, policy: DuplicatePolicy) -> Self {
        TreeBuilder {
            policy,
            lookup_dir: lookup_dir.into(),
            chain: Vec::new(),
        }
    }

    /// Record the file being built so importing it again is a cycle.
    pub fn within(mut self, file: PathBuf) -> Self {
        self.chain.push(file);
        self
    }

    /// Build the single protocol of a parsed file.
    pub fn build(&mut self, root: Pair<'_, Rule>) -> Result<Protocol, CompileError> {
        let mut protocols: Vec<Protocol> = self
            .visit(root)?
            .into_iter()
            .filter_map(|f| match f {
                Fragment::Protocol(p) => Some(p),
                _ => None,
            })
            .collect();
        match protocols.len() {
            1 => protocols.pop().ok_or(CompileError::ProtocolCount(0)),
            n => Err(CompileError::ProtocolCount(n)),
        }
    }

    pub fn visit(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        match dispatch(pair.as_rule()) {
            Some(handler) => handler(self, pair),
            None => self.visit_children(pair),
        }
    }

    fn visit_children(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let mut out = Vec::new();
        for child in pair.into_inner() {
            out.extend(self.visit(child)?);
        }
        Ok(out)
    }

    fn on_ident(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        Ok(vec![Fragment::Name(pair.as_str().to_string())])
    }

    fn on_full_ident(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let parts: Vec<&str> = pair.into_inner().map(|p| p.as_str()).collect();
        Ok(vec![Fragment::Name(parts.join("_"))])
    }

    fn on_user_type(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        Ok(vec![Fragment::Type(FieldType::Named(TypeRef::new(pair.as_str())))])
    }

    fn on_scalar_type(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let scalar = ScalarType::from_keyword(pair.as_str())
            .ok_or_else(|| CompileError::syntax(format!("scalar type `{}`", pair.as_str())))?;
        Ok(vec![Fragment::Type(FieldType::Scalar(scalar))])
    }

    fn on_number(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        Ok(vec![Fragment::Literal(parse_number(pair.as_str())?)])
    }

    fn on_string(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        Ok(vec![Fragment::Literal(Literal::String(parse_string(pair.as_str())?))])
    }

    fn on_boolean(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        Ok(vec![Fragment::Literal(Literal::Bool(pair.as_str() == "true"))])
    }

    /// Bare identifiers in constant position become `Literal::Ident`.
    fn on_constant(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let fragments = self.visit_children(pair)?;
        Ok(fragments
            .into_iter()
            .map(|f| match f {
                Fragment::Name(n) => Fragment::Literal(Literal::Ident(n)),
                other => other,
            })
            .collect())
    }

    fn on_max(&mut self, _pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        Ok(vec![Fragment::Max])
    }

    fn on_label(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let label = Label::from_keyword(pair.as_str())
            .ok_or_else(|| CompileError::syntax(format!("label `{}`", pair.as_str())))?;
        Ok(vec![Fragment::Label(label)])
    }

    fn on_field_option(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let mut parts = self.visit_children(pair)?.into_iter();
        match (parts.next(), parts.next()) {
            (Some(Fragment::Name(name)), Some(Fragment::Literal(value))) => Ok(vec![Fragment::Option(name, value)]),
            _ => Err(CompileError::syntax("field option")),
        }
    }

    /// `type name = index [options];` with the label still unknown.
    fn on_field_tail(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let mut parts = self.visit_children(pair)?.into_iter();
        let (ty, name, index) = match (parts.next(), parts.next(), parts.next()) {
            (Some(Fragment::Type(ty)), Some(Fragment::Name(name)), Some(Fragment::Literal(index))) => {
                (ty, name, index)
            }
            _ => return Err(CompileError::syntax("field declaration")),
        };
        let index = match index.as_u64() {
            Some(i) if (1..=u64::from(MAX_FIELD_INDEX)).contains(&i) => i as u32,
            _ => {
                return Err(CompileError::InvalidIndex {
                    field: name,
                    index: index.to_string(),
                })
            }
        };
        let mut options = Vec::new();
        for fragment in parts {
            match fragment {
                Fragment::Option(key, value) => options.push((key, value)),
                other => return Err(CompileError::syntax(format!("{} in field `{}`", other.kind(), name))),
            }
        }
        let options = FieldOptions::from_pairs(&name, options)?;
        Ok(vec![Fragment::Field(Field {
            index,
            name,
            ty,
            label: Label::Optional,
            options,
        })])
    }

    fn on_field(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let mut parts = self.visit_children(pair)?.into_iter();
        match (parts.next(), parts.next()) {
            (Some(Fragment::Label(label)), Some(Fragment::Field(mut field))) => {
                field.label = label;
                Ok(vec![Fragment::Field(field)])
            }
            _ => Err(CompileError::syntax("field")),
        }
    }

    fn on_extension(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let parts = self.visit_children(pair)?;
        let bound = |lit: &Literal| {
            lit.as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| CompileError::syntax(format!("extension bound {}", lit)))
        };
        let extension = match parts.as_slice() {
            [Fragment::Literal(start)] => Extension::single(bound(start)?),
            [Fragment::Literal(start), Fragment::Literal(end)] => Extension {
                start: bound(start)?,
                end: ExtensionEnd::Index(bound(end)?),
            },
            [Fragment::Literal(start), Fragment::Max] => Extension {
                start: bound(start)?,
                end: ExtensionEnd::Max,
            },
            _ => return Err(CompileError::syntax("extension range")),
        };
        Ok(vec![Fragment::Extension(extension)])
    }

    /// `option a.b = value;`: every name is a path segment, the last literal
    /// is the value.
    fn on_option(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let mut path = Vec::new();
        let mut value = None;
        for fragment in self.visit_children(pair)? {
            match fragment {
                Fragment::Name(n) => path.push(n),
                Fragment::Literal(l) => value = Some(l),
                other => return Err(CompileError::syntax(format!("{} in option", other.kind()))),
            }
        }
        match value {
            Some(value) if !path.is_empty() => Ok(vec![Fragment::Property(Property { path, value })]),
            _ => Err(CompileError::syntax("option")),
        }
    }

    fn on_package(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        match self.visit_children(pair)?.as_slice() {
            [Fragment::Name(name)] => Ok(vec![Fragment::Property(Property {
                path: vec!["package".to_string()],
                value: Literal::String(name.clone()),
            })]),
            _ => Err(CompileError::syntax("package")),
        }
    }

    fn on_import(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let file = match self.visit_children(pair)?.as_slice() {
            [Fragment::Literal(Literal::String(file))] => file.clone(),
            _ => return Err(CompileError::syntax("import")),
        };
        let import = self.import_file(Path::new(&file))?;
        Ok(vec![Fragment::Import(Box::new(import))])
    }

    /// Build an imported file through the same pipeline.
    fn import_file(&mut self, file: &Path) -> Result<Import, CompileError> {
        let path = self.lookup_dir.join(file);
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if self.chain.contains(&key) {
            return Err(CompileError::ImportCycle { path });
        }
        debug!(path = %path.display(), "importing schema");
        let text = fs::read_to_string(&path).map_err(|source| CompileError::Io {
            path: path.clone(),
            source,
        })?;
        let source = SchemaSource::new(&text);
        let mut nested = TreeBuilder {
            policy: self.policy,
            lookup_dir: self.lookup_dir.clone(),
            chain: self.chain.clone(),
        }
        .within(key);
        let protocol = source
            .parse()
            .and_then(|root| nested.build(root))
            .map_err(|err| match err {
                // Keep the innermost cycle report intact.
                cycle @ CompileError::ImportCycle { .. } => cycle,
                other => CompileError::Import {
                    path: path.clone(),
                    source: Box::new(other),
                },
            })?;
        Ok(Import { path, protocol })
    }

    fn on_enum_value(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let mut parts = self.visit_children(pair)?.into_iter();
        match (parts.next(), parts.next()) {
            (Some(Fragment::Name(name)), Some(Fragment::Literal(number))) => {
                let number = number
                    .as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| CompileError::syntax(format!("enum value {} = {}", name, number)))?;
                Ok(vec![Fragment::EnumValue(EnumValue { name, number })])
            }
            _ => Err(CompileError::syntax("enum value")),
        }
    }

    fn on_enum(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let mut parts = self.visit_children(pair)?.into_iter();
        let mut builder = match parts.next() {
            Some(Fragment::Name(name)) => EnumBuilder::new(name, self.policy),
            _ => return Err(CompileError::syntax("enum")),
        };
        for fragment in parts {
            builder.attach(fragment)?;
        }
        Ok(vec![Fragment::Enum(builder.finish())])
    }

    /// The message keeps its own source text for diagnostics.
    fn on_message(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let doc = dedent(&restore_comments(pair.as_str().trim()));
        let mut parts = self.visit_children(pair)?.into_iter();
        let mut builder = match parts.next() {
            Some(Fragment::Name(name)) => MessageBuilder::new(name, doc, self.policy),
            _ => return Err(CompileError::syntax("message")),
        };
        for fragment in parts {
            builder.attach(fragment)?;
        }
        Ok(vec![Fragment::Message(builder.finish())])
    }

    fn on_extend(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let mut parts = self.visit_children(pair)?.into_iter();
        let target = match parts.next() {
            Some(Fragment::Type(FieldType::Named(target))) => target,
            _ => return Err(CompileError::syntax("extend target")),
        };
        let mut fields: Vec<Field> = Vec::new();
        for fragment in parts {
            match fragment {
                Fragment::Field(field) => {
                    if let Some(other) = fields.iter().find(|f| f.index == field.index) {
                        return Err(CompileError::DuplicateIndex {
                            message: format!("extend {}", target),
                            index: field.index,
                            first: other.name.clone(),
                            second: field.name,
                        });
                    }
                    fields.push(field);
                }
                other => {
                    return Err(CompileError::Misplaced {
                        fragment: other.kind(),
                        container: format!("extend {}", target),
                    })
                }
            }
        }
        Ok(vec![Fragment::Extend(Extend { target, fields })])
    }

    fn on_rpc(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let mut parts = self.visit_children(pair)?.into_iter();
        let (name, input, output) = match (parts.next(), parts.next(), parts.next()) {
            (
                Some(Fragment::Name(name)),
                Some(Fragment::Type(FieldType::Named(input))),
                Some(Fragment::Type(FieldType::Named(output))),
            ) => (name, input, output),
            _ => return Err(CompileError::syntax("rpc")),
        };
        let mut properties = Properties::default();
        for fragment in parts {
            match fragment {
                Fragment::Property(p) => properties.set(&p.path, p.value),
                other => {
                    return Err(CompileError::Misplaced {
                        fragment: other.kind(),
                        container: format!("rpc {}", name),
                    })
                }
            }
        }
        Ok(vec![Fragment::Rpc(Rpc {
            name,
            input,
            output,
            properties,
        })])
    }

    fn on_service(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let mut parts = self.visit_children(pair)?.into_iter();
        let mut builder = match parts.next() {
            Some(Fragment::Name(name)) => ServiceBuilder::new(name, self.policy),
            _ => return Err(CompileError::syntax("service")),
        };
        for fragment in parts {
            builder.attach(fragment)?;
        }
        Ok(vec![Fragment::Service(builder.finish())])
    }

    fn on_file(&mut self, pair: Pair<'_, Rule>) -> Result<Vec<Fragment>, CompileError> {
        let mut builder = ProtocolBuilder::new(self.policy);
        for fragment in self.visit_children(pair)? {
            builder.attach(fragment)?;
        }
        Ok(vec![Fragment::Protocol(builder.finish())])
    }
}

/// Integer (decimal or hex, optionally negative) or float literal.
fn parse_number(text: &str) -> Result<Literal, CompileError> {
    let invalid = || CompileError::syntax(format!("number `{}`", text));
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|_| invalid())?
    } else if digits.contains(['.', 'e', 'E']) {
        return text.parse::<f64>().map(Literal::Float).map_err(|_| invalid());
    } else {
        digits.parse::<u64>().map_err(|_| invalid())?
    };
    if negative {
        if magnitude == 1 << 63 {
            return Ok(Literal::Int(i64::MIN));
        }
        return i64::try_from(magnitude).map(|m| Literal::Int(-m)).map_err(|_| invalid());
    }
    Ok(match i64::try_from(magnitude) {
        Ok(v) => Literal::Int(v),
        Err(_) => Literal::UInt(magnitude),
    })
}

/// Strip quotes and resolve escapes. Triple-quoted strings are taken verbatim.
/// `\xNN` must name an ASCII character since literals are UTF-8 text.
fn parse_string(text: &str) -> Result<String, CompileError> {
    for quote in ["\"\"\"", "'''"] {
        if text.len() >= 6 && text.starts_with(quote) && text.ends_with(quote) {
            return Ok(restore_comments(&text[3..text.len() - 3]));
        }
    }
    let inner = if text.len() >= 2 { &text[1..text.len() - 1] } else { "" };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('x') => {
                let hex: String = chars.clone().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(b) if hex.len() == 2 && b.is_ascii() => {
                        out.push(char::from(b));
                        chars.nth(1);
                    }
                    Ok(_) if hex.len() == 2 => {
                        return Err(CompileError::syntax(format!(
                            "escape \\x{} in {} is not an ASCII character",
                            hex, text
                        )));
                    }
                    _ => out.push_str("\\x"),
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Ok(restore_comments(&out))
}

/// Remove the common indentation of every line after the first.
fn dedent(text: &str) -> String {
    let mut lines = text.lines();
    let Some(first) = lines.next() else {
        return String::new();
    };
    let rest: Vec<&str> = lines.collect();
    let indent = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out = first.to_string();
    for line in rest {
        out.push('\n');
        out.push_str(line.get(indent..).unwrap_or_else(|| line.trim_start()));
    }
    out
}
