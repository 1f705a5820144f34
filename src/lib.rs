//! # protoschema: schema compiler and wire codec for a protobuf-like IDL
//!
//! Schema text is parsed with a PEST grammar, walked into a semantic IR
//! (protocol, messages, enums, fields, extension ranges, options, services),
//! resolved into an immutable [`Schema`] and then used to encode and decode
//! protobuf wire-format messages at runtime.
//!
//! ## Pipeline
//!
//! 1. [`parser`]: `//` comments are rewritten to a placeholder and the text is
//!    tokenized into a syntax tree.
//! 2. [`builder`]: a dispatch table maps grammar rules to handlers; handlers
//!    return IR fragments which are attached to their container (message,
//!    enum, service, protocol). Imports are compiled recursively.
//! 3. [`resolve`]: type names are resolved against the enclosing message
//!    scopes, `extend` blocks are merged and extension ranges compiled.
//! 4. [`codec`]: [`Codec`] encodes and decodes [`MessageValue`]s.
//!
//! ## Example schema
//!
//! ```text
//! package demo;
//! option debug = true;
//!
//! message Point {
//!   required sint32 x = 1;
//!   required sint32 y = 2;
//!   repeated int32 tags = 3 [packed=true];
//!   extensions 100 to max;
//! }
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use protoschema::{compile_str, Codec};
//!
//! let schema = compile_str("message Test1 { required int32 a = 1; }")?;
//! let codec = Codec::new(schema);
//! let mut msg = codec.message("Test1")?;
//! msg.set("a", 150)?;
//! assert_eq!(codec.encode(&msg)?, vec![0x08, 0x96, 0x01]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod codec;
pub mod compile;
pub mod dump;
pub mod error;
pub mod ir;
pub mod parser;
pub mod resolve;
pub mod trace;
pub mod value;
pub mod wire;

pub use codec::{Codec, CodecError, DEFAULT_RECURSION_LIMIT};
pub use compile::{
    build, compile_file, compile_str, compile_str_with, module_name, BuildBackend, CompileOptions, Renderer,
    SourceFileBackend,
};
pub use dump::PrettyRenderer;
pub use error::CompileError;
pub use ir::{DuplicatePolicy, Label, Literal, Protocol, ScalarType};
pub use parser::SchemaSource;
pub use resolve::{
    EnumDescriptor, EnumId, FieldDescriptor, FieldKind, MessageDescriptor, MessageId, NamespaceStack, Schema, Symbol,
};
pub use trace::{DecodeTrace, NoTrace, TraceEvent, TraceLog};
pub use value::{FieldKey, MessageValue, Value};
pub use wire::WireType;
