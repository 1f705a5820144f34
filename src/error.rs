//! Compile-time errors: parsing, building, resolution and output naming.

use std::path::PathBuf;

use thiserror::Error;

/// Any failure while turning schema text into a resolved [`Schema`](crate::Schema).
///
/// Every variant is fatal for the compilation that produced it.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("in {}: {source}", path.display())]
    Import {
        path: PathBuf,
        #[source]
        source: Box<CompileError>,
    },
    #[error("import cycle through {}", path.display())]
    ImportCycle { path: PathBuf },
    #[error("name `{name}` does not resolve from scope `{scope}`")]
    Name { name: String, scope: String },
    #[error("no protocol defined (found {0})")]
    ProtocolCount(usize),
    #[error("no output module name given and no `package` property to derive one from")]
    OutputName,
    #[error("duplicate {kind} `{name}` in {container}")]
    Duplicate {
        kind: &'static str,
        name: String,
        container: String,
    },
    #[error("message {message}: field index {index} used by both `{first}` and `{second}`")]
    DuplicateIndex {
        message: String,
        index: u32,
        first: String,
        second: String,
    },
    #[error("field `{field}` has invalid index {index}")]
    InvalidIndex { field: String, index: String },
    #[error("message {message}: invalid extension range: {reason}")]
    InvalidExtension { message: String, reason: String },
    #[error("extend {target}: field `{field}` = {index} is outside every declared extension range")]
    ExtendOutOfRange {
        target: String,
        field: String,
        index: u32,
    },
    #[error("field {field}: invalid option `{option}`: {reason}")]
    InvalidOption {
        field: String,
        option: String,
        reason: String,
    },
    #[error("{fragment} cannot be declared inside {container}")]
    Misplaced {
        fragment: &'static str,
        container: String,
    },
    #[error("malformed {0}")]
    Syntax(String),
}

impl CompileError {
    pub(crate) fn syntax(what: impl Into<String>) -> Self {
        CompileError::Syntax(what.into())
    }
}
