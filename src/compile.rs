//! Compilation pipeline: source text -> syntax tree -> IR -> resolved schema,
//! plus the boundary to renderers and build backends.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::builder::TreeBuilder;
use crate::error::CompileError;
use crate::ir::DuplicatePolicy;
use crate::parser::SchemaSource;
use crate::resolve::{resolve, Schema};

/// Knobs for one compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Base directory for `import` paths. Defaults to the directory of the
    /// compiled file, or the current directory for in-memory sources.
    pub lookup_dir: Option<PathBuf>,
    pub duplicates: DuplicatePolicy,
    /// Output module name; falls back to the schema's `package`.
    pub module_name: Option<String>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lookup_dir = Some(dir.into());
        self
    }

    pub fn duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = Some(name.into());
        self
    }
}

/// Compile in-memory schema text with default options.
pub fn compile_str(source: &str) -> Result<Schema, CompileError> {
    compile_str_with(source, &CompileOptions::default())
}

pub fn compile_str_with(source: &str, options: &CompileOptions) -> Result<Schema, CompileError> {
    let lookup_dir = options.lookup_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    compile_source(source, TreeBuilder::new(lookup_dir, options.duplicates), options.duplicates)
}

/// Compile a schema file. Imports resolve against `options.lookup_dir`, or
/// the file's own directory when unset.
pub fn compile_file(path: impl AsRef<Path>, options: &CompileOptions) -> Result<Schema, CompileError> {
    let path = path.as_ref();
    let canonical = path.canonicalize().map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = fs::read_to_string(&canonical).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let lookup_dir = match &options.lookup_dir {
        Some(dir) => dir.clone(),
        None => canonical.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")),
    };
    debug!(path = %canonical.display(), lookup_dir = %lookup_dir.display(), "compiling schema file");
    let builder = TreeBuilder::new(lookup_dir, options.duplicates).within(canonical);
    compile_source(&text, builder, options.duplicates)
}

fn compile_source(text: &str, mut builder: TreeBuilder, policy: DuplicatePolicy) -> Result<Schema, CompileError> {
    let source = SchemaSource::new(text);
    let root = source.parse()?;
    debug!("parsed schema source");
    let protocol = builder.build(root)?;
    debug!(
        messages = protocol.namespace.messages().count(),
        enums = protocol.namespace.enums().count(),
        services = protocol.services.len(),
        "built protocol"
    );
    let schema = resolve(&protocol, policy)?;
    debug!(messages = schema.messages().count(), "resolved schema");
    Ok(schema)
}

/// Turns a resolved schema into output source text.
pub trait Renderer {
    fn render(&self, schema: &Schema) -> Result<String, CompileError>;
}

/// Consumes rendered source and produces a loadable artifact.
pub trait BuildBackend {
    /// Returns the path of the produced artifact.
    fn build(&self, module: &str, source: &str, out_dir: &Path) -> Result<PathBuf, CompileError>;
}

/// Writes the rendered source verbatim to `<out_dir>/<module>.<extension>`.
#[derive(Debug, Clone)]
pub struct SourceFileBackend {
    pub extension: String,
}

impl SourceFileBackend {
    pub fn new(extension: impl Into<String>) -> Self {
        SourceFileBackend {
            extension: extension.into(),
        }
    }
}

impl Default for SourceFileBackend {
    fn default() -> Self {
        SourceFileBackend::new("txt")
    }
}

impl BuildBackend for SourceFileBackend {
    fn build(&self, module: &str, source: &str, out_dir: &Path) -> Result<PathBuf, CompileError> {
        fs::create_dir_all(out_dir).map_err(|source| CompileError::Io {
            path: out_dir.to_path_buf(),
            source,
        })?;
        let path = out_dir.join(format!("{}.{}", module, self.extension));
        fs::write(&path, source).map_err(|source| CompileError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), bytes = source.len(), "wrote module source");
        Ok(path)
    }
}

/// Explicit name wins; otherwise the schema's `package` property.
pub fn module_name(explicit: Option<&str>, schema: &Schema) -> Result<String, CompileError> {
    explicit
        .or_else(|| schema.package())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or(CompileError::OutputName)
}

/// Compile `input`, render it and hand the result to `backend`.
pub fn build(
    input: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    options: &CompileOptions,
    renderer: &dyn Renderer,
    backend: &dyn BuildBackend,
) -> Result<PathBuf, CompileError> {
    let schema = compile_file(input, options)?;
    let module = module_name(options.module_name.as_deref(), &schema)?;
    let source = renderer.render(&schema)?;
    backend.build(&module, &source, out_dir.as_ref())
}
