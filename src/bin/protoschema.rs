//! Compile a schema file and write the rendered module.
//!
//! Usage:
//!   protoschema INPUT [-o DIR] [--name NAME] [--strict] [--dump]
//!
//! Options:
//!   -o, --out DIR   Output directory (default: current directory)
//!   --name NAME     Output module name (default: the schema's `package`)
//!   --strict        Duplicate names are errors instead of warnings
//!   --dump          Print the rendered schema to stdout instead of writing it
//!
//! Log verbosity follows `RUST_LOG` (default `warn`).

use std::path::PathBuf;

use anyhow::{bail, Context};
use protoschema::{
    build, compile_file, CompileOptions, DuplicatePolicy, PrettyRenderer, Renderer, SourceFileBackend,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

struct Args {
    input: PathBuf,
    out_dir: PathBuf,
    name: Option<String>,
    strict: bool,
    dump: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut input = None;
    let mut out_dir = PathBuf::from(".");
    let mut name = None;
    let mut strict = false;
    let mut dump = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" | "--out" => {
                out_dir = args.next().map(PathBuf::from).context("-o requires a directory")?;
            }
            "--name" => {
                name = Some(args.next().context("--name requires a value")?);
            }
            "--strict" => strict = true,
            "--dump" => dump = true,
            "-h" | "--help" => {
                eprintln!("usage: protoschema INPUT [-o DIR] [--name NAME] [--strict] [--dump]");
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown option {}", other),
            other => {
                if input.replace(PathBuf::from(other)).is_some() {
                    bail!("more than one input file given");
                }
            }
        }
    }
    Ok(Args {
        input: input.context("missing INPUT schema file")?,
        out_dir,
        name,
        strict,
        dump,
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = parse_args()?;
    let mut options = CompileOptions::new();
    if args.strict {
        options = options.duplicates(DuplicatePolicy::Error);
    }
    if let Some(name) = &args.name {
        options = options.module_name(name.clone());
    }

    if args.dump {
        let schema = compile_file(&args.input, &options)
            .with_context(|| format!("compiling {}", args.input.display()))?;
        print!("{}", PrettyRenderer.render(&schema)?);
        return Ok(());
    }

    let path = build(
        &args.input,
        &args.out_dir,
        &options,
        &PrettyRenderer,
        &SourceFileBackend::default(),
    )
    .with_context(|| format!("building {}", args.input.display()))?;
    println!("{}", path.display());
    Ok(())
}
