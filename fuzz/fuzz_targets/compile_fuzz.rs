//! Compile fuzz target: feed arbitrary text through parse, build and resolve.
//! Compilation must not panic; it returns a schema or a `CompileError`.
//! Build with: cargo fuzz run compile_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    // Imports would touch the filesystem.
    if s.contains("import") {
        return;
    }
    let _ = protoschema::compile_str(s);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run compile_fuzz");
}
