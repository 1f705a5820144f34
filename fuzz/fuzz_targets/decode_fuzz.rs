//! Decode fuzz target: arbitrary bytes against a fixed schema covering every
//! wire class. Decoding must fail cleanly, and anything that decodes must
//! re-encode and decode to the same message.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const SCHEMA: &str = r#"
message Inner { optional sint64 z = 1; optional bytes raw = 2; }
message Outer {
  optional int32 a = 1;
  optional string s = 2;
  repeated Inner items = 3;
  repeated int32 packed = 4 [packed=true];
  optional fixed32 f = 5;
  optional double d = 6;
}
"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let codec = match protoschema::compile_str(SCHEMA) {
        Ok(schema) => protoschema::Codec::new(schema),
        Err(_) => return,
    };
    if let Ok(msg) = codec.decode("Outer", data) {
        let bytes = codec.encode(&msg).expect("re-encode");
        let again = codec.decode("Outer", &bytes).expect("re-decode");
        // NaN doubles never compare equal.
        if !format!("{:?}", msg).contains("NaN") {
            assert_eq!(again, msg);
        }
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
