//! Reading bytes written by one version of a message with another version.

use protoschema::{compile_str, Codec, CodecError, Value};

const SCHEMA: &str = r#"
message Old1 {
  required int32 a = 1;
  repeated int32 b = 2 [packed=false];
  optional int32 c = 3;
  required int32 d = 4;
  repeated int32 e = 5 [packed=false];
  optional int32 f = 6;
}

message New1 {
  required int32 d = 4;
  repeated int32 e = 5 [packed=false];
  optional int32 f = 6;
  required int32 g = 7;
  repeated int32 h = 8 [packed=false];
  optional int32 i = 9;
}

message Old1p {
  required int32 a = 1;
  repeated int32 b = 2;
  optional int32 c = 3;
  required int32 d = 4;
  repeated int32 e = 5;
  optional int32 f = 6;
}

message New1p {
  required int32 d = 4;
  repeated int32 e = 5;
  optional int32 f = 6;
  required int32 g = 7;
  repeated int32 h = 8;
  optional int32 i = 9;
}

message Old2 {
  message SubMessage { required int32 a = 1; }
  required SubMessage a = 1;
}

message New2 { required int32 a = 1; }

message Old3 {
  message SubMessage { required fixed32 a = 1; }
  required SubMessage a = 1;
}

message New3 {
  message SubMessage { required float a = 1; }
  required SubMessage a = 1;
}

message Old4 { required int32 a = 1; required int32 b = 2; }
message New4 { required int32 a = 2; required int32 b = 1; }

message Old5 { required uint32 a = 1; }
message New5 { required int32 a = 1; }

message Old6 {
  message SubMessage { required int32 a = 1; }
  required SubMessage a = 1;
}

message New6 { required string a = 1; }
message New6b { required bytes a = 1; }
"#;

fn codec() -> Codec {
    Codec::new(compile_str(SCHEMA).expect("compile"))
}

fn old1_bytes(codec: &Codec, name: &str) -> Vec<u8> {
    let mut old = codec.message(name).expect("old");
    old.set("a", 1).expect("a");
    old.set("b", Value::list([1, 2, 3])).expect("b");
    old.set("c", 4).expect("c");
    old.set("d", 5).expect("d");
    old.set("e", Value::list([6, 7, 8])).expect("e");
    old.set("f", 9).expect("f");
    codec.encode(&old).expect("encode")
}

fn assert_new1_view(codec: &Codec, name: &str, bytes: &[u8]) {
    let new = codec.decode(name, bytes).expect("decode");
    // Dropped fields do not exist on the new type at all.
    for gone in ["a", "b", "c"] {
        assert!(matches!(new.get(gone), Err(CodecError::UnknownField(_))));
    }
    assert_eq!(new.get("d").expect("d"), &Value::I32(5));
    assert_eq!(new.get("e").expect("e"), &Value::list([6, 7, 8]));
    assert_eq!(new.get("f").expect("f"), &Value::I32(9));
    // Added fields: required stays absent, repeated is empty, optional reads its default.
    assert!(!new.has("g"));
    assert_eq!(new.get("h").expect("h"), &Value::List(Vec::new()));
    assert!(!new.has("i"));
    assert_eq!(new.get_or_default("i").expect("i"), Value::I32(0));
    // The missing required field only matters when writing the new version back.
    assert!(matches!(codec.encode(&new), Err(CodecError::MissingRequired { .. })));
}

#[test]
fn test_added_and_removed_fields() {
    let codec = codec();
    let bytes = old1_bytes(&codec, "Old1");
    assert_new1_view(&codec, "New1", &bytes);
}

#[test]
fn test_added_and_removed_fields_packed() {
    let codec = codec();
    let bytes = old1_bytes(&codec, "Old1p");
    assert_new1_view(&codec, "New1p", &bytes);
}

#[test]
fn test_packed_and_unpacked_writers_interoperate() {
    let codec = codec();
    let unpacked = old1_bytes(&codec, "Old1");
    let packed = old1_bytes(&codec, "Old1p");
    assert_ne!(unpacked, packed);
    assert_new1_view(&codec, "New1p", &unpacked);
    assert_new1_view(&codec, "New1", &packed);
}

#[test]
fn test_message_read_as_int_is_rejected() {
    let codec = codec();
    let mut old = codec.message("Old2").expect("Old2");
    let mut sub = old.new_child("a").expect("child");
    sub.set("a", 1).expect("sub.a");
    old.set("a", sub).expect("a");
    let bytes = codec.encode(&old).expect("encode");
    assert!(matches!(
        codec.decode("New2", &bytes),
        Err(CodecError::WireTypeMismatch { expected: 0, found: 2, .. })
    ));
}

#[test]
fn test_fixed32_reinterpreted_as_float() {
    let codec = codec();
    let mut old = codec.message("Old3").expect("Old3");
    let mut sub = old.new_child("a").expect("child");
    sub.set("a", 1u32).expect("sub.a");
    old.set("a", sub).expect("a");
    let bytes = codec.encode(&old).expect("encode");

    let same = codec.decode("Old3", &bytes).expect("old");
    let same_sub = same.get("a").expect("a").as_message().expect("message").clone();
    assert_eq!(same_sub.get("a").expect("a"), &Value::U32(1));

    let new = codec.decode("New3", &bytes).expect("new");
    let new_sub = new.get("a").expect("a").as_message().expect("message").clone();
    assert_eq!(new_sub.type_name(), "New3_SubMessage");
    assert_eq!(new_sub.get("a").expect("a"), &Value::F32(f32::from_bits(1)));
}

#[test]
fn test_swapped_indices() {
    let codec = codec();
    let mut old = codec.message("Old4").expect("Old4");
    old.set("a", 1).expect("a");
    old.set("b", 2).expect("b");
    let bytes = codec.encode(&old).expect("encode");
    let new = codec.decode("New4", &bytes).expect("decode");
    assert_eq!(new.get("a").expect("a"), &Value::I32(2));
    assert_eq!(new.get("b").expect("b"), &Value::I32(1));
}

#[test]
fn test_unsigned_read_as_signed() {
    let codec = codec();
    let mut old = codec.message("Old5").expect("Old5");
    old.set("a", 1u32 << 31).expect("a");
    let bytes = codec.encode(&old).expect("encode");
    assert_eq!(codec.decode("Old5", &bytes).expect("old").get("a").expect("a"), &Value::U32(1 << 31));
    assert_eq!(codec.decode("New5", &bytes).expect("new").get("a").expect("a"), &Value::I32(i32::MIN));
}

fn old6_bytes(codec: &Codec, a: i32) -> Vec<u8> {
    let mut old = codec.message("Old6").expect("Old6");
    let mut sub = old.new_child("a").expect("child");
    sub.set("a", a).expect("sub.a");
    old.set("a", sub).expect("a");
    codec.encode(&old).expect("encode")
}

#[test]
fn test_message_read_as_bytes() {
    let codec = codec();
    let bytes = old6_bytes(&codec, 150);
    let new = codec.decode("New6b", &bytes).expect("decode");
    let payload = new.get("a").expect("a").as_bytes().expect("bytes").to_vec();
    assert_eq!(payload, vec![0x08, 0x96, 0x01]);
    let sub = codec.decode("Old6_SubMessage", &payload).expect("sub");
    assert_eq!(sub.get("a").expect("a"), &Value::I32(150));
}

#[test]
fn test_message_read_as_string() {
    let codec = codec();
    let ascii = old6_bytes(&codec, 65);
    let new = codec.decode("New6", &ascii).expect("decode");
    assert_eq!(new.get("a").expect("a"), &Value::String("\u{8}A".to_string()));

    // 0x96 on its own is not valid UTF-8.
    let binary = old6_bytes(&codec, 150);
    assert!(matches!(codec.decode("New6", &binary), Err(CodecError::InvalidUtf8(_))));
}
