//! Compilation: scoped name resolution, extensions, options, imports,
//! duplicate handling and the render/build boundary.

use std::fs;

use protoschema::builder::TreeBuilder;
use protoschema::{
    build, compile_file, compile_str, compile_str_with, module_name, Codec, CompileError, CompileOptions,
    DuplicatePolicy, FieldKind, Label, Literal, PrettyRenderer, Renderer, SchemaSource, SourceFileBackend, Symbol,
    Value, WireType,
};

#[test]
fn test_nested_type_by_short_name() {
    let schema = compile_str(
        "message Outer {\n\
           message Inner { optional int32 v = 1; }\n\
           optional Inner i = 1;\n\
         }",
    )
    .expect("compile");
    let outer = schema.message(schema.message_id("Outer").expect("Outer"));
    let inner_id = schema.message_id("Outer_Inner").expect("flattened");
    assert_eq!(schema.message_id("Outer.Inner"), Some(inner_id));
    let field = outer.field("i").expect("i");
    assert_eq!(field.kind, FieldKind::Message(inner_id));
    assert_eq!(field.type_name, "Outer_Inner");
    assert_eq!(field.wire_type(), WireType::LengthDelimited);
    assert_eq!(schema.message(inner_id).fullname, "Outer_Inner");
    assert_eq!(schema.message(inner_id).parent, schema.message_id("Outer"));
}

#[test]
fn test_lookup_walks_out_through_ancestors() {
    let schema = compile_str(
        "message A {\n\
           message B {\n\
             message C { optional D d = 1; optional Top t = 2; }\n\
           }\n\
           message D { optional int32 x = 1; }\n\
         }\n\
         message Top { optional int32 y = 1; }",
    )
    .expect("compile");
    let c = schema.message(schema.message_id("A_B_C").expect("C"));
    assert_eq!(c.field("d").expect("d").type_name, "A_D");
    assert_eq!(c.field("t").expect("t").type_name, "Top");
}

#[test]
fn test_inner_scope_shadows_root_and_absolute_names_do_not() {
    let schema = compile_str(
        "message Inner { optional int32 root = 1; }\n\
         message Outer {\n\
           message Inner { optional int32 nested = 1; }\n\
           optional Inner near = 1;\n\
           optional .Inner far = 2;\n\
           optional Outer.Inner dotted = 3;\n\
         }",
    )
    .expect("compile");
    let outer = schema.message(schema.message_id("Outer").expect("Outer"));
    assert_eq!(outer.field("near").expect("near").type_name, "Outer_Inner");
    assert_eq!(outer.field("far").expect("far").type_name, "Inner");
    assert_eq!(outer.field("dotted").expect("dotted").type_name, "Outer_Inner");
}

#[test]
fn test_unresolved_name() {
    let err = compile_str("message Outer { message Inner { optional Missing m = 1; } }").unwrap_err();
    match err {
        CompileError::Name { name, scope } => {
            assert_eq!(name, "Missing");
            assert_eq!(scope, "Outer.Inner");
        }
        other => panic!("unexpected {:?}", other),
    }
    // An absolute name only looks at the root.
    let err = compile_str("message Outer { message Inner {} optional .Inner i = 1; }").unwrap_err();
    assert!(matches!(err, CompileError::Name { .. }));
}

#[test]
fn test_root_dotted_find() {
    let schema = compile_str(
        "message Outer { enum Kind { A = 0; } message Inner { optional int32 v = 1; } }\n\
         enum Color { RED = 1; }",
    )
    .expect("compile");
    assert!(matches!(schema.find("Outer.Inner"), Some(Symbol::Message(_))));
    assert!(matches!(schema.find("Outer.Kind"), Some(Symbol::Enum(_))));
    assert!(matches!(schema.find("Color"), Some(Symbol::Enum(_))));
    assert!(schema.find("Outer.Kind.A").is_none());
    assert!(schema.find("Nope").is_none());
    assert!(schema.message_id("Outer.Kind").is_none());
}

#[test]
fn test_enum_fields_and_defaults() {
    let schema = compile_str(
        "message M {\n\
           enum Color { RED = 1; GREEN = 2; BLUE = 3; }\n\
           optional Color c = 1 [default = GREEN];\n\
           optional Color d = 2;\n\
           optional int32 n = 3 [default = -7];\n\
           optional bool b = 4 [default = true];\n\
           repeated Color many = 5 [packed=true];\n\
         }",
    )
    .expect("compile");
    let id = schema.message_id("M").expect("M");
    let m = schema.message(id);
    let c = m.field("c").expect("c");
    assert!(matches!(c.kind, FieldKind::Enum(_)));
    assert_eq!(c.wire_type(), WireType::Varint);
    assert_eq!(c.default, Some(Value::Enum(2)));
    assert_eq!(m.field("n").expect("n").default, Some(Value::I32(-7)));
    assert_eq!(m.field("b").expect("b").default, Some(Value::Bool(true)));
    assert_eq!(m.field("many").expect("many").wire_type(), WireType::LengthDelimited);

    let codec = Codec::new(schema);
    let msg = codec.message("M").expect("M");
    assert_eq!(msg.get_or_default("c").expect("c"), Value::Enum(2));
    // No default: the first declared value.
    assert_eq!(msg.get_or_default("d").expect("d"), Value::Enum(1));
}

#[test]
fn test_unknown_enum_default_is_rejected() {
    let err = compile_str("message M { enum E { A = 0; } optional E e = 1 [default = Z]; }").unwrap_err();
    assert!(matches!(err, CompileError::InvalidOption { ref option, .. } if option == "default"));
}

#[test]
fn test_packed_needs_repeated_packable_field() {
    for src in [
        "message M { repeated string s = 1 [packed=true]; }",
        "message M { optional int32 s = 1 [packed=true]; }",
        "message M { message N {} repeated N s = 1 [packed=true]; }",
        "message M { repeated int32 s = 1 [packed=1]; }",
    ] {
        assert!(
            matches!(compile_str(src), Err(CompileError::InvalidOption { .. })),
            "{}",
            src
        );
    }
    assert!(compile_str("message M { repeated double s = 1 [packed=false]; }").is_ok());
}

#[test]
fn test_repeated_packable_fields_pack_by_default() {
    let schema = compile_str(
        "message M {\n\
           enum E { A = 0; }\n\
           message N {}\n\
           repeated int32 plain = 1;\n\
           repeated E kinds = 2;\n\
           repeated fixed64 opted_out = 3 [packed=false];\n\
           repeated string names = 4;\n\
           repeated N nodes = 5;\n\
           optional int32 single = 6;\n\
         }",
    )
    .expect("compile");
    let m = schema.message(schema.message_id("M").expect("M"));
    let packed: Vec<(&str, bool)> = m.fields.iter().map(|f| (f.name.as_str(), f.packed)).collect();
    assert_eq!(
        packed,
        vec![
            ("plain", true),
            ("kinds", true),
            ("opted_out", false),
            ("names", false),
            ("nodes", false),
            ("single", false),
        ]
    );
    assert_eq!(m.field("plain").expect("plain").wire_type(), WireType::LengthDelimited);
    assert_eq!(m.field("opted_out").expect("opted_out").wire_type(), WireType::Fixed64);
}

#[test]
fn test_field_index_validation() {
    assert!(matches!(
        compile_str("message M { optional int32 a = 0; }"),
        Err(CompileError::InvalidIndex { .. })
    ));
    assert!(matches!(
        compile_str("message M { optional int32 a = 536870912; }"),
        Err(CompileError::InvalidIndex { .. })
    ));
    assert!(compile_str("message M { optional int32 a = 536870911; }").is_ok());
    match compile_str("message M { required int32 a = 1; repeated int32 b = 1; }") {
        Err(CompileError::DuplicateIndex { index, first, second, .. }) => {
            assert_eq!(index, 1);
            assert_eq!(first, "a");
            assert_eq!(second, "b");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_fields_sorted_and_partitioned() {
    let schema = compile_str(
        "message M { repeated int32 c = 3; required int32 a = 1; optional int32 b = 2; required int32 d = 4; }",
    )
    .expect("compile");
    let m = schema.message(schema.message_id("M").expect("M"));
    let order: Vec<u32> = m.fields.iter().map(|f| f.index).collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
    let required: Vec<&str> = m.partition(Label::Required).map(|f| f.name.as_str()).collect();
    assert_eq!(required, vec!["a", "d"]);
    assert_eq!(m.max_index(), 4);
    assert_eq!(m.field_by_index(3).expect("#3").name, "c");
}

#[test]
fn test_open_ended_extension_range() {
    let schema = compile_str(
        "message M {\n\
           extensions 2 to max;\n\
           optional int32 a = 1;\n\
           optional int32 b = 2;\n\
           optional int32 c = 3;\n\
         }",
    )
    .expect("compile");
    let m = schema.message(schema.message_id("M").expect("M"));
    assert_eq!(m.extensions, vec![2..=3]);
    assert_eq!(m.extended.keys().map(String::as_str).collect::<Vec<_>>(), vec!["b", "c"]);
    assert!(!m.field("a").expect("a").extended);
    assert!(m.field("c").expect("c").extended);
}

#[test]
fn test_invalid_extension_range() {
    assert!(matches!(
        compile_str("message M { extensions 10 to 5; }"),
        Err(CompileError::InvalidExtension { .. })
    ));
}

#[test]
fn test_extend_merges_into_target() {
    let schema = compile_str(
        "message Base {\n\
           required int32 a = 1;\n\
           extensions 100 to 199;\n\
         }\n\
         extend Base {\n\
           optional string note = 100;\n\
         }\n\
         message Holder {\n\
           extend Base { optional int32 extra = 150; }\n\
         }",
    )
    .expect("compile");
    let base = schema.message(schema.message_id("Base").expect("Base"));
    assert!(base.field("note").expect("note").extended);
    assert_eq!(base.field("extra").expect("extra").index, 150);
    assert_eq!(base.extended.len(), 2);

    let codec = Codec::new(schema);
    let mut msg = codec.message("Base").expect("Base");
    msg.set("a", 1).expect("a");
    msg.extensions_mut().set("note", "hi").expect("note");
    msg.extensions_mut().set(150u32, 7).expect("extra");
    let bytes = codec.encode(&msg).expect("encode");
    assert_eq!(bytes, vec![0x08, 0x01, 0xA2, 0x06, 0x02, b'h', b'i', 0xB0, 0x09, 0x07]);
    assert_eq!(codec.decode("Base", &bytes).expect("decode"), msg);
}

#[test]
fn test_extend_outside_ranges() {
    let err = compile_str("message Base { extensions 100 to 199; } extend Base { optional int32 x = 5; }").unwrap_err();
    match err {
        CompileError::ExtendOutOfRange { target, field, index } => {
            assert_eq!(target, "Base");
            assert_eq!(field, "x");
            assert_eq!(index, 5);
        }
        other => panic!("unexpected {:?}", other),
    }
    // `max` is open-ended for extenders.
    assert!(compile_str("message Base { extensions 100 to max; } extend Base { optional int32 x = 5000; }").is_ok());
}

#[test]
fn test_extend_index_collision() {
    let err = compile_str("message Base { optional int32 a = 100; extensions 100 to 199; } extend Base { optional int32 b = 100; }")
        .unwrap_err();
    assert!(matches!(err, CompileError::DuplicateIndex { index: 100, .. }));
}

#[test]
fn test_duplicate_policy() {
    let src = "message M { optional int32 a = 1; optional string a = 2; }\nmessage M { optional bool z = 1; }";
    let schema = compile_str(src).expect("warn policy");
    let m = schema.message(schema.message_id("M").expect("M"));
    assert_eq!(m.fields.len(), 1);
    assert_eq!(m.fields[0].name, "z");

    let strict = CompileOptions::new().duplicates(DuplicatePolicy::Error);
    match compile_str_with(src, &strict) {
        Err(CompileError::Duplicate { kind, name, .. }) => {
            assert_eq!(kind, "field");
            assert_eq!(name, "a");
        }
        other => panic!("unexpected {:?}", other),
    }

    let overwritten = compile_str("message M { optional int32 a = 1; optional string a = 2; }").expect("warn");
    let m = overwritten.message(overwritten.message_id("M").expect("M"));
    assert_eq!(m.field("a").expect("a").index, 2);
    assert!(m.field_by_index(1).is_none());
}

#[test]
fn test_type_name_collision_between_message_and_enum() {
    let src = "message Thing {} enum Thing { A = 0; }";
    assert!(compile_str(src).is_ok());
    let strict = CompileOptions::new().duplicates(DuplicatePolicy::Error);
    assert!(matches!(
        compile_str_with(src, &strict),
        Err(CompileError::Duplicate { kind: "type", .. })
    ));
}

#[test]
fn test_options_and_properties() {
    let schema = compile_str(
        "package my.pkg;\n\
         option debug = true;\n\
         option outer.inner = 'x';\n\
         option outer.count = 0x10;\n\
         message M { option immutable = true; optional int32 a = 1 [deprecated = true]; }",
    )
    .expect("compile");
    assert_eq!(schema.package(), Some("my_pkg"));
    assert!(schema.debug());
    assert_eq!(schema.properties.value("outer.inner"), Some(&Literal::String("x".to_string())));
    assert_eq!(schema.properties.value("outer.count"), Some(&Literal::Int(16)));
    let m = schema.message(schema.message_id("M").expect("M"));
    assert!(m.properties.flag("immutable"));
    assert_eq!(m.field("a").expect("a").options.get("deprecated"), Some(&Literal::Bool(true)));
}

#[test]
fn test_services_are_carried() {
    let schema = compile_str(
        "message Req { optional int32 id = 1; }\n\
         message Resp { optional string body = 1; }\n\
         service Store {\n\
           option version = 2;\n\
           rpc Get(Req) returns (Resp);\n\
           rpc Put(Req) returns (Resp) { option idempotent = true; }\n\
         }",
    )
    .expect("compile");
    assert_eq!(schema.services.len(), 1);
    let store = &schema.services[0];
    assert_eq!(store.name, "Store");
    assert_eq!(store.rpcs.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["Get", "Put"]);
    assert_eq!(store.rpcs[0].input.to_string(), "Req");
    assert!(store.rpcs[1].properties.flag("idempotent"));
}

#[test]
fn test_comments_and_parse_errors() {
    let schema = compile_str(
        "// leading comment\n\
         message M { // trailing\n\
           /* block */ optional string url = 1 [default = \"http://x\"];\n\
         }",
    )
    .expect("compile");
    let m = schema.message(schema.message_id("M").expect("M"));
    assert_eq!(m.field("url").expect("url").default, Some(Value::String("http://x".to_string())));
    assert!(m.doc.contains("// trailing"));

    match compile_str("message M {\n  optional int32 a = ;\n}") {
        Err(CompileError::Parse { line, .. }) => assert_eq!(line, 2),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(compile_str("messageM {}"), Err(CompileError::Parse { .. })));
}

#[test]
fn test_builder_requires_one_protocol() {
    let source = SchemaSource::new("message M { optional int32 a = 1; }");
    let root = source.parse().expect("parse");
    let message = root.into_inner().next().expect("message");
    let mut builder = TreeBuilder::new(".", DuplicatePolicy::Warn);
    assert!(matches!(builder.build(message), Err(CompileError::ProtocolCount(0))));
}

#[test]
fn test_imports_merge_into_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("base.proto"),
        "message Shared { required int32 v = 1; }\nenum Level { LOW = 0; HIGH = 1; }\n",
    )
    .expect("write base");
    let main = dir.path().join("main.proto");
    fs::write(
        &main,
        "package app;\nimport \"base.proto\";\nmessage Use { required Shared s = 1; optional Level l = 2; }\n",
    )
    .expect("write main");

    let schema = compile_file(&main, &CompileOptions::default()).expect("compile");
    assert_eq!(schema.imports.len(), 1);
    assert!(schema.message_id("Shared").is_some());
    let use_id = schema.message_id("Use").expect("Use");
    assert_eq!(schema.message(use_id).field("s").expect("s").type_name, "Shared");
    assert_eq!(schema.message(use_id).field("l").expect("l").type_name, "Level");
    assert_eq!(schema.package(), Some("app"));
}

#[test]
fn test_import_from_in_memory_source_uses_lookup_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("dep.proto"), "message Dep { optional int32 x = 1; }").expect("write");
    let options = CompileOptions::new().lookup_dir(dir.path());
    let schema = compile_str_with("import 'dep.proto'; message M { optional Dep d = 1; }", &options).expect("compile");
    assert!(schema.message_id("Dep").is_some());
}

#[test]
fn test_import_cycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("a.proto"), "import \"b.proto\"; message A {}").expect("write a");
    fs::write(dir.path().join("b.proto"), "import \"a.proto\"; message B {}").expect("write b");
    let err = compile_file(dir.path().join("a.proto"), &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, CompileError::ImportCycle { .. }), "{:?}", err);
}

#[test]
fn test_import_errors_name_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("bad.proto"), "message {").expect("write");
    fs::write(dir.path().join("main.proto"), "import \"bad.proto\";").expect("write");
    match compile_file(dir.path().join("main.proto"), &CompileOptions::default()) {
        Err(CompileError::Import { path, source }) => {
            assert!(path.ends_with("bad.proto"));
            assert!(matches!(*source, CompileError::Parse { .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
    fs::write(dir.path().join("missing.proto"), "import \"nope.proto\";").expect("write");
    assert!(matches!(
        compile_file(dir.path().join("missing.proto"), &CompileOptions::default()),
        Err(CompileError::Io { .. })
    ));
}

#[test]
fn test_import_duplicates_follow_policy() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("dep.proto"), "message Same { optional int32 x = 1; }").expect("write");
    fs::write(
        dir.path().join("main.proto"),
        "import \"dep.proto\"; message Same { optional string y = 2; }",
    )
    .expect("write");
    let main = dir.path().join("main.proto");
    let schema = compile_file(&main, &CompileOptions::default()).expect("warn");
    let same = schema.message(schema.message_id("Same").expect("Same"));
    assert!(same.field("y").is_some());
    assert!(same.field("x").is_none());

    let strict = CompileOptions::new().duplicates(DuplicatePolicy::Error);
    assert!(matches!(compile_file(&main, &strict), Err(CompileError::Duplicate { .. })));
}

#[test]
fn test_module_name_and_build() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("shapes.proto");
    fs::write(&input, "package geo.shapes;\nmessage Point { required sint32 x = 1; required sint32 y = 2; }\n")
        .expect("write");
    let out = dir.path().join("out");

    let path = build(
        &input,
        &out,
        &CompileOptions::default(),
        &PrettyRenderer,
        &SourceFileBackend::new("txt"),
    )
    .expect("build");
    assert_eq!(path, out.join("geo_shapes.txt"));
    let text = fs::read_to_string(&path).expect("read");
    assert!(text.starts_with("Protocol:\n"));
    assert!(text.contains("  Message: Point\n    Field: x sint32 required 0\n"));

    let named = CompileOptions::new().module_name("custom");
    let path = build(&input, &out, &named, &PrettyRenderer, &SourceFileBackend::new("dump")).expect("build");
    assert_eq!(path, out.join("custom.dump"));
}

#[test]
fn test_missing_output_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("anon.proto");
    fs::write(&input, "message M { optional int32 a = 1; }").expect("write");
    let schema = compile_file(&input, &CompileOptions::default()).expect("compile");
    assert!(matches!(module_name(None, &schema), Err(CompileError::OutputName)));
    assert!(matches!(
        build(&input, dir.path(), &CompileOptions::default(), &PrettyRenderer, &SourceFileBackend::default()),
        Err(CompileError::OutputName)
    ));
    assert_eq!(PrettyRenderer.render(&schema).expect("render").lines().next(), Some("Protocol:"));
}
