//! Indented structural view of a resolved schema, one declaration per line.

use crate::compile::Renderer;
use crate::error::CompileError;
use crate::ir::{Properties, PropertyValue};
use crate::resolve::{EnumId, MessageId, Schema};

/// Renders `Protocol:` / `Message:` / `Field:` / `Enum:` lines, two spaces
/// per nesting level. Fields print as `name type label wire`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrettyRenderer;

impl Renderer for PrettyRenderer {
    fn render(&self, schema: &Schema) -> Result<String, CompileError> {
        let mut out = String::new();
        line(&mut out, 0, "Protocol:");
        properties(&mut out, 1, "", &schema.properties);
        for path in &schema.imports {
            line(&mut out, 1, &format!("Import: {}", path.display()));
        }
        for &id in schema.root_enums() {
            enumeration(&mut out, 1, schema, id);
        }
        for &id in schema.roots() {
            message(&mut out, 1, schema, id);
        }
        for service in &schema.services {
            line(&mut out, 1, &format!("Service: {}", service.name));
            properties(&mut out, 2, "", &service.properties);
            for rpc in &service.rpcs {
                line(&mut out, 2, &format!("Rpc: {}({}) returns ({})", rpc.name, rpc.input, rpc.output));
            }
        }
        Ok(out)
    }
}

fn line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str(text);
    out.push('\n');
}

fn properties(out: &mut String, depth: usize, prefix: &str, props: &Properties) {
    for (key, value) in props.iter() {
        let path = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            PropertyValue::Value(lit) => line(out, depth, &format!("Option: {} = {}", path, lit)),
            PropertyValue::Record(inner) => properties(out, depth, &path, inner),
        }
    }
}

fn message(out: &mut String, depth: usize, schema: &Schema, id: MessageId) {
    let desc = schema.message(id);
    line(out, depth, &format!("Message: {}", desc.name));
    properties(out, depth + 1, "", &desc.properties);
    for range in &desc.extensions {
        line(out, depth + 1, &format!("Extensions: {} to {}", range.start(), range.end()));
    }
    for &nested in &desc.enums {
        enumeration(out, depth + 1, schema, nested);
    }
    for &nested in &desc.messages {
        message(out, depth + 1, schema, nested);
    }
    for field in &desc.fields {
        let mut text = format!(
            "Field: {} {} {} {}",
            field.name,
            field.type_name,
            field.label.as_str(),
            field.wire_type().as_u8()
        );
        if field.extended {
            text.push_str(" extended");
        }
        line(out, depth + 1, &text);
    }
}

fn enumeration(out: &mut String, depth: usize, schema: &Schema, id: EnumId) {
    let desc = schema.enumeration(id);
    line(out, depth, &format!("Enum: {}", desc.name));
    for value in &desc.values {
        line(out, depth + 1, &format!("Value: {} = {}", value.name, value.number));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile_str;

    #[test]
    fn test_render_nested_structure() {
        let schema = compile_str(
            "package demo;\n\
             message Outer {\n\
               enum Kind { A = 0; B = 1; }\n\
               message Inner { optional string s = 1; }\n\
               required int32 a = 1;\n\
               repeated Inner items = 2;\n\
               optional Kind kind = 3;\n\
             }\n",
        )
        .expect("compile");
        let text = PrettyRenderer.render(&schema).expect("render");
        let expected = "Protocol:\n\
                        \x20 Option: package = \"demo\"\n\
                        \x20 Message: Outer\n\
                        \x20   Enum: Kind\n\
                        \x20     Value: A = 0\n\
                        \x20     Value: B = 1\n\
                        \x20   Message: Inner\n\
                        \x20     Field: s string optional 2\n\
                        \x20   Field: a int32 required 0\n\
                        \x20   Field: items Outer_Inner repeated 2\n\
                        \x20   Field: kind Outer_Kind optional 0\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_marks_packed_and_extended() {
        let schema = compile_str(
            "message M { extensions 10 to max; repeated int32 d = 4; repeated int32 u = 5 [packed=false]; optional int32 e = 10; }",
        )
        .expect("compile");
        let text = PrettyRenderer.render(&schema).expect("render");
        assert!(text.contains("    Extensions: 10 to 10\n"));
        assert!(text.contains("    Field: d int32 repeated 2\n"));
        assert!(text.contains("    Field: u int32 repeated 0\n"));
        assert!(text.contains("    Field: e int32 optional 0 extended\n"));
    }
}
