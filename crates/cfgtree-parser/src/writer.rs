//! Renders definitions back to source text

use std::fmt::Write;

use cfgtree_core::{ClassDefinition, ClassKind, PropertyValue};

const INDENT: &str = "    ";

/// Renders definitions so that parsing the output yields definitions equal
/// in name, parent, kind and properties.
pub fn render(definitions: &[ClassDefinition]) -> String {
    let mut out = String::new();
    for definition in definitions {
        write_definition(&mut out, definition, 0);
    }
    out
}

pub fn render_definition(definition: &ClassDefinition) -> String {
    render(std::slice::from_ref(definition))
}

fn write_definition(out: &mut String, definition: &ClassDefinition, depth: usize) {
    let pad = INDENT.repeat(depth);
    match definition.kind {
        ClassKind::Enum => write_enum(out, definition, &pad),
        ClassKind::ForwardDeclaration if definition.parent.is_none() => {
            let _ = writeln!(out, "{pad}class {};", definition.name);
        }
        _ => {
            let _ = write!(out, "{pad}class {}", definition.name);
            if let Some(parent) = &definition.parent {
                let _ = write!(out, ": {parent}");
            }
            if definition.properties.is_empty() {
                out.push_str(" {};\n");
                return;
            }
            let _ = writeln!(out, "\n{pad}{{");
            for property in &definition.properties {
                match &property.value {
                    PropertyValue::Class(nested) => write_definition(out, nested, depth + 1),
                    PropertyValue::Array(items) => {
                        let _ = write!(out, "{pad}{INDENT}{}[] = ", property.name);
                        write_array(out, items);
                        out.push_str(";\n");
                    }
                    scalar => {
                        let _ = write!(out, "{pad}{INDENT}{} = ", property.name);
                        write_scalar(out, scalar);
                        out.push_str(";\n");
                    }
                }
            }
            let _ = writeln!(out, "{pad}}};");
        }
    }
}

fn write_enum(out: &mut String, definition: &ClassDefinition, pad: &str) {
    if definition.name.is_empty() {
        let _ = writeln!(out, "{pad}enum\n{pad}{{");
    } else {
        let _ = writeln!(out, "{pad}enum {}\n{pad}{{", definition.name);
    }
    let count = definition.properties.len();
    for (i, property) in definition.properties.iter().enumerate() {
        let _ = write!(out, "{pad}{INDENT}{} = ", property.name);
        write_scalar(out, &property.value);
        out.push_str(if i + 1 < count { ",\n" } else { "\n" });
    }
    let _ = writeln!(out, "{pad}}};");
}

fn write_array(out: &mut String, items: &[PropertyValue]) {
    out.push('{');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match item {
            PropertyValue::Array(inner) => write_array(out, inner),
            other => write_scalar(out, other),
        }
    }
    out.push('}');
}

fn write_scalar(out: &mut String, value: &PropertyValue) {
    match value {
        PropertyValue::Number(n) => {
            let _ = write!(out, "{n}");
        }
        PropertyValue::Text(text) => write_quoted(out, text),
        PropertyValue::Class(nested) => write_quoted(out, &nested.name),
        PropertyValue::Array(items) => write_array(out, items),
    }
}

fn write_quoted(out: &mut String, text: &str) {
    out.push('"');
    out.push_str(&text.replace('"', "\"\""));
    out.push('"');
}
