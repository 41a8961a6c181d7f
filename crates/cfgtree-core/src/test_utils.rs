//! Test utilities for building definitions without the parser

use crate::model::{ClassDefinition, ClassKind, Location, ParsedFile, SourceId};

/// A class in source `s` at `test.cpp:1:1`.
pub fn class(name: &str, parent: Option<&str>) -> ClassDefinition {
    class_in("s", name, parent)
}

pub fn class_in(source: &str, name: &str, parent: Option<&str>) -> ClassDefinition {
    let mut def = ClassDefinition::new(name, SourceId::new(source), Location::new("test.cpp", 1, 1));
    def.parent = parent.map(str::to_string);
    def
}

pub fn forward(name: &str) -> ClassDefinition {
    class(name, None).with_kind(ClassKind::ForwardDeclaration)
}

pub fn parsed(definitions: Vec<ClassDefinition>) -> ParsedFile {
    ParsedFile {
        definitions,
        ..ParsedFile::new("test.cpp")
    }
}
