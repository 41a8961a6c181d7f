//! Core data structures for parsed class definitions

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::{xxh3_128, Xxh3};

use crate::diagnostics::Diagnostic;
use crate::property::PropertyMap;

/// Normalizes a class or property name for lookup.
///
/// Names are compared ASCII-case-insensitively; the original spelling is kept
/// on the definition for display.
pub fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Identifier of one scan unit (an archive or a folder).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        SourceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        SourceId(id.to_string())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        SourceId(id)
    }
}

/// 128-bit freshness marker for a source, displayed as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Fingerprint(pub [u8; 16]);

impl Fingerprint {
    /// Fingerprint of a byte slice (XXH3-128).
    pub fn of_bytes(data: &[u8]) -> Self {
        Fingerprint(xxh3_128(data).to_le_bytes())
    }

    pub fn from_u128(value: u128) -> Self {
        Fingerprint(value.to_le_bytes())
    }

    pub fn as_u128(&self) -> u128 {
        u128::from_le_bytes(self.0)
    }

    pub fn to_hex(&self) -> String {
        format!("{:032x}", self.as_u128())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.as_u128())
    }
}

/// Incremental fingerprint over several inputs.
///
/// Each field is length-prefixed so that `("ab", "c")` and `("a", "bc")`
/// produce different fingerprints.
pub struct FingerprintBuilder {
    hasher: Xxh3,
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self { hasher: Xxh3::new() }
    }

    pub fn field(&mut self, data: &[u8]) -> &mut Self {
        self.hasher.update(&(data.len() as u64).to_le_bytes());
        self.hasher.update(data);
        self
    }

    pub fn number(&mut self, value: u64) -> &mut Self {
        self.hasher.update(&value.to_le_bytes());
        self
    }

    pub fn finish(&self) -> Fingerprint {
        Fingerprint::from_u128(self.hasher.digest128())
    }
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of a definition or diagnostic: file plus 1-based line and column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// What kind of block a definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassKind {
    Class,
    Enum,
    ForwardDeclaration,
}

/// A property value. Closed set: the parser never produces anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Text(String),
    Number(f64),
    Array(Vec<PropertyValue>),
    Class(Box<ClassDefinition>),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassDefinition> {
        match self {
            PropertyValue::Class(def) => Some(def),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PropertyValue::Text(_) => "text",
            PropertyValue::Number(_) => "number",
            PropertyValue::Array(_) => "array",
            PropertyValue::Class(_) => "class",
        }
    }

    /// Structural equality that ignores source locations of nested classes.
    pub fn content_eq(&self, other: &PropertyValue) -> bool {
        match (self, other) {
            (PropertyValue::Array(a), PropertyValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.content_eq(y))
            }
            (PropertyValue::Class(a), PropertyValue::Class(b)) => a.content_eq(b),
            _ => self == other,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(text: &str) -> Self {
        PropertyValue::Text(text.to_string())
    }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self {
        PropertyValue::Number(n)
    }
}

/// One parsed class, enum block or forward declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub name: String,
    pub parent: Option<String>,
    pub kind: ClassKind,
    pub properties: PropertyMap,
    pub source: SourceId,
    pub location: Location,
    /// Section container this class was lifted out of (e.g. `CfgVehicles`).
    pub container: Option<String>,
}

impl ClassDefinition {
    pub fn new(name: impl Into<String>, source: SourceId, location: Location) -> Self {
        Self {
            name: name.into(),
            parent: None,
            kind: ClassKind::Class,
            properties: PropertyMap::new(),
            source,
            location,
            container: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_kind(mut self, kind: ClassKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name, value);
        self
    }

    /// Normalized lookup key.
    pub fn key(&self) -> String {
        normalize(&self.name)
    }

    pub fn parent_key(&self) -> Option<String> {
        self.parent.as_deref().map(normalize)
    }

    pub fn is_forward_declaration(&self) -> bool {
        self.kind == ClassKind::ForwardDeclaration
    }

    /// Value of the conventional `displayName` property, if it is text.
    pub fn display_name(&self) -> Option<&str> {
        self.properties.get("displayName").and_then(PropertyValue::as_text)
    }

    /// Value of the conventional `scope` property, if it is numeric.
    pub fn scope(&self) -> Option<i64> {
        self.properties
            .get("scope")
            .and_then(PropertyValue::as_number)
            .map(|n| n as i64)
    }

    /// Inline nested classes, in declaration order.
    pub fn nested_classes(&self) -> impl Iterator<Item = &ClassDefinition> {
        self.properties.values().filter_map(PropertyValue::as_class)
    }

    /// Equality of name, parent, kind, container and properties; locations
    /// and source ids are ignored.
    pub fn content_eq(&self, other: &ClassDefinition) -> bool {
        self.name == other.name
            && self.parent == other.parent
            && self.kind == other.kind
            && self.container == other.container
            && self.properties.len() == other.properties.len()
            && self.properties.iter().zip(other.properties.iter()).all(|(a, b)| {
                a.name == b.name && a.value.content_eq(&b.value)
            })
    }
}

/// Output of parsing a single file.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub file: PathBuf,
    pub definitions: Vec<ClassDefinition>,
    pub enums: Vec<ClassDefinition>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParsedFile {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_hex() {
        let a = Fingerprint::of_bytes(b"class A {};");
        let b = Fingerprint::of_bytes(b"class A {};");
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 32);
        assert_eq!(a.to_string(), a.to_hex());
        assert_ne!(a, Fingerprint::of_bytes(b"class B {};"));
    }

    #[test]
    fn fingerprint_builder_separates_fields() {
        let mut left = FingerprintBuilder::new();
        left.field(b"ab").field(b"c");
        let mut right = FingerprintBuilder::new();
        right.field(b"a").field(b"bc");
        assert_ne!(left.finish(), right.finish());
    }

    #[test]
    fn content_eq_ignores_locations() {
        let src = SourceId::new("mod");
        let a = ClassDefinition::new("Car", src.clone(), Location::new("a.cpp", 1, 1))
            .with_parent("Vehicle")
            .with_property("speed", PropertyValue::Number(80.0));
        let b = ClassDefinition::new("Car", src, Location::new("b.cpp", 7, 3))
            .with_parent("Vehicle")
            .with_property("speed", PropertyValue::Number(80.0));
        assert!(a.content_eq(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn conventional_properties() {
        let def = ClassDefinition::new("Car", SourceId::new("m"), Location::default())
            .with_property("displayName", "Hatchback".into())
            .with_property("SCOPE", PropertyValue::Number(2.0));
        assert_eq!(def.display_name(), Some("Hatchback"));
        assert_eq!(def.scope(), Some(2));
    }
}
