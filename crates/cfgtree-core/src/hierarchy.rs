//! Linked class hierarchy: a flat name-indexed arena with parent links by name

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, Severity};
use crate::model::{normalize, ClassDefinition, Fingerprint, SourceId};
use crate::validator::PropertyResolver;

/// One class in a hierarchy together with its resolved links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassNode {
    pub definition: ClassDefinition,
    /// Normalized key of the resolved parent, if the declared parent exists.
    pub parent: Option<String>,
    /// Normalized keys of direct children.
    pub children: BTreeSet<String>,
}

impl ClassNode {
    pub fn new(definition: ClassDefinition) -> Self {
        Self {
            definition,
            parent: None,
            children: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// Why a class was quarantined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidReason {
    /// Member of an inheritance cycle; `chain` is the display form `A -> B -> A`.
    Cycle { chain: String },
    /// Declared parent does not exist (strict mode only).
    UnresolvedParent { parent: String },
}

/// All classes of one scan pass plus their parent/child links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassHierarchy {
    pub source: SourceId,
    pub fingerprint: Fingerprint,
    pub(crate) nodes: BTreeMap<String, ClassNode>,
    pub(crate) roots: BTreeSet<String>,
    pub(crate) invalid: BTreeMap<String, Vec<InvalidReason>>,
    pub(crate) enums: Vec<ClassDefinition>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl ClassHierarchy {
    pub fn new(source: SourceId, fingerprint: Fingerprint) -> Self {
        Self {
            source,
            fingerprint,
            nodes: BTreeMap::new(),
            roots: BTreeSet::new(),
            invalid: BTreeMap::new(),
            enums: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(&normalize(name))
    }

    pub fn node(&self, name: &str) -> Option<&ClassNode> {
        self.nodes.get(&normalize(name))
    }

    pub fn class(&self, name: &str) -> Option<&ClassDefinition> {
        self.node(name).map(|n| &n.definition)
    }

    /// Iterate over all nodes in key order.
    pub fn nodes(&self) -> impl Iterator<Item = &ClassNode> {
        self.nodes.values()
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDefinition> {
        self.nodes.values().map(|n| &n.definition)
    }

    /// Display names of classes without a resolvable parent.
    pub fn roots(&self) -> BTreeSet<String> {
        self.display_names(self.roots.iter())
    }

    /// Display names of roots that name a parent missing from this
    /// hierarchy.
    pub fn unresolved_roots(&self) -> BTreeSet<String> {
        self.display_names(
            self.roots
                .iter()
                .filter(|key| self.nodes.get(*key).is_some_and(|n| n.definition.parent.is_some())),
        )
    }

    /// Display names of classes that own or inherit `property`.
    ///
    /// Resolves the whole hierarchy; hold a [`PropertyResolver`] instead when
    /// asking repeatedly.
    pub fn classes_with_property(&self, property: &str) -> BTreeSet<String> {
        PropertyResolver::new(self).classes_with_property(self, property)
    }

    pub fn is_root(&self, name: &str) -> bool {
        self.roots.contains(&normalize(name))
    }

    pub fn parent_of(&self, name: &str) -> Option<&ClassNode> {
        let parent = self.node(name)?.parent.as_ref()?;
        self.nodes.get(parent)
    }

    /// Display names of direct children.
    pub fn children_of(&self, name: &str) -> BTreeSet<String> {
        match self.node(name) {
            Some(node) => self.display_names(node.children.iter()),
            None => BTreeSet::new(),
        }
    }

    /// Display names of all transitive children, breadth-first order collapsed
    /// into a set. Safe on cyclic input.
    pub fn descendants_of(&self, name: &str) -> BTreeSet<String> {
        let key = normalize(name);
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(node) = self.nodes.get(&key) {
            queue.extend(node.children.iter().cloned());
        }
        while let Some(current) = queue.pop_front() {
            if current == key || !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                queue.extend(node.children.iter().cloned());
            }
        }
        self.display_names(seen.iter())
    }

    /// Display names from `name` up to its root, starting with `name` itself.
    /// Stops when a cycle would repeat a class.
    pub fn ancestry(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.nodes.get(&normalize(name));
        while let Some(node) = current {
            if !seen.insert(node.definition.key()) {
                break;
            }
            chain.push(node.definition.name.clone());
            current = node.parent.as_ref().and_then(|p| self.nodes.get(p));
        }
        chain
    }

    pub fn is_invalid(&self, name: &str) -> bool {
        self.invalid.contains_key(&normalize(name))
    }

    pub fn invalid_reasons(&self, name: &str) -> &[InvalidReason] {
        self.invalid
            .get(&normalize(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Display names of every quarantined class.
    pub fn invalid_classes(&self) -> BTreeSet<String> {
        self.display_names(self.invalid.keys())
    }

    pub fn enums(&self) -> &[ClassDefinition] {
        &self.enums
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error).count()
    }

    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub(crate) fn mark_invalid(&mut self, key: &str, reason: InvalidReason) {
        let reasons = self.invalid.entry(key.to_string()).or_default();
        if !reasons.contains(&reason) {
            reasons.push(reason);
        }
    }

    fn display_names<'a>(&self, keys: impl Iterator<Item = &'a String>) -> BTreeSet<String> {
        keys.filter_map(|k| self.nodes.get(k))
            .map(|n| n.definition.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Location;

    fn linked(pairs: &[(&str, Option<&str>)]) -> ClassHierarchy {
        let mut h = ClassHierarchy::new(SourceId::new("t"), Fingerprint::default());
        for (name, parent) in pairs {
            let mut def = ClassDefinition::new(*name, SourceId::new("t"), Location::default());
            def.parent = parent.map(str::to_string);
            h.nodes.insert(normalize(name), ClassNode::new(def));
        }
        for (name, parent) in pairs {
            let key = normalize(name);
            match parent.map(normalize) {
                Some(p) if h.nodes.contains_key(&p) => {
                    if let Some(node) = h.nodes.get_mut(&key) {
                        node.parent = Some(p.clone());
                    }
                    if let Some(node) = h.nodes.get_mut(&p) {
                        node.children.insert(key);
                    }
                }
                _ => {
                    h.roots.insert(key);
                }
            }
        }
        h
    }

    #[test]
    fn children_and_descendants() {
        let h = linked(&[
            ("Vehicle", None),
            ("Car", Some("Vehicle")),
            ("Truck", Some("Vehicle")),
            ("Hatchback", Some("car")),
        ]);
        assert_eq!(h.children_of("VEHICLE"), BTreeSet::from(["Car".to_string(), "Truck".to_string()]));
        assert_eq!(
            h.descendants_of("Vehicle"),
            BTreeSet::from(["Car".to_string(), "Truck".to_string(), "Hatchback".to_string()])
        );
        assert_eq!(h.roots(), BTreeSet::from(["Vehicle".to_string()]));
        assert!(h.children_of("missing").is_empty());
    }

    #[test]
    fn unresolved_roots_name_a_missing_parent() {
        let h = linked(&[
            ("Vehicle", None),
            ("Car", Some("Vehicle")),
            ("Plane", Some("Aircraft")),
            ("Ship", Some("vessel")),
        ]);
        assert_eq!(
            h.roots(),
            BTreeSet::from(["Plane".to_string(), "Ship".to_string(), "Vehicle".to_string()])
        );
        assert_eq!(
            h.unresolved_roots(),
            BTreeSet::from(["Plane".to_string(), "Ship".to_string()])
        );
    }

    #[test]
    fn ancestry_walks_to_root() {
        let h = linked(&[("A", None), ("B", Some("A")), ("C", Some("B"))]);
        assert_eq!(h.ancestry("c"), vec!["C", "B", "A"]);
        assert_eq!(h.parent_of("C").map(ClassNode::name), Some("B"));
    }

    #[test]
    fn ancestry_and_descendants_stop_on_cycles() {
        let h = linked(&[("A", Some("B")), ("B", Some("A"))]);
        assert_eq!(h.ancestry("A"), vec!["A", "B"]);
        assert_eq!(h.descendants_of("A"), BTreeSet::from(["B".to_string()]));
    }

    #[test]
    fn invalid_reasons_are_deduplicated() {
        let mut h = linked(&[("A", None)]);
        let reason = InvalidReason::UnresolvedParent { parent: "X".into() };
        h.mark_invalid("a", reason.clone());
        h.mark_invalid("a", reason);
        assert_eq!(h.invalid_reasons("A").len(), 1);
        assert!(h.is_invalid("a"));
        assert!(h.invalid_reasons("B").is_empty());
    }
}
