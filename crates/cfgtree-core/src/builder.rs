//! Hierarchy builder: registers definitions in merge order and links parents

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::hierarchy::{ClassHierarchy, ClassNode};
use crate::model::{normalize, ClassDefinition, ClassKind, Fingerprint, ParsedFile, PropertyValue, SourceId};

/// How a class redefined by a later source is merged with the earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Later source replaces properties and parent.
    #[default]
    LatestWins,
    /// Later source replaces properties; the first declared parent is kept.
    KeepParent,
    /// The first registered definition is kept.
    FirstWins,
}

impl std::str::FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "latest_wins" => Ok(MergePolicy::LatestWins),
            "keep_parent" => Ok(MergePolicy::KeepParent),
            "first_wins" => Ok(MergePolicy::FirstWins),
            other => Err(format!("unknown merge policy '{other}'")),
        }
    }
}

/// Options for [`HierarchyBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    pub merge_policy: MergePolicy,
    /// Top-level classes whose name starts with one of these prefixes are
    /// section containers; their nested classes are lifted into the registry.
    pub section_prefixes: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            merge_policy: MergePolicy::LatestWins,
            section_prefixes: vec!["Cfg".to_string()],
        }
    }
}

/// Registry of class definitions, filled source by source in merge order.
///
/// Parent links are resolved only in [`HierarchyBuilder::build`], after every
/// source is registered, so references in either direction resolve.
pub struct HierarchyBuilder {
    options: BuildOptions,
    registry: HashMap<String, ClassDefinition>,
    order: Vec<String>,
    enums: Vec<ClassDefinition>,
    diagnostics: Vec<Diagnostic>,
}

impl HierarchyBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self {
            options,
            registry: HashMap::new(),
            order: Vec::new(),
            enums: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Registers the output of one parsed file. Its diagnostics are kept in
    /// file order ahead of anything the builder adds for later files.
    pub fn add_file(&mut self, parsed: ParsedFile) {
        debug!(
            "Registering {} definitions from {}",
            parsed.definitions.len(),
            parsed.file.display()
        );
        self.diagnostics.extend(parsed.diagnostics);
        self.enums.extend(parsed.enums);
        for definition in parsed.definitions {
            self.add_definition(definition);
        }
    }

    /// Registers every class of an already built hierarchy as one source.
    /// Used to merge per-source hierarchies into a global view.
    pub fn add_hierarchy(&mut self, hierarchy: &ClassHierarchy) {
        for node in hierarchy.nodes() {
            self.register(node.definition.clone());
        }
        self.enums.extend(hierarchy.enums().iter().cloned());
    }

    /// Registers one top-level definition, lifting section members.
    pub fn add_definition(&mut self, mut definition: ClassDefinition) {
        if definition.kind == ClassKind::Enum {
            self.enums.push(definition);
            return;
        }
        if !self.is_section(&definition) {
            self.register(definition);
            return;
        }

        let section = definition.name.clone();
        let lifted = definition
            .properties
            .extract_if(|p| matches!(p.value, PropertyValue::Class(_)));
        self.register_section(definition);
        for property in lifted {
            if let PropertyValue::Class(mut nested) = property.value {
                nested.container = Some(section.clone());
                self.register(*nested);
            }
        }
    }

    fn is_section(&self, definition: &ClassDefinition) -> bool {
        definition.kind == ClassKind::Class
            && definition.container.is_none()
            && self.options.section_prefixes.iter().any(|prefix| {
                !prefix.is_empty() && normalize(&definition.name).starts_with(&normalize(prefix))
            })
    }

    /// Sections are reopened freely: remaining properties merge into the
    /// first registration instead of counting as duplicates.
    fn register_section(&mut self, definition: ClassDefinition) {
        let key = definition.key();
        match self.registry.get_mut(&key) {
            Some(existing) if existing.kind == ClassKind::Class => {
                existing.properties.extend_from(&definition.properties);
            }
            _ => self.register(definition),
        }
    }

    fn register(&mut self, definition: ClassDefinition) {
        let key = definition.key();
        let Some(existing) = self.registry.get_mut(&key) else {
            self.order.push(key.clone());
            self.registry.insert(key, definition);
            return;
        };

        if definition.is_forward_declaration() {
            return;
        }
        if existing.is_forward_declaration() {
            *existing = definition;
            return;
        }

        if existing.source == definition.source {
            self.diagnostics.push(
                Diagnostic::error(
                    DiagnosticKind::DuplicateClass,
                    format!(
                        "class '{}' is defined more than once in source '{}'",
                        definition.name, definition.source
                    ),
                )
                .with_class(definition.name.clone())
                .at(definition.location.clone())
                .with_related(existing.location.clone()),
            );
            *existing = definition;
            return;
        }

        let parents_differ = existing.parent_key() != definition.parent_key();
        match self.options.merge_policy {
            MergePolicy::LatestWins => {
                if parents_differ {
                    self.diagnostics.push(
                        Diagnostic::note(
                            DiagnosticKind::MergeConflict,
                            format!(
                                "class '{}' from '{}' replaces the definition from '{}' and changes its parent",
                                definition.name, definition.source, existing.source
                            ),
                        )
                        .with_class(definition.name.clone())
                        .at(definition.location.clone())
                        .with_related(existing.location.clone()),
                    );
                }
                *existing = definition;
            }
            MergePolicy::KeepParent => {
                if parents_differ {
                    self.diagnostics.push(
                        Diagnostic::warning(
                            DiagnosticKind::MergeConflict,
                            format!(
                                "class '{}' from '{}' declares parent {:?}; keeping {:?}",
                                definition.name, definition.source, definition.parent, existing.parent
                            ),
                        )
                        .with_class(definition.name.clone())
                        .at(definition.location.clone())
                        .with_related(existing.location.clone()),
                    );
                }
                let parent = existing.parent.take();
                *existing = definition;
                existing.parent = parent;
            }
            MergePolicy::FirstWins => {
                self.diagnostics.push(
                    Diagnostic::note(
                        DiagnosticKind::MergeConflict,
                        format!(
                            "class '{}' from '{}' ignored; keeping the definition from '{}'",
                            definition.name, definition.source, existing.source
                        ),
                    )
                    .with_class(definition.name.clone())
                    .at(definition.location.clone())
                    .with_related(existing.location.clone()),
                );
            }
        }
    }

    /// Links parents by name and produces the hierarchy.
    ///
    /// A class whose declared parent is unknown becomes a root; the validator
    /// decides how loudly to report it.
    pub fn build(mut self, source: SourceId, fingerprint: Fingerprint) -> ClassHierarchy {
        let mut hierarchy = ClassHierarchy::new(source, fingerprint);
        hierarchy.diagnostics = std::mem::take(&mut self.diagnostics);
        hierarchy.enums = std::mem::take(&mut self.enums);

        for key in &self.order {
            if let Some(definition) = self.registry.remove(key) {
                hierarchy.nodes.insert(key.clone(), ClassNode::new(definition));
            }
        }

        let links: Vec<(String, Option<String>)> = hierarchy
            .nodes
            .iter()
            .map(|(key, node)| (key.clone(), node.definition.parent_key()))
            .collect();

        for (key, parent) in links {
            match parent {
                Some(parent) if hierarchy.nodes.contains_key(&parent) => {
                    if let Some(node) = hierarchy.nodes.get_mut(&parent) {
                        node.children.insert(key.clone());
                    }
                    if let Some(node) = hierarchy.nodes.get_mut(&key) {
                        node.parent = Some(parent);
                    }
                }
                _ => {
                    hierarchy.roots.insert(key);
                }
            }
        }

        debug!(
            "Built hierarchy for {}: {} classes, {} roots",
            hierarchy.source,
            hierarchy.nodes.len(),
            hierarchy.roots.len()
        );
        hierarchy
    }
}

impl Default for HierarchyBuilder {
    fn default() -> Self {
        Self::new(BuildOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;
    use crate::test_utils::{class, class_in, forward, parsed};

    #[test]
    fn links_parents_in_either_order() {
        let mut builder = HierarchyBuilder::default();
        builder.add_file(parsed(vec![class("Child", Some("base"))]));
        builder.add_file(parsed(vec![class("Base", None)]));
        let h = builder.build(SourceId::new("s"), Fingerprint::default());

        assert_eq!(h.parent_of("child").map(|n| n.name()), Some("Base"));
        assert!(h.is_root("Base"));
        assert!(!h.is_root("Child"));
    }

    #[test]
    fn unknown_parent_is_a_root() {
        let mut builder = HierarchyBuilder::default();
        builder.add_file(parsed(vec![class("Orphan", Some("Nowhere"))]));
        let h = builder.build(SourceId::new("s"), Fingerprint::default());
        assert!(h.is_root("Orphan"));
        assert!(h.diagnostics().is_empty());
    }

    #[test]
    fn duplicate_in_same_source_keeps_later() {
        let mut builder = HierarchyBuilder::default();
        let first = class("Foo", None).with_property("x", PropertyValue::Number(1.0));
        let mut second = class("foo", None).with_property("x", PropertyValue::Number(2.0));
        second.location.line = 9;
        builder.add_file(parsed(vec![first, second]));
        let h = builder.build(SourceId::new("s"), Fingerprint::default());

        assert_eq!(h.class("FOO").and_then(|c| c.properties.get("x")), Some(&PropertyValue::Number(2.0)));
        let dup: Vec<_> = h
            .diagnostics()
            .iter()
            .filter(|d| d.kind == DiagnosticKind::DuplicateClass)
            .collect();
        assert_eq!(dup.len(), 1);
        assert_eq!(dup[0].severity, Severity::Error);
        assert_eq!(dup[0].location.as_ref().map(|l| l.line), Some(9));
        assert_eq!(dup[0].related.len(), 1);
    }

    #[test]
    fn forward_declarations_never_replace_or_duplicate() {
        let mut builder = HierarchyBuilder::default();
        builder.add_file(parsed(vec![
            forward("Car"),
            class("Car", Some("Vehicle")),
            forward("Car"),
        ]));
        let h = builder.build(SourceId::new("s"), Fingerprint::default());
        assert_eq!(h.class("Car").map(|c| c.kind), Some(ClassKind::Class));
        assert!(h.diagnostics().is_empty());
    }

    #[test]
    fn forward_declaration_alone_is_a_root() {
        let mut builder = HierarchyBuilder::default();
        builder.add_file(parsed(vec![forward("External"), class("Mine", Some("External"))]));
        let h = builder.build(SourceId::new("s"), Fingerprint::default());
        assert!(h.is_root("External"));
        assert_eq!(h.children_of("External").len(), 1);
    }

    #[test]
    fn merge_policies_across_sources() {
        let early = class_in("a", "Gun", Some("Rifle")).with_property("ammo", PropertyValue::Number(30.0));
        let late = class_in("b", "Gun", Some("Pistol")).with_property("ammo", PropertyValue::Number(7.0));

        let run = |policy| {
            let mut builder = HierarchyBuilder::new(BuildOptions {
                merge_policy: policy,
                ..Default::default()
            });
            builder.add_definition(early.clone());
            builder.add_definition(late.clone());
            builder.build(SourceId::new("*"), Fingerprint::default())
        };

        let latest = run(MergePolicy::LatestWins);
        let gun = latest.class("gun").cloned();
        assert_eq!(gun.as_ref().and_then(|g| g.parent.as_deref()), Some("Pistol"));
        assert_eq!(gun.as_ref().and_then(|g| g.properties.get("ammo")), Some(&PropertyValue::Number(7.0)));

        let keep = run(MergePolicy::KeepParent);
        let gun = keep.class("gun").cloned();
        assert_eq!(gun.as_ref().and_then(|g| g.parent.as_deref()), Some("Rifle"));
        assert_eq!(gun.as_ref().and_then(|g| g.properties.get("ammo")), Some(&PropertyValue::Number(7.0)));
        assert!(keep.diagnostics().iter().any(|d| d.severity == Severity::Warning));

        let first = run(MergePolicy::FirstWins);
        let gun = first.class("gun").cloned();
        assert_eq!(gun.as_ref().and_then(|g| g.properties.get("ammo")), Some(&PropertyValue::Number(30.0)));
        assert!(first.diagnostics().iter().all(|d| d.kind == DiagnosticKind::MergeConflict));
    }

    #[test]
    fn section_members_are_lifted() {
        let section = class("CfgVehicles", None)
            .with_property("version", PropertyValue::Number(1.0))
            .with_property("Car", PropertyValue::Class(Box::new(class("Car", None))))
            .with_property(
                "Hatchback",
                PropertyValue::Class(Box::new(class("Hatchback", Some("Car")))),
            );
        let mut builder = HierarchyBuilder::default();
        builder.add_file(parsed(vec![section]));
        let h = builder.build(SourceId::new("s"), Fingerprint::default());

        let hatch = h.class("Hatchback").cloned();
        assert_eq!(hatch.as_ref().and_then(|c| c.container.as_deref()), Some("CfgVehicles"));
        assert_eq!(h.parent_of("Hatchback").map(|n| n.name()), Some("Car"));
        let container = h.class("CfgVehicles").cloned();
        assert_eq!(container.as_ref().map(|c| c.properties.len()), Some(1));
    }

    #[test]
    fn non_section_nested_classes_stay_inline() {
        let outer = class("Weapon", None)
            .with_property("Single", PropertyValue::Class(Box::new(class("Single", None))));
        let mut builder = HierarchyBuilder::default();
        builder.add_file(parsed(vec![outer]));
        let h = builder.build(SourceId::new("s"), Fingerprint::default());
        assert!(!h.contains("Single"));
        assert!(h.class("Weapon").and_then(|c| c.properties.get("single")).is_some());
    }

    #[test]
    fn reopened_section_merges_without_duplicate() {
        let mut builder = HierarchyBuilder::default();
        builder.add_file(parsed(vec![
            class("CfgPatches", None).with_property("A", PropertyValue::Class(Box::new(class("A", None)))),
            class("CfgPatches", None).with_property("B", PropertyValue::Class(Box::new(class("B", None)))),
        ]));
        let h = builder.build(SourceId::new("s"), Fingerprint::default());
        assert!(h.contains("A") && h.contains("B"));
        assert!(h.diagnostics().is_empty());
    }

    #[test]
    fn merge_policy_parses() {
        assert_eq!("keep-parent".parse::<MergePolicy>(), Ok(MergePolicy::KeepParent));
        assert_eq!("LATEST_WINS".parse::<MergePolicy>(), Ok(MergePolicy::LatestWins));
        assert!("newest".parse::<MergePolicy>().is_err());
    }
}
