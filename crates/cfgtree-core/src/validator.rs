//! Structural validation and transitive property resolution

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::diagnostics::{Diagnostic, DiagnosticKind, Severity};
use crate::hierarchy::{ClassHierarchy, InvalidReason};
use crate::model::normalize;
use crate::property::PropertyMap;

/// Options for [`Validator`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorOptions {
    /// Unresolved parents become errors and quarantine the class.
    pub strict: bool,
    /// Maximum edit distance for parent-name suggestions.
    pub suggestion_distance: usize,
    pub max_suggestions: usize,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            strict: false,
            suggestion_distance: 3,
            max_suggestions: 3,
        }
    }
}

/// Counts of what a validation pass found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub cycles: usize,
    pub unresolved: usize,
}

pub struct Validator {
    options: ValidatorOptions,
}

impl Validator {
    pub fn new(options: ValidatorOptions) -> Self {
        Self { options }
    }

    /// Detects cycles and unresolved parents, recording diagnostics and
    /// invalid classes on the hierarchy.
    pub fn validate(&self, hierarchy: &mut ClassHierarchy) -> ValidationSummary {
        let cycles = detect_cycles(hierarchy);
        for cycle in &cycles {
            self.report_cycle(hierarchy, cycle);
        }
        let unresolved = self.check_unresolved(hierarchy);

        let summary = ValidationSummary {
            cycles: cycles.len(),
            unresolved,
        };
        debug!(
            "Validated {}: {} cycles, {} unresolved parents",
            hierarchy.source, summary.cycles, summary.unresolved
        );
        summary
    }

    fn report_cycle(&self, hierarchy: &mut ClassHierarchy, cycle: &[String]) {
        let names: Vec<String> = cycle
            .iter()
            .filter_map(|key| hierarchy.nodes.get(key))
            .map(|n| n.definition.name.clone())
            .collect();
        let Some(first) = names.first().cloned() else {
            return;
        };
        let chain = format!("{} -> {}", names.join(" -> "), first);

        let mut diagnostic = Diagnostic::error(
            DiagnosticKind::Cycle,
            format!("inheritance cycle: {chain}"),
        )
        .with_class(first);
        for (i, key) in cycle.iter().enumerate() {
            if let Some(node) = hierarchy.nodes.get(key) {
                let location = node.definition.location.clone();
                diagnostic = if i == 0 {
                    diagnostic.at(location)
                } else {
                    diagnostic.with_related(location)
                };
            }
        }
        hierarchy.push_diagnostic(diagnostic);

        for key in cycle {
            hierarchy.mark_invalid(key, InvalidReason::Cycle { chain: chain.clone() });
        }
    }

    fn check_unresolved(&self, hierarchy: &mut ClassHierarchy) -> usize {
        let missing: Vec<(String, String, String)> = hierarchy
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.is_none())
            .filter_map(|(key, node)| {
                let parent = node.definition.parent.clone()?;
                Some((key.clone(), node.definition.name.clone(), parent))
            })
            .collect();

        let severity = if self.options.strict {
            Severity::Error
        } else {
            Severity::Warning
        };

        for (key, name, parent) in &missing {
            let suggestions = suggest_names(
                parent,
                hierarchy
                    .nodes
                    .iter()
                    .filter(|(other, _)| *other != key)
                    .map(|(_, n)| n.definition.name.as_str()),
                self.options.suggestion_distance,
                self.options.max_suggestions,
            );
            let location = hierarchy.nodes.get(key).map(|n| n.definition.location.clone());
            let mut diagnostic = Diagnostic::new(
                severity,
                DiagnosticKind::UnresolvedParent,
                format!("parent '{parent}' of class '{name}' is not defined"),
            )
            .with_class(name.clone())
            .with_suggestions(suggestions);
            if let Some(location) = location {
                diagnostic = diagnostic.at(location);
            }
            hierarchy.push_diagnostic(diagnostic);

            if self.options.strict {
                hierarchy.mark_invalid(key, InvalidReason::UnresolvedParent { parent: parent.clone() });
            }
        }
        missing.len()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidatorOptions::default())
    }
}

/// Finds every inheritance cycle, each as the list of keys on it in parent
/// order. Iterative and linear in nodes plus edges.
pub fn detect_cycles(hierarchy: &ClassHierarchy) -> Vec<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        OnPath,
        Done,
    }

    let mut state: HashMap<&str, State> = HashMap::new();
    let mut cycles = Vec::new();

    for start in hierarchy.nodes.keys() {
        if state.contains_key(start.as_str()) {
            continue;
        }
        let mut path: Vec<&str> = Vec::new();
        let mut current = Some(start.as_str());

        while let Some(key) = current {
            match state.get(key) {
                Some(State::Done) => break,
                Some(State::OnPath) => {
                    if let Some(pos) = path.iter().position(|k| *k == key) {
                        cycles.push(path[pos..].iter().map(|k| k.to_string()).collect());
                    }
                    break;
                }
                None => {
                    state.insert(key, State::OnPath);
                    path.push(key);
                    current = hierarchy
                        .nodes
                        .get(key)
                        .and_then(|n| n.parent.as_deref());
                }
            }
        }

        for key in path {
            state.insert(key, State::Done);
        }
    }
    cycles
}

/// Nearest names to `target` by case-insensitive edit distance, closest
/// first, ties broken alphabetically.
pub fn suggest_names<'a>(
    target: &str,
    candidates: impl IntoIterator<Item = &'a str>,
    max_distance: usize,
    limit: usize,
) -> Vec<String> {
    let target = normalize(target);
    let mut scored: Vec<(usize, &str)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let distance = levenshtein_distance(&target, &normalize(candidate));
            (distance > 0 && distance <= max_distance).then_some((distance, candidate))
        })
        .collect();
    scored.sort();
    scored.dedup();
    scored.into_iter().take(limit).map(|(_, name)| name.to_string()).collect()
}

/// Levenshtein distance over chars, two-row form.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Memoized transitive property resolution over one hierarchy.
///
/// resolve(C) is resolve(parent(C)) overlaid key by key with C's own
/// properties. Invalid classes, and classes whose parent is invalid, get
/// only their own properties.
#[derive(Debug, Clone, Default)]
pub struct PropertyResolver {
    resolved: HashMap<String, PropertyMap>,
}

impl PropertyResolver {
    /// Resolves every class of the hierarchy bottom-up. Each class is
    /// computed once.
    pub fn new(hierarchy: &ClassHierarchy) -> Self {
        let mut resolved: HashMap<String, PropertyMap> = HashMap::with_capacity(hierarchy.len());

        for start in hierarchy.nodes.keys() {
            let mut stack: Vec<&str> = Vec::new();
            let mut on_stack: HashSet<&str> = HashSet::new();
            let mut current = start.as_str();

            loop {
                if resolved.contains_key(current) || !on_stack.insert(current) {
                    break;
                }
                stack.push(current);
                if hierarchy.invalid.contains_key(current) {
                    break;
                }
                match inheritable_parent(hierarchy, current) {
                    Some(parent) => current = parent,
                    None => break,
                }
            }

            while let Some(key) = stack.pop() {
                let Some(node) = hierarchy.nodes.get(key) else {
                    continue;
                };
                let mut properties = if hierarchy.invalid.contains_key(key) {
                    PropertyMap::new()
                } else {
                    inheritable_parent(hierarchy, key)
                        .and_then(|parent| resolved.get(parent))
                        .cloned()
                        .unwrap_or_default()
                };
                properties.extend_from(&node.definition.properties);
                resolved.insert(key.to_string(), properties);
            }
        }

        Self { resolved }
    }

    pub fn resolve(&self, name: &str) -> Option<&PropertyMap> {
        self.resolved.get(&normalize(name))
    }

    /// Display names of classes whose resolved properties, own or
    /// inherited, include `property`.
    pub fn classes_with_property(&self, hierarchy: &ClassHierarchy, property: &str) -> BTreeSet<String> {
        hierarchy
            .nodes()
            .filter(|node| {
                self.resolve(node.name())
                    .is_some_and(|properties| properties.contains_key(property))
            })
            .map(|node| node.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

fn inheritable_parent<'a>(hierarchy: &'a ClassHierarchy, key: &str) -> Option<&'a str> {
    let parent = hierarchy.nodes.get(key)?.parent.as_deref()?;
    (!hierarchy.invalid.contains_key(parent)).then_some(parent)
}

/// Reports classes whose resolved properties lack any of `required`.
///
/// Forward declarations and quarantined classes are skipped.
pub fn validate_required(
    hierarchy: &ClassHierarchy,
    resolver: &PropertyResolver,
    required: &[&str],
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for node in hierarchy.nodes() {
        let definition = &node.definition;
        if definition.is_forward_declaration() || hierarchy.is_invalid(&definition.name) {
            continue;
        }
        let Some(properties) = resolver.resolve(&definition.name) else {
            continue;
        };
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| !properties.contains_key(name))
            .collect();
        if !missing.is_empty() {
            diagnostics.push(
                Diagnostic::warning(
                    DiagnosticKind::MissingProperty,
                    format!(
                        "class '{}' is missing required properties: {}",
                        definition.name,
                        missing.join(", ")
                    ),
                )
                .with_class(definition.name.clone())
                .at(definition.location.clone()),
            );
        }
    }
    diagnostics
}
