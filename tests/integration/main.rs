//! Integration tests for cfgtree
//!
//! These tests drive the public facade end to end: providers, the scan
//! service, persistence and the global query API.

use std::path::Path;
use std::sync::Arc;

use cfgtree::cfgtree_scanner::{SourceBundle, SourceFile};
use cfgtree::*;

fn write(root: &Path, relative: &str, text: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, text).unwrap();
}

fn memory_service(sources: &[(&str, &str)]) -> ClassService {
    let provider = MemoryProvider::new();
    for (id, text) in sources {
        provider.insert_text(*id, *text);
    }
    let provider: Arc<dyn SourceProvider> = Arc::new(provider);
    ClassService::new(provider, CfgtreeConfig::default()).unwrap()
}

/// Inheritance across two sources resolves overrides and child links.
#[test]
fn test_cross_source_resolution() {
    let service = memory_service(&[
        ("source1", "class Base { hit = 10; };"),
        ("source2", "class Child: Base { hit = 20; armor = 5; };"),
    ]);
    let report = service.scan_all_sources(&CancelToken::new());
    assert!(report.is_complete());

    let child = service.resolve_properties("Child").unwrap();
    assert_eq!(child.len(), 2);
    assert_eq!(child.get("hit"), Some(&PropertyValue::Number(20.0)));
    assert_eq!(child.get("armor"), Some(&PropertyValue::Number(5.0)));
    assert_eq!(service.find_children("Base"), ["Child".to_string()].into());
}

/// Overrides follow the chain; unrelated keys are inherited.
#[test]
fn test_override_semantics() {
    let service = memory_service(&[("s", "class A { x = 1; y = 2; }; class B: A { y = 3; z = 4; };")]);
    service.scan_all_sources(&CancelToken::new());

    let b = service.resolve_properties("b").unwrap();
    let values: Vec<_> = ["x", "y", "z"].iter().map(|k| b.get(k).and_then(|v| v.as_number())).collect();
    assert_eq!(values, vec![Some(1.0), Some(3.0), Some(4.0)]);
}

/// Cycles are quarantined but still resolvable to their own properties.
#[test]
fn test_cycle_safety() {
    let service = memory_service(&[("s", "class A: B { a = 1; }; class B: A { b = 2; };")]);
    let hierarchy = service.scan_source(&SourceId::new("s")).unwrap();

    assert!(hierarchy.is_invalid("A"));
    assert!(hierarchy.is_invalid("B"));
    let cycles: Vec<_> = hierarchy
        .diagnostics()
        .iter()
        .filter(|d| d.kind == DiagnosticKind::Cycle)
        .collect();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].severity, Severity::Error);

    let a = service.resolve_properties("A").unwrap();
    assert_eq!(a.keys().collect::<Vec<_>>(), vec!["a"]);
}

/// A redefinition inside one source keeps the later body and points at both.
#[test]
fn test_duplicate_in_source() {
    let service = memory_service(&[("s", "class Foo { v = 1; };\nclass Foo { v = 2; };")]);
    let hierarchy = service.scan_source(&SourceId::new("s")).unwrap();

    let duplicate = hierarchy
        .diagnostics()
        .iter()
        .find(|d| d.kind == DiagnosticKind::DuplicateClass)
        .unwrap();
    assert_eq!(duplicate.location.as_ref().map(|l| l.line), Some(2));
    assert_eq!(duplicate.related.iter().map(|l| l.line).collect::<Vec<_>>(), vec![1]);
    assert_eq!(
        hierarchy.class("foo").unwrap().properties.get("v"),
        Some(&PropertyValue::Number(2.0))
    );
}

/// Broken text never fails a scan; it produces diagnostics and whatever
/// classes could be recovered.
#[test]
fn test_content_errors_are_diagnostics() {
    let service = memory_service(&[(
        "s",
        "class Good { a = 1; };\nclass Broken { b = ; ]\nclass After { c = 3; };",
    )]);
    let hierarchy = service.scan_source(&SourceId::new("s")).unwrap();
    assert!(hierarchy.contains("Good"));
    assert!(hierarchy.error_count() > 0);
}

/// Folder layout with prefixes, sections and a persisted cache across
/// service restarts.
#[test]
fn test_directory_scan_with_persistence() {
    let sources = tempfile::TempDir::new().unwrap();
    let cache = tempfile::TempDir::new().unwrap();
    write(sources.path(), "a3_base/$PBOPREFIX$", "a3\\base");
    write(
        sources.path(),
        "a3_base/config.cpp",
        "class CfgVehicles\n{\n    class Vehicle { wheels = 4; };\n    class Car: Vehicle { speed = 120; };\n};\n",
    );
    write(
        sources.path(),
        "z_mod/addons/config.cpp",
        "class CfgVehicles\n{\n    class Car;\n    class SportsCar: Car { speed = 250; };\n};\n",
    );

    let mut config = CfgtreeConfig::default();
    config.scanner.source_root = Some(sources.path().to_path_buf());
    config.cache.dir = Some(cache.path().to_path_buf());

    let service = open(config.clone()).unwrap();
    let report = service.scan_all_sources(&CancelToken::new());
    assert_eq!(report.hierarchies.len(), 2);
    assert_eq!(service.builds(), 2);

    let car = service.get_class("car").unwrap();
    assert_eq!(car.source, SourceId::new("a3_base"));
    assert!(car.location.file().starts_with("a3\\base"));
    assert_eq!(car.container.as_deref(), Some("CfgVehicles"));

    assert_eq!(
        service.ancestry("SportsCar"),
        vec!["SportsCar".to_string(), "Car".to_string(), "Vehicle".to_string()]
    );
    assert_eq!(
        service.find_descendants("Vehicle"),
        ["Car".to_string(), "SportsCar".to_string()].into()
    );
    let sports = service.resolve_properties("SportsCar").unwrap();
    assert_eq!(sports.get("wheels"), Some(&PropertyValue::Number(4.0)));
    assert_eq!(sports.get("speed"), Some(&PropertyValue::Number(250.0)));

    let restarted = open(config).unwrap();
    restarted.scan_all_sources(&CancelToken::new());
    assert_eq!(restarted.builds(), 0);
    assert_eq!(restarted.resolve_properties("SportsCar"), Some(sports));
}

/// Configuration file drives the service, including the directory root.
#[test]
fn test_open_from_config_file() {
    let root = tempfile::TempDir::new().unwrap();
    write(root.path(), "mods/core/config.cpp", "class Thing { size = 1; };");
    let config_path = root.path().join("cfgtree.toml");
    std::fs::write(
        &config_path,
        format!(
            "[scanner]\nworkers = 2\nsource_root = \"{}\"\n\n[cache]\ncapacity = 10\n",
            root.path().join("mods").display().to_string().replace('\\', "\\\\")
        ),
    )
    .unwrap();

    let service = open_config_file(&config_path).unwrap();
    assert!(service.config().cache.capacity > 0);
    service.scan_all_sources(&CancelToken::new());
    assert!(service.get_class("thing").is_some());
}

/// Parsed definitions render back to text that parses to the same thing.
#[test]
fn test_render_round_trip() {
    let text = "class Weapon: Base\n{\n    damage = 12.5;\n    name = \"Rifle \"\"M4\"\"\";\n    modes[] = {\"single\", {1, 2}};\n    class Optics { zoom = 4; };\n};\n";
    let source = SourceId::new("s");
    let parsed = parse_source(text, &source, Path::new("weapon.cpp"));
    assert!(parsed.diagnostics.is_empty());

    let reparsed = parse_source(&render(&parsed.definitions), &source, Path::new("weapon.cpp"));
    assert_eq!(parsed.definitions.len(), reparsed.definitions.len());
    for (a, b) in parsed.definitions.iter().zip(&reparsed.definitions) {
        assert!(a.content_eq(b));
    }
}

/// Multi-file bundles are processed in path order with qualified paths.
#[test]
fn test_bundle_file_order() {
    let provider = MemoryProvider::new();
    provider.insert(
        "pack",
        SourceBundle {
            files: vec![
                SourceFile::new("b/second.hpp", "class Dup { from = \"second\"; };"),
                SourceFile::new("a/first.hpp", "class Dup { from = \"first\"; };"),
            ],
            prefix: "pack".to_string(),
        },
    );
    let provider: Arc<dyn SourceProvider> = Arc::new(provider);
    let service = ClassService::new(provider, CfgtreeConfig::default()).unwrap();
    let hierarchy = service.scan_source(&SourceId::new("pack")).unwrap();

    let dup = hierarchy.class("dup").unwrap();
    assert_eq!(dup.properties.get("from").and_then(|v| v.as_text()), Some("second"));
    assert!(dup.location.file().ends_with("b/second.hpp"));
}

#[test]
fn test_telemetry_init_once() {
    assert!(telemetry::init(false).is_ok());
    assert!(telemetry::init(true).is_err());
}
