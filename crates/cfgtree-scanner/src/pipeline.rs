//! Per-source build: parse every file, register, link, validate

use cfgtree_core::{
    ClassHierarchy, Diagnostic, DiagnosticKind, Fingerprint, HierarchyBuilder, Location, ParsedFile, SourceId, Validator,
};
use cfgtree_parser::parse_with_options;
use tracing::{debug, warn};

use crate::config::CfgtreeConfig;
use crate::provider::SourceBundle;

/// Builds the validated hierarchy of one source.
///
/// Never fails: unreadable or malformed content ends up as diagnostics.
/// Files are processed in relative-path order so diagnostics and
/// redefinition winners are deterministic.
pub fn build_source(
    source: &SourceId,
    bundle: SourceBundle,
    fingerprint: Fingerprint,
    config: &CfgtreeConfig,
) -> ClassHierarchy {
    let parse_options = config.parse_options();
    let mut builder = HierarchyBuilder::new(config.build_options());

    let prefix = bundle.prefix.clone();
    let mut files = bundle.files;
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    for file in files {
        let qualified = if prefix.is_empty() {
            file.relative_path.clone()
        } else {
            std::path::Path::new(&prefix).join(&file.relative_path)
        };

        if !config.accepts_extension(&file.relative_path) {
            debug!("Ignoring {} (extension not configured)", qualified.display());
            continue;
        }

        if file.size > config.scanner.max_file_size {
            warn!(
                "Skipping {} in {}: {} bytes exceeds the {} byte limit",
                qualified.display(),
                source,
                file.size,
                config.scanner.max_file_size
            );
            let mut skipped = ParsedFile::new(&qualified);
            skipped.diagnostics.push(
                Diagnostic::warning(
                    DiagnosticKind::SkippedFile,
                    format!(
                        "file skipped: {} bytes exceeds the {} byte limit",
                        file.size, config.scanner.max_file_size
                    ),
                )
                .at(Location::new(&qualified, 1, 1)),
            );
            builder.add_file(skipped);
            continue;
        }

        let parsed = parse_with_options(&file.text, source, &qualified, &parse_options);
        builder.add_file(parsed);
    }

    let mut hierarchy = builder.build(source.clone(), fingerprint);
    let summary = Validator::new(config.validator_options()).validate(&mut hierarchy);
    debug!(
        "Validated {}: {} cycles, {} unresolved parents, {} errors",
        source,
        summary.cycles,
        summary.unresolved,
        hierarchy.error_count()
    );
    hierarchy
}
