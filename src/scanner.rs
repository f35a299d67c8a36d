use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const DEFAULT_SUPPORTED_EXTENSIONS: &[&str] = &[
    ".pdf", ".docx", ".pptx", ".xlsx", ".png", ".jpg", ".jpeg", ".html", ".htm", ".csv", ".json",
    ".xml", ".md", ".txt", ".zip",
];

pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &["*.DS_Store", "*.gitkeep", ".git/**", "__MACOSX/**"];

/// Recursively list candidate files under `root`, sorted by path.
///
/// `extensions` entries may be given with or without the leading dot; an
/// empty slice selects [`DEFAULT_SUPPORTED_EXTENSIONS`].
pub fn scan_files(
    root: &Path,
    exclude_patterns: &[String],
    extensions: &[String],
) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Source directory does not exist: {}", root.display());
    }

    let excludes = ExcludeSet::new(exclude_patterns)?;
    let allowed: HashSet<String> = if extensions.is_empty() {
        DEFAULT_SUPPORTED_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .collect()
    } else {
        extensions.iter().map(|e| normalize_extension(e)).collect()
    };

    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);

        if excludes.is_match(relative) {
            debug!("excluded: {}", relative.display());
            continue;
        }

        let ext = dotted_extension(path);
        if !allowed.contains(&ext) {
            debug!("unsupported extension, skipping: {}", relative.display());
            continue;
        }

        files.push(path.to_path_buf());
    }

    // Sort for deterministic ordering
    files.sort();

    debug!("scan finished: {} file(s) under {}", files.len(), root.display());
    Ok(files)
}

/// `"PDF"`, `".pdf"` and `" pdf "` all become `".pdf"`.
pub fn normalize_extension(ext: &str) -> String {
    format!(".{}", ext.trim().trim_start_matches('.').to_ascii_lowercase())
}

/// Lowercased extension with its dot, or an empty string.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Exclusion rules.
///
/// Patterns without a `/` are matched against the file name only. Patterns
/// with a `/` are matched against the root-relative path, and their first
/// segment is also matched against every directory component so that
/// `.git/**` excludes `sub/.git/config` as well.
struct ExcludeSet {
    names: GlobSet,
    paths: GlobSet,
    components: GlobSet,
}

impl ExcludeSet {
    fn new(patterns: &[String]) -> Result<Self> {
        let mut names = GlobSetBuilder::new();
        let mut paths = GlobSetBuilder::new();
        let mut components = GlobSetBuilder::new();

        for pattern in patterns {
            if pattern.contains('/') {
                paths.add(Glob::new(pattern)?);
                if let Some(first) = pattern.split('/').next().filter(|s| !s.is_empty()) {
                    components.add(Glob::new(first)?);
                }
            } else {
                names.add(Glob::new(pattern)?);
            }
        }

        Ok(Self {
            names: names.build()?,
            paths: paths.build()?,
            components: components.build()?,
        })
    }

    fn is_match(&self, relative: &Path) -> bool {
        if let Some(name) = relative.file_name() {
            if self.names.is_match(Path::new(name)) {
                return true;
            }
        }
        if self.paths.is_match(relative) {
            return true;
        }
        relative
            .parent()
            .map(|dirs| dirs.iter().any(|c| self.components.is_match(Path::new(c))))
            .unwrap_or(false)
    }
}
