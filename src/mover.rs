//! Relocation of triaged files into `<output>/<category>/<relative path>`.

use anyhow::{Context, Result};
use std::fs;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::Triage;

/// Move `file` under `output_root/<triage>/`, keeping its path relative to
/// `source_root`. Never overwrites: a taken name gets `_1`, `_2`, … before
/// the extension.
///
/// A source that no longer exists fails with an [`std::io::Error`] of kind
/// `NotFound`.
pub fn move_file(
    file: &Path,
    source_root: &Path,
    output_root: &Path,
    triage: Triage,
) -> Result<PathBuf> {
    if !file.exists() {
        return Err(Error::new(
            ErrorKind::NotFound,
            format!("file not found: {}", file.display()),
        )
        .into());
    }

    let relative = relative_to(file, source_root);
    let dest = resolve_destination(&output_root.join(triage.as_str()).join(&relative));

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    rename_or_copy(file, &dest)?;

    info!(
        "moved: {} -> {}",
        relative.display(),
        dest.strip_prefix(output_root).unwrap_or(&dest).display()
    );
    Ok(dest)
}

/// `dest` if free, otherwise the first free `stem_N.ext` for N = 1, 2, …
pub fn resolve_destination(dest: &Path) -> PathBuf {
    if !dest.exists() {
        return dest.to_path_buf();
    }

    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = dest
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = dest.parent().unwrap_or_else(|| Path::new(""));

    let mut counter: u64 = 1;
    loop {
        let candidate = parent.join(format!("{}_{}{}", stem, counter, ext));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

fn relative_to(file: &Path, root: &Path) -> PathBuf {
    match file.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => file
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| file.to_path_buf()),
    }
}

// `rename` fails across filesystems; fall back to copy + remove.
fn rename_or_copy(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)
        .with_context(|| format!("Failed to move {} to {}", from.display(), to.display()))?;
    fs::remove_file(from)
        .with_context(|| format!("Failed to remove {} after copy", from.display()))?;
    Ok(())
}
