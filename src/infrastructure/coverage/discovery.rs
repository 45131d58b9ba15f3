//! Project inspection helpers shared by the analyzers.

use std::path::{Component, Path};

use walkdir::WalkDir;

/// Directories never searched for sources.
pub const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    ".git",
    "build",
    "dist",
    "__pycache__",
    "target",
    ".build",
];

/// Whether any file under `root` ends in one of `extensions` (e.g. `".go"`).
pub fn has_file_with_extension(root: &Path, extensions: &[&str]) -> bool {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !SKIP_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .any(|entry| {
            let name = entry.file_name().to_string_lossy();
            extensions.iter().any(|ext| name.ends_with(ext))
        })
}

/// Whether any of `markers` exists directly under `root`.
pub fn has_marker(root: &Path, markers: &[&str]) -> bool {
    markers.iter().any(|marker| root.join(marker).exists())
}

/// Project-relative unit ID with forward slashes, or `None` when `path` lies
/// outside `root`.
pub fn relative_unit_id(root: &Path, path: &Path) -> Option<String> {
    let relative = if path.is_absolute() {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        path.strip_prefix(&root).ok()?.to_path_buf()
    } else {
        path.to_path_buf()
    };

    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Whether a unit ID passes through a skipped directory.
pub fn in_skipped_dir(unit_id: &str) -> bool {
    unit_id
        .split('/')
        .any(|part| SKIP_DIRS.contains(&part))
}

/// Split `dir/name.ext` into (`dir/`, `name`, `.ext`).
pub fn split_unit_path(unit_id: &str) -> (&str, &str, &str) {
    let (dir, file) = unit_id
        .rfind('/')
        .map_or(("", unit_id), |idx| unit_id.split_at(idx + 1));
    let (stem, ext) = file.find('.').map_or((file, ""), |idx| file.split_at(idx));
    (dir, stem, ext)
}
