//! Remote key derivation.

use std::path::Path;

/// Deterministic object key for a local file: `prefix` plus the file name.
///
/// An empty prefix uploads under the bare file name. A non-empty prefix is
/// joined with exactly one `/`. Returns `None` for paths without a UTF-8
/// file name, which cannot be addressed in the bucket.
pub fn remote_key(prefix: &str, path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        Some(name.to_string())
    } else {
        Some(format!("{}/{}", prefix, name))
    }
}

/// Whether `path` carries one of the configured extensions.
///
/// Extensions are normalized by the config loader to lowercase without the
/// leading dot; comparison here is case-insensitive so `CLIP.MP4` matches.
pub fn has_watched_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}
