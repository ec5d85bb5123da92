//! Path sandbox: owner-folder naming and traversal-safe joins.

use std::path::{Component, Path, PathBuf};

use crate::errors::WsError;

/// Longest folder name derived from an owner identity.
const MAX_FOLDER_LEN: usize = 128;

/// Derive the workspace folder name for an owner identity.
///
/// Keeps the typical email character set, collapses traversal sequences,
/// and falls back to `"user"` when nothing safe remains.
pub fn owner_folder(email: &str) -> String {
    let mut name: String = email
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-' | '@'))
        .collect();
    while name.contains("..") {
        name = name.replace("..", ".");
    }
    let name = name.trim_matches('.');
    if name.is_empty() {
        return "user".to_string();
    }
    name.chars().take(MAX_FOLDER_LEN).collect()
}

/// Join `rel` onto `root`, guaranteeing the result stays inside `root`.
///
/// The relative path is normalized lexically: `.` components are dropped and
/// `..` components pop previously pushed ones; popping past the root fails
/// with [`WsError::PathTraversal`]. Absolute components are rejected outright.
/// If the final component exists and is a symlink the join fails with
/// [`WsError::SymlinkForbidden`].
pub fn safe_join(root: &Path, rel: &str) -> Result<PathBuf, WsError> {
    let rel = rel.trim_start_matches(['/', '\\']);

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(WsError::PathTraversal);
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(WsError::PathTraversal),
        }
    }

    let mut joined = root.to_path_buf();
    for part in parts {
        joined.push(part);
    }

    if let Ok(meta) = std::fs::symlink_metadata(&joined) {
        if meta.file_type().is_symlink() {
            return Err(WsError::SymlinkForbidden);
        }
    }

    Ok(joined)
}
