//! Bounded-depth directory enumeration for `list_tree`.

use std::path::Path;
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

use crate::errors::WsError;
use crate::protocol::{EntryKind, TreeEntry};
use crate::workspace::paths::safe_join;

/// Hard ceiling on recursion depth regardless of what the client asks for.
const MAX_TREE_DEPTH: u32 = 10;

/// Enumerate the tree under `cwd/rel`.
///
/// `max_depth = 0` lists only immediate children; each increment descends one
/// more level, clamped to [`MAX_TREE_DEPTH`]. Excluded names are pruned along
/// with their entire subtree, symlinks are neither followed nor listed, and
/// entries come back in no guaranteed order. Paths in the result are relative
/// to `cwd`, so they can be passed straight back to `read_file`/`write_file`.
pub fn list_tree(
    cwd: &Path,
    rel: &str,
    max_depth: u32,
    excludes: &[String],
) -> Result<Vec<TreeEntry>, WsError> {
    let base = safe_join(cwd, rel)?;
    let depth = max_depth.min(MAX_TREE_DEPTH) as usize;

    let mut items = Vec::new();
    let walker = WalkDir::new(&base)
        .min_depth(1)
        .max_depth(depth + 1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !entry.path_is_symlink()
                && entry
                    .file_name()
                    .to_str()
                    .map(|name| !excludes.iter().any(|e| e == name))
                    .unwrap_or(true)
        });

    for entry in walker {
        // unreadable entries (races, permissions) are skipped, not fatal
        let Ok(entry) = entry else { continue };
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(rel_path) = entry.path().strip_prefix(cwd) else {
            continue;
        };

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64());

        items.push(TreeEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: rel_path.to_string_lossy().into_owned(),
            kind: if meta.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            },
            size: meta.is_file().then(|| meta.len()),
            mtime,
        });
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn excludes() -> Vec<String> {
        crate::config::DEFAULT_EXCLUDES
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/components")).unwrap();
        fs::create_dir_all(root.join("node_modules/react")).unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();
        fs::write(root.join("src/main.ts"), "export {};").unwrap();
        fs::write(root.join("src/components/App.tsx"), "<div/>").unwrap();
        fs::write(root.join("node_modules/react/index.js"), "x").unwrap();
        dir
    }

    fn paths(items: &[TreeEntry]) -> Vec<String> {
        items.iter().map(|e| e.path.clone()).collect()
    }

    #[test]
    fn depth_zero_lists_immediate_children_only() {
        let dir = fixture();
        let items = list_tree(dir.path(), "", 0, &excludes()).unwrap();
        let mut got = paths(&items);
        got.sort();
        assert_eq!(got, ["package.json", "src"]);
    }

    #[test]
    fn large_depth_returns_full_tree() {
        let dir = fixture();
        let items = list_tree(dir.path(), "", 99, &excludes()).unwrap();
        let got = paths(&items);
        assert!(got.contains(&"src/components/App.tsx".to_string()));
        assert!(got.contains(&"src/main.ts".to_string()));
    }

    #[test]
    fn excluded_directories_and_descendants_never_appear() {
        let dir = fixture();
        let items = list_tree(dir.path(), "", 99, &excludes()).unwrap();
        for p in paths(&items) {
            assert!(!p.contains("node_modules"), "leaked excluded path {p}");
        }
    }

    #[test]
    fn relative_base_keeps_prefix_in_paths() {
        let dir = fixture();
        let items = list_tree(dir.path(), "src", 5, &excludes()).unwrap();
        let got = paths(&items);
        assert!(got.contains(&"src/main.ts".to_string()));
        assert!(got.contains(&"src/components".to_string()));
    }

    #[test]
    fn files_carry_size_dirs_do_not() {
        let dir = fixture();
        let items = list_tree(dir.path(), "", 99, &excludes()).unwrap();
        for entry in &items {
            match entry.kind {
                EntryKind::File => assert!(entry.size.is_some()),
                EntryKind::Dir => assert!(entry.size.is_none()),
            }
            assert!(entry.mtime.is_some());
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_listed_or_followed() {
        let dir = fixture();
        let root = dir.path();
        std::os::unix::fs::symlink(root.join("src"), root.join("src-link")).unwrap();
        let items = list_tree(root, "", 99, &excludes()).unwrap();
        for p in paths(&items) {
            assert!(!p.contains("src-link"), "listed symlink {p}");
        }
    }

    #[test]
    fn traversal_base_is_rejected() {
        let dir = fixture();
        assert!(matches!(
            list_tree(dir.path(), "../..", 2, &excludes()),
            Err(WsError::PathTraversal)
        ));
    }
}
