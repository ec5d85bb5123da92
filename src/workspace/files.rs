//! Bounded, text-only file I/O inside a session's workspace.

use std::path::Path;

use crate::config::Config;
use crate::errors::WsError;
use crate::workspace::paths::safe_join;

/// Heuristic check that `data` is plain text: a NUL byte fails immediately,
/// otherwise up to 5% control bytes (outside tab/newline/carriage-return)
/// are tolerated.
pub fn looks_text(data: &[u8]) -> bool {
    if data.contains(&0) {
        return false;
    }
    if data.is_empty() {
        return true;
    }
    let ctrl = data
        .iter()
        .filter(|&&b| b < 9 || (b > 13 && b < 32))
        .count();
    (ctrl as f64 / data.len() as f64) < 0.05
}

/// Read a workspace file as UTF-8 text.
///
/// Fails when the path does not name a regular file, when the file exceeds
/// the configured read limit, or when the content does not look like text.
pub async fn read_file(config: &Config, cwd: &Path, rel: &str) -> Result<String, WsError> {
    let path = safe_join(cwd, rel)?;

    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|_| WsError::FileNotFound(rel.to_string()))?;
    if !meta.is_file() {
        return Err(WsError::FileNotFound(rel.to_string()));
    }
    if meta.len() > config.max_read_bytes {
        return Err(WsError::FileTooLarge {
            size: meta.len(),
            limit: config.max_read_bytes,
        });
    }

    let raw = tokio::fs::read(&path).await?;
    if !looks_text(&raw) {
        return Err(WsError::BinaryNotAllowed);
    }
    String::from_utf8(raw).map_err(|_| WsError::BinaryNotAllowed)
}

/// Replace a workspace file's full content.
///
/// Fails when the encoded size exceeds the configured write limit, or when
/// the file is missing and `create_if_missing` is false. Parent directories
/// are created as needed; the write is a full replace, never a patch.
pub async fn write_file(
    config: &Config,
    cwd: &Path,
    rel: &str,
    content: &str,
    create_if_missing: bool,
) -> Result<(), WsError> {
    let path = safe_join(cwd, rel)?;

    let size = content.len() as u64;
    if size > config.max_write_bytes {
        return Err(WsError::WriteTooLarge {
            size,
            limit: config.max_write_bytes,
        });
    }

    if tokio::fs::metadata(&path).await.is_err() {
        if !create_if_missing {
            return Err(WsError::FileNotFound(rel.to_string()));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    tokio::fs::write(&path, content.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(root: &Path) -> Config {
        let mut config = Config::with_root(root.to_path_buf()).unwrap();
        config.max_read_bytes = 64;
        config.max_write_bytes = 64;
        config
    }

    #[test]
    fn looks_text_rejects_nul() {
        assert!(!looks_text(b"hello\0world"));
    }

    #[test]
    fn looks_text_accepts_empty_and_plain() {
        assert!(looks_text(b""));
        assert!(looks_text(b"fn main() {}\n\ttab ok\r\n"));
    }

    #[test]
    fn looks_text_tolerates_few_control_bytes() {
        let mut data = vec![b'a'; 100];
        data[0] = 0x07; // bell
        assert!(looks_text(&data));
        // 10% control bytes is over the threshold
        let mut noisy = vec![b'a'; 100];
        for b in noisy.iter_mut().take(10) {
            *b = 0x07;
        }
        assert!(!looks_text(&noisy));
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let cwd = config.workspace_root.clone();

        write_file(&config, &cwd, "src/app.ts", "export {};\n", true)
            .await
            .unwrap();
        let content = read_file(&config, &cwd, "src/app.ts").await.unwrap();
        assert_eq!(content, "export {};\n");
    }

    #[tokio::test]
    async fn read_missing_file_fails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let cwd = config.workspace_root.clone();
        assert!(matches!(
            read_file(&config, &cwd, "nope.txt").await,
            Err(WsError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn read_directory_fails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let cwd = config.workspace_root.clone();
        std::fs::create_dir(cwd.join("sub")).unwrap();
        assert!(matches!(
            read_file(&config, &cwd, "sub").await,
            Err(WsError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn read_too_large_fails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let cwd = config.workspace_root.clone();
        std::fs::write(cwd.join("big.txt"), vec![b'x'; 65]).unwrap();
        assert!(matches!(
            read_file(&config, &cwd, "big.txt").await,
            Err(WsError::FileTooLarge { size: 65, limit: 64 })
        ));
    }

    #[tokio::test]
    async fn read_binary_fails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let cwd = config.workspace_root.clone();
        std::fs::write(cwd.join("blob.bin"), b"ab\0cd").unwrap();
        assert!(matches!(
            read_file(&config, &cwd, "blob.bin").await,
            Err(WsError::BinaryNotAllowed)
        ));
    }

    #[tokio::test]
    async fn write_too_large_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let cwd = config.workspace_root.clone();
        std::fs::write(cwd.join("keep.txt"), "original").unwrap();

        let huge = "y".repeat(65);
        assert!(matches!(
            write_file(&config, &cwd, "keep.txt", &huge, true).await,
            Err(WsError::WriteTooLarge { size: 65, limit: 64 })
        ));
        assert_eq!(
            std::fs::read_to_string(cwd.join("keep.txt")).unwrap(),
            "original"
        );

        // and a nonexistent target stays nonexistent
        assert!(matches!(
            write_file(&config, &cwd, "new.txt", &huge, true).await,
            Err(WsError::WriteTooLarge { .. })
        ));
        assert!(!cwd.join("new.txt").exists());
    }

    #[tokio::test]
    async fn write_missing_without_create_fails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let cwd = config.workspace_root.clone();
        assert!(matches!(
            write_file(&config, &cwd, "absent.txt", "x", false).await,
            Err(WsError::FileNotFound(_))
        ));
        assert!(!cwd.join("absent.txt").exists());
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let cwd = config.workspace_root.clone();
        write_file(&config, &cwd, "a/b/c.txt", "deep", true)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(cwd.join("a/b/c.txt")).unwrap(), "deep");
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let cwd = config.workspace_root.clone();
        assert!(matches!(
            write_file(&config, &cwd, "../escape.txt", "x", true).await,
            Err(WsError::PathTraversal)
        ));
        assert!(matches!(
            read_file(&config, &cwd, "../../etc/passwd").await,
            Err(WsError::PathTraversal)
        ));
    }
}
