//! Security utilities for key validation and sandboxing.

use crate::error::{BlobStoreError, Result};
use std::path::{Component, Path, PathBuf};

/// Restricts the cache root to its owner. A no-op beyond an existence check
/// off Unix.
pub async fn set_secure_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await {
            tracing::warn!("Could not restrict {}: {}", path.display(), e);
            return Err(BlobStoreError::Permission {
                operation: "chmod 0700".to_string(),
                path: path.to_path_buf(),
            });
        }
    }

    #[cfg(not(unix))]
    if !path.is_dir() {
        return Err(path_error(path, "Cache root is not a directory".to_string()));
    }

    Ok(())
}

/// Validates the lexical shape of a blob key before it touches the filesystem.
///
/// Keys are relative, `/`-separated paths. Parent components are allowed only
/// while they stay inside the sandbox (`a/../b` is fine, `../b` is not).
pub fn validate_key(key: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(BlobStoreError::PathValidation {
            path: Path::new(key).to_path_buf(),
            reason: reason.to_string(),
        })
    };

    if key.is_empty() {
        return reject("Key cannot be empty");
    }

    if key.contains('\0') {
        return reject("Key contains null bytes");
    }

    let path = Path::new(key);
    if path.is_absolute() || key.starts_with('/') {
        return reject("Absolute keys not allowed - use relative keys within sandbox");
    }

    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return reject("Key escapes sandbox");
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return reject("Absolute keys not allowed - use relative keys within sandbox");
            }
        }
    }

    if depth == 0 {
        return reject("Key does not name a file");
    }

    Ok(())
}

fn path_error(path: &Path, reason: String) -> BlobStoreError {
    BlobStoreError::PathValidation {
        path: path.to_path_buf(),
        reason,
    }
}

/// Canonical form of `path`. A path that does not exist yet resolves through
/// its parent directory, which must exist.
fn canonical(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return path
            .canonicalize()
            .map_err(|e| path_error(path, format!("Failed to resolve path: {e}")));
    }

    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Err(path_error(path, "Path has no parent or file name".to_string()));
    };
    let parent = parent
        .canonicalize()
        .map_err(|e| path_error(parent, format!("Failed to resolve parent: {e}")))?;
    Ok(parent.join(file_name))
}

/// Checks, after resolving symlinks and `..`, that `resolved_path` lies under
/// `sandbox_base`.
pub fn validate_path_within_sandbox(resolved_path: &Path, sandbox_base: &Path) -> Result<()> {
    let base = sandbox_base
        .canonicalize()
        .map_err(|e| path_error(sandbox_base, format!("Failed to resolve sandbox base: {e}")))?;
    let target = canonical(resolved_path)?;

    if target.starts_with(&base) {
        Ok(())
    } else {
        Err(path_error(
            resolved_path,
            format!(
                "Path escapes sandbox: resolves to '{}' (outside '{}')",
                target.display(),
                base.display()
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("blob.jpg").is_ok());
        assert!(validate_key("log-01/CAM_F0/blob.jpg").is_ok());
        assert!(validate_key("a/../b.pcd").is_ok());

        assert!(validate_key("").is_err());
        assert!(validate_key("blob\0.jpg").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("../outside.jpg").is_err());
        assert!(validate_key("a/../../outside.jpg").is_err());
        assert!(validate_key("a/..").is_err());
    }

    #[tokio::test]
    async fn test_validate_path_within_sandbox() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let temp_dir = tempfile::tempdir()?;
        let base = temp_dir.path();

        let inside = base.join("inside.bin");
        std::fs::write(&inside, b"inside")?;
        assert!(validate_path_within_sandbox(&inside, base).is_ok());

        let outside_dir = tempfile::tempdir()?;
        let outside = outside_dir.path().join("outside.bin");
        std::fs::write(&outside, b"outside")?;
        assert!(validate_path_within_sandbox(&outside, base).is_err());
        Ok(())
    }
}
