use std::path::{Component, Path};

/// A relative path that would escape its base directory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path: {0}")]
pub struct InvalidPath(pub String);

/// Validates that `relative` stays below whatever directory it is joined to.
///
/// Rejects:
/// - Empty or blank paths
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_relative_path(relative: &str) -> Result<(), InvalidPath> {
    if relative.trim().is_empty() {
        return Err(InvalidPath("empty path".into()));
    }

    let path = Path::new(relative);

    if path.is_absolute() {
        return Err(InvalidPath(format!("absolute path not allowed: {relative}")));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(InvalidPath(format!(
                    "parent directory traversal not allowed: {relative}"
                )));
            }
            Component::Prefix(_) => {
                return Err(InvalidPath(format!("path prefix not allowed: {relative}")));
            }
            Component::RootDir => {
                return Err(InvalidPath(format!("absolute path not allowed: {relative}")));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    if path.components().all(|c| matches!(c, Component::CurDir)) {
        return Err(InvalidPath(format!("path names no file: {relative}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_blank() {
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("   ").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_relative_path("../../../etc/passwd").is_err());
        assert!(validate_relative_path("sub/../../../escape").is_err());
        assert!(validate_relative_path("..").is_err());
    }

    #[test]
    fn rejects_absolute_unix_path() {
        assert!(validate_relative_path("/tmp/malicious").is_err());
    }

    #[test]
    fn rejects_current_dir_only() {
        assert!(validate_relative_path(".").is_err());
        assert!(validate_relative_path("./.").is_err());
    }

    #[test]
    fn windows_style_paths() {
        let result = validate_relative_path("C:\\Windows\\evil");
        // A plain (odd) filename on Unix, a prefixed path on Windows.
        #[cfg(windows)]
        assert!(result.is_err());
        #[cfg(not(windows))]
        assert!(result.is_ok());
    }

    #[test]
    fn accepts_relative_names() {
        assert!(validate_relative_path("tok-1").is_ok());
        assert!(validate_relative_path("sub/dir/file.txt").is_ok());
        assert!(validate_relative_path(".config/settings.json").is_ok());
        assert!(validate_relative_path("./game.exe").is_ok());
    }
}
