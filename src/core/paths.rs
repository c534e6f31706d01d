//! Shared path manipulation utilities.

use std::path::{Component, Path, PathBuf};

use crate::core::errors::{Result, WstError};

/// Resolve a request path below the server root directory.
///
/// A leading `/` is stripped so absolute-looking request paths stay under the
/// root. `.` components are dropped and `..` components are resolved
/// syntactically; a path that would climb above the root is rejected.
pub fn resolve_under_root(root: &Path, request_path: &str) -> Result<PathBuf> {
    let trimmed = request_path.trim();
    if trimmed.is_empty() {
        return Err(WstError::invalid_input("path must not be empty"));
    }
    let relative = trimmed.trim_start_matches('/');

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(WstError::invalid_input(format!(
                        "path escapes the server root: {request_path}"
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let mut resolved = root.to_path_buf();
    resolved.extend(parts);
    Ok(resolved)
}

/// Expand a leading `~` against the given home directory.
pub fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Return `true` when one path is equal to, an ancestor of, or a descendant of the other.
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_slash() {
        let resolved = resolve_under_root(Path::new("/workspace"), "/notebooks/a.ipynb").unwrap();
        assert_eq!(resolved, Path::new("/workspace/notebooks/a.ipynb"));
    }

    #[test]
    fn resolves_parent_components_inside_root() {
        let resolved = resolve_under_root(Path::new("/workspace"), "a/b/../c").unwrap();
        assert_eq!(resolved, Path::new("/workspace/a/c"));
    }

    #[test]
    fn rejects_escape_above_root() {
        let err = resolve_under_root(Path::new("/workspace"), "../etc/passwd").unwrap_err();
        assert_eq!(err.code(), "WST-2201");
    }

    #[test]
    fn rejects_empty_path() {
        assert!(resolve_under_root(Path::new("/workspace"), "   ").is_err());
    }

    #[test]
    fn root_itself_resolves() {
        let resolved = resolve_under_root(Path::new("/workspace"), "/").unwrap();
        assert_eq!(resolved, Path::new("/workspace"));
    }

    #[test]
    fn expands_tilde() {
        assert_eq!(
            expand_home(Path::new("~/.workspace"), Path::new("/home/ml")),
            Path::new("/home/ml/.workspace")
        );
        assert_eq!(
            expand_home(Path::new("/abs"), Path::new("/home/ml")),
            Path::new("/abs")
        );
    }

    #[test]
    fn overlap_detects_nesting() {
        assert!(paths_overlap(Path::new("/w"), Path::new("/w/sub")));
        assert!(paths_overlap(Path::new("/w/sub"), Path::new("/w")));
        assert!(paths_overlap(Path::new("/w"), Path::new("/w")));
        assert!(!paths_overlap(Path::new("/w/a"), Path::new("/w/b")));
        assert!(!paths_overlap(Path::new("/w/ab"), Path::new("/w/a")));
    }
}
