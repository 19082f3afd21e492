// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Path Sanitizer Domain Service
//!
//! Validates every path a donor announces before the recipient touches the
//! filesystem. Image entries must stay inside the session directory and
//! open-file directory overrides must stay under the configured prefix.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements traversal prevention for the transfer protocol

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use super::errors::MigrationError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathSanitizerError {
    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path outside allowed boundary: {0}")]
    OutsideBoundary(String),

    #[error("Path too long: {0}")]
    PathTooLong(String),
}

impl From<PathSanitizerError> for MigrationError {
    fn from(err: PathSanitizerError) -> Self {
        MigrationError::PathRejected(err.to_string())
    }
}

const MAX_PATH_LEN: usize = 4096;

/// Path sanitizer for names received from a peer.
///
/// # Security Guarantees
/// - Rejects paths containing `..` components
/// - Relative names never resolve outside their root
/// - Directory overrides must live under the open-file prefix
pub struct PathSanitizer {
    max_path_len: usize,
}

impl Default for PathSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PathSanitizer {
    pub fn new() -> Self {
        Self {
            max_path_len: MAX_PATH_LEN,
        }
    }

    /// Normalizes a relative name, dropping `.` components.
    ///
    /// # Examples
    /// ```
    /// use ferry_core::domain::path_sanitizer::PathSanitizer;
    /// use std::path::PathBuf;
    ///
    /// let sanitizer = PathSanitizer::new();
    /// let safe = sanitizer.relative("./checkpoints/0/pages-1.img").unwrap();
    /// assert_eq!(safe, PathBuf::from("checkpoints/0/pages-1.img"));
    /// assert!(sanitizer.relative("../etc/passwd").is_err());
    /// ```
    pub fn relative(&self, name: &str) -> Result<PathBuf, PathSanitizerError> {
        self.check_length(name)?;

        let mut normalized = PathBuf::new();
        for component in Path::new(name).components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    tracing::warn!(path = %name, "Path traversal attempt detected");
                    return Err(PathSanitizerError::PathTraversal(name.to_string()));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathSanitizerError::InvalidPath(format!(
                        "{} must be relative",
                        name
                    )));
                }
            }
        }

        if normalized.as_os_str().is_empty() {
            return Err(PathSanitizerError::InvalidPath(format!("'{}' is empty", name)));
        }

        Ok(normalized)
    }

    /// Validates an absolute directory override against `boundary`.
    pub fn absolute_under(&self, dir: &str, boundary: &Path) -> Result<PathBuf, PathSanitizerError> {
        self.check_length(dir)?;

        let path = Path::new(dir);
        if !path.is_absolute() {
            return Err(PathSanitizerError::InvalidPath(format!("{} must be absolute", dir)));
        }

        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    tracing::warn!(path = %dir, "Path traversal attempt detected");
                    return Err(PathSanitizerError::PathTraversal(dir.to_string()));
                }
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }

        if !normalized.starts_with(boundary) {
            return Err(PathSanitizerError::OutsideBoundary(dir.to_string()));
        }

        Ok(normalized)
    }

    /// Resolves a FileInfo/LinkInfo target to a concrete path.
    pub fn resolve(
        &self,
        session_root: &Path,
        filename: &str,
        dir_override: Option<&str>,
        open_file_prefix: &Path,
    ) -> Result<PathBuf, PathSanitizerError> {
        let name = self.relative(filename)?;
        match dir_override {
            Some(dir) => Ok(self.absolute_under(dir, open_file_prefix)?.join(name)),
            None => Ok(session_root.join(name)),
        }
    }

    /// Checks that a symlink placed at `link` (inside `root`) pointing at
    /// `target` cannot reach outside `root`.
    ///
    /// Only the shape the checkpoint engine produces for incremental images
    /// is accepted: a relative target made of leading `..` components followed
    /// by plain names, such as `../0`. Provided `link`'s parent directory is
    /// not itself reached through a symlink, this resolves the same way
    /// lexically and on disk.
    pub fn contained_link(&self, root: &Path, link: &Path, target: &str) -> Result<(), PathSanitizerError> {
        self.check_length(target)?;

        let target_path = Path::new(target);
        if target_path.is_absolute() {
            return Err(PathSanitizerError::InvalidPath(format!("link target {} must be relative", target)));
        }

        let mut resolved = link.parent().unwrap_or(root).to_path_buf();
        let mut descending = false;
        for component in target_path.components() {
            match component {
                Component::ParentDir if descending => {
                    tracing::warn!(link = %link.display(), target = %target, "Symlink target climbs after descending");
                    return Err(PathSanitizerError::PathTraversal(target.to_string()));
                }
                Component::ParentDir => {
                    if !resolved.pop() {
                        return Err(PathSanitizerError::PathTraversal(target.to_string()));
                    }
                }
                Component::CurDir => {}
                Component::Normal(part) => {
                    descending = true;
                    resolved.push(part);
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathSanitizerError::InvalidPath(target.to_string()));
                }
            }
        }

        if !resolved.starts_with(root) || resolved == root {
            tracing::warn!(link = %link.display(), target = %target, "Symlink escapes session directory");
            return Err(PathSanitizerError::OutsideBoundary(target.to_string()));
        }
        Ok(())
    }

    fn check_length(&self, path: &str) -> Result<(), PathSanitizerError> {
        if path.len() > self.max_path_len {
            return Err(PathSanitizerError::PathTooLong(path.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_rejects_absolute_and_empty() {
        let s = PathSanitizer::new();
        assert!(matches!(s.relative("/etc/passwd"), Err(PathSanitizerError::InvalidPath(_))));
        assert!(matches!(s.relative("."), Err(PathSanitizerError::InvalidPath(_))));
        assert!(matches!(s.relative("a/../../b"), Err(PathSanitizerError::PathTraversal(_))));
    }

    #[test]
    fn test_override_must_stay_under_prefix() {
        let s = PathSanitizer::new();
        let prefix = Path::new("/tmp");
        assert_eq!(
            s.absolute_under("/tmp/job/./data", prefix).unwrap(),
            PathBuf::from("/tmp/job/data")
        );
        assert!(matches!(
            s.absolute_under("/etc", prefix),
            Err(PathSanitizerError::OutsideBoundary(_))
        ));
        assert!(matches!(
            s.absolute_under("/tmpfoo", prefix),
            Err(PathSanitizerError::OutsideBoundary(_))
        ));
        assert!(matches!(
            s.absolute_under("/tmp/../etc", prefix),
            Err(PathSanitizerError::PathTraversal(_))
        ));
    }

    #[test]
    fn test_resolve() {
        let s = PathSanitizer::new();
        let root = Path::new("/var/lib/ferry/incoming/abc");
        let prefix = Path::new("/tmp");
        assert_eq!(
            s.resolve(root, "checkpoints/0/core-1.img", None, prefix).unwrap(),
            root.join("checkpoints/0/core-1.img")
        );
        assert_eq!(
            s.resolve(root, "out.log", Some("/tmp/job"), prefix).unwrap(),
            PathBuf::from("/tmp/job/out.log")
        );
        assert!(s.resolve(root, "../x", Some("/tmp/job"), prefix).is_err());
    }

    #[test]
    fn test_contained_link() {
        let s = PathSanitizer::new();
        let root = Path::new("/var/lib/ferry/incoming/abc");
        let link = root.join("checkpoints/1/parent");
        assert!(s.contained_link(root, &link, "../0").is_ok());
        assert!(s.contained_link(root, &link, "../../../../etc").is_err());
        assert!(s.contained_link(root, &link, "/etc/shadow").is_err());
        assert!(s
            .contained_link(root, &link, "/var/lib/ferry/incoming/abc/checkpoints/0")
            .is_err());
    }

    #[test]
    fn test_link_target_cannot_climb_after_descending() {
        let s = PathSanitizer::new();
        let root = Path::new("/var/lib/ferry/incoming/abc");
        assert!(matches!(
            s.contained_link(root, &root.join("x"), "a/b/../.."),
            Err(PathSanitizerError::PathTraversal(_))
        ));
        assert!(matches!(
            s.contained_link(root, &root.join("a/b"), ".."),
            Err(PathSanitizerError::OutsideBoundary(_))
        ));
        assert!(s.contained_link(root, &root.join("checkpoints/2/parent"), "../1").is_ok());
    }

    #[test]
    fn test_too_long() {
        let s = PathSanitizer::new();
        let long = "a/".repeat(MAX_PATH_LEN / 2) + "b";
        assert!(matches!(s.relative(&long), Err(PathSanitizerError::PathTooLong(_))));
        assert!(s.relative(&"a".repeat(MAX_PATH_LEN)).is_ok());
    }

    #[test]
    fn test_converts_to_migration_error() {
        let err: MigrationError = PathSanitizerError::PathTraversal("../x".into()).into();
        assert!(matches!(err, MigrationError::PathRejected(_)));
    }
}
