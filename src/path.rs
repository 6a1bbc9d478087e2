//! Absolute path handling for the filesystem engine.
//!
//! Paths are always absolute, `/`-separated and bounded by
//! [`MAX_FILESYSTEM_PATH_LENGTH`](crate::MAX_FILESYSTEM_PATH_LENGTH). The
//! parser rejects malformed paths up front so the layers below only ever see
//! well-formed segment lists.

use alloc::string::String;
use alloc::vec::Vec;

use crate::errors::FilesystemError;
use crate::MAX_FILESYSTEM_PATH_LENGTH;

/// A parsed absolute filesystem path.
///
/// Holds the original path string and the list of its segments. The root
/// path `/` parses to an empty segment list.
#[derive(Debug, Clone)]
pub struct FilesystemPath {
    full_path: String,
    segments: Vec<String>,
}

impl FilesystemPath {
    /// Parses an absolute path string.
    ///
    /// # Errors
    ///
    /// - [`FilesystemError::EmptyPath`] when the string is empty.
    /// - [`FilesystemError::PathTooLong`] when it exceeds the configured bound.
    /// - [`FilesystemError::IllegalPath`] when it does not start with `/` or
    ///   contains an empty segment.
    pub fn parse(path: &str) -> Result<Self, FilesystemError> {
        if path.is_empty() {
            return Err(FilesystemError::EmptyPath);
        }

        if path.len() > MAX_FILESYSTEM_PATH_LENGTH {
            return Err(FilesystemError::PathTooLong);
        }

        if !path.starts_with('/') {
            return Err(FilesystemError::IllegalPath);
        }

        let mut segments = Vec::new();

        if path != "/" {
            for segment in path[1..].split('/') {
                if segment.is_empty() {
                    return Err(FilesystemError::IllegalPath);
                }

                segments.push(String::from(segment));
            }
        }

        Ok(Self {
            full_path: String::from(path),
            segments,
        })
    }

    /// Returns the original path string.
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// Returns `true` if the path names the root directory.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the path segments, in order from the root.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Assembles the absolute path of the first `count` segments.
    ///
    /// `prefix(0)` is the empty string rather than `/` so callers can append
    /// `/segment` pairs directly when rebuilding paths.
    pub fn prefix(&self, count: usize) -> String {
        let mut assembled = String::new();

        for segment in self.segments.iter().take(count) {
            assembled.push('/');
            assembled.push_str(segment);
        }

        assembled
    }
}

/// Joins a directory's absolute path with a child name.
///
/// The root directory is the one special case: children of `/` do not get a
/// doubled separator.
pub fn join(parent: &str, child: &str) -> String {
    let mut path = String::from(parent);

    if path != "/" {
        path.push('/');
    }

    path.push_str(child);
    path
}

/// Returns the parent of an absolute path by stripping the final segment,
/// or `/` when the path sits directly under the root.
pub fn parent(path: &str) -> Result<String, FilesystemError> {
    match path.rfind('/') {
        Some(0) => Ok(String::from("/")),
        Some(last_slash) => Ok(String::from(&path[..last_slash])),
        None => Err(FilesystemError::IllegalPath),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_root() {
        let path = FilesystemPath::parse("/").unwrap();

        assert!(path.is_root());
        assert!(path.segments().is_empty());
        assert_eq!(path.full_path(), "/");
    }

    #[test]
    fn parses_nested_path() {
        let path = FilesystemPath::parse("/subdir1/nested dir/file testing").unwrap();

        assert!(!path.is_root());
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.segments()[1], "nested dir");
        assert_eq!(path.prefix(2), "/subdir1/nested dir");
        assert_eq!(path.prefix(0), "");
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_eq!(
            FilesystemPath::parse("").unwrap_err(),
            FilesystemError::EmptyPath
        );
        assert_eq!(
            FilesystemPath::parse("subdir1").unwrap_err(),
            FilesystemError::IllegalPath
        );
        assert_eq!(
            FilesystemPath::parse("/subdir1//nested").unwrap_err(),
            FilesystemError::IllegalPath
        );

        let too_long = alloc::format!("/{}", "a".repeat(crate::MAX_FILESYSTEM_PATH_LENGTH));
        assert_eq!(
            FilesystemPath::parse(&too_long).unwrap_err(),
            FilesystemError::PathTooLong
        );
    }

    #[test]
    fn joins_and_strips_segments() {
        assert_eq!(join("/", "subdir1"), "/subdir1");
        assert_eq!(join("/subdir1", "nested"), "/subdir1/nested");
        assert_eq!(parent("/subdir1/nested").unwrap(), "/subdir1");
        assert_eq!(parent("/subdir1").unwrap(), "/");
    }
}
