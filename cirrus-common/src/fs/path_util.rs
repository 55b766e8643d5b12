// Copyright 2025 the Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Helpers for abstract `/`-separated paths as interpreted over object keys.

use crate::{FsError, FsResult};

pub const SEPARATOR: char = '/';

pub fn split_path(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|p| !p.is_empty()).collect()
}

pub fn join_path(parts: &[&str]) -> String {
    parts.join("/")
}

/// Number of non-empty segments in `path`.
pub fn depth(path: &str) -> i32 {
    split_path(path).len() as i32
}

/// The first `n` segments of `path`, rejoined.
pub fn slice_path(path: &str, n: usize) -> String {
    let parts = split_path(path);
    parts[..n.min(parts.len())].join("/")
}

pub fn has_trailing_slash(path: &str) -> bool {
    path.ends_with(SEPARATOR)
}

pub fn remove_trailing_slash(path: &str) -> &str {
    path.trim_end_matches(SEPARATOR)
}

/// The key of a directory object ends with `/`; the empty key stays empty.
pub fn ensure_trailing_slash(path: &str) -> String {
    if path.is_empty() || path.ends_with(SEPARATOR) {
        path.to_string()
    } else {
        format!("{}{}", path, SEPARATOR)
    }
}

/// The parent of `a/b/c` is `a/b`; a single-segment path has no parent.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind(SEPARATOR).map(|v| &path[..v])
}

/// Rejects `.` and `..` segments and empty intermediate segments.
pub fn validate_segments(path: &str) -> FsResult<()> {
    for part in path.split(SEPARATOR) {
        if part.is_empty() {
            return Err(FsError::invalid(format!(
                "Empty path segment in '{}'",
                path
            )));
        }
        if part == "." || part == ".." {
            return Err(FsError::invalid(format!(
                "Path cannot contain '{}' segment ('{}')",
                part, path
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_depth() {
        assert_eq!(split_path("a/b/c"), vec!["a", "b", "c"]);
        assert_eq!(depth("a/b/c"), 3);
        assert_eq!(depth(""), 0);
        assert_eq!(depth("a/"), 1);
    }

    #[test]
    fn slice() {
        assert_eq!(slice_path("a/b/c", 2), "a/b");
        assert_eq!(slice_path("a/b/c", 5), "a/b/c");
        assert_eq!(slice_path("a", 0), "");
    }

    #[test]
    fn trailing_slash() {
        assert_eq!(remove_trailing_slash("a/b/"), "a/b");
        assert_eq!(ensure_trailing_slash("a/b"), "a/b/");
        assert_eq!(ensure_trailing_slash("a/b/"), "a/b/");
        assert_eq!(ensure_trailing_slash(""), "");
    }

    #[test]
    fn parent() {
        assert_eq!(parent_path("a/b/c"), Some("a/b"));
        assert_eq!(parent_path("a"), None);
    }

    #[test]
    fn validate() {
        assert!(validate_segments("a/b").is_ok());
        assert!(validate_segments("a//b").is_err());
        assert!(validate_segments("a/./b").is_err());
        assert!(validate_segments("a/../b").is_err());
    }
}
