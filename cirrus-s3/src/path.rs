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

use crate::SCHEME;
use cirrus_common::fs::path_util;
use cirrus_common::{FsError, FsResult};
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::fmt::{Display, Formatter};

static URI_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*://").unwrap());

// S3 keys keep the RFC 3986 unreserved characters unescaped.
const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// An S3 location of the form `bucket[/key]`.
///
/// The empty path is the store root, a bucket-only path is the bucket itself.
/// Trailing slashes are stripped on parse and re-added only where the wire
/// protocol requires them (directory markers).
#[derive(Debug, Clone, Default)]
pub struct S3Path {
    pub bucket: String,
    pub key: String,
    key_parts: Vec<String>,
}

impl S3Path {
    pub fn parse<T: AsRef<str>>(s: T) -> FsResult<S3Path> {
        let s = s.as_ref();
        if URI_LIKE.is_match(s) {
            return Err(FsError::invalid(format!(
                "Expected an S3 object path of the form 'bucket/key...', got a URI: '{}'",
                s
            )));
        }
        let src = s.trim_end_matches(path_util::SEPARATOR);
        if src.starts_with(path_util::SEPARATOR) {
            return Err(FsError::invalid(format!(
                "Path cannot start with a separator ('{}')",
                s
            )));
        }

        match src.find(path_util::SEPARATOR) {
            None => Ok(S3Path {
                bucket: src.to_string(),
                key: String::new(),
                key_parts: vec![],
            }),
            Some(first_sep) => {
                let bucket = &src[..first_sep];
                let key = &src[first_sep + 1..];
                path_util::validate_segments(key)
                    .map_err(|e| e.ctx(format!("In path '{}'", s)))?;
                Ok(S3Path {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    key_parts: path_util::split_path(key)
                        .into_iter()
                        .map(String::from)
                        .collect(),
                })
            }
        }
    }

    /// Accepts the `s3://bucket/key` URI grammar only.
    pub fn from_uri<T: AsRef<str>>(s: T) -> FsResult<S3Path> {
        let s = s.as_ref();
        match s.split_once("://") {
            Some((scheme, rest)) if scheme == SCHEME => Self::parse(rest),
            Some((scheme, _)) => Err(FsError::invalid(format!(
                "Expected an S3 URI with scheme '{}', got '{}://' ('{}')",
                SCHEME, scheme, s
            ))),
            None => Err(FsError::invalid(format!("Not an S3 URI: '{}'", s))),
        }
    }

    pub fn empty(&self) -> bool {
        self.bucket.is_empty() && self.key.is_empty()
    }

    pub fn full_path(&self) -> String {
        if self.key.is_empty() {
            self.bucket.clone()
        } else {
            format!("{}/{}", self.bucket, self.key)
        }
    }

    pub fn key_parts(&self) -> &[String] {
        &self.key_parts
    }

    pub fn has_parent(&self) -> bool {
        !self.key.is_empty()
    }

    pub fn parent(&self) -> S3Path {
        debug_assert!(self.has_parent());
        let mut key_parts = self.key_parts.clone();
        key_parts.pop();
        S3Path {
            bucket: self.bucket.clone(),
            key: key_parts.join("/"),
            key_parts,
        }
    }

    /// The key with its directory-marker trailing slash.
    pub fn dir_key(&self) -> String {
        path_util::ensure_trailing_slash(&self.key)
    }

    /// URL-encode each segment individually, preserving the `/` separators.
    pub fn to_url_encoded(&self) -> String {
        let mut res = utf8_percent_encode(&self.bucket, SEGMENT_ENCODE_SET).to_string();
        for part in &self.key_parts {
            res.push(path_util::SEPARATOR);
            res.push_str(&utf8_percent_encode(part, SEGMENT_ENCODE_SET).to_string());
        }
        res
    }

    /// A path naming a regular object has both a bucket and a key.
    pub fn expect_file(&self) -> FsResult<()> {
        if self.bucket.is_empty() || self.key.is_empty() {
            return Err(FsError::not_a_file(self.full_path()));
        }
        Ok(())
    }
}

impl Display for S3Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_path())
    }
}

impl PartialEq for S3Path {
    fn eq(&self, other: &Self) -> bool {
        self.bucket == other.bucket && self.key == other.key
    }
}

impl Eq for S3Path {}

#[cfg(test)]
mod tests {
    use crate::path::S3Path;

    #[test]
    fn parse() {
        let p = S3Path::parse("bucket/a/b.log").unwrap();
        assert_eq!(p.bucket, "bucket");
        assert_eq!(p.key, "a/b.log");
        assert_eq!(p.key_parts(), ["a", "b.log"]);
        assert_eq!(p.full_path(), "bucket/a/b.log");

        let p = S3Path::parse("bucket").unwrap();
        assert_eq!(p.bucket, "bucket");
        assert_eq!(p.key, "");
        assert!(!p.has_parent());

        let p = S3Path::parse("").unwrap();
        assert!(p.empty());
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let p = S3Path::parse("bucket/a/b/").unwrap();
        assert_eq!(p.key, "a/b");
        assert_eq!(p.dir_key(), "a/b/");
    }

    #[test]
    fn reject_uri_and_leading_slash() {
        assert!(S3Path::parse("s3://bucket/a").is_err());
        assert!(S3Path::parse("http://host/a").is_err());
        assert!(S3Path::parse("/bucket/a").is_err());
    }

    #[test]
    fn reject_bad_segments() {
        assert!(S3Path::parse("bucket/a//b").is_err());
        assert!(S3Path::parse("bucket/./a").is_err());
        assert!(S3Path::parse("bucket/../a").is_err());
    }

    #[test]
    fn from_uri() {
        let p = S3Path::from_uri("s3://bucket/a/b").unwrap();
        assert_eq!(p.bucket, "bucket");
        assert_eq!(p.key, "a/b");

        assert!(S3Path::from_uri("file://bucket/a").is_err());
        assert!(S3Path::from_uri("bucket/a").is_err());
    }

    #[test]
    fn parent() {
        let p = S3Path::parse("bucket/a/b/c").unwrap();
        let parent = p.parent();
        assert_eq!(parent.full_path(), "bucket/a/b");

        let top = S3Path::parse("bucket/a").unwrap().parent();
        assert_eq!(top.full_path(), "bucket");
        assert!(!top.has_parent());
    }

    #[test]
    fn equality_ignores_parts() {
        let a = S3Path::parse("bucket/x/y").unwrap();
        let b = S3Path::parse("bucket/x/y/").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, S3Path::parse("bucket/x").unwrap());
    }

    #[test]
    fn url_encode() {
        let p = S3Path::parse("bucket/a b/c#d").unwrap();
        assert_eq!(p.to_url_encoded(), "bucket/a%20b/c%23d");

        let p = S3Path::parse("bucket/plain-key_1.log").unwrap();
        assert_eq!(p.to_url_encoded(), "bucket/plain-key_1.log");
    }
}
