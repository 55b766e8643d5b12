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

use std::io;
use thiserror::Error;

pub type FsResult<T> = Result<T, FsError>;

// Uniformly defined filesystem error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    AlreadyExists,
    IO,
    NotImplemented,
    Finalized,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum FsError {
    // The request itself is malformed (path, scheme, ACL ...).
    #[error("{0}")]
    InvalidInput(String),

    // The bucket or key does not exist.
    #[error("{0}")]
    NotFound(String),

    // A non-directory entry occupies the requested path.
    #[error("{0}")]
    AlreadyExists(String),

    // Wire-level failure, including embedded errors in 200 responses and
    // aggregated multi-key delete errors.
    #[error("{0}")]
    IO(String),

    #[error("{0}")]
    NotImplemented(String),

    // Operation issued after subsystem finalization.
    #[error("S3 subsystem is finalized")]
    Finalized,

    #[error("{0}")]
    Cancelled(String),
}

impl FsError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::IO(msg.into())
    }

    pub fn path_not_found(path: impl AsRef<str>) -> Self {
        Self::NotFound(format!("Path does not exist '{}'", path.as_ref()))
    }

    pub fn not_a_file(path: impl AsRef<str>) -> Self {
        Self::IO(format!("Not a regular file: '{}'", path.as_ref()))
    }

    pub fn already_exists(path: impl AsRef<str>) -> Self {
        Self::AlreadyExists(format!("'{}' already exists", path.as_ref()))
    }

    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::NotImplemented(format!("{} is not implemented", feature.into()))
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::InvalidInput(_) => ErrorKind::InvalidInput,
            FsError::NotFound(_) => ErrorKind::NotFound,
            FsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            FsError::IO(_) => ErrorKind::IO,
            FsError::NotImplemented(_) => ErrorKind::NotImplemented,
            FsError::Finalized => ErrorKind::Finalized,
            FsError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }

    // Prepend operation context, preserving the error kind.
    pub fn ctx(self, ctx: impl Into<String>) -> Self {
        let ctx = ctx.into();
        match self {
            FsError::InvalidInput(e) => FsError::InvalidInput(format!("{}: {}", ctx, e)),
            FsError::NotFound(e) => FsError::NotFound(format!("{}: {}", ctx, e)),
            FsError::AlreadyExists(e) => FsError::AlreadyExists(format!("{}: {}", ctx, e)),
            FsError::IO(e) => FsError::IO(format!("{}: {}", ctx, e)),
            FsError::NotImplemented(e) => FsError::NotImplemented(format!("{}: {}", ctx, e)),
            FsError::Finalized => FsError::Finalized,
            FsError::Cancelled(e) => FsError::Cancelled(format!("{}: {}", ctx, e)),
        }
    }
}

impl From<String> for FsError {
    fn from(value: String) -> Self {
        FsError::IO(value)
    }
}

impl From<&str> for FsError {
    fn from(value: &str) -> Self {
        FsError::IO(value.to_string())
    }
}

impl From<io::Error> for FsError {
    fn from(value: io::Error) -> Self {
        FsError::IO(value.to_string())
    }
}

impl From<tokio::task::JoinError> for FsError {
    fn from(value: tokio::task::JoinError) -> Self {
        FsError::IO(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ErrorKind, FsError};

    #[test]
    fn ctx_keeps_kind() {
        let e = FsError::path_not_found("bucket/a").ctx("When reading key 'a'");
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert!(e.to_string().contains("When reading key 'a'"));
        assert!(e.to_string().contains("bucket/a"));

        let e = FsError::Finalized.ctx("ignored");
        assert_eq!(e.kind(), ErrorKind::Finalized);
    }

    #[test]
    fn not_found_check() {
        assert!(FsError::path_not_found("x").is_not_found());
        assert!(!FsError::io("x").is_not_found());
    }
}
