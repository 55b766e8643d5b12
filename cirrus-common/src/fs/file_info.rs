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

use crate::fs::path_util;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    NotFound,
    File,
    Directory,
    Unknown,
}

/// A single filesystem entry. Directory entries have size 0 and carry no
/// modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub file_type: FileType,
    pub size: i64,
    pub mtime: i64,
}

impl FileInfo {
    pub fn file(path: impl Into<String>, size: i64, mtime: i64) -> Self {
        Self {
            path: path.into(),
            file_type: FileType::File,
            size,
            mtime,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_type: FileType::Directory,
            size: 0,
            mtime: 0,
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_type: FileType::NotFound,
            size: 0,
            mtime: 0,
        }
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn name(&self) -> &str {
        match self.path.rfind(path_util::SEPARATOR) {
            None => &self.path,
            Some(v) => &self.path[v + 1..],
        }
    }
}

impl Display for FileInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.file_type, self.path)
    }
}

#[cfg(test)]
mod tests {
    use crate::fs::{FileInfo, FileType};

    #[test]
    fn name() {
        let info = FileInfo::file("bucket/a/b.log", 10, 0);
        assert_eq!(info.name(), "b.log");
        assert_eq!(info.file_type, FileType::File);

        let info = FileInfo::directory("bucket");
        assert_eq!(info.name(), "bucket");
        assert_eq!(info.size, 0);
    }
}
