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

/// Selects the entries returned by a listing.
///
/// `base_dir` is the directory to list; an empty string means the store root
/// (all buckets). `max_recursion` bounds the depth of emitted entries: a file
/// directly inside `base_dir` has depth 0.
#[derive(Debug, Clone)]
pub struct FileSelector {
    pub base_dir: String,
    pub recursive: bool,
    pub max_recursion: i32,
    pub allow_not_found: bool,
}

impl FileSelector {
    pub fn new(base_dir: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn recursive(base_dir: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            recursive: true,
            ..Default::default()
        }
    }
}

impl Default for FileSelector {
    fn default() -> Self {
        Self {
            base_dir: String::new(),
            recursive: false,
            max_recursion: i32::MAX,
            allow_not_found: false,
        }
    }
}
