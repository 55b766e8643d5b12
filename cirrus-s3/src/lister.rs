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

//! Paginated, recursion-bounded, implicit-directory-aware listing.
//!
//! Pages stream through a channel as batches; the consumer pulls them
//! lazily. Full-bucket listings fan out one pagination task per bucket into
//! the same sink.

use crate::client::ClientHolder;
use crate::errors::{is_not_found, s3_error};
use crate::path::S3Path;
use aws_sdk_s3::types::{CommonPrefix, Object};
use cirrus_common::fs::{path_util, FileInfo, FileSelector};
use cirrus_common::runtime::AsyncRuntime;
use cirrus_common::{FsError, FsResult};
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const LIST_OBJECTS_MAX_KEYS: i32 = 1000;

/// A lazy sequence of listing batches.
pub struct FileInfoBatches {
    rx: mpsc::Receiver<FsResult<Vec<FileInfo>>>,
}

impl FileInfoBatches {
    pub async fn next(&mut self) -> Option<FsResult<Vec<FileInfo>>> {
        self.rx.recv().await
    }

    /// Drains all batches into one vector, stopping at the first error.
    pub async fn collect(mut self) -> FsResult<Vec<FileInfo>> {
        let mut entries = Vec::new();
        while let Some(batch) = self.next().await {
            entries.extend(batch?);
        }
        Ok(entries)
    }
}

/// Starts the listing described by `selector` on the runtime and returns the
/// batch stream.
pub(crate) fn generate(
    holder: Arc<ClientHolder>,
    rt: Arc<AsyncRuntime>,
    selector: FileSelector,
) -> FileInfoBatches {
    let (tx, rx) = mpsc::channel(16);
    let stop = rt.stop_token();
    let spawner = rt.clone();

    rt.spawn(async move {
        let base = match S3Path::parse(&selector.base_dir) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        if base.empty() {
            full_list(holder, spawner, &selector, tx, stop).await;
        } else {
            let state = ListState::new(&selector, base.bucket, base.key);
            list_prefix(holder, state, tx, stop).await;
        }
    });

    FileInfoBatches { rx }
}

// Per-listing pagination state. Pages of one listing never run in parallel,
// so no locking is needed here.
struct ListState {
    bucket: String,
    // key + "/", or empty when listing the whole bucket.
    prefix: String,
    // "/" in non-recursive mode, absent when recursive.
    delimiter: Option<String>,
    max_recursion: i32,
    allow_not_found: bool,
    // Directories already emitted, explicit markers and implicit parents.
    directories: HashSet<String>,
    empty: bool,
}

impl ListState {
    fn new(selector: &FileSelector, bucket: String, key: String) -> Self {
        Self {
            bucket,
            prefix: path_util::ensure_trailing_slash(&key),
            delimiter: if selector.recursive {
                None
            } else {
                Some("/".to_string())
            },
            max_recursion: selector.max_recursion,
            allow_not_found: selector.allow_not_found,
            directories: HashSet::new(),
            empty: true,
        }
    }

    // The bucket-qualified path listing started from; implicit-directory
    // synthesis stops here.
    fn base_path(&self) -> String {
        if self.prefix.is_empty() {
            self.bucket.clone()
        } else {
            format!(
                "{}/{}",
                self.bucket,
                path_util::remove_trailing_slash(&self.prefix)
            )
        }
    }

    // All not-yet-seen ancestors of `child_path`, nearest first, up to (and
    // excluding) the listing base. These are the implicit directories
    // inferred from the child's key.
    fn new_directories(&mut self, child_path: &str) -> Vec<String> {
        let base = self.base_path();
        let mut new_dirs = Vec::new();
        let mut current = child_path;
        while let Some(parent) = path_util::parent_path(current) {
            if parent.is_empty() || parent == base {
                break;
            }
            if self.directories.insert(parent.to_string()) {
                new_dirs.push(parent.to_string());
            }
            current = parent;
        }
        new_dirs
    }

    // Classify one page of results into file infos.
    fn page_to_infos(&mut self, contents: &[Object], common_prefixes: &[CommonPrefix]) -> Vec<FileInfo> {
        let mut infos = Vec::new();

        // Common prefixes only show up in non-recursive mode; each is a
        // directory we did not descend into.
        for child_prefix in common_prefixes {
            let Some(prefix) = child_prefix.prefix() else {
                continue;
            };
            let child_key = path_util::remove_trailing_slash(prefix);
            infos.push(FileInfo::directory(format!("{}/{}", self.bucket, child_key)));
        }

        // There is no native max-depth; it is emulated by counting
        // separators. A file directly inside the prefix has depth 0.
        let base_depth = path_util::depth(&self.prefix);
        for obj in contents {
            let key = obj.key().unwrap_or("");
            if key == self.prefix {
                // The listed directory itself; skipped, but it proves the
                // base exists.
                self.empty = false;
                continue;
            }

            let stripped = path_util::remove_trailing_slash(key);
            let had_trailing_slash = stripped.len() != key.len();
            let child_depth = path_util::depth(stripped);
            let recursion_depth = child_depth - base_depth - 1;

            let child_path;
            if recursion_depth > self.max_recursion {
                // Too deep to emit, but its ancestors within the bound are
                // still synthesized below from the truncated key.
                let to_trim = recursion_depth - self.max_recursion - 1;
                if to_trim > 0 {
                    child_path = format!(
                        "{}/{}",
                        self.bucket,
                        path_util::slice_path(stripped, (child_depth - to_trim) as usize)
                    );
                } else {
                    child_path = format!("{}/{}", self.bucket, stripped);
                }
            } else {
                child_path = format!("{}/{}", self.bucket, stripped);
                let size = obj.size().unwrap_or(0);
                if size > 0 || !had_trailing_slash {
                    // A real file. ListObjectsV2 carries no content type, so
                    // 0-byte keys without a trailing slash stay files.
                    let mtime = obj
                        .last_modified()
                        .and_then(|v| v.to_millis().ok())
                        .unwrap_or(0);
                    infos.push(FileInfo::file(child_path.clone(), size, mtime));
                } else if self.directories.insert(child_path.clone()) {
                    infos.push(FileInfo::directory(child_path.clone()));
                }
            }

            for dir in self.new_directories(&child_path) {
                infos.push(FileInfo::directory(dir));
            }
        }

        if !infos.is_empty() {
            self.empty = false;
        }
        infos
    }

    // A non-empty prefix that produced nothing at all means the directory
    // itself does not exist. Whole-bucket listings never report not-found: a
    // missing bucket errors instead of returning an empty page.
    fn finish(&self) -> Option<FsError> {
        if self.empty && !self.allow_not_found && !self.prefix.is_empty() {
            Some(FsError::path_not_found(format!(
                "{}/{}",
                self.bucket, self.prefix
            )))
        } else {
            None
        }
    }
}

// Drives one prefix to completion, page by page. The continuation token of
// each page schedules the next; the stop token is observed at every page
// boundary.
async fn list_prefix(
    holder: Arc<ClientHolder>,
    mut state: ListState,
    tx: mpsc::Sender<FsResult<Vec<FileInfo>>>,
    stop: CancellationToken,
) {
    let mut continuation_token: Option<String> = None;
    loop {
        if stop.is_cancelled() {
            let _ = tx.send(Err(FsError::cancelled("Listing cancelled"))).await;
            return;
        }

        let lock = match holder.lock().await {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        let mut req = lock
            .client()
            .list_objects_v2()
            .bucket(&state.bucket)
            .max_keys(LIST_OBJECTS_MAX_KEYS);
        if !state.prefix.is_empty() {
            req = req.prefix(&state.prefix);
        }
        if let Some(delimiter) = &state.delimiter {
            req = req.delimiter(delimiter);
        }
        if let Some(token) = &continuation_token {
            req = req.continuation_token(token);
        }
        let res = req.send().await;
        drop(lock);

        let result = match res {
            Ok(v) => v,
            Err(e) if state.allow_not_found && is_not_found(&e) => return,
            Err(e) => {
                let _ = tx
                    .send(Err(s3_error(
                        "ListObjectsV2",
                        &state.bucket,
                        &state.prefix,
                        &e,
                    )))
                    .await;
                return;
            }
        };

        let infos = state.page_to_infos(result.contents(), result.common_prefixes());
        if !infos.is_empty() && tx.send(Ok(infos)).await.is_err() {
            // Consumer dropped the stream.
            return;
        }

        if result.is_truncated().unwrap_or(false) {
            match result.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        } else {
            break;
        }
    }

    if let Some(err) = state.finish() {
        let _ = tx.send(Err(err)).await;
    }
}

// Whole-store listing: buckets come out as directories, and in recursive
// mode each bucket is walked in parallel into the shared sink.
async fn full_list(
    holder: Arc<ClientHolder>,
    rt: Arc<AsyncRuntime>,
    selector: &FileSelector,
    tx: mpsc::Sender<FsResult<Vec<FileInfo>>>,
    stop: CancellationToken,
) {
    let buckets = match list_buckets(&holder).await {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return;
        }
    };
    debug!("Full listing over {} buckets", buckets.len());

    if !buckets.is_empty() {
        let infos = buckets
            .iter()
            .map(|b| FileInfo::directory(b.as_str()))
            .collect();
        if tx.send(Ok(infos)).await.is_err() {
            return;
        }
    }

    if selector.recursive && selector.max_recursion > 0 {
        let mut tasks = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            let state = ListState {
                bucket,
                prefix: String::new(),
                delimiter: None,
                max_recursion: selector.max_recursion,
                allow_not_found: true,
                directories: HashSet::new(),
                empty: true,
            };
            tasks.push(rt.spawn(list_prefix(
                holder.clone(),
                state,
                tx.clone(),
                stop.clone(),
            )));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

pub(crate) async fn list_buckets(holder: &Arc<ClientHolder>) -> FsResult<Vec<String>> {
    let lock = holder.lock().await?;
    let res = lock.client().list_buckets().send().await;
    drop(lock);

    match res {
        Ok(output) => Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(String::from))
            .collect()),
        Err(e) => Err(s3_error("ListBuckets", "", "", &e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_common::fs::FileType;

    fn state(prefix: &str, recursive: bool, max_recursion: i32) -> ListState {
        let selector = FileSelector {
            base_dir: String::new(),
            recursive,
            max_recursion,
            allow_not_found: false,
        };
        ListState::new(&selector, "bucket".to_string(), prefix.to_string())
    }

    fn object(key: &str, size: i64) -> Object {
        Object::builder().key(key).size(size).build()
    }

    #[test]
    fn files_and_markers() {
        let mut state = state("d", true, i32::MAX);
        let infos = state.page_to_infos(
            &[
                object("d/", 0),
                object("d/a.log", 3),
                object("d/sub/", 0),
                object("d/zero", 0),
            ],
            &[],
        );

        // The prefix itself is skipped but marks the listing non-empty.
        assert!(!state.empty);
        assert_eq!(infos.len(), 3);
        assert_eq!(infos[0].path, "bucket/d/a.log");
        assert!(infos[0].is_file());
        assert_eq!(infos[1].path, "bucket/d/sub");
        assert!(infos[1].is_dir());
        // 0 bytes without a trailing slash is still a file.
        assert_eq!(infos[2].path, "bucket/d/zero");
        assert!(infos[2].is_file());
    }

    #[test]
    fn common_prefixes_become_directories() {
        let mut state = state("d", false, i32::MAX);
        let prefixes = vec![CommonPrefix::builder().prefix("d/x/").build()];
        let infos = state.page_to_infos(&[], &prefixes);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].path, "bucket/d/x");
        assert_eq!(infos[0].file_type, FileType::Directory);
    }

    #[test]
    fn implicit_parent_directories() {
        let mut state = state("", true, i32::MAX);
        let infos = state.page_to_infos(&[object("a/b/c/file.log", 1)], &[]);

        let paths: Vec<&str> = infos.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            ["bucket/a/b/c/file.log", "bucket/a/b/c", "bucket/a/b", "bucket/a"]
        );
        assert!(infos[1].is_dir() && infos[2].is_dir() && infos[3].is_dir());

        // A second file under the same tree adds no duplicate parents.
        let infos = state.page_to_infos(&[object("a/b/c/other.log", 1)], &[]);
        assert_eq!(infos.len(), 1);
        assert!(infos[0].is_file());
    }

    #[test]
    fn marker_and_implicit_directory_deduplicate() {
        let mut state = state("", true, i32::MAX);
        let infos = state.page_to_infos(&[object("a/", 0), object("a/file.log", 1)], &[]);
        let dirs: Vec<&str> = infos
            .iter()
            .filter(|i| i.is_dir())
            .map(|i| i.path.as_str())
            .collect();
        assert_eq!(dirs, ["bucket/a"]);
    }

    #[test]
    fn max_recursion_bound() {
        // Keys {a, a/b, a/b/c} with max_recursion = 1: files a and a/b are
        // emitted, a/b/c is beyond the bound. Directory a is synthesized as
        // a/b's parent, and a/b as a/b/c's prefix.
        let mut state = state("", true, 1);
        let infos = state.page_to_infos(
            &[object("a", 1), object("a/b", 1), object("a/b/c", 1)],
            &[],
        );

        let files: Vec<&str> = infos
            .iter()
            .filter(|i| i.is_file())
            .map(|i| i.path.as_str())
            .collect();
        assert_eq!(files, ["bucket/a", "bucket/a/b"]);

        let dirs: Vec<&str> = infos
            .iter()
            .filter(|i| i.is_dir())
            .map(|i| i.path.as_str())
            .collect();
        assert_eq!(dirs, ["bucket/a", "bucket/a/b"]);
    }

    #[test]
    fn truncated_ancestor_is_directory() {
        // Depth > max_recursion + 1: the key is trimmed to its deepest
        // in-bound ancestor and emitted as a directory.
        let mut state = state("", true, 0);
        let infos = state.page_to_infos(&[object("a/b/c/d", 1)], &[]);
        assert!(infos.iter().all(|i| i.is_dir()));
        let paths: Vec<&str> = infos.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, ["bucket/a"]);
    }

    #[test]
    fn empty_result_policy() {
        let mut state = state("missing", true, i32::MAX);
        let infos = state.page_to_infos(&[], &[]);
        assert!(infos.is_empty());
        assert!(state.finish().unwrap().is_not_found());

        // Whole-bucket listings never raise not-found.
        let state = state_whole_bucket();
        assert!(state.finish().is_none());
    }

    fn state_whole_bucket() -> ListState {
        let selector = FileSelector::recursive("bucket");
        ListState::new(&selector, "bucket".to_string(), String::new())
    }

    #[test]
    fn allow_not_found_suppresses_error() {
        let selector = FileSelector {
            base_dir: "bucket/missing".to_string(),
            recursive: true,
            max_recursion: i32::MAX,
            allow_not_found: true,
        };
        let state = ListState::new(&selector, "bucket".to_string(), "missing".to_string());
        assert!(state.finish().is_none());
    }
}
