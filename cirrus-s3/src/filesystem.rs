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

//! The filesystem facade over a flat S3 namespace.
//!
//! Directories are emulated over key prefixes: explicit zero-byte markers
//! with a trailing-slash key represent empty directories, and prefixes
//! shared by other keys are recognized as implicit directories.

use crate::client::{ClientBuilder, ClientHolder, S3Backend};
use crate::conf::S3Options;
use crate::errors::{header_from_error, is_already_exists, is_not_found, s3_error};
use crate::lister::{self, FileInfoBatches};
use crate::metadata::{is_directory_object, DIRECTORY_CONTENT_TYPE};
use crate::path::S3Path;
use crate::reader::ObjectReader;
use crate::sse::{with_copy_source_sse_key, with_sse_key, SseCustomerKey};
use crate::writer::ObjectWriter;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_types::byte_stream::ByteStream;
use cirrus_common::fs::{FileInfo, FileSelector, FileType};
use cirrus_common::runtime::AsyncRuntime;
use cirrus_common::{FsError, FsResult};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// At most 1000 keys per multiple-delete request.
pub const MULTIPLE_DELETE_MAX_KEYS: usize = 1000;

const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

// Any HeadBucket on a name that cannot exist answers with enough headers to
// classify the backend.
const BACKEND_PROBE_BUCKET: &str = "cirrus-backend-probe-nonexistent";

/// An S3-backed filesystem. Paths take the internal `bucket/key` form; use
/// [`S3Path::from_uri`] to accept `s3://` URIs.
pub struct S3FileSystem {
    holder: Arc<ClientHolder>,
    options: S3Options,
    rt: Arc<AsyncRuntime>,
    region: String,
    sse_key: Option<SseCustomerKey>,
    backend: Mutex<Option<S3Backend>>,
}

impl S3FileSystem {
    pub async fn new(options: S3Options, rt: Arc<AsyncRuntime>) -> FsResult<Self> {
        options.validate()?;
        let sse_key = match &options.sse_customer_key {
            Some(raw) => Some(SseCustomerKey::new(raw)?),
            None => None,
        };
        let region = options.effective_region().to_string();
        let holder = ClientBuilder::new(options.clone()).build().await?;
        info!("Created S3 filesystem, region = {}", region);

        Ok(Self {
            holder,
            options,
            rt,
            region,
            sse_key,
            backend: Mutex::new(None),
        })
    }

    pub fn options(&self) -> &S3Options {
        &self.options
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn runtime(&self) -> &Arc<AsyncRuntime> {
        &self.rt
    }

    // ---------------------------------------------------------------
    // Backend detection

    fn cached_backend(&self) -> Option<S3Backend> {
        *self.backend.lock().unwrap()
    }

    fn get_or_set_backend<E>(&self, err: &SdkError<E, HttpResponse>) -> S3Backend {
        let mut cached = self.backend.lock().unwrap();
        match *cached {
            Some(backend) if backend != S3Backend::Other => backend,
            _ => {
                let backend = S3Backend::from_error(err);
                *cached = Some(backend);
                backend
            }
        }
    }

    async fn backend(&self) -> FsResult<S3Backend> {
        if let Some(backend) = self.cached_backend() {
            return Ok(backend);
        }
        let lock = self.holder.lock().await?;
        let res = lock
            .client()
            .head_bucket()
            .bucket(BACKEND_PROBE_BUCKET)
            .send()
            .await;
        drop(lock);
        match res {
            Ok(_) => Ok(S3Backend::Other),
            Err(e) => Ok(self.get_or_set_backend(&e)),
        }
    }

    // ---------------------------------------------------------------
    // Stat

    pub async fn get_file_info(&self, s: &str) -> FsResult<FileInfo> {
        let path = S3Path::parse(s)?;
        let full_path = path.full_path();

        if path.empty() {
            // The store root.
            return Ok(FileInfo::directory(full_path));
        }

        if path.key.is_empty() {
            // A bucket. S3 has no bucket modification time.
            let lock = self.holder.lock().await?;
            let res = lock.client().head_bucket().bucket(&path.bucket).send().await;
            drop(lock);
            return match res {
                Ok(_) => Ok(FileInfo::directory(full_path)),
                Err(e) => {
                    self.get_or_set_backend(&e);
                    if is_not_found(&e) {
                        Ok(FileInfo::not_found(full_path))
                    } else {
                        Err(s3_error("HeadBucket", &path.bucket, "", &e))
                    }
                }
            };
        }

        // An object.
        let lock = self.holder.lock().await?;
        let res = lock
            .client()
            .head_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await;
        drop(lock);

        match res {
            Ok(head) => {
                if is_directory_object(&path.key, &head) {
                    Ok(FileInfo::directory(full_path))
                } else {
                    let mtime = head
                        .last_modified()
                        .and_then(|v| v.to_millis().ok())
                        .unwrap_or(0);
                    Ok(FileInfo::file(
                        full_path,
                        head.content_length().unwrap_or(0),
                        mtime,
                    ))
                }
            }
            Err(e) => {
                self.get_or_set_backend(&e);
                if !is_not_found(&e) {
                    return Err(s3_error("HeadObject", &path.bucket, &path.key, &e));
                }
                // Not found: perhaps an empty "directory",
                if self.is_empty_directory(&path, Some(&e)).await? {
                    return Ok(FileInfo::directory(full_path));
                }
                // or a non-empty one.
                if self.is_non_empty_directory(&path).await? {
                    Ok(FileInfo::directory(full_path))
                } else {
                    Ok(FileInfo::not_found(full_path))
                }
            }
        }
    }

    pub async fn exists(&self, s: &str) -> FsResult<bool> {
        Ok(self.get_file_info(s).await?.file_type != FileType::NotFound)
    }

    // An empty directory is its zero-byte marker object. Minio only reveals
    // the marker when the HEAD key carries the trailing slash.
    async fn is_empty_directory(
        &self,
        path: &S3Path,
        previous_error: Option<&SdkError<HeadObjectError>>,
    ) -> FsResult<bool> {
        if let Some(err) = previous_error {
            if self.get_or_set_backend(err) != S3Backend::Minio {
                // HEAD already returned a 404, nothing more to probe.
                return Ok(false);
            }
        }

        let mut with_slash = self.cached_backend() == Some(S3Backend::Minio);
        loop {
            let key = if with_slash {
                path.dir_key()
            } else {
                path.key.clone()
            };
            let lock = self.holder.lock().await?;
            let res = lock
                .client()
                .head_object()
                .bucket(&path.bucket)
                .key(&key)
                .send()
                .await;
            drop(lock);

            match res {
                Ok(_) => return Ok(true),
                Err(e) => {
                    if !with_slash && self.get_or_set_backend(&e) == S3Backend::Minio {
                        // Retry with the separator-terminated key.
                        with_slash = true;
                        continue;
                    }
                    if is_not_found(&e) {
                        return Ok(false);
                    }
                    return Err(s3_error("HeadObject", &path.bucket, &key, &e));
                }
            }
        }
    }

    async fn is_non_empty_directory(&self, path: &S3Path) -> FsResult<bool> {
        let prefix = path.dir_key();
        let lock = self.holder.lock().await?;
        let res = lock
            .client()
            .list_objects_v2()
            .bucket(&path.bucket)
            .prefix(&prefix)
            .delimiter("/")
            .max_keys(1)
            .send()
            .await;
        drop(lock);

        match res {
            // There may be 0 keys but some prefixes.
            Ok(out) => {
                Ok(out.key_count().unwrap_or(0) > 0 || !out.common_prefixes().is_empty())
            }
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(s3_error("ListObjectsV2", &path.bucket, &prefix, &e)),
        }
    }

    // ---------------------------------------------------------------
    // Listing

    /// Lazy listing; batches stream as pages arrive.
    pub fn list(&self, selector: FileSelector) -> FileInfoBatches {
        lister::generate(self.holder.clone(), self.rt.clone(), selector)
    }

    /// Eager listing of all matching entries.
    pub async fn list_info(&self, selector: FileSelector) -> FsResult<Vec<FileInfo>> {
        self.list(selector).collect().await
    }

    pub async fn list_buckets(&self) -> FsResult<Vec<String>> {
        lister::list_buckets(&self.holder).await
    }

    /// The region a bucket lives in, from the `x-amz-bucket-region` header.
    pub async fn bucket_region(&self, bucket: &str) -> FsResult<String> {
        let lock = self.holder.lock().await?;
        let res = lock.client().head_bucket().bucket(bucket).send().await;
        drop(lock);

        match res {
            Ok(out) => out.bucket_region().map(str::to_string).ok_or_else(|| {
                FsError::io(format!(
                    "When resolving region for bucket '{}': missing '{}' header in response",
                    bucket, BUCKET_REGION_HEADER
                ))
            }),
            Err(e) => {
                if let Some(region) = header_from_error(&e, BUCKET_REGION_HEADER) {
                    Ok(region)
                } else if is_not_found(&e) {
                    Err(FsError::io(format!("Bucket '{}' not found", bucket)))
                } else {
                    Err(s3_error("HeadBucket", bucket, "", &e))
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Directory creation

    pub async fn create_dir(&self, s: &str, recursive: bool) -> FsResult<()> {
        let path = S3Path::parse(s)?;
        if path.empty() {
            return Err(FsError::invalid("Cannot create the store root"));
        }
        if path.key.is_empty() {
            return self.create_bucket(&path.bucket).await;
        }

        let backend = self.backend().await?;
        let check_existence = self.options.check_directory_existence_before_creation
            || backend == S3Backend::Minio;

        if recursive {
            if !self.bucket_exists(&path.bucket).await? {
                self.create_bucket(&path.bucket).await?;
            }

            let parts = path.key_parts();
            let mut first_missing = 0;
            if check_existence {
                // Walk upward to find the first existing ancestor.
                let mut idx = parts.len();
                while idx > 0 {
                    let ancestor = format!("{}/{}", path.bucket, parts[..idx].join("/"));
                    let info = self.get_file_info(&ancestor).await?;
                    if info.file_type != FileType::NotFound {
                        if info.file_type != FileType::Directory {
                            return Err(FsError::AlreadyExists(format!(
                                "Cannot create directory '{}': a non-directory entry already exists",
                                info.path
                            )));
                        }
                        break;
                    }
                    idx -= 1;
                }
                first_missing = idx;
            }
            // Create every missing marker downward, the directory included.
            for i in first_missing..parts.len() {
                let key = parts[..=i].join("/");
                self.create_empty_dir(&path.bucket, &key).await?;
            }
            return Ok(());
        }

        // Non-recursive: the parent must already exist.
        let parent = path.parent();
        let parent_exists = if parent.key.is_empty() {
            self.bucket_exists(&parent.bucket).await?
        } else {
            self.is_non_empty_directory(&parent).await?
                || self.is_empty_directory(&parent, None).await?
        };
        if !parent_exists {
            return Err(FsError::io(format!(
                "Cannot create directory '{}': parent directory does not exist",
                path.full_path()
            )));
        }

        if check_existence {
            let info = self.get_file_info(&path.full_path()).await?;
            if info.file_type != FileType::NotFound {
                if info.file_type != FileType::Directory {
                    return Err(FsError::AlreadyExists(format!(
                        "Cannot create directory '{}': a non-directory entry already exists",
                        info.path
                    )));
                }
                return Ok(());
            }
        }
        self.create_empty_dir(&path.bucket, &path.key).await
    }

    // Create a bucket; succeeds if it already exists.
    async fn create_bucket(&self, bucket: &str) -> FsResult<()> {
        if self.bucket_exists(bucket).await? {
            return Ok(());
        }
        if !self.options.allow_bucket_creation {
            return Err(FsError::io(format!(
                "Bucket '{}' not found. To create buckets, enable the allow_bucket_creation option.",
                bucket
            )));
        }

        let lock = self.holder.lock().await?;
        let mut req = lock.client().create_bucket().bucket(bucket);
        // AWS treats us-east-1 differently from all other regions.
        if self.region != "us-east-1" {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        let res = req.send().await;
        drop(lock);

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_already_exists(&e) => Ok(()),
            Err(e) => Err(s3_error("CreateBucket", bucket, "", &e)),
        }
    }

    async fn bucket_exists(&self, bucket: &str) -> FsResult<bool> {
        let lock = self.holder.lock().await?;
        let res = lock.client().head_bucket().bucket(bucket).send().await;
        drop(lock);
        match res {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(s3_error("HeadBucket", bucket, "", &e)),
        }
    }

    // Materialize a directory: a zero-byte object whose key carries the
    // trailing slash. Succeeds if the marker already exists.
    async fn create_empty_dir(&self, bucket: &str, key: &str) -> FsResult<()> {
        let dir_key = cirrus_common::fs::path_util::ensure_trailing_slash(key);
        debug!("Creating directory marker {}/{}", bucket, dir_key);

        let lock = self.holder.lock().await?;
        let res = lock
            .client()
            .put_object()
            .bucket(bucket)
            .key(&dir_key)
            .content_type(DIRECTORY_CONTENT_TYPE)
            .content_length(0)
            .body(ByteStream::from_static(b""))
            .send()
            .await;
        drop(lock);

        match res {
            Ok(_) => Ok(()),
            Err(e) => Err(s3_error("PutObject", bucket, &dir_key, &e)),
        }
    }

    async fn ensure_directory_exists(&self, path: &S3Path) -> FsResult<()> {
        if !path.key.is_empty() {
            return self.create_empty_dir(&path.bucket, &path.key).await;
        }
        Ok(())
    }

    // Deleting the last object under a prefix implicitly deletes the
    // conceptual parent directory; recreate its marker.
    async fn ensure_parent_exists(&self, path: &S3Path) -> FsResult<()> {
        if path.has_parent() {
            return self.ensure_directory_exists(&path.parent()).await;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Deletion

    pub async fn delete_dir(&self, s: &str) -> FsResult<()> {
        let path = S3Path::parse(s)?;
        if path.empty() {
            return Err(FsError::unsupported("Deleting all S3 buckets"));
        }

        self.do_delete_dir_contents(&path).await?;

        if path.key.is_empty() {
            if !self.options.allow_bucket_deletion {
                return Err(FsError::io(format!(
                    "Would delete bucket '{}'. To delete buckets, enable the allow_bucket_deletion option.",
                    path.bucket
                )));
            }
            let lock = self.holder.lock().await?;
            let res = lock.client().delete_bucket().bucket(&path.bucket).send().await;
            drop(lock);
            match res {
                Ok(_) => Ok(()),
                Err(e) => Err(s3_error("DeleteBucket", &path.bucket, "", &e)),
            }
        } else {
            // Delete the directory marker itself, then make sure the parent
            // did not implicitly vanish.
            self.delete_object(&path.bucket, &path.dir_key()).await?;
            self.ensure_parent_exists(&path).await
        }
    }

    pub async fn delete_dir_contents(&self, s: &str, missing_dir_ok: bool) -> FsResult<()> {
        let path = S3Path::parse(s)?;
        if path.empty() {
            return Err(FsError::unsupported("Deleting all S3 buckets"));
        }

        match self.do_delete_dir_contents(&path).await {
            // The directory may have been implicitly deleted, recreate it.
            Ok(()) => self.ensure_directory_exists(&path).await,
            Err(e) if missing_dir_ok && e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn do_delete_dir_contents(&self, path: &S3Path) -> FsResult<()> {
        if !self.ensure_is_dir(path).await? {
            return Err(FsError::io(format!(
                "Cannot delete directory contents at {} because it is a file",
                path.full_path()
            )));
        }

        let selector = FileSelector::recursive(path.full_path());
        let mut batches = self.list(selector);
        let mut keys = Vec::new();
        while let Some(batch) = batches.next().await {
            for entry in batch? {
                debug_assert!(entry.path.len() > path.bucket.len());
                let mut key = entry.path[path.bucket.len() + 1..].to_string();
                if entry.is_dir() {
                    // Directory entries never carry the trailing slash, but
                    // the stored marker key does.
                    key.push('/');
                }
                keys.push(key);
            }
        }

        self.delete_objects(&path.bucket, keys).await
    }

    // A bucket cannot be a file; a missing key is fine (the listing decides).
    async fn ensure_is_dir(&self, path: &S3Path) -> FsResult<bool> {
        if path.key.is_empty() {
            return Ok(true);
        }
        let lock = self.holder.lock().await?;
        let res = lock
            .client()
            .head_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await;
        drop(lock);

        match res {
            Ok(head) => Ok(is_directory_object(&path.key, &head)),
            Err(e) if is_not_found(&e) => Ok(true),
            Err(e) => Err(s3_error("HeadObject", &path.bucket, &path.key, &e)),
        }
    }

    /// Deletes the given keys in chunks of at most 1,000, dispatched
    /// concurrently. Per-key failures are aggregated into one error.
    pub async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> FsResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        debug!("Deleting {} keys under bucket '{}'", keys.len(), bucket);

        let mut tasks = Vec::with_capacity(keys.len().div_ceil(MULTIPLE_DELETE_MAX_KEYS));
        for chunk in keys.chunks(MULTIPLE_DELETE_MAX_KEYS) {
            let objects = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| FsError::invalid(e.to_string()))
                })
                .collect::<FsResult<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| FsError::invalid(e.to_string()))?;

            let holder = self.holder.clone();
            let bucket = bucket.to_string();
            tasks.push(self.rt.spawn(async move {
                let lock = holder.lock().await?;
                let res = lock.client().delete_objects().bucket(&bucket).delete(delete).send().await;
                drop(lock);

                let out = match res {
                    Ok(v) => v,
                    Err(e) => return Err(s3_error("DeleteObjects", &bucket, "", &e)),
                };
                // Per-key errors arrive in a successful response.
                let errors = out.errors();
                if errors.is_empty() {
                    return Ok(());
                }
                let mut msg = format!(
                    "Got the following {} errors when deleting objects in S3 bucket '{}':\n",
                    errors.len(),
                    bucket
                );
                for error in errors {
                    msg.push_str(&format!(
                        "- key '{}': {}\n",
                        error.key().unwrap_or(""),
                        error.message().unwrap_or("")
                    ));
                }
                Err(FsError::io(msg))
            }));
        }

        let mut first_error = None;
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => first_error = first_error.or(Some(e)),
                Err(e) => first_error = first_error.or(Some(FsError::from(e))),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn delete_file(&self, s: &str) -> FsResult<()> {
        let path = S3Path::parse(s)?;
        path.expect_file()?;

        // HEAD first, so a missing object surfaces as NotFound rather than
        // a silent no-op delete.
        let lock = self.holder.lock().await?;
        let res = lock
            .client()
            .head_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await;
        drop(lock);

        if let Err(e) = res {
            return if is_not_found(&e) {
                Err(FsError::path_not_found(path.full_path()))
            } else {
                Err(s3_error("HeadObject", &path.bucket, &path.key, &e))
            };
        }

        self.delete_object(&path.bucket, &path.key).await?;
        self.ensure_parent_exists(&path).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> FsResult<()> {
        let lock = self.holder.lock().await?;
        let res = lock
            .client()
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await;
        drop(lock);
        match res {
            Ok(_) => Ok(()),
            Err(e) => Err(s3_error("DeleteObject", bucket, key, &e)),
        }
    }

    // ---------------------------------------------------------------
    // Move / copy

    /// Moves a file by copying then deleting the source. Moving directories
    /// is not supported: it would copy every object's data one by one.
    pub async fn rename(&self, src: &str, dest: &str) -> FsResult<()> {
        let src_path = S3Path::parse(src)?;
        src_path.expect_file()?;
        let dest_path = S3Path::parse(dest)?;
        dest_path.expect_file()?;

        if src_path == dest_path {
            return Ok(());
        }
        self.copy_object(&src_path, &dest_path).await?;
        self.delete_object(&src_path.bucket, &src_path.key).await?;
        // The source parent may have become empty.
        self.ensure_parent_exists(&src_path).await
    }

    pub async fn copy_file(&self, src: &str, dest: &str) -> FsResult<()> {
        let src_path = S3Path::parse(src)?;
        src_path.expect_file()?;
        let dest_path = S3Path::parse(dest)?;
        dest_path.expect_file()?;

        if src_path == dest_path {
            return Ok(());
        }
        self.copy_object(&src_path, &dest_path).await
    }

    async fn copy_object(&self, src: &S3Path, dest: &S3Path) -> FsResult<()> {
        debug!("Copying {} to {}", src, dest);
        let lock = self.holder.lock().await?;
        // The copy source must be URL-encoded; a customer key is mirrored on
        // both the source and destination sides.
        let req = lock
            .client()
            .copy_object()
            .bucket(&dest.bucket)
            .key(&dest.key)
            .copy_source(src.to_url_encoded());
        let req = with_sse_key!(req, &self.sse_key);
        let req = with_copy_source_sse_key!(req, &self.sse_key);
        let res = req.send().await;
        drop(lock);

        match res {
            Ok(_) => Ok(()),
            Err(e) => Err(s3_error("CopyObject", &dest.bucket, &dest.key, &e)
                .ctx(format!("When copying '{}'", src.full_path()))),
        }
    }

    // ---------------------------------------------------------------
    // Streams

    pub async fn open_input_file(&self, s: &str) -> FsResult<ObjectReader> {
        if s.ends_with('/') {
            return Err(FsError::invalid(format!(
                "Expected a regular file path, got '{}'",
                s
            )));
        }
        let path = S3Path::parse(s)?;
        path.expect_file()?;
        ObjectReader::open(self.holder.clone(), path, None, self.sse_key.clone()).await
    }

    /// Opens for reading from a previous stat; a known size elides the HEAD.
    pub async fn open_input_file_with_info(&self, info: &FileInfo) -> FsResult<ObjectReader> {
        match info.file_type {
            FileType::NotFound => return Err(FsError::path_not_found(&info.path)),
            FileType::Directory => return Err(FsError::not_a_file(&info.path)),
            FileType::File | FileType::Unknown => {}
        }
        let path = S3Path::parse(&info.path)?;
        path.expect_file()?;
        ObjectReader::open(
            self.holder.clone(),
            path,
            Some(info.size),
            self.sse_key.clone(),
        )
        .await
    }

    pub async fn open_output_stream(
        &self,
        s: &str,
        metadata: HashMap<String, String>,
    ) -> FsResult<ObjectWriter> {
        if s.ends_with('/') {
            return Err(FsError::invalid(format!(
                "Expected a regular file path, got '{}'",
                s
            )));
        }
        let path = S3Path::parse(s)?;
        path.expect_file()?;
        ObjectWriter::create(
            self.holder.clone(),
            self.rt.clone(),
            path,
            metadata,
            &self.options,
            self.sse_key.clone(),
        )
        .await
    }

    pub async fn open_append_stream(
        &self,
        _s: &str,
        _metadata: HashMap<String, String>,
    ) -> FsResult<ObjectWriter> {
        Err(FsError::unsupported("Appending to S3 objects"))
    }

    // ---------------------------------------------------------------
    // Blocking surface

    pub fn get_file_info_blocking(&self, s: &str) -> FsResult<FileInfo> {
        self.rt.block_on(self.get_file_info(s))
    }

    pub fn list_info_blocking(&self, selector: FileSelector) -> FsResult<Vec<FileInfo>> {
        self.rt.block_on(self.list_info(selector))
    }

    pub fn create_dir_blocking(&self, s: &str, recursive: bool) -> FsResult<()> {
        self.rt.block_on(self.create_dir(s, recursive))
    }

    pub fn delete_dir_blocking(&self, s: &str) -> FsResult<()> {
        self.rt.block_on(self.delete_dir(s))
    }

    pub fn delete_dir_contents_blocking(&self, s: &str, missing_dir_ok: bool) -> FsResult<()> {
        self.rt.block_on(self.delete_dir_contents(s, missing_dir_ok))
    }

    pub fn delete_file_blocking(&self, s: &str) -> FsResult<()> {
        self.rt.block_on(self.delete_file(s))
    }

    pub fn rename_blocking(&self, src: &str, dest: &str) -> FsResult<()> {
        self.rt.block_on(self.rename(src, dest))
    }

    pub fn copy_file_blocking(&self, src: &str, dest: &str) -> FsResult<()> {
        self.rt.block_on(self.copy_file(src, dest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_common::runtime::AsyncRuntime;

    fn test_fs() -> S3FileSystem {
        let rt = Arc::new(AsyncRuntime::single());
        let options = S3Options {
            region: "us-east-1".to_string(),
            scheme: "http".to_string(),
            endpoint_override: "127.0.0.1:9000".to_string(),
            access_key: Some("ak".to_string()),
            secret_key: Some("sk".to_string()),
            ..Default::default()
        };
        let fs = rt.block_on(S3FileSystem::new(options, rt.clone())).unwrap();
        fs
    }

    #[test]
    fn root_is_a_directory() {
        let fs = test_fs();
        let info = fs.get_file_info_blocking("").unwrap();
        assert_eq!(info.file_type, FileType::Directory);
    }

    #[test]
    fn append_is_not_implemented() {
        let fs = test_fs();
        let res = fs
            .runtime()
            .clone()
            .block_on(fs.open_append_stream("bucket/a", HashMap::new()));
        assert!(matches!(res, Err(FsError::NotImplemented(_))));
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let fs = test_fs();
        assert!(fs.get_file_info_blocking("s3://bucket/a").is_err());
        assert!(fs.get_file_info_blocking("/bucket/a").is_err());

        let res = fs.rt.block_on(fs.open_input_file("bucket/dir/"));
        assert!(matches!(res, Err(FsError::InvalidInput(_))));

        // A bucket alone is not a regular file.
        let res = fs.rt.block_on(fs.delete_file("bucket"));
        assert!(res.is_err());
    }
}
