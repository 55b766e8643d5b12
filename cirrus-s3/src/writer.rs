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

//! Buffered multipart upload output stream.
//!
//! Writes are coalesced into fixed-size parts. Small objects go out as a
//! single PUT when `allow_delayed_open` is set; otherwise a multipart upload
//! is created at open to validate write permission early. With
//! `background_writes`, parts are dispatched to the I/O runtime and
//! reconciled in part-number order on close.

use crate::client::{ClientHolder, LimitedExponentialRetry, RetryStrategy};
use crate::conf::S3Options;
use crate::errors::s3_error;
use crate::metadata::{apply_create_multipart_metadata, apply_put_object_metadata};
use crate::path::S3Path;
use crate::sse::{with_sse_key, SseCustomerKey};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use aws_smithy_runtime_api::box_error::BoxError;
use aws_smithy_runtime_api::client::interceptors::context::BeforeDeserializationInterceptorContextMut;
use aws_smithy_runtime_api::client::interceptors::Intercept;
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_runtime_api::http::StatusCode;
use aws_smithy_types::byte_stream::ByteStream;
use aws_smithy_types::config_bag::ConfigBag;
use bytes::{Bytes, BytesMut};
use cirrus_common::runtime::AsyncRuntime;
use cirrus_common::{FsError, FsResult};
use log::{debug, info, warn};
use quick_xml::events::Event;
use std::collections::HashMap;
use std::pin::pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Upload size per part. Some backends (Cloudflare R2) require every part
/// except the last to be exactly equal, so all full parts use this size.
/// Combined with the 10,000-part server limit this caps an object at ~98 GiB.
pub const PART_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Above this many bytes a delayed-open stream switches from a single PUT to
/// a multipart upload.
pub const MULTIPART_THRESHOLD: i64 = PART_UPLOAD_SIZE as i64 - 1;

/// Server-side limit on the number of parts in one upload.
pub const MAX_UPLOAD_PARTS: i32 = 10_000;

#[derive(Default)]
struct UploadInner {
    // Dense, 1-based by part number: part n lands in slot n-1.
    completed_parts: Vec<Option<CompletedPart>>,
    uploads_in_progress: i64,
    // First failure wins; later ones are logged by the upload tasks.
    error: Option<FsError>,
}

// Shared with background upload tasks; kept alive until all dispatched
// uploads have completed.
struct UploadState {
    inner: Mutex<UploadInner>,
    notify: Notify,
}

impl UploadState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(UploadInner::default()),
            notify: Notify::new(),
        })
    }
}

fn add_completed_part(inner: &mut UploadInner, part_number: i32, e_tag: String) {
    let part = CompletedPart::builder()
        .part_number(part_number)
        .e_tag(e_tag)
        .build();
    let slot = (part_number - 1) as usize;
    if inner.completed_parts.len() <= slot {
        inner.completed_parts.resize(slot + 1, None);
    }
    debug_assert!(inner.completed_parts[slot].is_none());
    inner.completed_parts[slot] = Some(part);
}

// Every slot must be populated exactly once before completion.
fn take_completed_parts(inner: &mut UploadInner, expected: usize) -> FsResult<Vec<CompletedPart>> {
    let parts = std::mem::take(&mut inner.completed_parts);
    if parts.len() != expected {
        return Err(FsError::io(format!(
            "Multipart upload finished with {} completed parts, expected {}",
            parts.len(),
            expected
        )));
    }
    parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            part.ok_or_else(|| FsError::io(format!("Multipart upload part {} never completed", i + 1)))
        })
        .collect()
}

/// An output stream writing an S3 object.
pub struct ObjectWriter {
    holder: Option<Arc<ClientHolder>>,
    rt: Arc<AsyncRuntime>,
    path: S3Path,
    metadata: HashMap<String, String>,
    default_metadata: HashMap<String, String>,
    background_writes: bool,
    allow_delayed_open: bool,
    sse_key: Option<SseCustomerKey>,
    retry_strategy: Arc<dyn RetryStrategy>,

    upload_id: Option<String>,
    closed: bool,
    failed: bool,
    pos: i64,
    // Next part number to assign; dense and monotonic from 1.
    part_number: i32,
    current_part: Option<BytesMut>,
    state: Arc<UploadState>,
}

impl ObjectWriter {
    pub(crate) async fn create(
        holder: Arc<ClientHolder>,
        rt: Arc<AsyncRuntime>,
        path: S3Path,
        metadata: HashMap<String, String>,
        options: &S3Options,
        sse_key: Option<SseCustomerKey>,
    ) -> FsResult<Self> {
        let mut writer = Self {
            holder: Some(holder),
            rt,
            path,
            metadata,
            default_metadata: options.default_metadata.clone(),
            background_writes: options.background_writes,
            allow_delayed_open: options.allow_delayed_open,
            sse_key,
            retry_strategy: options
                .retry_strategy
                .clone()
                .unwrap_or_else(|| Arc::new(LimitedExponentialRetry::default())),
            upload_id: None,
            closed: false,
            failed: false,
            pos: 0,
            part_number: 1,
            current_part: None,
            state: UploadState::new(),
        };

        // Without delayed open, create the multipart upload now so that a
        // write-permission failure surfaces at open time.
        if !writer.allow_delayed_open {
            writer.create_multipart_upload().await?;
        }
        Ok(writer)
    }

    pub fn path(&self) -> &S3Path {
        &self.path
    }

    pub fn tell(&self) -> i64 {
        self.pos
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    fn holder(&self) -> FsResult<&Arc<ClientHolder>> {
        match &self.holder {
            Some(v) => Ok(v),
            None => Err(FsError::invalid("Operation on closed stream")),
        }
    }

    fn check_writable(&self) -> FsResult<()> {
        if self.closed {
            return Err(FsError::invalid("Operation on closed stream"));
        }
        if self.failed {
            return Err(FsError::io(format!(
                "Stream for '{}' is in failed state",
                self.path
            )));
        }
        Ok(())
    }

    fn should_be_multipart(&self) -> bool {
        self.pos > MULTIPART_THRESHOLD || !self.allow_delayed_open
    }

    fn is_multipart_created(&self) -> bool {
        self.upload_id.is_some()
    }

    fn effective_metadata(&self) -> &HashMap<String, String> {
        if !self.metadata.is_empty() {
            &self.metadata
        } else {
            &self.default_metadata
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> FsResult<()> {
        self.write_bytes(Bytes::copy_from_slice(data)).await
    }

    /// Writes owned bytes; full parts in the input are dispatched without
    /// copying into the part buffer.
    pub async fn write_bytes(&mut self, data: Bytes) -> FsResult<()> {
        self.check_writable()?;
        let res = self.do_write(data).await;
        if res.is_err() {
            self.failed = true;
        }
        res
    }

    async fn do_write(&mut self, mut data: Bytes) -> FsResult<()> {
        // Top up a partially filled current part first.
        if self.current_part.as_ref().is_some_and(|p| !p.is_empty()) {
            let part = self.current_part.as_mut().unwrap();
            let to_copy = data.len().min(PART_UPLOAD_SIZE - part.len());
            part.extend_from_slice(&data.split_to(to_copy));
            self.pos += to_copy as i64;

            if part.len() < PART_UPLOAD_SIZE {
                return Ok(());
            }
            self.commit_current_part().await?;
        }

        // Full chunks are dispatched directly.
        while data.len() >= PART_UPLOAD_SIZE {
            let chunk = data.split_to(PART_UPLOAD_SIZE);
            self.upload_part(chunk).await?;
            self.pos += PART_UPLOAD_SIZE as i64;
        }

        // Buffer the remainder.
        if !data.is_empty() {
            let mut part = self
                .current_part
                .take()
                .unwrap_or_else(|| BytesMut::with_capacity(PART_UPLOAD_SIZE));
            self.pos += data.len() as i64;
            part.extend_from_slice(&data);
            self.current_part = Some(part);
        }
        Ok(())
    }

    /// Waits until all dispatched background uploads have been observed
    /// completed.
    pub async fn flush(&mut self) -> FsResult<()> {
        if self.closed {
            return Err(FsError::invalid("Operation on closed stream"));
        }
        self.wait_pending_uploads().await
    }

    async fn wait_pending_uploads(&self) -> FsResult<()> {
        loop {
            let mut notified = pin!(self.state.notify.notified());
            notified.as_mut().enable();
            {
                let mut inner = self.state.inner.lock().unwrap();
                if inner.uploads_in_progress == 0 {
                    return match inner.error.take() {
                        Some(e) => Err(e),
                        None => Ok(()),
                    };
                }
            }
            notified.await;
        }
    }

    /// Finishes the upload. On failure the stream moves to the failed state
    /// and a best-effort abort is issued before the error is surfaced.
    pub async fn close(&mut self) -> FsResult<()> {
        if self.closed {
            return Ok(());
        }
        match self.do_close().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.failed = true;
                if let Err(abort_err) = self.abort().await {
                    warn!(
                        "Failed to abort upload for {} after close failure: {}",
                        self.path, abort_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn do_close(&mut self) -> FsResult<()> {
        if self.should_be_multipart() {
            if self.current_part.is_some() {
                self.commit_current_part().await?;
            }
            // S3 mandates at least one part.
            if self.part_number == 1 {
                self.upload_part(Bytes::new()).await?;
            }
        } else {
            self.upload_using_single_request().await?;
        }

        self.wait_pending_uploads().await?;

        if self.is_multipart_created() {
            self.complete_multipart_upload().await?;
        }

        self.holder = None;
        self.closed = true;
        info!("Closed writer for {}, {} bytes written", self.path, self.pos);
        Ok(())
    }

    /// Aborts any created multipart upload and drops buffered data. Safe to
    /// call repeatedly.
    pub async fn abort(&mut self) -> FsResult<()> {
        if self.closed {
            return Ok(());
        }
        if let (Some(upload_id), Some(holder)) = (&self.upload_id, &self.holder) {
            debug!("Aborting multipart upload for {}", self.path);
            let lock = holder.lock().await?;
            let res = lock
                .client()
                .abort_multipart_upload()
                .bucket(&self.path.bucket)
                .key(&self.path.key)
                .upload_id(upload_id)
                .send()
                .await;
            drop(lock);
            if let Err(e) = res {
                return Err(s3_error(
                    "AbortMultipartUpload",
                    &self.path.bucket,
                    &self.path.key,
                    &e,
                ));
            }
        }
        self.current_part = None;
        self.holder = None;
        self.closed = true;
        Ok(())
    }

    async fn create_multipart_upload(&mut self) -> FsResult<()> {
        debug_assert!(self.upload_id.is_none());
        let lock = self.holder()?.lock().await?;
        let req = lock
            .client()
            .create_multipart_upload()
            .bucket(&self.path.bucket)
            .key(&self.path.key);
        let req = apply_create_multipart_metadata(req, self.effective_metadata())?;
        let req = with_sse_key!(req, &self.sse_key);
        let res = req.send().await;
        drop(lock);

        match res {
            Ok(output) => match output.upload_id {
                Some(id) => {
                    debug!("Multipart upload initialized for {}: {}", self.path, id);
                    self.upload_id = Some(id);
                    Ok(())
                }
                None => crate::err_s3!(
                    "S3 CreateMultipartUpload for bucket '{}', key '{}' returned no upload id",
                    self.path.bucket,
                    self.path.key
                ),
            },
            Err(e) => Err(s3_error(
                "CreateMultipartUpload",
                &self.path.bucket,
                &self.path.key,
                &e,
            )),
        }
    }

    async fn commit_current_part(&mut self) -> FsResult<()> {
        let part = match self.current_part.take() {
            Some(v) => v,
            None => return Ok(()),
        };
        self.upload_part(part.freeze()).await
    }

    async fn upload_part(&mut self, data: Bytes) -> FsResult<()> {
        if !self.is_multipart_created() {
            self.create_multipart_upload().await?;
        }
        if self.part_number > MAX_UPLOAD_PARTS {
            return Err(FsError::io(format!(
                "Object '{}' exceeds the {} part upload limit",
                self.path, MAX_UPLOAD_PARTS
            )));
        }

        let part_number = self.part_number;
        self.part_number += 1;
        let upload_id = self.upload_id.clone().unwrap_or_default();
        debug!(
            "Uploading part {} for {}, size: {} bytes",
            part_number,
            self.path,
            data.len()
        );

        if !self.background_writes {
            let lock = self.holder()?.lock().await?;
            let res =
                send_upload_part(lock.client(), &self.path, &upload_id, part_number, data, &self.sse_key)
                    .await;
            drop(lock);

            let e_tag = res?;
            let mut inner = self.state.inner.lock().unwrap();
            add_completed_part(&mut inner, part_number, e_tag);
            return Ok(());
        }

        {
            let mut inner = self.state.inner.lock().unwrap();
            inner.uploads_in_progress += 1;
        }

        let holder = self.holder()?.clone();
        let state = self.state.clone();
        let path = self.path.clone();
        let sse_key = self.sse_key.clone();
        self.rt.spawn(async move {
            let outcome = async {
                let lock = holder.lock().await?;
                send_upload_part(lock.client(), &path, &upload_id, part_number, data, &sse_key).await
            }
            .await;

            let mut inner = state.inner.lock().unwrap();
            match outcome {
                Ok(e_tag) => add_completed_part(&mut inner, part_number, e_tag),
                Err(e) => {
                    warn!("Background part {} upload for {} failed: {}", part_number, path, e);
                    if inner.error.is_none() {
                        inner.error = Some(e);
                    }
                }
            }
            inner.uploads_in_progress -= 1;
            let all_done = inner.uploads_in_progress == 0;
            drop(inner);
            // The completion signal fires with the state mutex released:
            // waiters may re-enter the stream from their callbacks.
            if all_done {
                state.notify.notify_waiters();
            }
        });
        Ok(())
    }

    async fn upload_using_single_request(&mut self) -> FsResult<()> {
        let data = self
            .current_part
            .take()
            .map(BytesMut::freeze)
            .unwrap_or_default();
        debug!("Uploading object {} in a single request, size: {} bytes", self.path, data.len());

        if !self.background_writes {
            let lock = self.holder()?.lock().await?;
            let res = send_put_object(
                lock.client(),
                &self.path,
                data,
                self.effective_metadata(),
                &self.sse_key,
            )
            .await;
            drop(lock);
            return res;
        }

        {
            let mut inner = self.state.inner.lock().unwrap();
            inner.uploads_in_progress += 1;
        }

        let holder = self.holder()?.clone();
        let state = self.state.clone();
        let path = self.path.clone();
        let metadata = self.effective_metadata().clone();
        let sse_key = self.sse_key.clone();
        self.rt.spawn(async move {
            let outcome = async {
                let lock = holder.lock().await?;
                send_put_object(lock.client(), &path, data, &metadata, &sse_key).await
            }
            .await;

            let mut inner = state.inner.lock().unwrap();
            if let Err(e) = outcome {
                warn!("Background upload for {} failed: {}", path, e);
                if inner.error.is_none() {
                    inner.error = Some(e);
                }
            }
            inner.uploads_in_progress -= 1;
            let all_done = inner.uploads_in_progress == 0;
            drop(inner);
            if all_done {
                state.notify.notify_waiters();
            }
        });
        Ok(())
    }

    async fn complete_multipart_upload(&mut self) -> FsResult<()> {
        let parts = {
            let mut inner = self.state.inner.lock().unwrap();
            take_completed_parts(&mut inner, (self.part_number - 1) as usize)?
        };
        debug!(
            "Completing multipart upload for {} with {} parts",
            self.path,
            parts.len()
        );

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        let upload_id = self.upload_id.clone().unwrap_or_default();

        // CompleteMultipartUpload may answer HTTP 200 with an error embedded
        // in the XML body. The interceptor downgrades such responses to a
        // server error; the loop then consults the retry strategy with the
        // synthesized detail and attempt counter.
        let mut attempt: i64 = 0;
        loop {
            let lock = self.holder()?.lock().await?;
            let req = lock
                .client()
                .complete_multipart_upload()
                .bucket(&self.path.bucket)
                .key(&self.path.key)
                .upload_id(&upload_id)
                .multipart_upload(completed.clone());
            let req = with_sse_key!(req, &self.sse_key);
            let res = req
                .customize()
                .interceptor(CompleteUploadFixup)
                .send()
                .await;
            drop(lock);

            let err = match res {
                Ok(_) => return Ok(()),
                Err(e) => e,
            };
            let detail = crate::client::AwsErrorDetail::from_sdk_error(&err);
            if !self.retry_strategy.should_retry(&detail, attempt) {
                return Err(s3_error(
                    "CompleteMultipartUpload",
                    &self.path.bucket,
                    &self.path.key,
                    &err,
                ));
            }
            warn!(
                "CompleteMultipartUpload for {} failed with {} (\"{}\"), retrying",
                self.path, detail.error_code, detail.message
            );
            tokio::time::sleep(
                self.retry_strategy
                    .delay_before_next_attempt(&detail, attempt),
            )
            .await;
            attempt += 1;
        }
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Salvage path: never leave a half-done multipart upload behind.
        if let (Some(upload_id), Some(holder)) = (self.upload_id.clone(), self.holder.clone()) {
            warn!(
                "Writer for {} dropped without close, aborting multipart upload",
                self.path
            );
            let path = self.path.clone();
            self.rt.spawn(async move {
                let lock = match holder.lock().await {
                    Ok(v) => v,
                    Err(_) => return,
                };
                let res = lock
                    .client()
                    .abort_multipart_upload()
                    .bucket(&path.bucket)
                    .key(&path.key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(e) = res {
                    warn!("Failed to abort multipart upload in drop handler: {:?}", e);
                }
            });
        }
    }
}

async fn send_upload_part(
    client: &Client,
    path: &S3Path,
    upload_id: &str,
    part_number: i32,
    data: Bytes,
    sse_key: &Option<SseCustomerKey>,
) -> FsResult<String> {
    let content_length = data.len() as i64;
    let req = client
        .upload_part()
        .bucket(&path.bucket)
        .key(&path.key)
        .upload_id(upload_id)
        .part_number(part_number)
        .content_length(content_length)
        .body(ByteStream::from(data));
    let req = with_sse_key!(req, sse_key);

    match req.send().await {
        Ok(output) => match output.e_tag {
            Some(v) => Ok(v),
            None => crate::err_s3!(
                "S3 UploadPart for bucket '{}', key '{}' returned no ETag",
                path.bucket,
                path.key
            ),
        },
        Err(e) => Err(s3_error("UploadPart", &path.bucket, &path.key, &e)),
    }
}

async fn send_put_object(
    client: &Client,
    path: &S3Path,
    data: Bytes,
    metadata: &HashMap<String, String>,
    sse_key: &Option<SseCustomerKey>,
) -> FsResult<()> {
    let content_length = data.len() as i64;
    let req = client
        .put_object()
        .bucket(&path.bucket)
        .key(&path.key)
        .content_length(content_length)
        .body(ByteStream::from(data));
    let req = apply_put_object_metadata(req, metadata)?;
    let req = with_sse_key!(req, sse_key);

    match req.send().await {
        Ok(_) => Ok(()),
        Err(e) => Err(s3_error("PutObject", &path.bucket, &path.key, &e)),
    }
}

// Rewrites a 200 OK CompleteMultipartUpload response whose body carries an
// embedded error into a server error, so the error marshaller never sees a
// misleading success.
#[derive(Debug)]
struct CompleteUploadFixup;

impl Intercept for CompleteUploadFixup {
    fn name(&self) -> &'static str {
        "CompleteUploadFixup"
    }

    fn modify_before_deserialization(
        &self,
        context: &mut BeforeDeserializationInterceptorContextMut<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let response = context.response_mut();
        if !response.status().is_success() {
            return Ok(());
        }
        let has_error = response
            .body()
            .bytes()
            .map(completion_body_has_error)
            .unwrap_or(false);
        if has_error {
            *response.status_mut() = StatusCode::try_from(500)?;
        }
        Ok(())
    }
}

// True when the XML body is not a CompleteMultipartUploadResult or contains
// an Error/Errors element. An unparsable body is left alone.
fn completion_body_has_error(body: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(body) else {
        return false;
    };
    let mut reader = quick_xml::Reader::from_str(text);
    let mut saw_root = false;
    loop {
        let element = match reader.read_event() {
            Ok(Event::Start(v)) | Ok(Event::Empty(v)) => v,
            Ok(Event::Eof) => return false,
            Err(_) => return false,
            _ => continue,
        };
        let name = element.name();
        let name = name.as_ref();
        if !saw_root {
            saw_root = true;
            if name != b"CompleteMultipartUploadResult" {
                return true;
            }
        } else if name == b"Error" || name == b"Errors" {
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_parts_are_dense() {
        let mut inner = UploadInner::default();
        add_completed_part(&mut inner, 3, "e3".to_string());
        add_completed_part(&mut inner, 1, "e1".to_string());
        add_completed_part(&mut inner, 2, "e2".to_string());

        let parts = take_completed_parts(&mut inner, 3).unwrap();
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.part_number(), Some(i as i32 + 1));
        }
        assert_eq!(parts[2].e_tag(), Some("e3"));
    }

    #[test]
    fn missing_part_is_detected() {
        let mut inner = UploadInner::default();
        add_completed_part(&mut inner, 1, "e1".to_string());
        add_completed_part(&mut inner, 3, "e3".to_string());
        assert!(take_completed_parts(&mut inner, 3).is_err());

        let mut inner = UploadInner::default();
        add_completed_part(&mut inner, 1, "e1".to_string());
        assert!(take_completed_parts(&mut inner, 2).is_err());
    }

    #[test]
    fn embedded_error_detection() {
        assert!(completion_body_has_error(
            b"<Error><Code>InternalError</Code></Error>"
        ));
        assert!(completion_body_has_error(
            b"<CompleteMultipartUploadResult><Errors><Error/></Errors></CompleteMultipartUploadResult>"
        ));
        assert!(!completion_body_has_error(
            b"<CompleteMultipartUploadResult><ETag>\"abc\"</ETag></CompleteMultipartUploadResult>"
        ));
        assert!(!completion_body_has_error(b"not xml at all"));
        assert!(!completion_body_has_error(b""));
    }

    #[test]
    fn threshold_is_one_below_part_size() {
        assert_eq!(MULTIPART_THRESHOLD, PART_UPLOAD_SIZE as i64 - 1);
        assert!(MULTIPART_THRESHOLD < PART_UPLOAD_SIZE as i64);
    }
}
