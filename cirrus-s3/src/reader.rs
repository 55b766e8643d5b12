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

use crate::client::ClientHolder;
use crate::errors::{is_not_found, s3_error};
use crate::metadata::object_metadata;
use crate::path::S3Path;
use crate::sse::{with_sse_key, SseCustomerKey};
use bytes::Bytes;
use cirrus_common::{FsError, FsResult};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;

/// Random-access reads from an S3 object via ranged GET requests.
pub struct ObjectReader {
    holder: Option<Arc<ClientHolder>>,
    path: S3Path,
    pos: i64,
    content_length: i64,
    metadata: HashMap<String, String>,
    sse_key: Option<SseCustomerKey>,
}

impl ObjectReader {
    /// Opens the object. When the caller already knows the size (from a
    /// previous stat), the HEAD request is skipped and the metadata map
    /// stays empty.
    pub(crate) async fn open(
        holder: Arc<ClientHolder>,
        path: S3Path,
        known_size: Option<i64>,
        sse_key: Option<SseCustomerKey>,
    ) -> FsResult<Self> {
        let mut reader = Self {
            holder: Some(holder),
            path,
            pos: 0,
            content_length: -1,
            metadata: HashMap::new(),
            sse_key,
        };

        match known_size {
            Some(size) if size >= 0 => {
                reader.content_length = size;
            }
            _ => reader.init().await?,
        }
        info!(
            "Created reader for {}, len = {}",
            reader.path, reader.content_length
        );
        Ok(reader)
    }

    // Issue a HEAD to get the content length, so errors like a missing
    // object don't wait until the first read.
    async fn init(&mut self) -> FsResult<()> {
        let lock = self.holder()?.lock().await?;
        let req = lock
            .client()
            .head_object()
            .bucket(&self.path.bucket)
            .key(&self.path.key);
        let req = with_sse_key!(req, &self.sse_key);
        let res = req.send().await;
        drop(lock);

        match res {
            Ok(head) => {
                self.content_length = head.content_length().unwrap_or(0);
                self.metadata = object_metadata(&head);
                Ok(())
            }
            Err(e) if is_not_found(&e) => Err(FsError::path_not_found(self.path.full_path())),
            Err(e) => Err(s3_error(
                "HeadObject",
                &self.path.bucket,
                &self.path.key,
                &e,
            )),
        }
    }

    fn holder(&self) -> FsResult<&Arc<ClientHolder>> {
        match &self.holder {
            Some(v) => Ok(v),
            None => Err(FsError::invalid("Operation on closed stream")),
        }
    }

    fn check_position(&self, position: i64, action: &str) -> FsResult<()> {
        if position < 0 {
            return Err(FsError::invalid(format!(
                "Cannot {} from negative position",
                action
            )));
        }
        if position > self.content_length {
            return Err(FsError::io(format!("Cannot {} past end of file", action)));
        }
        Ok(())
    }

    pub fn path(&self) -> &S3Path {
        &self.path
    }

    pub fn size(&self) -> FsResult<i64> {
        self.holder()?;
        Ok(self.content_length)
    }

    pub fn tell(&self) -> FsResult<i64> {
        self.holder()?;
        Ok(self.pos)
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn seek(&mut self, position: i64) -> FsResult<()> {
        self.holder()?;
        self.check_position(position, "seek")?;
        self.pos = position;
        Ok(())
    }

    /// Reads exactly `min(nbytes, size - position)` bytes with a single
    /// ranged GET. Reads past EOF are truncated.
    pub async fn read_at(&self, position: i64, nbytes: i64) -> FsResult<Bytes> {
        self.check_position(position, "read")?;

        let nbytes = nbytes.min(self.content_length - position);
        if nbytes <= 0 {
            return Ok(Bytes::new());
        }

        debug!(
            "Reading {} bytes at {} from {}",
            nbytes, position, self.path
        );
        let lock = self.holder()?.lock().await?;
        let req = lock
            .client()
            .get_object()
            .bucket(&self.path.bucket)
            .key(&self.path.key)
            .range(format_range(position, nbytes));
        let req = with_sse_key!(req, &self.sse_key);
        let res = req.send().await;
        drop(lock);

        let output = match res {
            Ok(v) => v,
            Err(e) if is_not_found(&e) => {
                return Err(FsError::path_not_found(self.path.full_path()))
            }
            Err(e) => {
                return Err(s3_error("GetObject", &self.path.bucket, &self.path.key, &e))
            }
        };

        let body = output.body.collect().await.map_err(|e| {
            FsError::io(format!(
                "S3 GetObject failed for bucket '{}', key '{}': error reading body: {}",
                self.path.bucket, self.path.key, e
            ))
        })?;
        Ok(body.into_bytes())
    }

    /// Reads into a caller-supplied buffer, returning the number of bytes
    /// written.
    pub async fn read_at_into(&self, position: i64, out: &mut [u8]) -> FsResult<usize> {
        let bytes = self.read_at(position, out.len() as i64).await?;
        out[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// Reads from the current position and advances it.
    pub async fn read(&mut self, nbytes: i64) -> FsResult<Bytes> {
        let bytes = self.read_at(self.pos, nbytes).await?;
        self.pos += bytes.len() as i64;
        Ok(bytes)
    }

    pub fn close(&mut self) {
        self.holder = None;
    }

    pub fn closed(&self) -> bool {
        self.holder.is_none()
    }
}

impl Drop for ObjectReader {
    fn drop(&mut self) {
        debug!("Close reader for {}", self.path);
    }
}

// HTTP range header value for [start, start + length).
fn format_range(start: i64, length: i64) -> String {
    format!("bytes={}-{}", start, start + length - 1)
}

#[cfg(test)]
mod tests {
    use super::format_range;

    #[test]
    fn range_header() {
        assert_eq!(format_range(0, 10), "bytes=0-9");
        assert_eq!(format_range(100, 1), "bytes=100-100");
    }
}
