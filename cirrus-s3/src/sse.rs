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

use base64::Engine;
use cirrus_common::{FsError, FsResult};

pub const SSE_CUSTOMER_ALGORITHM: &str = "AES256";

/// The header triple derived from a raw SSE-C customer key: the algorithm,
/// the base64 key, and the base64 MD5 of the key.
#[derive(Debug, Clone)]
pub struct SseCustomerKey {
    pub key_b64: String,
    pub key_md5_b64: String,
}

impl SseCustomerKey {
    pub fn new(raw_key: &str) -> FsResult<Self> {
        if raw_key.len() != 32 {
            return Err(FsError::invalid(format!(
                "SSE-C customer key must be exactly 32 bytes, got {}",
                raw_key.len()
            )));
        }
        let engine = base64::engine::general_purpose::STANDARD;
        let digest = md5::compute(raw_key.as_bytes());
        Ok(Self {
            key_b64: engine.encode(raw_key.as_bytes()),
            key_md5_b64: engine.encode(digest.0),
        })
    }
}

// Adds the SSE-C headers to any object request builder when a customer key
// is configured.
macro_rules! with_sse_key {
    ($req:expr, $key:expr) => {{
        match $key {
            Some(k) => $req
                .sse_customer_algorithm($crate::sse::SSE_CUSTOMER_ALGORITHM)
                .sse_customer_key(&k.key_b64)
                .sse_customer_key_md5(&k.key_md5_b64),
            None => $req,
        }
    }};
}
pub(crate) use with_sse_key;

// The copy-source side of CopyObject carries its own mirrored triple.
macro_rules! with_copy_source_sse_key {
    ($req:expr, $key:expr) => {{
        match $key {
            Some(k) => $req
                .copy_source_sse_customer_algorithm($crate::sse::SSE_CUSTOMER_ALGORITHM)
                .copy_source_sse_customer_key(&k.key_b64)
                .copy_source_sse_customer_key_md5(&k.key_md5_b64),
            None => $req,
        }
    }};
}
pub(crate) use with_copy_source_sse_key;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_length_checked() {
        assert!(SseCustomerKey::new("short").is_err());
        assert!(SseCustomerKey::new("01234567890123456789012345678901").is_ok());
    }

    #[test]
    fn headers_are_derived() {
        let key = SseCustomerKey::new("01234567890123456789012345678901").unwrap();
        assert_eq!(
            key.key_b64,
            "MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTIzNDU2Nzg5MDE="
        );
        // MD5 is 16 bytes, so its base64 form is 24 characters.
        assert_eq!(key.key_md5_b64.len(), 24);
    }
}
