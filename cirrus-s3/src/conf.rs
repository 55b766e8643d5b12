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

use crate::client::RetryStrategy;
use cirrus_common::{FsError, FsResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_REGION: &str = "us-east-1";

/// User-facing S3 connection and behavior options.
#[derive(Clone)]
pub struct S3Options {
    pub region: String,
    /// `http` or `https`; applied when `endpoint_override` carries no scheme.
    pub scheme: String,
    pub endpoint_override: String,

    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,

    pub request_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub retry_max_attempts: u32,
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,

    /// Virtual-host addressing is enabled unless an endpoint override is set;
    /// this flag forces it back on for overridden endpoints.
    pub force_virtual_addressing: bool,

    pub allow_bucket_creation: bool,
    pub allow_bucket_deletion: bool,
    pub background_writes: bool,
    /// When set, no multipart upload is created until the first part
    /// overflows; small writes are flushed as a single PUT. When unset, the
    /// multipart upload is created at stream open to validate write
    /// permission early.
    pub allow_delayed_open: bool,

    pub default_metadata: HashMap<String, String>,
    /// Raw 32-byte SSE-C customer key, passed on every object request.
    pub sse_customer_key: Option<String>,
    pub check_directory_existence_before_creation: bool,
}

impl Default for S3Options {
    fn default() -> Self {
        Self {
            region: String::new(),
            scheme: "https".to_string(),
            endpoint_override: String::new(),
            access_key: None,
            secret_key: None,
            session_token: None,
            request_timeout: None,
            connect_timeout: None,
            retry_max_attempts: 3,
            retry_strategy: None,
            force_virtual_addressing: false,
            allow_bucket_creation: false,
            allow_bucket_deletion: false,
            background_writes: true,
            allow_delayed_open: false,
            default_metadata: HashMap::new(),
            sse_customer_key: None,
            check_directory_existence_before_creation: false,
        }
    }
}

impl S3Options {
    /// Build options from a flat `s3.*` configuration map.
    pub fn with_map(conf: HashMap<String, String>) -> FsResult<Self> {
        let mut options = S3Options {
            region: conf.get("s3.region_name").cloned().unwrap_or_default(),
            endpoint_override: conf.get("s3.endpoint_url").cloned().unwrap_or_default(),
            access_key: conf.get("s3.credentials.access").cloned(),
            secret_key: conf.get("s3.credentials.secret").cloned(),
            ..Default::default()
        };

        if let Some(v) = conf.get("s3.retry_times") {
            options.retry_max_attempts = v.parse::<u32>().unwrap_or(3);
        }
        if let Some(v) = conf.get("s3.read_timeout") {
            options.request_timeout = Some(Duration::from_secs(v.parse::<u64>().unwrap_or(3)));
        }
        if let Some(v) = conf.get("s3.conn_timeout") {
            options.connect_timeout = Some(Duration::from_secs(v.parse::<u64>().unwrap_or(3)));
        }

        options.validate()?;
        Ok(options)
    }

    pub fn effective_region(&self) -> &str {
        if self.region.is_empty() {
            DEFAULT_REGION
        } else {
            &self.region
        }
    }

    pub fn validate(&self) -> FsResult<()> {
        if self.scheme != "http" && self.scheme != "https" {
            return Err(FsError::invalid(format!(
                "Invalid S3 connection scheme '{}'",
                self.scheme
            )));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(FsError::invalid(
                "Both access key and secret key must be provided, or neither",
            ));
        }
        if let Some(key) = &self.sse_customer_key {
            if key.len() != 32 {
                return Err(FsError::invalid(format!(
                    "SSE-C customer key must be exactly 32 bytes, got {}",
                    key.len()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::conf::S3Options;
    use std::collections::HashMap;

    #[test]
    fn validate() {
        let options = S3Options::default();
        options.validate().unwrap();

        let options = S3Options {
            scheme: "ftp".to_string(),
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = S3Options {
            access_key: Some("ak".to_string()),
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = S3Options {
            sse_customer_key: Some("tooshort".to_string()),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn with_map() {
        let mut conf = HashMap::new();
        conf.insert("s3.region_name".to_string(), "eu-west-1".to_string());
        conf.insert(
            "s3.endpoint_url".to_string(),
            "http://127.0.0.1:9000".to_string(),
        );
        conf.insert("s3.credentials.access".to_string(), "ak".to_string());
        conf.insert("s3.credentials.secret".to_string(), "sk".to_string());
        conf.insert("s3.retry_times".to_string(), "5".to_string());

        let options = S3Options::with_map(conf).unwrap();
        assert_eq!(options.region, "eu-west-1");
        assert_eq!(options.endpoint_override, "http://127.0.0.1:9000");
        assert_eq!(options.retry_max_attempts, 5);
        assert_eq!(options.effective_region(), "eu-west-1");

        assert_eq!(S3Options::default().effective_region(), "us-east-1");
    }
}
