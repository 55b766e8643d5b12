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

//! Mapping between user metadata and S3 request/response attributes.

use aws_sdk_s3::operation::create_multipart_upload::builders::CreateMultipartUploadFluentBuilder;
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use aws_sdk_s3::operation::put_object::builders::PutObjectFluentBuilder;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_smithy_types::date_time::Format;
use aws_smithy_types::DateTime;
use cirrus_common::{FsError, FsResult};
use std::collections::HashMap;

/// Directory markers carry this content type and an empty body.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/x-directory";

/// Used when no content type is specified; the SDK default of
/// `application/xml` confuses downstream tools.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub fn parse_acl(value: &str) -> FsResult<ObjectCannedAcl> {
    if value.is_empty() || !ObjectCannedAcl::values().contains(&value) {
        return Err(FsError::invalid(format!(
            "Invalid S3 canned ACL: '{}'",
            value
        )));
    }
    Ok(ObjectCannedAcl::from(value))
}

fn parse_expires(value: &str) -> FsResult<DateTime> {
    DateTime::from_str(value, Format::DateTime)
        .map_err(|e| FsError::invalid(format!("Invalid 'Expires' metadata value '{}': {}", value, e)))
}

// Applies the accepted write-side metadata keys to an object request
// builder. Keys outside the accepted set are ignored, not an error.
macro_rules! metadata_setter {
    ($fn_name:ident, $builder:ty) => {
        pub fn $fn_name(
            mut req: $builder,
            metadata: &HashMap<String, String>,
        ) -> FsResult<$builder> {
            let mut content_type_set = false;
            for (key, value) in metadata {
                match key.as_str() {
                    "ACL" => req = req.acl(parse_acl(value)?),
                    "Cache-Control" => req = req.cache_control(value),
                    "Content-Type" => {
                        content_type_set = true;
                        req = req.content_type(value);
                    }
                    "Content-Language" => req = req.content_language(value),
                    "Expires" => req = req.expires(parse_expires(value)?),
                    _ => {}
                }
            }
            if !content_type_set {
                req = req.content_type(DEFAULT_CONTENT_TYPE);
            }
            Ok(req)
        }
    };
}

metadata_setter!(apply_put_object_metadata, PutObjectFluentBuilder);
metadata_setter!(
    apply_create_multipart_metadata,
    CreateMultipartUploadFluentBuilder
);

/// The metadata map emitted when opening an object for reading.
#[allow(deprecated)] // result.expires: superseded upstream, still the wire value
pub fn object_metadata(result: &HeadObjectOutput) -> HashMap<String, String> {
    let mut md = HashMap::new();

    let mut push = |key: &str, value: Option<&str>| {
        if let Some(v) = value {
            if !v.is_empty() {
                md.insert(key.to_string(), v.to_string());
            }
        }
    };

    push("Cache-Control", result.cache_control());
    push("Content-Type", result.content_type());
    push("Content-Language", result.content_language());
    push("ETag", result.e_tag());
    push("VersionId", result.version_id());

    let mut push_datetime = |key: &str, value: Option<&DateTime>| {
        if let Some(v) = value {
            if let Ok(formatted) = v.fmt(Format::DateTime) {
                md.insert(key.to_string(), formatted);
            }
        }
    };
    push_datetime("Last-Modified", result.last_modified());
    push_datetime("Expires", result.expires());

    md.insert(
        "Content-Length".to_string(),
        result.content_length().unwrap_or(0).to_string(),
    );
    md
}

/// Classify a HEAD result as file or directory. A non-zero length always
/// means a regular file, even with a trailing slash in the key; directory
/// markers never carry data.
pub fn is_directory_object(key: &str, result: &HeadObjectOutput) -> bool {
    if result.content_length().unwrap_or(0) > 0 {
        return false;
    }
    if key.ends_with('/') {
        return true;
    }
    result
        .content_type()
        .map(|t| t.starts_with(DIRECTORY_CONTENT_TYPE))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acl_parsing() {
        assert!(parse_acl("public-read").is_ok());
        assert!(parse_acl("not-an-acl").is_err());
        assert!(parse_acl("").is_err());
    }

    #[test]
    fn directory_classification() {
        let marker = HeadObjectOutput::builder()
            .content_length(0)
            .content_type(DIRECTORY_CONTENT_TYPE)
            .build();
        assert!(is_directory_object("a/b", &marker));

        let trailing = HeadObjectOutput::builder().content_length(0).build();
        assert!(is_directory_object("a/b/", &trailing));
        assert!(!is_directory_object("a/b", &trailing));

        // Data always wins over the trailing slash.
        let with_data = HeadObjectOutput::builder().content_length(12).build();
        assert!(!is_directory_object("a/b/", &with_data));
    }

    #[test]
    fn read_metadata() {
        let head = HeadObjectOutput::builder()
            .content_length(42)
            .content_type("text/plain")
            .e_tag("\"abc\"")
            .build();
        let md = object_metadata(&head);
        assert_eq!(md.get("Content-Length").unwrap(), "42");
        assert_eq!(md.get("Content-Type").unwrap(), "text/plain");
        assert_eq!(md.get("ETag").unwrap(), "\"abc\"");
        assert!(!md.contains_key("Cache-Control"));
    }
}
