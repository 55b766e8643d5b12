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

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_types::error::display::DisplayErrorContext;
use cirrus_common::FsError;

pub(crate) fn is_not_found<E>(err: &SdkError<E, HttpResponse>) -> bool
where
    E: ProvideErrorMetadata,
{
    if let SdkError::ServiceError(ctx) = err {
        if ctx.raw().status().as_u16() == 404 {
            return true;
        }
    }
    matches!(
        err.code(),
        Some("NoSuchKey" | "NoSuchBucket" | "NotFound" | "404")
    )
}

pub(crate) fn is_already_exists<E>(err: &SdkError<E, HttpResponse>) -> bool
where
    E: ProvideErrorMetadata,
{
    matches!(
        err.code(),
        Some("BucketAlreadyExists" | "BucketAlreadyOwnedByYou")
    )
}

/// Every surfaced IO error names the S3 operation and the (bucket, key)
/// context.
pub(crate) fn s3_error<E>(
    op: &str,
    bucket: &str,
    key: &str,
    err: &SdkError<E, HttpResponse>,
) -> FsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    FsError::io(format!(
        "S3 {} failed for bucket '{}', key '{}': {}",
        op,
        bucket,
        key,
        DisplayErrorContext(err)
    ))
}

pub(crate) fn header_from_error<E>(err: &SdkError<E, HttpResponse>, name: &str) -> Option<String> {
    if let SdkError::ServiceError(ctx) = err {
        ctx.raw().headers().get(name).map(str::to_string)
    } else {
        None
    }
}
