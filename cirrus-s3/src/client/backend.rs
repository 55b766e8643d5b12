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

use aws_sdk_s3::error::SdkError;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;

/// The concrete implementation behind the endpoint. A few code paths branch
/// on this to paper over backend quirks: Minio requires a trailing-slash HEAD
/// to see an empty directory marker, and checks entry existence before
/// directory creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3Backend {
    Amazon,
    Minio,
    Other,
}

impl S3Backend {
    /// Classify the backend from an error response. Minio advertises itself
    /// in the `Server` header; AWS answers with `AmazonS3`.
    pub fn from_error<E>(err: &SdkError<E, HttpResponse>) -> S3Backend {
        let server = match err {
            SdkError::ServiceError(ctx) => ctx.raw().headers().get("server").unwrap_or(""),
            _ => "",
        };
        if server.contains("MinIO") || server.contains("Minio") {
            S3Backend::Minio
        } else if server.contains("AmazonS3") {
            S3Backend::Amazon
        } else {
            S3Backend::Other
        }
    }
}
