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
use aws_smithy_runtime_api::client::interceptors::context::InterceptorContext;
use aws_smithy_runtime_api::client::retries::classifiers::{ClassifyRetry, RetryAction};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// An abstract view of an AWS error handed to a [`RetryStrategy`].
#[derive(Debug, Clone, Default)]
pub struct AwsErrorDetail {
    pub error_code: String,
    pub message: String,
    pub transient: bool,
}

impl AwsErrorDetail {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>, transient: bool) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            transient,
        }
    }

    pub fn from_sdk_error<E, R>(err: &SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata,
    {
        let error_code = err.code().unwrap_or("Unknown").to_string();
        let transient = matches!(
            err,
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_)
        ) || transient_code(&error_code);

        Self {
            message: err.message().unwrap_or_default().to_string(),
            error_code,
            transient,
        }
    }
}

fn transient_code(code: &str) -> bool {
    matches!(
        code,
        "InternalError"
            | "ServiceUnavailable"
            | "SlowDown"
            | "RequestTimeout"
            | "Throttling"
            | "ThrottlingException"
            | "RequestLimitExceeded"
    )
}

/// A user-pluggable retry decision, consulted with the error detail and the
/// number of retries already attempted.
pub trait RetryStrategy: Send + Sync {
    fn should_retry(&self, detail: &AwsErrorDetail, attempted_retries: i64) -> bool;

    fn delay_before_next_attempt(&self, detail: &AwsErrorDetail, attempted_retries: i64)
        -> Duration;
}

/// Retries transient errors a bounded number of times with capped
/// exponential backoff.
#[derive(Debug, Clone)]
pub struct LimitedExponentialRetry {
    max_retries: i64,
    base_delay: Duration,
    max_delay: Duration,
}

impl LimitedExponentialRetry {
    pub fn new(max_retries: i64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl Default for LimitedExponentialRetry {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryStrategy for LimitedExponentialRetry {
    fn should_retry(&self, detail: &AwsErrorDetail, attempted_retries: i64) -> bool {
        detail.transient && attempted_retries < self.max_retries
    }

    fn delay_before_next_attempt(
        &self,
        _detail: &AwsErrorDetail,
        attempted_retries: i64,
    ) -> Duration {
        let shift = attempted_retries.clamp(0, 16) as u32;
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

/// Bridges a [`RetryStrategy`] into the SDK's retry classifier chain.
///
/// The SDK owns the attempt count and the backoff schedule (configured from
/// `S3Options::retry_max_attempts`); the strategy only answers whether a
/// failed attempt is retryable.
pub struct WrappedRetryClassifier {
    strategy: Arc<dyn RetryStrategy>,
}

impl WrappedRetryClassifier {
    pub fn new(strategy: Arc<dyn RetryStrategy>) -> Self {
        Self { strategy }
    }
}

impl fmt::Debug for WrappedRetryClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WrappedRetryClassifier")
    }
}

impl ClassifyRetry for WrappedRetryClassifier {
    fn classify_retry(&self, ctx: &InterceptorContext) -> RetryAction {
        let Some(response) = ctx.response() else {
            return RetryAction::NoActionIndicated;
        };
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return RetryAction::NoActionIndicated;
        }

        let detail = AwsErrorDetail::new(
            status.to_string(),
            String::new(),
            (500..600).contains(&status) || status == 429,
        );
        if self.strategy.should_retry(&detail, 0) {
            RetryAction::transient_error()
        } else {
            RetryAction::RetryForbidden
        }
    }

    fn name(&self) -> &'static str {
        "cirrus-user-retry-strategy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_retry_decisions() {
        let strategy = LimitedExponentialRetry::new(1);
        let transient = AwsErrorDetail::new("InternalError", "internal error", true);
        let fatal = AwsErrorDetail::new("AccessDenied", "denied", false);

        assert!(strategy.should_retry(&transient, 0));
        assert!(!strategy.should_retry(&transient, 1));
        assert!(!strategy.should_retry(&fatal, 0));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let strategy = LimitedExponentialRetry::new(10);
        let detail = AwsErrorDetail::default();

        let d0 = strategy.delay_before_next_attempt(&detail, 0);
        let d1 = strategy.delay_before_next_attempt(&detail, 1);
        let d20 = strategy.delay_before_next_attempt(&detail, 20);
        assert!(d1 > d0);
        assert_eq!(d20, Duration::from_secs(10));
    }

    #[test]
    fn transient_codes() {
        assert!(transient_code("SlowDown"));
        assert!(transient_code("InternalError"));
        assert!(!transient_code("NoSuchKey"));
    }
}
