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

mod backend;
pub use self::backend::S3Backend;

mod builder;
pub use self::builder::ClientBuilder;

mod endpoint;
pub use self::endpoint::{EndpointCache, EndpointConfigKey, ResolvedEndpoint};

mod holder;
pub use self::holder::{client_finalizer, finalize_s3, ClientFinalizer, ClientHolder, ClientLock};

mod retry;
pub use self::retry::{
    AwsErrorDetail, LimitedExponentialRetry, RetryStrategy, WrappedRetryClassifier,
};
