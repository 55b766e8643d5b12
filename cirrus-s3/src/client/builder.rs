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

use crate::client::{
    client_finalizer, ClientFinalizer, ClientHolder, EndpointCache, EndpointConfigKey,
    WrappedRetryClassifier,
};
use crate::conf::S3Options;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config as s3_config;
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use aws_types::SdkConfig;
use cirrus_common::FsResult;
use std::sync::Arc;

/// Assembles a configured S3 client from user options and registers it with
/// the finalizer.
pub struct ClientBuilder {
    options: S3Options,
}

impl ClientBuilder {
    pub fn new(options: S3Options) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &S3Options {
        &self.options
    }

    pub async fn build(&self) -> FsResult<Arc<ClientHolder>> {
        self.build_with(client_finalizer()).await
    }

    pub async fn build_with(&self, finalizer: &Arc<ClientFinalizer>) -> FsResult<Arc<ClientHolder>> {
        let options = &self.options;
        options.validate()?;

        let region = options.effective_region().to_string();
        let use_virtual_addressing =
            options.endpoint_override.is_empty() || options.force_virtual_addressing;
        let endpoint = EndpointCache::instance().lookup(EndpointConfigKey {
            region: region.clone(),
            scheme: options.scheme.clone(),
            endpoint_override: options.endpoint_override.clone(),
            use_virtual_addressing,
        });

        let mut sdk_builder = SdkConfig::builder().region(Region::new(region));
        if let (Some(access), Some(secret)) = (&options.access_key, &options.secret_key) {
            let credentials = Credentials::new(
                access,
                secret,
                options.session_token.clone(),
                None,
                "Static",
            );
            sdk_builder = sdk_builder.credentials_provider(SharedCredentialsProvider::new(credentials));
        }
        let sdk_conf = sdk_builder.build();

        let retry_conf = if options.retry_max_attempts == 0 {
            RetryConfig::disabled()
        } else {
            RetryConfig::standard().with_max_attempts(options.retry_max_attempts)
        };
        let mut timeout_builder = TimeoutConfig::builder();
        if let Some(timeout) = options.request_timeout {
            timeout_builder = timeout_builder.read_timeout(timeout);
        }
        if let Some(timeout) = options.connect_timeout {
            timeout_builder = timeout_builder.connect_timeout(timeout);
        }

        let mut conf_builder = s3_config::Builder::from(&sdk_conf)
            .behavior_version(BehaviorVersion::latest())
            .retry_config(retry_conf)
            .timeout_config(timeout_builder.build())
            .force_path_style(endpoint.force_path_style);
        if let Some(url) = &endpoint.endpoint_url {
            conf_builder = conf_builder.endpoint_url(url);
        }
        if let Some(strategy) = &options.retry_strategy {
            conf_builder =
                conf_builder.retry_classifier(WrappedRetryClassifier::new(strategy.clone()));
        }

        let client = Client::from_conf(conf_builder.build());
        finalizer.add_client(client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_registers_holder() {
        let options = S3Options {
            region: "eu-west-1".to_string(),
            scheme: "http".to_string(),
            endpoint_override: "127.0.0.1:9000".to_string(),
            access_key: Some("ak".to_string()),
            secret_key: Some("sk".to_string()),
            ..Default::default()
        };

        let finalizer = ClientFinalizer::new();
        let holder = ClientBuilder::new(options)
            .build_with(&finalizer)
            .await
            .unwrap();
        let lock = holder.lock().await.unwrap();
        drop(lock);

        finalizer.finalize().await;
        assert!(holder.lock().await.is_err());
    }

    #[tokio::test]
    async fn invalid_scheme_is_rejected() {
        let options = S3Options {
            scheme: "ftp".to_string(),
            ..Default::default()
        };
        let finalizer = ClientFinalizer::new();
        assert!(ClientBuilder::new(options)
            .build_with(&finalizer)
            .await
            .is_err());
    }
}
