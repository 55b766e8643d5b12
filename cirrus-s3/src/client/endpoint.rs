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

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The distinct endpoint configuration of a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointConfigKey {
    pub region: String,
    pub scheme: String,
    pub endpoint_override: String,
    pub use_virtual_addressing: bool,
}

/// Endpoint settings resolved once per distinct configuration. The resolved
/// value is never mutated after insertion into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// `None` leaves endpoint resolution to the SDK (standard AWS endpoints).
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

/// Process-wide map of endpoint configuration to resolved settings, so every
/// client with the same configuration shares one resolution.
pub struct EndpointCache {
    cache: Mutex<HashMap<EndpointConfigKey, Arc<ResolvedEndpoint>>>,
}

static INSTANCE: Lazy<EndpointCache> = Lazy::new(|| EndpointCache {
    cache: Mutex::new(HashMap::new()),
});

impl EndpointCache {
    pub fn instance() -> &'static EndpointCache {
        &INSTANCE
    }

    pub fn lookup(&self, key: EndpointConfigKey) -> Arc<ResolvedEndpoint> {
        let mut cache = self.cache.lock().unwrap();
        cache
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Self::resolve(&key)))
            .clone()
    }

    pub fn reset(&self) {
        self.cache.lock().unwrap().clear();
    }

    fn resolve(key: &EndpointConfigKey) -> ResolvedEndpoint {
        if key.endpoint_override.is_empty() {
            ResolvedEndpoint {
                endpoint_url: None,
                force_path_style: !key.use_virtual_addressing,
            }
        } else {
            let endpoint_url = if key.endpoint_override.contains("://") {
                key.endpoint_override.clone()
            } else {
                format!("{}://{}", key.scheme, key.endpoint_override)
            };
            ResolvedEndpoint {
                endpoint_url: Some(endpoint_url),
                force_path_style: !key.use_virtual_addressing,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(endpoint_override: &str, use_virtual_addressing: bool) -> EndpointConfigKey {
        EndpointConfigKey {
            region: "us-east-1".to_string(),
            scheme: "http".to_string(),
            endpoint_override: endpoint_override.to_string(),
            use_virtual_addressing,
        }
    }

    #[test]
    fn same_config_shares_resolution() {
        let cache = EndpointCache {
            cache: Mutex::new(HashMap::new()),
        };
        let a = cache.lookup(key("127.0.0.1:9000", false));
        let b = cache.lookup(key("127.0.0.1:9000", false));
        assert!(Arc::ptr_eq(&a, &b));

        let c = cache.lookup(key("127.0.0.1:9001", false));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn scheme_applied_to_bare_endpoint() {
        let resolved = EndpointCache::resolve(&key("127.0.0.1:9000", false));
        assert_eq!(
            resolved.endpoint_url.as_deref(),
            Some("http://127.0.0.1:9000")
        );
        assert!(resolved.force_path_style);

        let resolved = EndpointCache::resolve(&key("https://minio.example.com", true));
        assert_eq!(
            resolved.endpoint_url.as_deref(),
            Some("https://minio.example.com")
        );
        assert!(!resolved.force_path_style);

        let resolved = EndpointCache::resolve(&key("", true));
        assert_eq!(resolved.endpoint_url, None);
    }
}
