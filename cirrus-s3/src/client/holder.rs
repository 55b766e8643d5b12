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

//! Protection of S3 clients against use after finalization.
//!
//! Once [`finalize_s3`] runs, no client call may be issued anymore. Every
//! client is therefore wrapped in a [`ClientHolder`] registered with the
//! process-wide [`ClientFinalizer`]; issuing a request requires a
//! [`ClientLock`], and finalization drains all outstanding locks before
//! clearing the clients.

use aws_sdk_s3::Client;
use cirrus_common::{FsError, FsResult};
use log::debug;
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

/// A RAII guard guaranteeing the held client is safe to use. The finalizer
/// cannot complete until every outstanding `ClientLock` is released.
///
/// Locking again while already holding a `ClientLock` on the same task can
/// deadlock: a pending exclusive acquirer blocks subsequent shared
/// acquirers even while the lock is held in shared mode. Call sites issuing
/// multiple S3 requests must drop the lock between requests.
pub struct ClientLock {
    client: Client,
    _guard: OwnedRwLockReadGuard<bool>,
}

impl ClientLock {
    pub fn client(&self) -> &Client {
        &self.client
    }
}

pub struct ClientHolder {
    finalizer: Weak<ClientFinalizer>,
    client: Mutex<Option<Client>>,
}

impl ClientHolder {
    /// Returns a lock handle, or `Finalized` if the subsystem has shut down.
    pub async fn lock(&self) -> FsResult<ClientLock> {
        let client = { self.client.lock().unwrap().clone() };
        // Do not hold the holder mutex while taking the finalizer lock:
        // acquiring a shared lock may block behind a pending writer.
        let finalizer = match self.finalizer.upgrade() {
            Some(v) => v,
            None => return Err(FsError::Finalized),
        };

        let guard = finalizer.finalized.clone().read_owned().await;
        if *guard {
            return Err(FsError::Finalized);
        }
        // The client is cleared only once the finalized flag is set.
        let client = client.ok_or(FsError::Finalized)?;
        Ok(ClientLock {
            client,
            _guard: guard,
        })
    }

    fn finalize(&self) {
        let client = { self.client.lock().unwrap().take() };
        // The client is released outside the holder mutex.
        drop(client);
    }
}

pub struct ClientFinalizer {
    // Shared/exclusive barrier: lock handles hold it shared, finalization
    // takes it exclusive and flips the flag.
    finalized: Arc<RwLock<bool>>,
    holders: Mutex<Vec<Weak<ClientHolder>>>,
}

impl ClientFinalizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            finalized: Arc::new(RwLock::new(false)),
            holders: Mutex::new(Vec::new()),
        })
    }

    /// Wraps a client into a holder registered for finalization.
    pub async fn add_client(self: &Arc<Self>, client: Client) -> FsResult<Arc<ClientHolder>> {
        let guard = self.finalized.read().await;
        if *guard {
            return Err(FsError::Finalized);
        }

        let holder = Arc::new(ClientHolder {
            finalizer: Arc::downgrade(self),
            client: Mutex::new(Some(client)),
        });

        let mut holders = self.holders.lock().unwrap();
        // Remove expired entries before adding the new one.
        holders.retain(|h| h.strong_count() > 0);
        holders.push(Arc::downgrade(&holder));
        Ok(holder)
    }

    /// Marks the subsystem finalized and clears every live holder. Returns
    /// only after all outstanding lock handles have been released.
    pub async fn finalize(&self) {
        let mut guard = self.finalized.write().await;
        *guard = true;
        // Release before touching the holders to avoid a lock ordering issue
        // with ClientHolder::finalize.
        drop(guard);

        let finalizing = { std::mem::take(&mut *self.holders.lock().unwrap()) };
        for weak in finalizing {
            if let Some(holder) = weak.upgrade() {
                holder.finalize();
            }
        }
        debug!("S3 client finalizer completed");
    }
}

static FINALIZER: Lazy<Arc<ClientFinalizer>> = Lazy::new(ClientFinalizer::new);

pub fn client_finalizer() -> &'static Arc<ClientFinalizer> {
    &FINALIZER
}

/// Shuts down the S3 subsystem. After this returns, every operation on any
/// filesystem backed by this process fails with `Finalized`.
pub async fn finalize_s3() {
    client_finalizer().finalize().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{BehaviorVersion, Region};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn test_client() -> Client {
        let creds = aws_credential_types::Credentials::new("ak", "sk", None, None, "test");
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(creds)
            .build();
        Client::from_conf(conf)
    }

    #[tokio::test]
    async fn lock_then_finalize() {
        let finalizer = ClientFinalizer::new();
        let holder = finalizer.add_client(test_client()).await.unwrap();

        let lock = holder.lock().await.unwrap();
        drop(lock);

        finalizer.finalize().await;
        assert!(matches!(holder.lock().await, Err(FsError::Finalized)));
        assert!(matches!(
            finalizer.add_client(test_client()).await,
            Err(FsError::Finalized)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn finalize_waits_for_outstanding_locks() {
        let finalizer = ClientFinalizer::new();
        let holder = finalizer.add_client(test_client()).await.unwrap();
        let lock = holder.lock().await.unwrap();

        let released = Arc::new(AtomicBool::new(false));
        let observed = {
            let finalizer = finalizer.clone();
            let released = released.clone();
            tokio::spawn(async move {
                finalizer.finalize().await;
                released.load(Ordering::SeqCst)
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        released.store(true, Ordering::SeqCst);
        drop(lock);

        // Finalization completed only after the lock was released.
        assert!(observed.await.unwrap());
        assert!(matches!(holder.lock().await, Err(FsError::Finalized)));
    }

    #[tokio::test]
    async fn repeated_finalize_is_harmless() {
        let finalizer = ClientFinalizer::new();
        let holder = finalizer.add_client(test_client()).await.unwrap();
        finalizer.finalize().await;
        finalizer.finalize().await;
        assert!(matches!(holder.lock().await, Err(FsError::Finalized)));
    }
}
