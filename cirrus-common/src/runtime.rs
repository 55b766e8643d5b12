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

use std::future::Future;
use std::thread;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// The I/O executor driving all background work: part uploads, listing
/// pagination, and batched deletes. The stop token is observed between
/// paginated requests so in-flight listings abort promptly.
#[derive(Debug)]
pub struct AsyncRuntime {
    inner: Runtime,
    name_prefix: String,
    io_threads: usize,
    worker_threads: usize,
    stop: CancellationToken,
}

impl AsyncRuntime {
    pub fn new<T: AsRef<str>>(name_prefix: T, io_threads: usize, worker_threads: usize) -> Self {
        let mut builder = Builder::new_multi_thread();
        builder
            .worker_threads(io_threads)
            .thread_keep_alive(Duration::from_secs(6 * 3600))
            .thread_name(name_prefix.as_ref())
            .enable_all();
        if worker_threads > 0 {
            builder.max_blocking_threads(worker_threads);
        }

        let rt = builder.build().unwrap();
        AsyncRuntime {
            inner: rt,
            name_prefix: String::from(name_prefix.as_ref()),
            io_threads,
            worker_threads,
            stop: CancellationToken::new(),
        }
    }

    pub fn default(name_prefix: &str) -> Self {
        let default_threads = 2 * thread::available_parallelism().unwrap().get();
        Self::new(name_prefix, 32, default_threads.max(4))
    }

    pub fn single() -> Self {
        Self::new("single", 1, 1)
    }

    pub fn io_threads(&self) -> usize {
        self.io_threads
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn thread_name(&self) -> &str {
        &self.name_prefix
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Cancels all cooperating background work. Already dispatched requests
    /// run to completion; paginated work stops at the next page boundary.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.spawn(task)
    }

    pub fn block_on<F>(&self, task: F) -> F::Output
    where
        F: Future,
    {
        self.inner.block_on(task)
    }

    pub fn spawn_blocking<F, R>(&self, task: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.inner.spawn_blocking(task)
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::AsyncRuntime;

    #[test]
    fn spawn_and_block() {
        let rt = AsyncRuntime::single();
        let handle = rt.spawn(async { 1 + 2 });
        let res = rt.block_on(handle).unwrap();
        assert_eq!(res, 3);
    }

    #[test]
    fn stop_token() {
        let rt = AsyncRuntime::single();
        let token = rt.stop_token();
        assert!(!token.is_cancelled());
        rt.shutdown();
        assert!(token.is_cancelled());
    }
}
