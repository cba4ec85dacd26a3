//! Parallel execution of queued requests.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt as _};
use parking_lot::Mutex;
use tracing::Instrument as _;

use crate::engine::{EngineRequest, SharedEngine};

/// Configuration for a [`Manager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// The maximum number of requests in flight at once. `0` means unbounded.
    pub max_concurrency: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 200,
        }
    }
}

struct ManagerRef {
    engine: SharedEngine,
    config: ManagerConfig,
    queue: Mutex<VecDeque<EngineRequest>>,
}

/// A handle to a batch of requests which are run together.
///
/// Place a clone of the handle into every [`Env`](crate::Env) that should be batched;
/// the [`Adapter`](crate::Adapter) then queues those requests here instead of running
/// them. Nothing is sent until [`Manager::run`] is awaited.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerRef>,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.inner.config)
            .field("queued", &self.queued())
            .finish()
    }
}

impl Manager {
    /// Create a manager which runs its requests on `engine`.
    pub fn setup(engine: SharedEngine, config: ManagerConfig) -> Self {
        tracing::debug!(max_concurrency = config.max_concurrency, "parallel manager created");
        Self {
            inner: Arc::new(ManagerRef {
                engine,
                config,
                queue: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// The manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Queue a request to be performed on the next [`Manager::run`].
    pub fn enqueue(&self, request: EngineRequest) {
        tracing::trace!(url = request.url(), "queued request");
        self.inner.queue.lock().push_back(request);
    }

    /// The number of requests waiting to be run.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether two handles refer to the same manager.
    pub fn same(&self, other: &Manager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run every queued request, returning once all of them have finished.
    ///
    /// Requests run concurrently up to the configured limit, and each request's
    /// completion callback is invoked as soon as that request finishes. Requests queued
    /// while the batch is running are run in a following batch before this returns.
    ///
    /// Returns the number of requests performed.
    pub async fn run(&self) -> usize {
        let span = tracing::debug_span!("manager.run");
        self.drain().instrument(span).await
    }

    async fn drain(&self) -> usize {
        let mut total = 0;
        loop {
            let batch: Vec<EngineRequest> = self.inner.queue.lock().drain(..).collect();
            if batch.is_empty() {
                break;
            }

            total += batch.len();
            tracing::debug!(requests = batch.len(), "running batch");

            let engine = &self.inner.engine;
            stream::iter(batch)
                .for_each_concurrent(self.inner.config.max_concurrency, |request| async move {
                    if let Err(error) = request.run(&**engine).await {
                        tracing::warn!(%error, "parallel request reported an error");
                    }
                })
                .await;
        }

        tracing::trace!(requests = total, "manager drained");
        total
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::engine::mock::{MockEngine, MockResponse};
    use crate::engine::EngineResponse;

    assert_impl_all!(Manager: Send, Sync, Clone);

    fn request(url: &str) -> EngineRequest {
        EngineRequest::new(Method::GET, url, HeaderMap::new(), Bytes::new())
    }

    #[tokio::test]
    async fn runs_everything_queued() {
        let engine = MockEngine::new();
        engine.on("http://example.com/a").respond(MockResponse::new(200));
        engine.on("http://example.com/b").respond(MockResponse::new(404));

        let manager = Manager::setup(Arc::new(engine.clone()), ManagerConfig::default());
        let statuses = Arc::new(Mutex::new(Vec::new()));

        for url in ["http://example.com/a", "http://example.com/b"] {
            let mut req = request(url);
            let statuses = statuses.clone();
            req.on_finish(move |response: EngineResponse| {
                statuses.lock().push(response.status);
                Ok(())
            });
            manager.enqueue(req);
        }

        assert_eq!(manager.queued(), 2);
        assert!(statuses.lock().is_empty());

        assert_eq!(manager.run().await, 2);
        assert_eq!(manager.queued(), 0);

        let mut statuses = statuses.lock().clone();
        statuses.sort_unstable();
        assert_eq!(statuses, vec![200, 404]);
        assert_eq!(engine.requests().len(), 2);
    }

    #[tokio::test]
    async fn requests_run_concurrently() {
        let engine = MockEngine::new();
        engine
            .on("http://example.com/slow")
            .delay(Duration::from_millis(200))
            .respond(MockResponse::new(200));

        let manager = Manager::setup(Arc::new(engine), ManagerConfig::default());
        for _ in 0..10 {
            manager.enqueue(request("http://example.com/slow"));
        }

        let started = tokio::time::Instant::now();
        manager.run().await;
        assert!(started.elapsed() < Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn requests_queued_while_running_are_run() {
        let engine = MockEngine::new();
        engine.on("http://example.com/").respond(MockResponse::new(200));

        let manager = Manager::setup(Arc::new(engine), ManagerConfig { max_concurrency: 1 });
        let finished = Arc::new(AtomicUsize::new(0));

        let mut first = request("http://example.com/");
        let handle = manager.clone();
        let counter = finished.clone();
        first.on_finish(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut follow_up = request("http://example.com/");
            let counter = counter.clone();
            follow_up.on_finish(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            handle.enqueue(follow_up);
            Ok(())
        });
        manager.enqueue(first);

        assert_eq!(manager.run().await, 2);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_run() {
        let manager = Manager::setup(Arc::new(MockEngine::new()), ManagerConfig::default());
        assert_eq!(manager.run().await, 0);
        assert!(manager.same(&manager.clone()));
    }
}
