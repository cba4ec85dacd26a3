//! The transport adapter service.
//!
//! [`Adapter`] is the innermost [`tower::Service`] of a request pipeline. It takes an
//! [`Env`], translates it into an [`EngineRequest`](crate::engine::EngineRequest) and
//! either performs it immediately (serial mode) or queues it on the environment's
//! [`Manager`] (parallel mode).

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tracing::Instrument as _;

use crate::engine::{Engine, EngineOptions, HyperEngine, HyperEngineConfig, SharedEngine};
use crate::env::Env;
use crate::manager::{Manager, ManagerConfig};
use crate::BoxFuture;
use crate::Error;

mod complete;
mod translate;

/// How a single call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Perform the request before the call resolves.
    Serial,

    /// Queue the request on a manager.
    Parallel,
}

impl Mode {
    fn of(env: &Env) -> Self {
        if env.parallel() {
            Mode::Parallel
        } else {
            Mode::Serial
        }
    }
}

/// A [`tower::Service`] which sends request environments through a transport engine.
///
/// Serial calls resolve once the response has been written to the environment and
/// return [`Error::Timeout`] or [`Error::ConnectionFailed`] when the transport failed.
/// Parallel calls resolve as soon as the request is queued; their outcome is recorded in
/// the environment's [`Completion`](crate::Completion) once [`Manager::run`] performs them.
#[derive(Clone)]
pub struct Adapter {
    engine: SharedEngine,
    defaults: Arc<EngineOptions>,
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl Adapter {
    /// An adapter using `engine` without default options.
    pub fn new<E>(engine: E) -> Self
    where
        E: Engine,
    {
        Builder::new().with_engine(engine).build()
    }

    /// An adapter using a [`HyperEngine`] with its default configuration.
    pub fn new_hyper() -> Self {
        Builder::default().build()
    }

    /// A builder for configuring an adapter.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The engine options applied to every request which does not set them itself.
    pub fn defaults(&self) -> &EngineOptions {
        &self.defaults
    }

    /// Create a parallel manager which runs requests on this adapter's engine.
    pub fn setup_parallel_manager(&self, config: ManagerConfig) -> Manager {
        Manager::setup(self.engine.clone(), config)
    }

    async fn dispatch(self, mut env: Env) -> Result<Env, Error> {
        let mode = Mode::of(&env);
        tracing::debug!(?mode, method = %env.method(), "dispatching request");

        let request = match translate::request(&mut env, &self.defaults, mode).await {
            Ok(request) => request,
            Err(error) => {
                env.completion().finish();
                return Err(error);
            }
        };

        match env.manager().cloned() {
            Some(manager) => {
                manager.enqueue(request);
                Ok(env)
            }
            None => {
                let result = request.run(&*self.engine).await;
                env.completion().finish();
                result.map(|()| env)
            }
        }
    }
}

impl tower::Service<Env> for Adapter {
    type Response = Env;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Env, Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, env: Env) -> Self::Future {
        let span = tracing::trace_span!("adapter", uri = %env.uri());
        Box::pin(self.clone().dispatch(env).instrument(span))
    }
}

/// Configures an [`Adapter`].
///
/// The default builder uses a [`HyperEngine`]; [`Builder::new`] starts without an engine
/// so one must be provided with [`Builder::with_engine`].
pub struct Builder<E = HyperEngine> {
    engine: E,
    defaults: EngineOptions,
}

impl<E> fmt::Debug for Builder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl Builder<()> {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            engine: (),
            defaults: EngineOptions::default(),
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            engine: HyperEngine::new(),
            defaults: EngineOptions::default(),
        }
    }
}

impl<E> Builder<E> {
    /// Use the provided engine.
    pub fn with_engine<E2>(self, engine: E2) -> Builder<E2>
    where
        E2: Engine,
    {
        Builder {
            engine,
            defaults: self.defaults,
        }
    }

    /// Use a [`HyperEngine`] with the provided configuration.
    pub fn with_hyper(self, config: HyperEngineConfig) -> Builder<HyperEngine> {
        self.with_engine(HyperEngine::with_config(config))
    }

    /// Engine options for every request, used where a request leaves them unset.
    pub fn with_defaults(mut self, defaults: EngineOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// A default total timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.defaults.timeout_ms = Some(saturating_millis(timeout));
        self
    }

    /// A default connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.defaults.connect_timeout_ms = Some(saturating_millis(timeout));
        self
    }

    /// Mutable access to the default engine options.
    pub fn defaults_mut(&mut self) -> &mut EngineOptions {
        &mut self.defaults
    }
}

impl<E> Builder<E>
where
    E: Engine,
{
    /// Build the adapter.
    pub fn build(self) -> Adapter {
        Adapter {
            engine: Arc::new(self.engine),
            defaults: Arc::new(self.defaults),
        }
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::Uri;
    use static_assertions::assert_impl_all;
    use tower::ServiceExt as _;

    use super::*;
    use crate::engine::mock::{MockEngine, MockResponse};
    use crate::options::RequestOptions;

    assert_impl_all!(Adapter: Send, Sync, Clone);
    assert_impl_all!(BoxFuture<'static, Result<Env, Error>>: Send);

    fn adapter(engine: &MockEngine) -> Adapter {
        Adapter::builder()
            .with_engine(engine.clone())
            .with_timeout(Duration::from_secs(30))
            .build()
    }

    #[tokio::test]
    async fn serial_success() {
        let engine = MockEngine::new();
        engine
            .on("http://example.com/")
            .respond(MockResponse::new(200).header("X-Test", "yes").body("hello"));

        let env = adapter(&engine)
            .oneshot(Env::get(Uri::from_static("http://example.com/")))
            .await
            .unwrap();

        let response = env.response().unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), "hello");
        assert_eq!(response.headers().get("x-test").unwrap(), "yes");
        assert!(env.completion().is_finished());

        let recorded = engine.requests();
        assert_eq!(recorded[0].options.timeout_ms, Some(30_000));
    }

    #[tokio::test]
    async fn serial_failures_are_errors() {
        let engine = MockEngine::new();
        engine
            .on("http://example.com/slow")
            .respond(MockResponse::timed_out());

        let error = adapter(&engine)
            .oneshot(Env::get(Uri::from_static("http://example.com/slow")))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Timeout(_)));

        let error = adapter(&engine)
            .oneshot(Env::get(Uri::from_static("http://example.com/missing")))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn request_options_override_defaults() {
        let engine = MockEngine::new();
        engine.on("http://example.com/").respond(MockResponse::new(204));

        let env = Env::get(Uri::from_static("http://example.com/"))
            .with_options(RequestOptions::default().with_timeout(0.5));
        adapter(&engine).oneshot(env).await.unwrap();

        assert_eq!(engine.requests()[0].options.timeout_ms, Some(500));
    }

    #[tokio::test]
    async fn parallel_calls_are_queued() {
        let engine = MockEngine::new();
        engine.on("http://example.com/ok").respond(MockResponse::new(200));
        engine
            .on("http://example.com/slow")
            .respond(MockResponse::timed_out());

        let adapter = adapter(&engine);
        let manager = adapter.setup_parallel_manager(ManagerConfig::default());

        let mut envs = Vec::new();
        for url in ["http://example.com/ok", "http://example.com/slow", "http://example.com/gone"] {
            let env = Env::get(Uri::from_static(url)).with_manager(manager.clone());
            envs.push(adapter.clone().oneshot(env).await.unwrap());
        }

        assert_eq!(manager.queued(), 3);
        assert!(engine.requests().is_empty());
        assert!(envs.iter().all(|env| env.response().is_none()));

        manager.run().await;

        assert_eq!(envs[0].response().unwrap().status(), 200);
        assert!(envs[1].completion().timed_out());
        assert!(envs[2].completion().connection_failed());
        for env in &envs {
            env.completion().finished().await;
        }
    }

    #[tokio::test]
    async fn body_errors_surface() {
        let engine = MockEngine::new();
        let body = http_body_util::StreamBody::new(futures_util::stream::once(async {
            Err::<http_body::Frame<bytes::Bytes>, _>(std::io::Error::other("broken body"))
        }));

        let env = Env::get(Uri::from_static("http://example.com/"))
            .with_body(crate::RequestBody::stream(body));
        let completion = env.completion().clone();

        let error = adapter(&engine).oneshot(env).await.unwrap_err();
        assert!(matches!(error, Error::Body(_)));
        assert!(completion.is_finished());
        assert!(engine.requests().is_empty());
    }

    #[test]
    fn new_wraps_shared_engine() {
        let engine: SharedEngine = Arc::new(MockEngine::new());
        let adapter = Adapter::new(engine);
        assert_eq!(adapter.defaults(), &EngineOptions::default());
    }
}
