//! Shuttle
//!
//! A transport adapter for the bottom of a [tower] request pipeline.
//!
//! The [`Adapter`] takes a fully configured request environment ([`Env`]), translates it into
//! a request for a transport [`Engine`](engine::Engine), and either runs it immediately or
//! queues it against a parallel [`Manager`] so that many requests can be run together.
//!
//! # Example
//! ```no_run
//! # use shuttle::{Adapter, Env};
//! # use tower::ServiceExt as _;
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let adapter = Adapter::new_hyper();
//!
//! // Serial: the call resolves once the response has been written.
//! let env = Env::get("http://example.com/".parse()?);
//! let env = adapter.clone().oneshot(env).await?;
//! println!("status: {}", env.response().expect("serial response").status());
//!
//! // Parallel: queue requests, then drive the batch.
//! let manager = adapter.setup_parallel_manager(Default::default());
//! let mut pending = Vec::new();
//! for path in ["/a", "/b", "/c"] {
//!     let env = Env::get(format!("http://example.com{path}").parse()?).with_manager(manager.clone());
//!     pending.push(adapter.clone().oneshot(env).await?);
//! }
//! manager.run().await;
//! for env in pending {
//!     println!("{:?} timed out: {}", env.uri(), env.completion().timed_out());
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::future::Future;
use std::pin::Pin;

pub mod adapter;
pub mod body;
pub mod completion;
pub mod engine;
pub mod env;
mod error;
pub mod manager;
pub mod options;
pub mod response;

pub use adapter::Adapter;
pub use body::RequestBody;
pub use completion::{Completion, Outcome};
pub use env::Env;
pub use error::{Error, TransportFailure};
pub use manager::{Manager, ManagerConfig};
pub use response::Response;

/// Boxed error type used at dynamic boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
