//! Connection factory, injected so the pool never knows how streams are made.
//!
//! Any `Fn(Context) -> impl Future<Output = io::Result<S>>` closure is a
//! factory, which keeps tests and one-off wiring short. Reusable factories
//! (see `connpool-tcp`) implement [`ConnectionFactory`] directly.

use std::future::Future;
use std::io;
use std::pin::Pin;

use crate::context::Context;

/// Boxed future alias for connection factory results.
pub type ConnectFuture<'a, S> = Pin<Box<dyn Future<Output = io::Result<S>> + Send + 'a>>;

/// Opens raw streams for the pool.
///
/// Implementations should give up when `ctx` is done; the pool also stops
/// waiting at the context deadline regardless.
pub trait ConnectionFactory<S>: Send + Sync + 'static {
    fn connect<'a>(&'a self, ctx: &'a Context) -> ConnectFuture<'a, S>;
}

impl<S, F, Fut> ConnectionFactory<S> for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<S>> + Send + 'static,
{
    fn connect<'a>(&'a self, ctx: &'a Context) -> ConnectFuture<'a, S> {
        Box::pin(self(ctx.clone()))
    }
}
