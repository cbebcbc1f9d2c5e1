//! Stage handlers - the caller-supplied units of work

use crate::core::Context;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// A single stage of a line
///
/// A handler receives the live run context, may read and write parameters
/// or attach errors, and must call exactly one of `next`, `repeat`, `jump`
/// or `abort` before it returns. A handler that never does so leaves its
/// run active forever; the engine does not detect this.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: Context);

    /// Name used in logs and diagnostics
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle to a handler, as stored by lines and nodes
pub type SharedHandler = Arc<dyn Handler>;

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, ctx: Context) {
        (self)(ctx).await
    }
}

/// A handler with an explicit name
pub struct Named<H> {
    name: String,
    inner: H,
}

#[async_trait]
impl<H: Handler> Handler for Named<H> {
    async fn handle(&self, ctx: Context) {
        self.inner.handle(ctx).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Box a handler for use in a line
pub fn handler<H: Handler + 'static>(h: H) -> SharedHandler {
    Arc::new(h)
}

/// Box a handler under the given name
pub fn named<H: Handler + 'static>(name: impl Into<String>, h: H) -> SharedHandler {
    Arc::new(Named {
        name: name.into(),
        inner: h,
    })
}
