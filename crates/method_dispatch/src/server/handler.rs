use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{Instrument, Span, debug, warn};

use crate::call::MethodCall;
use crate::failure::Failure;
use crate::sink::{MethodResult, ReplySink};

/// A type-erased handler that can be stored in a HashMap.
///
/// Lets blocking and async handlers share one registry.
pub(crate) trait ErasedHandler: Send + Sync {
    /// Run the handler for one call off the calling thread.
    fn spawn_handler(&self, runtime: &Handle, call: MethodCall, result: MethodResult, span: Span);
}

/// A handler that blocks while it works. Runs on the blocking thread pool.
pub type BlockingHandlerFn =
    Arc<dyn Fn(MethodCall, MethodResult) -> Result<(), Failure> + Send + Sync + 'static>;

/// A handler returning a future. Driven to completion on the blocking pool.
pub type AsyncHandlerFn = Arc<
    dyn Fn(MethodCall, MethodResult) -> BoxFuture<'static, Result<(), Failure>>
        + Send
        + Sync
        + 'static,
>;

pub(crate) struct BlockingHandler {
    f: BlockingHandlerFn,
}

impl BlockingHandler {
    pub fn new(f: BlockingHandlerFn) -> Self {
        Self { f }
    }
}

impl ErasedHandler for BlockingHandler {
    fn spawn_handler(&self, runtime: &Handle, call: MethodCall, result: MethodResult, span: Span) {
        let f = Arc::clone(&self.f);

        runtime.spawn_blocking(move || {
            let _entered = span.enter();

            let reply = result.clone();
            let outcome = catch_unwind(AssertUnwindSafe(move || f(call, reply)))
                .unwrap_or_else(|panic| Err(Failure::from_panic(panic)));
            finish(&result, outcome);
        });
    }
}

pub(crate) struct AsyncHandler {
    f: AsyncHandlerFn,
}

impl AsyncHandler {
    pub fn new(f: AsyncHandlerFn) -> Self {
        Self { f }
    }
}

impl ErasedHandler for AsyncHandler {
    fn spawn_handler(&self, runtime: &Handle, call: MethodCall, result: MethodResult, span: Span) {
        let f = Arc::clone(&self.f);

        let task = async move {
            let reply = result.clone();
            let outcome = AssertUnwindSafe(async move { f(call, reply).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(Failure::from_panic(panic)));
            finish(&result, outcome);
        };

        // `spawn` from a worker thread may poll the task on that same worker,
        // so the future is driven from the blocking pool instead.
        let handle = runtime.clone();
        runtime.spawn_blocking(move || handle.block_on(task.instrument(span)));
    }
}

/// Relay a failure the handler let escape.
fn finish(result: &MethodResult, outcome: Result<(), Failure>) {
    match outcome {
        Ok(()) => debug!("Handler completed"),
        Err(failure) => {
            debug!(failure = %failure, "Handler raised, relaying failure");
            if let Err(e) = result.send_failure(&failure) {
                warn!(error = %e, failure = %failure, "Failed to relay handler failure");
            }
        }
    }
}

/// Helper to create a boxed async handler from an async closure.
pub fn make_async_handler<F, Fut>(f: F) -> AsyncHandlerFn
where
    F: Fn(MethodCall, MethodResult) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Failure>> + Send + 'static,
{
    Arc::new(move |call, result| Box::pin(f(call, result)))
}
