use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{Span, debug, debug_span, info, info_span, warn};

use crate::call::MethodCall;
use crate::error::DispatchError;
use crate::failure::Failure;
use crate::relay::{IntoReply, relay};
use crate::server::config::{DispatcherConfig, ReplyPolicy};
use crate::server::handler::{AsyncHandler, BlockingHandler, ErasedHandler, make_async_handler};
use crate::server::inflight::InFlightMap;
use crate::sink::{MethodResult, Responder};

/// Entry point the transport calls for every inbound call.
pub trait MethodCallHandler: Send + Sync {
    fn on_method_call(&self, call: MethodCall, result: MethodResult);

    /// Policy the transport should give the reply handles it creates.
    fn reply_policy(&self) -> ReplyPolicy {
        ReplyPolicy::default()
    }
}

/// Routes calls to handlers by method name.
///
/// Resolution happens on the calling thread and never blocks. A resolved
/// handler runs on the runtime, so the caller only waits for the table lookup.
/// Every call gets one of three outcomes: the handler's reply, the relayed
/// failure it raised, or `not_implemented` when no handler matches.
pub struct MethodDispatcher {
    handlers: HashMap<String, Arc<dyn ErasedHandler>>,
    in_flight: Arc<InFlightMap>,
    runtime: Handle,
    config: DispatcherConfig,
    span: Span,
}

impl MethodDispatcher {
    /// Create a dispatcher bound to the current tokio runtime.
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatchError> {
        let runtime = Handle::try_current()?;
        Ok(Self::with_handle(runtime, config))
    }

    /// Create a dispatcher that schedules handlers on `runtime`.
    ///
    /// Use this when calls arrive on a thread that is not part of a runtime.
    pub fn with_handle(runtime: Handle, config: DispatcherConfig) -> Self {
        let span = info_span!("method_dispatcher", dispatcher = %config.name);
        Self {
            handlers: HashMap::new(),
            in_flight: Arc::new(InFlightMap::new()),
            runtime,
            config,
            span,
        }
    }

    /// Register a blocking handler. It runs on the blocking thread pool and
    /// replies through the `MethodResult` it is given.
    ///
    /// # Example
    /// ```ignore
    /// dispatcher.register("ping", |_call, result| {
    ///     result.success("pong")?;
    ///     Ok(())
    /// })?;
    /// ```
    pub fn register<F>(
        &mut self,
        method: impl Into<String>,
        handler: F,
    ) -> Result<(), DispatchError>
    where
        F: Fn(MethodCall, MethodResult) -> Result<(), Failure> + Send + Sync + 'static,
    {
        self.insert(method.into(), Arc::new(BlockingHandler::new(Arc::new(handler))))
    }

    /// Register an async handler, spawned as a task for each call.
    pub fn register_async<F, Fut>(
        &mut self,
        method: impl Into<String>,
        handler: F,
    ) -> Result<(), DispatchError>
    where
        F: Fn(MethodCall, MethodResult) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Failure>> + Send + 'static,
    {
        let handler = make_async_handler(handler);
        self.insert(method.into(), Arc::new(AsyncHandler::new(handler)))
    }

    /// Register a blocking handler whose return value is the reply.
    ///
    /// A `()` return is sent as null.
    pub fn register_fn<F, R>(
        &mut self,
        method: impl Into<String>,
        handler: F,
    ) -> Result<(), DispatchError>
    where
        F: Fn(MethodCall) -> Result<R, Failure> + Send + Sync + 'static,
        R: IntoReply,
    {
        self.register(method, move |call, result| {
            relay(&result, || handler(call))?;
            Ok(())
        })
    }

    fn insert(
        &mut self,
        method: String,
        handler: Arc<dyn ErasedHandler>,
    ) -> Result<(), DispatchError> {
        let span = &self.span;
        match self.handlers.entry(method) {
            Entry::Occupied(entry) => Err(DispatchError::DuplicateHandler(entry.key().clone())),
            Entry::Vacant(slot) => {
                info!(parent: span, method = %slot.key(), "Registered method handler");
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Dispatch one call.
    pub fn on_call(&self, call: MethodCall, result: MethodResult) {
        let Some(handler) = self.handlers.get(call.method()) else {
            debug!(
                parent: &self.span,
                method = %call.method(),
                "No handler registered, replying not implemented"
            );
            if let Err(e) = result.not_implemented() {
                warn!(
                    parent: &self.span,
                    method = %call.method(),
                    error = %e,
                    "Failed to send not-implemented reply"
                );
            }
            return;
        };

        let call_id = self.in_flight.track(&result);
        let span = debug_span!(
            parent: &self.span,
            "call",
            method = %call.method(),
            call_id = %call_id
        );

        if self.config.log_arguments {
            debug!(parent: &span, args = ?call.arguments(), "Invoking handler");
        } else {
            debug!(parent: &span, "Invoking handler");
        }

        handler.spawn_handler(&self.runtime, call, result, span);
    }

    /// Wrap a transport responder in a reply handle using this dispatcher's
    /// reply policy.
    pub fn result_for(&self, responder: impl Responder) -> MethodResult {
        MethodResult::new(responder, self.config.reply_policy)
    }

    /// Check if a handler is registered for the given method.
    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Names of all registered methods, in no particular order.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Number of dispatched calls that have not replied yet and whose reply
    /// handle is still held by a handler or its sub-work.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Invalidate the replies of all outstanding calls, e.g. when the transport
    /// channel is torn down. Returns the number of affected calls.
    pub fn invalidate_all(&self) -> usize {
        let count = self.in_flight.invalidate_all();
        if count > 0 {
            info!(parent: &self.span, count, "Invalidated in-flight replies");
        }
        count
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}

impl MethodCallHandler for MethodDispatcher {
    fn on_method_call(&self, call: MethodCall, result: MethodResult) {
        self.on_call(call, result);
    }

    fn reply_policy(&self) -> ReplyPolicy {
        self.config.reply_policy
    }
}
