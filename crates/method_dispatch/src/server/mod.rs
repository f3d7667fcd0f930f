//! Server-side types for method_dispatch.
//!
//! This module contains the `MethodDispatcher` and the handler plumbing that
//! runs each call off the receiving thread.

mod config;
mod dispatcher;
mod handler;
pub(crate) mod inflight;

pub use config::{DispatcherConfig, ReplyPolicy};
pub use dispatcher::{MethodCallHandler, MethodDispatcher};
pub use handler::{AsyncHandlerFn, BlockingHandlerFn, make_async_handler};
pub use inflight::{CallId, InFlightMap};
