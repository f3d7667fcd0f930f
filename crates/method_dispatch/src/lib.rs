//! Name-based method dispatch with exactly-once style reply relay.
//!
//! A transport hands each inbound [`MethodCall`] and its [`MethodResult`] to a
//! [`MethodDispatcher`]. The dispatcher looks the method up in its handler
//! table, runs the handler off the calling thread and makes sure the caller
//! sees a reply: the handler's own, the failure it raised, or
//! `not_implemented` for an unknown method.

pub mod call;
pub mod error;
pub mod failure;
pub mod relay;
pub mod server;
pub mod sink;

pub use call::MethodCall;
pub use error::{DispatchError, ReplyError};
pub use failure::{Failure, FailureRecord, ResultExt, serialize};
pub use relay::{IntoReply, guard, guard_async, relay, relay_async};
pub use server::{DispatcherConfig, MethodCallHandler, MethodDispatcher, ReplyPolicy};
pub use sink::{
    EventEmitter, EventSink, EventStream, MethodResult, Reply, ReplySink, Responder, StreamEvent,
    ignore_invalidated,
};
