//! Run a unit of handler work and relay its outcome through a sink.
//!
//! Panics inside the work are caught and relayed like any other failure.

use bytes::Bytes;
use futures::FutureExt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::error::ReplyError;
use crate::failure::Failure;
use crate::sink::ReplySink;

/// Conversion of a handler's return value into a reply payload.
///
/// `()` maps to `None` so the caller always receives a value or an explicit
/// null.
pub trait IntoReply {
    fn into_reply(self) -> Option<Bytes>;
}

impl IntoReply for () {
    fn into_reply(self) -> Option<Bytes> {
        None
    }
}

impl IntoReply for Bytes {
    fn into_reply(self) -> Option<Bytes> {
        Some(self)
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Option<Bytes> {
        Some(Bytes::from(self))
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Option<Bytes> {
        Some(Bytes::from(self))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Option<Bytes> {
        Some(Bytes::from_static(self.as_bytes()))
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Option<Bytes> {
        self.and_then(IntoReply::into_reply)
    }
}

/// Run `f` and reply with its value, or with the failure it raised.
pub fn relay<S, R, F>(sink: &S, f: F) -> Result<(), ReplyError>
where
    S: ReplySink + ?Sized,
    R: IntoReply,
    F: FnOnce() -> Result<R, Failure>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => sink.send_success(value.into_reply()),
        Ok(Err(failure)) => sink.send_failure(&failure),
        Err(panic) => sink.send_failure(&Failure::from_panic(panic)),
    }
}

/// Run `f` for its side effects, relaying only a failure.
///
/// For handlers that send their success reply themselves, typically from
/// sub-work that finishes later.
pub fn guard<S, F>(sink: &S, f: F) -> Result<(), ReplyError>
where
    S: ReplySink + ?Sized,
    F: FnOnce() -> Result<(), Failure>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(failure)) => sink.send_failure(&failure),
        Err(panic) => sink.send_failure(&Failure::from_panic(panic)),
    }
}

/// Async form of [`relay`].
pub async fn relay_async<S, R, Fut>(sink: &S, fut: Fut) -> Result<(), ReplyError>
where
    S: ReplySink + ?Sized,
    R: IntoReply,
    Fut: Future<Output = Result<R, Failure>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => sink.send_success(value.into_reply()),
        Ok(Err(failure)) => sink.send_failure(&failure),
        Err(panic) => sink.send_failure(&Failure::from_panic(panic)),
    }
}

/// Async form of [`guard`].
pub async fn guard_async<S, Fut>(sink: &S, fut: Fut) -> Result<(), ReplyError>
where
    S: ReplySink + ?Sized,
    Fut: Future<Output = Result<(), Failure>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(failure)) => sink.send_failure(&failure),
        Err(panic) => sink.send_failure(&Failure::from_panic(panic)),
    }
}
