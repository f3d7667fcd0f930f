//! Reply delivery.
//!
//! Transports implement [`Responder`] (one reply per call) or [`EventEmitter`]
//! (a stream of events). Handlers only ever see the wrapping handles,
//! [`MethodResult`] and [`EventSink`], which track whether the channel has been
//! invalidated and turn a late write into a no-op.

mod event;
mod result;

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::error::ReplyError;
use crate::failure::{Failure, FailureRecord};

pub use event::{EventEmitter, EventSink, EventStream, StreamEvent};
pub use result::{MethodResult, Reply, Responder};
pub(crate) use result::WeakMethodResult;

/// The two reply operations shared by call replies and event streams.
///
/// The relay helpers are written against this trait so they work with either
/// sink.
pub trait ReplySink {
    fn send_success(&self, value: Option<Bytes>) -> Result<(), ReplyError>;

    fn send_error(
        &self,
        code: &str,
        message: Option<&str>,
        details: Option<&str>,
    ) -> Result<(), ReplyError>;

    /// Flatten `failure` and send it through the error path.
    fn send_failure(&self, failure: &Failure) -> Result<(), ReplyError> {
        if failure.is_reply_invalidated() {
            debug!("handler failed writing to an invalidated channel, nothing to relay");
            return Ok(());
        }

        let record = FailureRecord::capture(failure);
        debug!(kind = %record.kind, "relaying failure to caller");
        self.send_error(&record.kind, record.message.as_deref(), Some(&record.trace))
    }
}

/// Run `f`, swallowing [`ReplyError::Invalidated`].
///
/// Returns `Ok(None)` when the race was hit. Every other error is returned
/// unchanged.
pub fn ignore_invalidated<T, F>(f: F) -> Result<Option<T>, ReplyError>
where
    F: FnOnce() -> Result<T, ReplyError>,
{
    match f() {
        Ok(value) => Ok(Some(value)),
        Err(ReplyError::Invalidated) => {
            debug!("ignoring reply written after the channel was torn down");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Lifecycle flags shared by all clones of a sink handle.
#[derive(Debug, Default)]
pub(crate) struct SinkState {
    invalidated: AtomicBool,
    terminated: AtomicBool,
}

impl SinkState {
    /// Returns `true` if this call flipped the flag.
    pub(crate) fn invalidate(&self) -> bool {
        !self.invalidated.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    /// Returns `true` for the first terminal write.
    pub(crate) fn mark_terminated(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}
