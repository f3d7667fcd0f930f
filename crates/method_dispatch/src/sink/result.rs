use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ReplyError;
use crate::relay::IntoReply;
use crate::server::ReplyPolicy;
use crate::server::inflight::InFlightGuard;
use crate::sink::{ReplySink, SinkState, ignore_invalidated};

/// Transport side of a single call reply.
///
/// Implementations return [`ReplyError::Invalidated`] when the caller-side
/// channel is gone. Must be callable from any thread.
pub trait Responder: Send + Sync + 'static {
    fn success(&self, value: Option<Bytes>) -> Result<(), ReplyError>;

    fn error(
        &self,
        code: &str,
        message: Option<&str>,
        details: Option<&str>,
    ) -> Result<(), ReplyError>;

    fn not_implemented(&self) -> Result<(), ReplyError>;
}

/// A terminal reply as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success(Option<Bytes>),
    Error {
        code: String,
        message: Option<String>,
        details: Option<String>,
    },
    NotImplemented,
}

impl Responder for mpsc::UnboundedSender<Reply> {
    fn success(&self, value: Option<Bytes>) -> Result<(), ReplyError> {
        self.send(Reply::Success(value))
            .map_err(|_| ReplyError::Invalidated)
    }

    fn error(
        &self,
        code: &str,
        message: Option<&str>,
        details: Option<&str>,
    ) -> Result<(), ReplyError> {
        self.send(Reply::Error {
            code: code.to_owned(),
            message: message.map(str::to_owned),
            details: details.map(str::to_owned),
        })
        .map_err(|_| ReplyError::Invalidated)
    }

    fn not_implemented(&self) -> Result<(), ReplyError> {
        self.send(Reply::NotImplemented)
            .map_err(|_| ReplyError::Invalidated)
    }
}

/// Handler-facing reply handle for one call.
///
/// Cheap to clone; all clones share the same state. Once the handle is
/// invalidated, either explicitly or because the transport reported
/// [`ReplyError::Invalidated`], every write is a silent no-op.
#[derive(Clone)]
pub struct MethodResult {
    inner: Arc<ResultInner>,
}

struct ResultInner {
    // Dropped before the responder, so the call leaves the in-flight map
    // before the caller observes the channel closing.
    tracked: Mutex<Option<InFlightGuard>>,
    responder: Box<dyn Responder>,
    state: SinkState,
    policy: ReplyPolicy,
}

/// Non-owning reference held by the in-flight map.
#[derive(Clone)]
pub(crate) struct WeakMethodResult(Weak<ResultInner>);

impl WeakMethodResult {
    pub(crate) fn upgrade(&self) -> Option<MethodResult> {
        self.0.upgrade().map(|inner| MethodResult { inner })
    }
}

impl fmt::Debug for WeakMethodResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakMethodResult")
            .field("handles", &self.0.strong_count())
            .finish()
    }
}

impl MethodResult {
    pub fn new(responder: impl Responder, policy: ReplyPolicy) -> Self {
        Self {
            inner: Arc::new(ResultInner {
                tracked: Mutex::new(None),
                responder: Box::new(responder),
                state: SinkState::default(),
                policy,
            }),
        }
    }

    /// A reply handle backed by an unbounded channel.
    ///
    /// Dropping the receiver invalidates the handle on its next write.
    pub fn channel(policy: ReplyPolicy) -> (Self, mpsc::UnboundedReceiver<Reply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, policy), rx)
    }

    pub fn success(&self, value: impl IntoReply) -> Result<(), ReplyError> {
        let value = value.into_reply();
        self.deliver("success", |r| r.success(value))
    }

    pub fn error(
        &self,
        code: &str,
        message: Option<&str>,
        details: Option<&str>,
    ) -> Result<(), ReplyError> {
        self.deliver("error", |r| r.error(code, message, details))
    }

    /// Tell the caller no handler exists for the method.
    pub fn not_implemented(&self) -> Result<(), ReplyError> {
        self.deliver("not_implemented", |r| r.not_implemented())
    }

    /// Mark the caller-side channel as torn down.
    pub fn invalidate(&self) {
        if self.inner.state.invalidate() {
            debug!("reply handle invalidated");
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.state.is_invalidated()
    }

    /// Whether a terminal reply has been attempted on this handle.
    pub fn has_replied(&self) -> bool {
        self.inner.state.is_terminated()
    }

    pub fn policy(&self) -> ReplyPolicy {
        self.inner.policy
    }

    pub(crate) fn downgrade(&self) -> WeakMethodResult {
        WeakMethodResult(Arc::downgrade(&self.inner))
    }

    /// Keep the call tracked until its first terminal reply or until the last
    /// clone of this handle drops, whichever comes first.
    pub(crate) fn attach(&self, guard: InFlightGuard) {
        *self.tracked() = Some(guard);
    }

    fn release(&self) {
        let _untracked = self.tracked().take();
    }

    fn tracked(&self) -> MutexGuard<'_, Option<InFlightGuard>> {
        self.inner
            .tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver<F>(&self, op: &'static str, f: F) -> Result<(), ReplyError>
    where
        F: FnOnce(&dyn Responder) -> Result<(), ReplyError>,
    {
        let state = &self.inner.state;
        if state.is_invalidated() {
            debug!(op, "dropping reply, channel invalidated");
            return Ok(());
        }

        if state.mark_terminated() {
            self.release();
        } else {
            match self.inner.policy {
                ReplyPolicy::FirstWins => {
                    warn!(op, "dropping duplicate terminal reply");
                    return Ok(());
                }
                ReplyPolicy::Permissive => {
                    debug!(op, "forwarding additional terminal reply");
                }
            }
        }

        if ignore_invalidated(|| f(self.inner.responder.as_ref()))?.is_none() {
            state.invalidate();
        }
        Ok(())
    }
}

impl ReplySink for MethodResult {
    fn send_success(&self, value: Option<Bytes>) -> Result<(), ReplyError> {
        self.success(value)
    }

    fn send_error(
        &self,
        code: &str,
        message: Option<&str>,
        details: Option<&str>,
    ) -> Result<(), ReplyError> {
        self.error(code, message, details)
    }
}

impl fmt::Debug for MethodResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodResult")
            .field("policy", &self.inner.policy)
            .field("replied", &self.has_replied())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}
