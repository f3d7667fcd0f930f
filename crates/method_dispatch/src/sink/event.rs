use async_stream::stream;
use bytes::Bytes;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ReplyError;
use crate::relay::IntoReply;
use crate::sink::{ReplySink, SinkState, ignore_invalidated};

/// Transport side of an event stream.
///
/// Accepts any number of `success` events followed by one terminal `error` or
/// `end_of_stream`.
pub trait EventEmitter: Send + Sync + 'static {
    fn success(&self, event: Option<Bytes>) -> Result<(), ReplyError>;

    fn error(
        &self,
        code: &str,
        message: Option<&str>,
        details: Option<&str>,
    ) -> Result<(), ReplyError>;

    fn end_of_stream(&self) -> Result<(), ReplyError>;
}

/// One event as seen by the subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(Option<Bytes>),
    Error {
        code: String,
        message: Option<String>,
        details: Option<String>,
    },
    EndOfStream,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Data(_))
    }
}

impl EventEmitter for mpsc::UnboundedSender<StreamEvent> {
    fn success(&self, event: Option<Bytes>) -> Result<(), ReplyError> {
        self.send(StreamEvent::Data(event))
            .map_err(|_| ReplyError::Invalidated)
    }

    fn error(
        &self,
        code: &str,
        message: Option<&str>,
        details: Option<&str>,
    ) -> Result<(), ReplyError> {
        self.send(StreamEvent::Error {
            code: code.to_owned(),
            message: message.map(str::to_owned),
            details: details.map(str::to_owned),
        })
        .map_err(|_| ReplyError::Invalidated)
    }

    fn end_of_stream(&self) -> Result<(), ReplyError> {
        self.send(StreamEvent::EndOfStream)
            .map_err(|_| ReplyError::Invalidated)
    }
}

/// Subscriber side of [`EventSink::channel`]. Ends after the terminal event.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Handler-facing handle for pushing events to a subscriber.
///
/// Writes after the terminal event, or after the subscriber went away, are
/// dropped.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<EventInner>,
}

struct EventInner {
    emitter: Box<dyn EventEmitter>,
    state: SinkState,
}

impl EventSink {
    pub fn new(emitter: impl EventEmitter) -> Self {
        Self {
            inner: Arc::new(EventInner {
                emitter: Box::new(emitter),
                state: SinkState::default(),
            }),
        }
    }

    /// An event sink paired with the stream its events arrive on.
    ///
    /// Dropping the stream invalidates the sink on its next write.
    pub fn channel() -> (Self, EventStream) {
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
        let events = stream! {
            while let Some(event) = rx.recv().await {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }
        };
        (Self::new(tx), Box::pin(events))
    }

    pub fn success(&self, event: impl IntoReply) -> Result<(), ReplyError> {
        if self.is_closed("success") {
            return Ok(());
        }
        let event = event.into_reply();
        self.emit(|e| e.success(event))
    }

    pub fn error(
        &self,
        code: &str,
        message: Option<&str>,
        details: Option<&str>,
    ) -> Result<(), ReplyError> {
        if self.is_closed("error") || !self.inner.state.mark_terminated() {
            return Ok(());
        }
        self.emit(|e| e.error(code, message, details))
    }

    pub fn end_of_stream(&self) -> Result<(), ReplyError> {
        if self.is_closed("end_of_stream") || !self.inner.state.mark_terminated() {
            return Ok(());
        }
        self.emit(|e| e.end_of_stream())
    }

    pub fn invalidate(&self) {
        if self.inner.state.invalidate() {
            debug!("event sink invalidated");
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.state.is_invalidated()
    }

    /// Whether the terminal event has been sent.
    pub fn is_terminated(&self) -> bool {
        self.inner.state.is_terminated()
    }

    fn is_closed(&self, op: &'static str) -> bool {
        let state = &self.inner.state;
        if state.is_invalidated() {
            debug!(op, "dropping event, subscriber gone");
            true
        } else if state.is_terminated() {
            debug!(op, "dropping event after end of stream");
            true
        } else {
            false
        }
    }

    fn emit<F>(&self, f: F) -> Result<(), ReplyError>
    where
        F: FnOnce(&dyn EventEmitter) -> Result<(), ReplyError>,
    {
        if ignore_invalidated(|| f(self.inner.emitter.as_ref()))?.is_none() {
            self.inner.state.invalidate();
        }
        Ok(())
    }
}

impl ReplySink for EventSink {
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

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("terminated", &self.is_terminated())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}
