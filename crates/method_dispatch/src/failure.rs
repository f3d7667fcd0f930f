//! Failure capture and serialization.
//!
//! Handlers fail with a [`Failure`]. Any `std::error::Error` converts into one
//! with `?`, and panics caught at the dispatch boundary become failures of kind
//! [`PANIC_KIND`]. Before a failure crosses the bridge it is flattened into a
//! [`FailureRecord`].

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::{self, Write as _};

use crate::error::ReplyError;

/// Kind recorded for a panic raised inside a handler.
pub const PANIC_KIND: &str = "panic";

/// Kind recorded for a failure created with [`Failure::context`].
pub const CONTEXT_KIND: &str = "context";

/// A failure raised by a handler.
///
/// The kind is a stable, non-localized category. For failures converted from a
/// concrete error type it is that type's path, e.g. `my_app::ArithmeticError`.
#[derive(Debug)]
pub struct Failure {
    kind: Cow<'static, str>,
    message: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    cause: Option<Box<Failure>>,
    backtrace: Backtrace,
}

impl Failure {
    pub fn new(kind: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: Some(message.into()),
            source: None,
            cause: None,
            backtrace: Backtrace::capture(),
        }
    }

    /// A failure that carries a kind but no message.
    pub fn bare(kind: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind: kind.into(),
            message: None,
            source: None,
            cause: None,
            backtrace: Backtrace::capture(),
        }
    }

    /// Build a failure from a payload returned by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            Some((*s).to_string())
        } else {
            payload.downcast_ref::<String>().cloned()
        };

        Self {
            kind: Cow::Borrowed(PANIC_KIND),
            message,
            source: None,
            cause: None,
            backtrace: Backtrace::capture(),
        }
    }

    /// Wrap this failure under a new one carrying `message`.
    ///
    /// The wrapped failure becomes the cause, which is what gets reported.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::new(CONTEXT_KIND, message).caused_by(self)
    }

    /// Attach an underlying cause.
    pub fn caused_by(mut self, cause: impl Into<Failure>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&Failure> {
        self.cause.as_deref()
    }

    /// The concrete error this failure was converted from, if any.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Whether this failure is the benign "reply after teardown" race.
    pub fn is_reply_invalidated(&self) -> bool {
        self.source
            .as_deref()
            .and_then(|e| e.downcast_ref::<ReplyError>())
            .is_some_and(ReplyError::is_invalidated)
    }
}

impl<E> From<E> for Failure
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self {
            kind: Cow::Borrowed(std::any::type_name::<E>()),
            message: Some(err.to_string()),
            source: Some(Box::new(err)),
            cause: None,
            backtrace: Backtrace::capture(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => f.write_str(&self.kind),
        }
    }
}

/// Adds [`Failure::context`] to any result whose error converts into a failure.
pub trait ResultExt<T> {
    fn context(self, message: impl Into<String>) -> Result<T, Failure>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<Failure>,
{
    fn context(self, message: impl Into<String>) -> Result<T, Failure> {
        self.map_err(|e| e.into().context(message))
    }
}

/// A failure flattened for transport across the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub kind: String,
    pub message: Option<String>,
    pub trace: String,
}

impl FailureRecord {
    /// Record `failure`, unwrapping one level of cause if present.
    pub fn capture(failure: &Failure) -> Self {
        let root = failure.cause().unwrap_or(failure);
        Self {
            kind: root.kind().to_string(),
            message: root.message().map(str::to_owned),
            trace: serialize(root),
        }
    }
}

/// Render the full failure: kind and message, the `source()` chain of the
/// underlying error, the backtrace when one was captured, then every nested
/// cause.
pub fn serialize(failure: &Failure) -> String {
    let mut out = String::new();
    write_failure(&mut out, failure, false);
    out
}

fn write_failure(out: &mut String, failure: &Failure, nested: bool) {
    if nested {
        out.push_str("Caused by: ");
    }
    let _ = writeln!(out, "{failure}");

    let mut source = failure.source.as_deref().and_then(|e| e.source());
    while let Some(err) = source {
        let _ = writeln!(out, "\tsource: {err}");
        source = err.source();
    }

    if failure.backtrace.status() == BacktraceStatus::Captured {
        for line in failure.backtrace.to_string().lines() {
            let _ = writeln!(out, "\t{line}");
        }
    }

    if let Some(cause) = &failure.cause {
        write_failure(out, cause, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("div by zero")]
    struct ArithmeticError;

    #[derive(Debug, Error)]
    #[error("config unreadable")]
    struct ConfigError {
        #[source]
        io: std::io::Error,
    }

    #[test]
    fn test_kind_from_error_type() {
        let failure = Failure::from(ArithmeticError);
        assert!(failure.kind().ends_with("ArithmeticError"));
        assert_eq!(failure.message(), Some("div by zero"));
        assert!(failure.cause().is_none());
    }

    #[test]
    fn test_question_mark_conversion() {
        fn parse(s: &str) -> Result<i64, Failure> {
            Ok(s.parse::<i64>()?)
        }

        let failure = parse("nope").unwrap_err();
        assert!(failure.kind().ends_with("ParseIntError"));
    }

    #[test]
    fn test_record_unwraps_one_cause() {
        let failure = Failure::from(ArithmeticError).context("while dividing");
        assert_eq!(failure.kind(), CONTEXT_KIND);

        let record = FailureRecord::capture(&failure);
        assert!(record.kind.ends_with("ArithmeticError"));
        assert_eq!(record.message.as_deref(), Some("div by zero"));
        assert!(record.trace.starts_with(&record.kind));
    }

    #[test]
    fn test_record_unwraps_only_one_level() {
        let inner = Failure::new("Inner", "deepest");
        let middle = Failure::new("Middle", "middle").caused_by(inner);
        let outer = Failure::new("Outer", "outer").caused_by(middle);

        let record = FailureRecord::capture(&outer);
        assert_eq!(record.kind, "Middle");
        assert_eq!(record.message.as_deref(), Some("middle"));
        assert!(record.trace.contains("Caused by: Inner: deepest"));
    }

    #[test]
    fn test_record_without_cause() {
        let record = FailureRecord::capture(&Failure::bare("Timeout"));
        assert_eq!(record.kind, "Timeout");
        assert_eq!(record.message, None);
        assert!(!record.trace.is_empty());
    }

    #[test]
    fn test_panic_payloads() {
        let failure = Failure::from_panic(Box::new("static message"));
        assert_eq!(failure.kind(), PANIC_KIND);
        assert_eq!(failure.message(), Some("static message"));

        let failure = Failure::from_panic(Box::new(String::from("owned message")));
        assert_eq!(failure.message(), Some("owned message"));

        let failure = Failure::from_panic(Box::new(42_u32));
        assert_eq!(failure.message(), None);
    }

    #[test]
    fn test_serialize_includes_source_chain() {
        let err = ConfigError {
            io: std::io::Error::new(std::io::ErrorKind::NotFound, "missing file"),
        };
        let trace = serialize(&Failure::from(err));

        let mut lines = trace.lines();
        let header = lines.next().unwrap();
        assert!(header.ends_with("ConfigError: config unreadable"));
        assert_eq!(lines.next(), Some("\tsource: missing file"));
    }

    #[test]
    fn test_reply_invalidated_detection() {
        assert!(Failure::from(ReplyError::Invalidated).is_reply_invalidated());
        assert!(!Failure::from(ReplyError::Transport("eof".into())).is_reply_invalidated());
        assert!(!Failure::new("Other", "x").is_reply_invalidated());
    }

    #[test]
    fn test_result_ext_context() {
        let result: Result<(), ArithmeticError> = Err(ArithmeticError);
        let failure = result.context("computing ratio").unwrap_err();
        assert_eq!(failure.message(), Some("computing ratio"));
        assert!(failure.cause().unwrap().kind().ends_with("ArithmeticError"));
    }
}
