use thiserror::Error;

/// Errors a transport can report when a reply is written to it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplyError {
    /// The caller-side channel was torn down before the reply was written.
    ///
    /// This is the one benign race of the reply protocol: it is swallowed
    /// wherever a terminal reply is attempted.
    #[error("reply channel invalidated")]
    Invalidated,

    /// Any other transport failure. Never swallowed.
    #[error("reply transport error: {0}")]
    Transport(String),
}

impl ReplyError {
    pub fn is_invalidated(&self) -> bool {
        matches!(self, ReplyError::Invalidated)
    }
}

/// Errors that can occur while building or running a dispatcher.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// The dispatcher was created outside of a tokio runtime.
    #[error("no tokio runtime available to schedule handlers")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// A handler is already registered under this method name.
    #[error("handler already registered for '{0}'")]
    DuplicateHandler(String),
}
