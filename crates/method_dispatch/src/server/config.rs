/// How a [`MethodResult`](crate::MethodResult) treats a second terminal reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplyPolicy {
    /// Forward every terminal reply to the transport. A handler that calls both
    /// `success` and `error` produces two writes.
    #[default]
    Permissive,

    /// Only the first terminal reply reaches the transport. Later ones are
    /// dropped with a warning.
    FirstWins,
}

/// Configuration for the method dispatcher.
#[derive(Debug, Clone, bon::Builder)]
pub struct DispatcherConfig {
    /// Label attached to the dispatcher's tracing span.
    #[builder(into, default = String::from("method_call_dispatcher"))]
    pub name: String,

    /// Policy applied to reply handles created by this dispatcher's owner.
    #[builder(default)]
    pub reply_policy: ReplyPolicy,

    /// Include the raw argument payload in per-call debug events.
    #[builder(default = true)]
    pub log_arguments: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
