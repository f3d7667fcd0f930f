use bytes::Bytes;
use std::fmt;

/// One inbound remote invocation: a method name and an opaque argument payload.
///
/// Created by the transport and passed to the resolved handler untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    method: String,
    arguments: Option<Bytes>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Option<Bytes>) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// A call without arguments.
    pub fn bare(method: impl Into<String>) -> Self {
        Self::new(method, None)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The raw argument payload, `None` when the caller sent null.
    pub fn arguments(&self) -> Option<&Bytes> {
        self.arguments.as_ref()
    }

    /// Arguments as UTF-8 text.
    pub fn arguments_str(&self) -> Result<Option<&str>, std::str::Utf8Error> {
        self.arguments
            .as_deref()
            .map(std::str::from_utf8)
            .transpose()
    }

    pub fn into_parts(self) -> (String, Option<Bytes>) {
        (self.method, self.arguments)
    }
}

impl fmt::Display for MethodCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arguments {
            Some(args) => write!(f, "{}({} bytes)", self.method, args.len()),
            None => write!(f, "{}(null)", self.method),
        }
    }
}
