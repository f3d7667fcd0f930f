//! Line-oriented host transport.
//!
//! Each input line is `<id> <method> [arguments...]`. Replies are written as
//! one line per reply, tagged with the request id, in completion order:
//!
//! ```text
//! 1 ok pong
//! 2 ok null
//! 3 err my_app::ArithmeticError div by zero
//! 4 not_implemented
//! ```

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use method_dispatch::{
    MethodCall, MethodCallHandler, MethodResult, Reply, ReplyError, Responder,
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LineError {
    #[error("missing request id")]
    MissingId,

    #[error("missing method name for request '{0}'")]
    MissingMethod(String),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostError {
    #[error("host I/O error")]
    Io(#[from] std::io::Error),
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: String,
    pub call: MethodCall,
}

/// Parse `<id> <method> [arguments...]`. Everything after the method name,
/// trimmed, is the argument payload.
pub fn parse_line(line: &str) -> Result<Request, LineError> {
    let line = line.trim();
    let (id, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    if id.is_empty() {
        return Err(LineError::MissingId);
    }

    let rest = rest.trim_start();
    let (method, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    if method.is_empty() {
        return Err(LineError::MissingMethod(id.to_owned()));
    }

    let args = args.trim();
    let arguments = (!args.is_empty()).then(|| Bytes::copy_from_slice(args.as_bytes()));

    Ok(Request {
        id: id.to_owned(),
        call: MethodCall::new(method, arguments),
    })
}

/// Render a reply as an output line.
pub fn format_reply(id: &str, reply: &Reply) -> String {
    match reply {
        Reply::Success(None) => format!("{id} ok null"),
        Reply::Success(Some(value)) => format!("{id} ok {}", String::from_utf8_lossy(value)),
        Reply::Error { code, message, .. } => match message {
            Some(message) => format!("{id} err {code} {message}"),
            None => format!("{id} err {code}"),
        },
        Reply::NotImplemented => format!("{id} not_implemented"),
    }
}

/// Forwards replies for one request, tagged with its id.
struct TaggedResponder {
    id: String,
    tx: mpsc::UnboundedSender<(String, Reply)>,
}

impl TaggedResponder {
    fn send(&self, reply: Reply) -> Result<(), ReplyError> {
        self.tx
            .send((self.id.clone(), reply))
            .map_err(|_| ReplyError::Invalidated)
    }
}

impl Responder for TaggedResponder {
    fn success(&self, value: Option<Bytes>) -> Result<(), ReplyError> {
        self.send(Reply::Success(value))
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
    }

    fn not_implemented(&self) -> Result<(), ReplyError> {
        self.send(Reply::NotImplemented)
    }
}

/// Counters reported when the input is exhausted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HostStats {
    pub requests: usize,
    pub rejected: usize,
    pub replies: usize,
}

/// Feeds lines from a reader into a method call handler and writes replies.
///
/// Reply handles use the handler's own reply policy.
pub struct LineHost {
    handler: Arc<dyn MethodCallHandler>,
}

impl LineHost {
    pub fn new(handler: Arc<dyn MethodCallHandler>) -> Self {
        Self { handler }
    }

    /// Run until `reader` reaches EOF and every outstanding call has finished.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<HostStats, HostError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Reply)>();
        let mut tx = Some(tx);
        let mut lines = reader.lines();
        let mut stats = HostStats::default();

        loop {
            tokio::select! {
                line = lines.next_line(), if tx.is_some() => {
                    let Some(line) = line? else {
                        info!(
                            requests = stats.requests,
                            "Input closed, waiting for outstanding replies"
                        );
                        // Dropping our sender lets the reply channel close once
                        // the last call releases its handle.
                        tx = None;
                        continue;
                    };
                    if line.trim().is_empty() || line.starts_with('#') {
                        continue;
                    }

                    match parse_line(&line) {
                        Ok(request) => {
                            stats.requests += 1;
                            if let Some(tx) = &tx {
                                self.dispatch(request, tx.clone());
                            }
                        }
                        Err(e) => {
                            stats.rejected += 1;
                            warn!(error = %e, line = %line, "Rejected input line");
                            writer.write_all(format!("error {e}\n").as_bytes()).await?;
                        }
                    }
                }

                Some((id, reply)) = rx.recv() => {
                    stats.replies += 1;
                    if let Reply::Error { details: Some(trace), .. } = &reply {
                        debug!(id = %id, trace = %trace, "Call failed");
                    }
                    let mut out = format_reply(&id, &reply);
                    out.push('\n');
                    writer.write_all(out.as_bytes()).await?;
                }

                else => break,
            }
        }

        writer.flush().await?;
        Ok(stats)
    }

    fn dispatch(&self, request: Request, tx: mpsc::UnboundedSender<(String, Reply)>) {
        let responder = TaggedResponder {
            id: request.id,
            tx,
        };
        let result = MethodResult::new(responder, self.handler.reply_policy());
        self.handler.on_method_call(request.call, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_with_arguments() {
        let request = parse_line("7 divide 10 2").unwrap();
        assert_eq!(request.id, "7");
        assert_eq!(request.call.method(), "divide");
        assert_eq!(request.call.arguments_str().unwrap(), Some("10 2"));
    }

    #[test]
    fn test_parse_line_without_arguments() {
        let request = parse_line("  a1   ping  ").unwrap();
        assert_eq!(request.id, "a1");
        assert_eq!(request.call, MethodCall::bare("ping"));
    }

    #[test]
    fn test_parse_line_missing_method() {
        assert!(matches!(
            parse_line("42"),
            Err(LineError::MissingMethod(id)) if id == "42"
        ));
        assert!(matches!(parse_line("   "), Err(LineError::MissingId)));
    }

    #[test]
    fn test_format_reply() {
        assert_eq!(format_reply("1", &Reply::Success(None)), "1 ok null");
        assert_eq!(
            format_reply("2", &Reply::Success(Some(Bytes::from_static(b"pong")))),
            "2 ok pong"
        );
        assert_eq!(
            format_reply(
                "3",
                &Reply::Error {
                    code: "Io".into(),
                    message: Some("disk full".into()),
                    details: Some("trace".into()),
                }
            ),
            "3 err Io disk full"
        );
        assert_eq!(format_reply("4", &Reply::NotImplemented), "4 not_implemented");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_applies_the_dispatcher_reply_policy() {
        use method_dispatch::{DispatcherConfig, MethodDispatcher, ReplyPolicy};

        let config = DispatcherConfig::builder()
            .reply_policy(ReplyPolicy::FirstWins)
            .build();
        let mut dispatcher = MethodDispatcher::new(config).unwrap();
        dispatcher
            .register("twice", |_call, result| {
                result.success("first")?;
                result.success("second")?;
                Ok(())
            })
            .unwrap();
        let host = LineHost::new(Arc::new(dispatcher));

        let mut output = Vec::new();
        let stats = host.run(&b"1 twice\n"[..], &mut output).await.unwrap();

        assert_eq!(stats.replies, 1);
        assert_eq!(String::from_utf8(output).unwrap(), "1 ok first\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_waits_for_outstanding_replies() {
        use crate::demo::demo_dispatcher;
        use method_dispatch::DispatcherConfig;

        let dispatcher = demo_dispatcher(DispatcherConfig::default()).unwrap();
        let host = LineHost::new(Arc::new(dispatcher));

        let input = b"# comment\n1 sleep 20\n2 ping\n\n3 divide 1 0\n4 nope\n5\n";
        let mut output = Vec::new();
        let stats = host.run(&input[..], &mut output).await.unwrap();

        assert_eq!(
            stats,
            HostStats {
                requests: 4,
                rejected: 1,
                replies: 4,
            }
        );

        let output = String::from_utf8(output).unwrap();
        let mut lines: Vec<_> = output.lines().collect();
        lines.sort();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "1 ok slept 20ms");
        assert_eq!(lines[1], "2 ok pong");
        assert!(lines[2].starts_with("3 err "));
        assert!(lines[2].ends_with("ArithmeticError div by zero"));
        assert_eq!(lines[3], "4 not_implemented");
        assert_eq!(lines[4], "error missing method name for request '5'");
    }
}
