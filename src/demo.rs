//! Handlers exposed by the demo host.

use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use method_dispatch::{
    DispatchError, DispatcherConfig, Failure, MethodCall, MethodDispatcher, MethodResult,
    ReplyError, guard, relay,
};

/// Largest countdown accepted by `countdown`.
pub const MAX_COUNTDOWN: u64 = 100;

/// Delay per countdown step.
const COUNTDOWN_STEP: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ArithmeticError(pub String);

#[derive(Debug, Error)]
#[error("{0}")]
pub struct IllegalArgument(pub String);

/// Build a dispatcher with every demo handler registered.
pub fn demo_dispatcher(config: DispatcherConfig) -> Result<MethodDispatcher, DispatchError> {
    let mut dispatcher = MethodDispatcher::new(config)?;

    dispatcher.register_fn("ping", |_call| Ok::<_, Failure>("pong"))?;
    dispatcher.register_fn("echo", |call| Ok::<_, Failure>(call.arguments().cloned()))?;
    dispatcher.register_fn("platformVersion", |_call| {
        Ok::<_, Failure>(format!("{} {}", std::env::consts::OS, std::env::consts::ARCH))
    })?;
    dispatcher.register_fn("divide", divide)?;
    dispatcher.register_fn("boom", |_call| -> Result<(), Failure> {
        panic!("boom requested")
    })?;
    dispatcher.register_async("sleep", |call, result| async move {
        let ms = single_integer(&call)?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        result.success(format!("slept {ms}ms"))?;
        Ok::<(), Failure>(())
    })?;
    dispatcher.register("countdown", countdown)?;

    Ok(dispatcher)
}

fn divide(call: MethodCall) -> Result<String, Failure> {
    let args = call.arguments_str()?.unwrap_or_default();
    let mut operands = args.split_whitespace();
    let (Some(a), Some(b), None) = (operands.next(), operands.next(), operands.next()) else {
        return Err(IllegalArgument(format!("expected two integers, got '{args}'")).into());
    };

    let a: i64 = a.parse()?;
    let b: i64 = b.parse()?;
    let quotient = a.checked_div(b).ok_or_else(|| {
        let reason = if b == 0 { "div by zero" } else { "overflow" };
        ArithmeticError(reason.into())
    })?;
    Ok(quotient.to_string())
}

/// Replies from sub-work once the countdown has elapsed. The handler itself
/// returns immediately; only argument errors are relayed from here.
fn countdown(call: MethodCall, result: MethodResult) -> Result<(), Failure> {
    guard(&result, || {
        let n = single_integer(&call)?;
        if n > MAX_COUNTDOWN {
            let reason = format!("countdown must be at most {MAX_COUNTDOWN}");
            return Err(IllegalArgument(reason).into());
        }

        let reply = result.clone();
        thread::spawn(move || {
            for remaining in (1..=n).rev() {
                debug!(remaining, "Counting down");
                thread::sleep(COUNTDOWN_STEP);
            }
            if let Err(e) = liftoff(&reply, n) {
                warn!(error = %e, count = n, "Failed to relay countdown reply");
            }
        });
        Ok(())
    })?;
    Ok(())
}

fn liftoff(reply: &MethodResult, n: u64) -> Result<(), ReplyError> {
    relay(reply, || Ok::<_, Failure>(format!("liftoff after {n}")))
}

fn single_integer(call: &MethodCall) -> Result<u64, Failure> {
    let args = call.arguments_str()?.unwrap_or_default().trim();
    if args.is_empty() {
        return Err(IllegalArgument("expected an integer argument".into()).into());
    }
    Ok(args.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use method_dispatch::{Reply, ReplyPolicy, Responder};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn call(method: &str, args: &str) -> MethodCall {
        MethodCall::new(method, Some(Bytes::copy_from_slice(args.as_bytes())))
    }

    async fn dispatch(dispatcher: &MethodDispatcher, call: MethodCall) -> Vec<Reply> {
        let (result, rx) = MethodResult::channel(ReplyPolicy::Permissive);
        dispatcher.on_call(call, result);
        drain(rx).await
    }

    async fn drain(mut rx: UnboundedReceiver<Reply>) -> Vec<Reply> {
        let mut replies = Vec::new();
        while let Ok(Some(reply)) =
            tokio::time::timeout(Duration::from_secs(5), rx.recv()).await
        {
            replies.push(reply);
        }
        replies
    }

    fn error_code(replies: &[Reply]) -> Option<&str> {
        match replies {
            [Reply::Error { code, .. }] => Some(code.as_str()),
            _ => None,
        }
    }

    #[test]
    fn test_divide() {
        assert_eq!(divide(call("divide", "10 3")).unwrap(), "3");

        let err = divide(call("divide", "1 0")).unwrap_err();
        assert!(err.kind().ends_with("ArithmeticError"));
        assert_eq!(err.message(), Some("div by zero"));

        let err = divide(call("divide", "1")).unwrap_err();
        assert!(err.kind().ends_with("IllegalArgument"));

        let err = divide(call("divide", "one two")).unwrap_err();
        assert!(err.kind().ends_with("ParseIntError"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_demo_handlers() {
        let dispatcher = demo_dispatcher(DispatcherConfig::default()).unwrap();

        assert_eq!(
            dispatch(&dispatcher, MethodCall::bare("ping")).await,
            vec![Reply::Success(Some(Bytes::from_static(b"pong")))]
        );
        assert_eq!(
            dispatch(&dispatcher, MethodCall::bare("echo")).await,
            vec![Reply::Success(None)]
        );
        assert_eq!(
            dispatch(&dispatcher, call("sleep", "5")).await,
            vec![Reply::Success(Some(Bytes::from_static(b"slept 5ms")))]
        );
        assert_eq!(
            dispatch(&dispatcher, MethodCall::bare("nope")).await,
            vec![Reply::NotImplemented]
        );
        assert_eq!(
            error_code(&dispatch(&dispatcher, MethodCall::bare("boom")).await),
            Some("panic")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_countdown_replies_from_sub_work() {
        let dispatcher = demo_dispatcher(DispatcherConfig::default()).unwrap();

        assert_eq!(
            dispatch(&dispatcher, call("countdown", "3")).await,
            vec![Reply::Success(Some(Bytes::from_static(b"liftoff after 3")))]
        );

        let replies = dispatch(&dispatcher, call("countdown", "1000")).await;
        assert!(error_code(&replies).is_some_and(|code| code.ends_with("IllegalArgument")));
    }

    /// Transport that rejects every write with a non-benign error.
    struct BrokenTransport;

    impl Responder for BrokenTransport {
        fn success(&self, _value: Option<Bytes>) -> Result<(), ReplyError> {
            Err(ReplyError::Transport("socket reset".into()))
        }

        fn error(&self, _: &str, _: Option<&str>, _: Option<&str>) -> Result<(), ReplyError> {
            Err(ReplyError::Transport("socket reset".into()))
        }

        fn not_implemented(&self) -> Result<(), ReplyError> {
            Err(ReplyError::Transport("socket reset".into()))
        }
    }

    #[test]
    fn test_liftoff_surfaces_transport_errors() {
        let reply = MethodResult::new(BrokenTransport, ReplyPolicy::Permissive);
        assert_eq!(
            liftoff(&reply, 3),
            Err(ReplyError::Transport("socket reset".into()))
        );

        let (reply, _rx) = MethodResult::channel(ReplyPolicy::Permissive);
        reply.invalidate();
        assert_eq!(liftoff(&reply, 3), Ok(()));
    }
}
