use anyhow::Result;
use method_call_dispatcher::demo::demo_dispatcher;
use method_call_dispatcher::host::LineHost;
use method_call_dispatcher::{FIRST_WINS_ENV, LOG_ENV, NAME_ENV, env_flag};
use method_dispatch::{DispatcherConfig, ReplyPolicy};
use std::sync::Arc;
use tokio::io::{BufReader, stdin, stdout};
use tracing::{Level, info};

#[tokio::main]
async fn main() -> Result<()> {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let name = std::env::var(NAME_ENV).unwrap_or_else(|_| "demo".to_string());
    let reply_policy = match std::env::var(FIRST_WINS_ENV) {
        Ok(value) if env_flag(&value) => ReplyPolicy::FirstWins,
        _ => ReplyPolicy::Permissive,
    };

    let config = DispatcherConfig::builder()
        .name(name)
        .reply_policy(reply_policy)
        .build();
    let dispatcher = demo_dispatcher(config)?;

    let mut methods: Vec<_> = dispatcher.methods().map(str::to_owned).collect();
    methods.sort();
    info!(methods = ?methods, "Dispatcher ready, reading calls from stdin");

    let host = LineHost::new(Arc::new(dispatcher));
    let stats = host.run(BufReader::new(stdin()), stdout()).await?;

    info!(
        requests = stats.requests,
        rejected = stats.rejected,
        replies = stats.replies,
        "Input exhausted"
    );
    Ok(())
}
