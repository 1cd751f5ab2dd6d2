//! `hubsync run`: drive the dispatcher from a JSON-lines message feed.
//!
//! Each input line is a queued message, `{"queue": "...", "message": {...}}`.
//! Messages are dispatched with bounded concurrency. Transient failures are
//! redelivered after a backoff, derived messages produced by syncs are fed
//! back into the same loop, and messages that run out of attempts are
//! collected as dead letters.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use console::{Term, style};
use hubsync::dispatch::{DispatchOutcome, Dispatcher, QueuedMessage};
use hubsync::retry::{RetryConfig, redelivery_delay};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::commands::shared::build_engine;
use crate::config::Config;
use crate::shutdown;

/// Options for the dispatch loop.
#[derive(Debug, Clone)]
pub(crate) struct RunOptions {
    /// Messages dispatched at once.
    pub concurrency: usize,
    /// Backoff schedule for redeliveries.
    pub retry: RetryConfig,
}

/// A message that exhausted its delivery attempts.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct DeadLetter {
    #[serde(flatten)]
    pub message: QueuedMessage,
    pub reason: String,
}

/// Tally of a run.
#[derive(Debug, Default)]
pub(crate) struct RunReport {
    pub acked: usize,
    pub duplicates: usize,
    pub redeliveries: usize,
    pub rejected: usize,
    pub malformed: usize,
    /// Messages dropped because shutdown was requested before they settled.
    pub abandoned: usize,
    pub dead_letters: Vec<DeadLetter>,
}

/// Handle the `run` command.
pub(crate) async fn handle_run(
    input: Option<PathBuf>,
    dead_letter_path: Option<PathBuf>,
    concurrency: Option<usize>,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(config, database_url).await?;
    let options = RunOptions {
        concurrency: concurrency.unwrap_or(config.run.concurrency),
        retry: config.engine.client.retry(),
    };

    let report = match &input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            run_loop(engine.dispatcher, engine.fan_out, BufReader::new(file), &options).await
        }
        None => {
            let stdin = BufReader::new(tokio::io::stdin());
            run_loop(engine.dispatcher, engine.fan_out, stdin, &options).await
        }
    };

    if let Some(path) = &dead_letter_path {
        write_dead_letters(path, &report.dead_letters).await?;
    }
    print_report(&report, engine.store.len());
    Ok(())
}

/// Dispatch every message from `input` and from `fan_out` until both are
/// exhausted and nothing is in flight or awaiting redelivery.
pub(crate) async fn run_loop<R>(
    dispatcher: Dispatcher,
    mut fan_out: mpsc::Receiver<QueuedMessage>,
    input: R,
    options: &RunOptions,
) -> RunReport
where
    R: AsyncBufRead + Unpin,
{
    let limit = options.concurrency.max(1);
    let mut lines = input.lines();
    let mut input_open = true;
    let mut draining = false;
    let mut backlog: VecDeque<QueuedMessage> = VecDeque::new();
    let mut in_flight: JoinSet<(QueuedMessage, DispatchOutcome)> = JoinSet::new();
    let mut delayed: JoinSet<QueuedMessage> = JoinSet::new();
    let mut report = RunReport::default();

    loop {
        while in_flight.len() < limit
            && let Some(message) = backlog.pop_front()
        {
            let dispatcher = dispatcher.clone();
            in_flight.spawn(async move {
                let outcome = dispatcher.dispatch(&message).await;
                (message, outcome)
            });
        }

        if !input_open && backlog.is_empty() && in_flight.is_empty() && delayed.is_empty() {
            // Nothing is running, so nothing can enqueue further derived messages.
            match fan_out.try_recv() {
                Ok(message) if !draining => {
                    backlog.push_back(message);
                    continue;
                }
                _ => break,
            }
        }

        tokio::select! {
            line = lines.next_line(), if input_open && backlog.len() < limit => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<QueuedMessage>(&line) {
                        Ok(message) => backlog.push_back(message),
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping malformed input line");
                            report.malformed += 1;
                        }
                    }
                }
                Ok(None) => input_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "Input read failed, no further messages will be read");
                    input_open = false;
                }
            },
            Some(message) = fan_out.recv(), if !draining => backlog.push_back(message),
            Some(joined) = in_flight.join_next() => match joined {
                Ok((message, outcome)) => {
                    settle(message, outcome, draining, options, &mut delayed, &mut report);
                }
                Err(e) => tracing::error!(error = %e, "Dispatch task failed"),
            },
            Some(joined) = delayed.join_next() => {
                if let Ok(message) = joined {
                    backlog.push_back(message);
                }
            },
            () = shutdown::shutdown_requested(), if !draining => {
                draining = true;
                input_open = false;
                report.abandoned += backlog.len() + delayed.len();
                backlog.clear();
                delayed.shutdown().await;
                fan_out.close();
                while fan_out.try_recv().is_ok() {
                    report.abandoned += 1;
                }
            },
            else => break,
        }
    }

    report
}

fn settle(
    message: QueuedMessage,
    outcome: DispatchOutcome,
    draining: bool,
    options: &RunOptions,
    delayed: &mut JoinSet<QueuedMessage>,
    report: &mut RunReport,
) {
    match outcome {
        DispatchOutcome::Acked => report.acked += 1,
        DispatchOutcome::Duplicate => report.duplicates += 1,
        DispatchOutcome::Retry { reason } if draining => {
            tracing::warn!(queue = %message.queue, reason = %reason, "Dropping retry during shutdown");
            report.abandoned += 1;
        }
        DispatchOutcome::Retry { reason } => {
            let next = message.redelivery();
            let delay = redelivery_delay(&options.retry, next.attempt);
            tracing::debug!(
                queue = %next.queue,
                attempt = next.attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Scheduling redelivery"
            );
            report.redeliveries += 1;
            delayed.spawn(async move {
                tokio::time::sleep(delay).await;
                next
            });
        }
        DispatchOutcome::DeadLetter { reason } => {
            report.dead_letters.push(DeadLetter { message, reason });
        }
        DispatchOutcome::Rejected { .. } => report.rejected += 1,
    }
}

async fn write_dead_letters(path: &Path, dead_letters: &[DeadLetter]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    for letter in dead_letters {
        let mut line = serde_json::to_vec(letter)?;
        line.push(b'\n');
        file.write_all(&line).await?;
    }
    file.flush().await
}

fn print_report(report: &RunReport, mirrored: usize) {
    let is_tty = Term::stdout().is_term();
    if is_tty {
        println!(
            "{} {} acked, {} duplicate, {} redelivered, {} rejected, {} malformed",
            style("✓").green(),
            report.acked,
            report.duplicates,
            report.redeliveries,
            report.rejected,
            report.malformed,
        );
        println!("  {mirrored} entities mirrored this run");
        if !report.dead_letters.is_empty() {
            println!(
                "{} {} dead-lettered",
                style("⚠").yellow(),
                report.dead_letters.len()
            );
        }
        if report.abandoned > 0 {
            println!(
                "{} {} abandoned at shutdown",
                style("⚠").yellow(),
                report.abandoned
            );
        }
    } else {
        tracing::info!(
            acked = report.acked,
            duplicates = report.duplicates,
            redeliveries = report.redeliveries,
            rejected = report.rejected,
            malformed = report.malformed,
            dead_lettered = report.dead_letters.len(),
            abandoned = report.abandoned,
            mirrored,
            "Run finished"
        );
    }

    for letter in &report.dead_letters {
        tracing::warn!(
            queue = %letter.message.queue,
            attempt = letter.message.attempt,
            reason = %letter.reason,
            "Dead letter"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use hubsync::config::EngineConfig;
    use hubsync::http::{HttpError, HttpRequest, HttpResponse, HttpTransport};
    use hubsync::{
        AccessToken, ActorRegistry, ChannelSink, GitHubClient, MemoryCacheStore,
        MemoryCredentials, MemoryEntityStore, RateLimitRegistry, SyncContext, UserId,
    };
    use serde_json::json;

    use super::*;

    /// Transport whose every request fails as if the network were down.
    struct Unreachable;

    #[async_trait]
    impl HttpTransport for Unreachable {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, HttpError> {
            Err(HttpError::Transport("connection refused".to_string()))
        }
    }

    fn wire(max_attempts: u32) -> (Dispatcher, mpsc::Receiver<QueuedMessage>, Arc<RateLimitRegistry>) {
        let mut config = EngineConfig::default();
        config.client.max_retries = 0;
        config.dispatch.max_delivery_attempts = max_attempts;

        let budgets = Arc::new(RateLimitRegistry::new());
        let client = GitHubClient::new(Arc::new(Unreachable), Arc::clone(&budgets), &config.client);
        let (sink, fan_out) = ChannelSink::new(16);
        let context = SyncContext::new(
            client,
            Arc::new(MemoryCacheStore::new()),
            Arc::new(MemoryEntityStore::new()),
            Arc::new(MemoryCredentials::from_pairs([(
                UserId(1),
                AccessToken::new("ghp_cli_token"),
            )])),
            &config,
        )
        .with_sink(Arc::new(sink));

        let dispatcher = Dispatcher::new(ActorRegistry::new(context), &config.dispatch);
        (dispatcher, fan_out, budgets)
    }

    fn options() -> RunOptions {
        RunOptions {
            concurrency: 4,
            retry: RetryConfig::new(Duration::from_millis(100), Duration::from_secs(1), 0)
                .with_jitter(false),
        }
    }

    fn lines(messages: &[serde_json::Value]) -> String {
        messages
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn test_run_loop_tallies_outcomes() {
        let (dispatcher, fan_out, budgets) = wire(3);
        let reset = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let webhook = json!({
            "queue": "update-issue",
            "message": {
                "WebhookMetadata": {"HookId": 1, "DeliveryId": "D1", "Event": "issues"},
                "Value": {"RepositoryId": 42, "Number": 7, "Action": "edited", "Payload": {"id": 70, "number": 7}}
            }
        });
        let input = format!(
            "{}\nnot json\n\n",
            lines(&[
                json!({
                    "queue": "update-rate-limit",
                    "message": {"Value": {
                        "AccessToken": "ghp_cli_token",
                        "RateLimit": 5000,
                        "RateLimitRemaining": 4000,
                        "RateLimitReset": reset
                    }}
                }),
                json!({"queue": "update-gist", "message": {"Value": {"Id": 1}}}),
                webhook,
            ])
        );

        let report = run_loop(dispatcher, fan_out, input.as_bytes(), &options()).await;

        assert_eq!(report.acked, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.malformed, 1);
        assert!(report.dead_letters.is_empty());
        let budget = budgets
            .get(&AccessToken::new("ghp_cli_token"))
            .expect("relayed budget learned");
        assert_eq!(budget.remaining, 4000);
    }

    #[tokio::test]
    async fn test_run_loop_acknowledges_redelivered_webhook_as_duplicate() {
        let (dispatcher, fan_out, _) = wire(3);
        let webhook = json!({
            "queue": "update-issue",
            "message": {
                "WebhookMetadata": {"HookId": 1, "DeliveryId": "D9", "Event": "issues"},
                "Value": {"RepositoryId": 42, "Number": 7, "Payload": {"id": 70, "number": 7}}
            }
        });
        let input = lines(&[webhook.clone(), webhook]);

        let options = RunOptions {
            concurrency: 1,
            ..options()
        };
        let report = run_loop(dispatcher, fan_out, input.as_bytes(), &options).await;

        assert_eq!(report.acked, 1);
        assert_eq!(report.duplicates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_redelivers_then_dead_letters() {
        let (dispatcher, fan_out, _) = wire(2);
        let input = lines(&[json!({"queue": "update-account", "message": {"Value": {"Id": 9}}})]);

        let report = run_loop(dispatcher, fan_out, input.as_bytes(), &options()).await;

        assert_eq!(report.redeliveries, 1);
        assert_eq!(report.dead_letters.len(), 1);
        let letter = &report.dead_letters[0];
        assert_eq!(letter.message.queue, "update-account");
        assert_eq!(letter.message.attempt, 2);

        let encoded = serde_json::to_value(letter).unwrap();
        assert_eq!(encoded["queue"], "update-account");
        assert_eq!(encoded["attempt"], 2);
        assert!(encoded["reason"].as_str().unwrap().contains("connection refused"));
    }
}
