//! Run notifications.
//!
//! Delivery happens on a spawned task; a slow or failing notifier never
//! delays or fails a sync run.

use crate::config::Config;
use crate::error::NotifyError;
use crate::runner::{BatchSummary, RunSummary};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const TELEGRAM_API: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Error length in a per-export message.
const RUN_ERROR_CHARS: usize = 200;
/// Error length per export in a batch summary.
const BATCH_ERROR_CHARS: usize = 50;

/// Receives run and batch summaries.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn run_finished(&self, summary: &RunSummary) -> Result<(), NotifyError>;

    async fn batch_finished(&self, summary: &BatchSummary) -> Result<(), NotifyError>;
}

/// Deliver a run summary in the background.
pub fn spawn_run(notifier: Arc<dyn Notifier>, summary: RunSummary) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = notifier.run_finished(&summary).await {
            tracing::warn!(run_id = %summary.run_id, error = %err, "Run notification failed");
        }
    })
}

/// Deliver a batch summary in the background.
pub fn spawn_batch(notifier: Arc<dyn Notifier>, summary: BatchSummary) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = notifier.batch_finished(&summary).await {
            tracing::warn!(error = %err, "Batch notification failed");
        }
    })
}

/// Pick the notifier the configuration asks for.
pub fn from_config(config: &Config) -> Arc<dyn Notifier> {
    match (&config.telegram, config.notifications_enabled) {
        (Some(telegram), true) => Arc::new(TelegramNotifier::new(
            telegram.bot_token.clone(),
            telegram.chat_id.clone(),
        )),
        (None, true) => {
            tracing::warn!("Telegram credentials missing, notifications go to the log");
            Arc::new(LogNotifier)
        }
        (_, false) => Arc::new(LogNotifier),
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn run_finished(&self, summary: &RunSummary) -> Result<(), NotifyError> {
        tracing::info!(
            run_id = %summary.run_id,
            export = %summary.export,
            success = summary.success,
            records = summary.records,
            "{}",
            run_message(summary)
        );
        Ok(())
    }

    async fn batch_finished(&self, summary: &BatchSummary) -> Result<(), NotifyError> {
        tracing::info!(
            succeeded = summary.success_count,
            failed = summary.failure_count,
            "{}",
            batch_message(summary)
        );
        Ok(())
    }
}

/// Posts HTML messages to a Telegram chat.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            bot_token,
            chat_id,
        }
    }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.bot_token);
        let response = self
            .client
            .post(url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
                parse_mode: "HTML",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn run_finished(&self, summary: &RunSummary) -> Result<(), NotifyError> {
        self.send(&run_message(summary)).await
    }

    async fn batch_finished(&self, summary: &BatchSummary) -> Result<(), NotifyError> {
        self.send(&batch_message(summary)).await
    }
}

/// HTML message for one export run.
pub fn run_message(summary: &RunSummary) -> String {
    let export = summary.export.as_str().to_uppercase();
    let secs = summary.elapsed_ms as f64 / 1000.0;
    let mut message = if summary.success {
        format!(
            "✅ <b>{export} sync succeeded</b>\n\
             📊 Records: {} rows ({} new, {} updated, {} unchanged)\n",
            summary.records, summary.new_count, summary.updated_count, summary.unchanged_count
        )
    } else {
        let error = summary.error.as_deref().unwrap_or("unknown error");
        format!(
            "❌ <b>{export} sync failed</b>\n🚨 Error: {}\n\
             🛑 Existing rows preserved, re-run manually\n",
            escape_html(&truncate(error, RUN_ERROR_CHARS))
        )
    };
    message.push_str(&format!("📅 Window: {}\n", summary.window));
    message.push_str(&format!("⏱️ Time: {secs:.2}s\n"));
    message.push_str(&format!(
        "🕒 {}",
        summary.started_at.format("%d/%m/%Y %H:%M:%S UTC")
    ));
    message
}

/// HTML message for a batch.
pub fn batch_message(summary: &BatchSummary) -> String {
    let (emoji, status) = match (summary.success_count, summary.failure_count) {
        (_, 0) => ("🎉", "all exports succeeded"),
        (0, _) => ("❌", "all exports failed"),
        _ => ("⚠️", "partially succeeded"),
    };
    let secs = summary.elapsed_ms as f64 / 1000.0;

    let mut message = format!(
        "{emoji} <b>SYNC SUMMARY</b>\n📈 Status: {status}\n\
         📊 Total records: {}\n⏱️ Total time: {secs:.2}s\n",
        summary.records
    );

    let (succeeded, failed): (Vec<&RunSummary>, Vec<&RunSummary>) =
        summary.results.iter().partition(|r| r.success);
    if !succeeded.is_empty() {
        message.push_str(&format!("\n✅ <b>Succeeded ({}):</b>\n", succeeded.len()));
        for run in succeeded {
            message.push_str(&format!("  • {}: {} rows\n", run.export, run.records));
        }
    }
    if !failed.is_empty() {
        message.push_str(&format!("\n❌ <b>Failed ({}):</b>\n", failed.len()));
        for run in failed {
            let error = run.error.as_deref().unwrap_or("unknown error");
            message.push_str(&format!(
                "  • {}: {}\n",
                run.export,
                escape_html(&truncate(error, BATCH_ERROR_CHARS))
            ));
        }
    }
    message.push_str(&format!("\n📅 Window: {}", summary.window));
    message
}

/// First `max` characters, with an ellipsis when cut.
fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
