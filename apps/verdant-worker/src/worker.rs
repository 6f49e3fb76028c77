use std::time::Duration as StdDuration;

use color_eyre::Result;
use time::{Duration, OffsetDateTime};
use tokio::time as tokio_time;

use verdant_config::Config;
use verdant_domain::signal::FeedbackEvent;
use verdant_service::{Stores, feedback::process_event};
use verdant_storage::{models::FeedbackOutboxEntry, stores::FeedbackQueue};

const MAX_OUTBOX_ERROR_CHARS: usize = 1_024;

/// Polls the feedback outbox until shutdown. Every failure inside one pass is
/// logged and discarded; feedback processing is best-effort and must never
/// surface to the submission path that queued it.
pub async fn run_worker(cfg: Config, stores: Stores) -> Result<()> {
	tracing::info!(
		poll_interval_ms = cfg.feedback.poll_interval_ms,
		"Feedback worker started."
	);

	loop {
		if let Err(err) = process_feedback_outbox_once(&cfg, &stores).await {
			tracing::error!(error = %err, "Feedback outbox processing failed.");
		}

		tokio_time::sleep(StdDuration::from_millis(cfg.feedback.poll_interval_ms)).await;
	}
}

/// Claims one batch of due entries and processes each independently. Returns
/// the number of entries handled.
pub async fn process_feedback_outbox_once(cfg: &Config, stores: &Stores) -> Result<usize> {
	let now = OffsetDateTime::now_utc();
	let lease = Duration::seconds(cfg.feedback.claim_lease_seconds);
	let entries = stores.feedback.claim_due(now, lease, cfg.feedback.claim_batch_size).await?;
	let count = entries.len();

	for entry in entries {
		process_entry(cfg, stores, entry).await;
	}

	Ok(count)
}

async fn process_entry(cfg: &Config, stores: &Stores, entry: FeedbackOutboxEntry) {
	let now = OffsetDateTime::now_utc();
	let result = match serde_json::from_value::<FeedbackEvent>(entry.payload.clone()) {
		Ok(event) => process_event(cfg, stores, entry.recommendation_id, &event, now)
			.await
			.map_err(|err| err.to_string()),
		Err(err) => Err(format!("Feedback payload is not decodable: {err}.")),
	};

	match result {
		Ok(application) => {
			if let Err(err) = stores.feedback.complete(entry.outbox_id, now).await {
				tracing::error!(outbox_id = %entry.outbox_id, error = %err, "Failed to mark feedback entry done.");
			} else {
				tracing::debug!(
					outbox_id = %entry.outbox_id,
					signal = application.signal,
					"Processed feedback entry."
				);
			}
		},
		Err(message) => {
			let retry_at = now + Duration::milliseconds(backoff_ms(
				entry.attempts,
				cfg.feedback.base_backoff_ms,
				cfg.feedback.max_backoff_ms,
			));
			let sanitized = truncate_error(&message);

			tracing::warn!(
				outbox_id = %entry.outbox_id,
				attempts = entry.attempts,
				error = %sanitized,
				"Feedback entry failed; scheduling retry."
			);

			if let Err(err) = stores.feedback.fail(entry.outbox_id, &sanitized, retry_at, now).await
			{
				tracing::error!(outbox_id = %entry.outbox_id, error = %err, "Failed to record feedback entry failure.");
			}
		},
	}
}

/// Exponential backoff from the entry's attempt count, capped at the
/// configured maximum.
fn backoff_ms(attempts: i32, base_ms: i64, max_ms: i64) -> i64 {
	let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;

	base_ms.saturating_mul(1_i64 << exponent).min(max_ms)
}

fn truncate_error(text: &str) -> String {
	if text.chars().count() <= MAX_OUTBOX_ERROR_CHARS {
		return text.to_string();
	}

	text.chars().take(MAX_OUTBOX_ERROR_CHARS).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_doubles_and_caps() {
		assert_eq!(backoff_ms(1, 500, 30_000), 500);
		assert_eq!(backoff_ms(2, 500, 30_000), 1_000);
		assert_eq!(backoff_ms(3, 500, 30_000), 2_000);
		assert_eq!(backoff_ms(10, 500, 30_000), 30_000);
		assert_eq!(backoff_ms(0, 500, 30_000), 500);
	}

	#[test]
	fn long_errors_are_truncated() {
		let long = "x".repeat(MAX_OUTBOX_ERROR_CHARS + 100);

		assert_eq!(truncate_error(&long).chars().count(), MAX_OUTBOX_ERROR_CHARS);
		assert_eq!(truncate_error("short"), "short");
	}
}
