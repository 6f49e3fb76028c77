use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, Stores, VerdantService, boost_bounds};
use verdant_config::Config;
use verdant_domain::signal::{
	FeedbackEvent, FeedbackParams, ImplicitParams, compute_implicit_signal, compute_signal,
};
use verdant_storage::stores::{AuditStore, BoostStore, FeedbackQueue, RecommendationStore};

/// Summary of one processed feedback event, mostly for logging and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct FeedbackApplication {
	pub signal: i8,
	pub sources_updated: usize,
	pub missed_rewarded: usize,
}

impl VerdantService {
	/// Queues explicit feedback for out-of-band processing. This is the only
	/// work done on the submission path; the acknowledgment never waits on
	/// boost updates.
	pub async fn submit_feedback(
		&self,
		recommendation_id: Uuid,
		params: FeedbackParams,
	) -> Result<Uuid> {
		let event = FeedbackEvent::Explicit { params };
		let outbox_id = self
			.stores
			.feedback
			.enqueue(recommendation_id, &event, OffsetDateTime::now_utc())
			.await?;

		tracing::debug!(%recommendation_id, %outbox_id, "Queued explicit feedback.");

		Ok(outbox_id)
	}

	/// Implicit variant fed by usage telemetry instead of explicit ratings.
	pub async fn submit_implicit_feedback(
		&self,
		recommendation_id: Uuid,
		params: ImplicitParams,
	) -> Result<Uuid> {
		let event = FeedbackEvent::Implicit { params };
		let outbox_id = self
			.stores
			.feedback
			.enqueue(recommendation_id, &event, OffsetDateTime::now_utc())
			.await?;

		tracing::debug!(%recommendation_id, %outbox_id, "Queued implicit feedback.");

		Ok(outbox_id)
	}
}

/// Applies one feedback event to the boost stores. Runs in the worker, never
/// on a request path. Concurrent events racing on the same source are
/// last-write-wins by design; boosts are heuristic ranking signals.
pub async fn process_event(
	cfg: &Config,
	stores: &Stores,
	recommendation_id: Uuid,
	event: &FeedbackEvent,
	now: OffsetDateTime,
) -> Result<FeedbackApplication> {
	let signal = match event {
		FeedbackEvent::Explicit { params } => compute_signal(params),
		FeedbackEvent::Implicit { params } =>
			compute_implicit_signal(params, cfg.feedback.sustained_view_secs),
	};

	if signal == 0 {
		tracing::debug!(%recommendation_id, "Zero feedback signal; nothing to apply.");

		return Ok(FeedbackApplication::default());
	}

	let Some(record) = stores.recommendations.fetch(recommendation_id).await? else {
		return Err(Error::InvalidRequest {
			message: format!("Recommendation {recommendation_id} not found."),
		});
	};
	let audit = stores.audits.read_latest(recommendation_id).await?;
	let topics = audit.as_ref().map(|audit| audit.topics.clone()).unwrap_or_default();
	let bounds = boost_bounds(&cfg.boosts);
	let delta = f32::from(signal) * cfg.boosts.increment;
	let mut application = FeedbackApplication { signal, ..Default::default() };

	for source_id in &record.cited_source_ids {
		stores.boosts.apply_source_delta(*source_id, delta, bounds, now).await?;

		for topic in &topics {
			stores.boosts.apply_topic_delta(*source_id, topic, delta, bounds, now).await?;
		}

		application.sources_updated += 1;
	}

	// Negative feedback may mean the generator ignored better evidence, so
	// the top missed sources get a flat nudge upward for future retrieval.
	if signal < 0 && let Some(audit) = audit.as_ref() {
		for source_id in
			audit.missed_source_ids.iter().take(cfg.boosts.missed_source_limit as usize)
		{
			stores
				.boosts
				.apply_source_delta(*source_id, cfg.boosts.missed_source_increment, bounds, now)
				.await?;

			application.missed_rewarded += 1;
		}
	}

	tracing::debug!(
		%recommendation_id,
		signal,
		sources = application.sources_updated,
		missed = application.missed_rewarded,
		"Applied feedback signal."
	);

	Ok(application)
}
