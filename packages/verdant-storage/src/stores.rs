use std::{collections::HashMap, future::Future, pin::Pin};

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
	Result,
	models::{
		ChunkHit, FeedbackOutboxEntry, KnowledgeSource, Modality, RecommendationRecord,
		RetrievalAudit, SourceBoost,
	},
};
use verdant_domain::{boost::BoostBounds, signal::FeedbackEvent};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone, Debug)]
pub struct ChunkQuery {
	pub vector: Vec<f32>,
	pub modality: Modality,
	pub limit: u32,
}

/// Retrieval interface over the knowledge base. Injected into the pipeline so
/// tests can run against an in-memory implementation.
pub trait ChunkStore
where
	Self: Send + Sync,
{
	/// Nearest-neighbor search over chunk embeddings, most similar first.
	fn search<'a>(&'a self, query: &'a ChunkQuery) -> BoxFuture<'a, Result<Vec<ChunkHit>>>;

	/// Fetches chunks for the given sources directly by source id, bypassing
	/// similarity ranking entirely. Returned hits carry similarity 0.
	fn fetch_by_sources<'a>(
		&'a self,
		source_ids: &'a [Uuid],
		per_source: u32,
	) -> BoxFuture<'a, Result<Vec<ChunkHit>>>;

	/// Case-insensitive title-containment lookup for hint resolution.
	fn sources_by_title<'a>(
		&'a self,
		fragments: &'a [String],
	) -> BoxFuture<'a, Result<Vec<KnowledgeSource>>>;
}

/// Learned relevance adjustments. Read by search, written only by the
/// feedback loop; every write clamps through the supplied bounds.
pub trait BoostStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, source_id: Uuid) -> BoxFuture<'a, Result<Option<SourceBoost>>>;

	fn boosts_for<'a>(
		&'a self,
		source_ids: &'a [Uuid],
	) -> BoxFuture<'a, Result<HashMap<Uuid, f32>>>;

	/// Summed topic affinity per source over the given topics.
	fn affinities_for<'a>(
		&'a self,
		source_ids: &'a [Uuid],
		topics: &'a [String],
	) -> BoxFuture<'a, Result<HashMap<Uuid, f32>>>;

	fn apply_source_delta<'a>(
		&'a self,
		source_id: Uuid,
		delta: f32,
		bounds: BoostBounds,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<f32>>;

	fn apply_topic_delta<'a>(
		&'a self,
		source_id: Uuid,
		topic: &'a str,
		delta: f32,
		bounds: BoostBounds,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<f32>>;
}

/// Append-only audit trail of retrieval decisions.
pub trait AuditStore
where
	Self: Send + Sync,
{
	fn write<'a>(&'a self, audit: &'a RetrievalAudit) -> BoxFuture<'a, Result<()>>;

	fn read_latest<'a>(
		&'a self,
		recommendation_id: Uuid,
	) -> BoxFuture<'a, Result<Option<RetrievalAudit>>>;
}

pub trait RecommendationStore
where
	Self: Send + Sync,
{
	/// Write-once: a recommendation is never mutated after insert.
	fn insert<'a>(&'a self, record: &'a RecommendationRecord) -> BoxFuture<'a, Result<()>>;

	fn fetch<'a>(
		&'a self,
		recommendation_id: Uuid,
	) -> BoxFuture<'a, Result<Option<RecommendationRecord>>>;
}

/// Message-passing seam between feedback submission and processing. Enqueue
/// is the only operation on the submission path.
pub trait FeedbackQueue
where
	Self: Send + Sync,
{
	fn enqueue<'a>(
		&'a self,
		recommendation_id: Uuid,
		event: &'a FeedbackEvent,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Uuid>>;

	/// Claims due entries and leases them until `now + lease`, so a crashed
	/// worker's claims become due again.
	fn claim_due<'a>(
		&'a self,
		now: OffsetDateTime,
		lease: Duration,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<FeedbackOutboxEntry>>>;

	fn complete<'a>(&'a self, outbox_id: Uuid, now: OffsetDateTime) -> BoxFuture<'a, Result<()>>;

	fn fail<'a>(
		&'a self,
		outbox_id: Uuid,
		error: &'a str,
		retry_at: OffsetDateTime,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;
}
