use std::collections::HashMap;

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
	Result,
	db::vector_text,
	models::{
		AuditCandidate, ChunkHit, FeedbackOutboxEntry, KnowledgeChunk, KnowledgeSource, Modality,
		RecommendationRecord, RetrievalAudit, SourceBoost,
	},
	stores::{
		AuditStore, BoostStore, BoxFuture, ChunkQuery, ChunkStore, FeedbackQueue,
		RecommendationStore,
	},
};
use verdant_domain::{authority::AuthorityClass, boost::BoostBounds, signal::FeedbackEvent};

const STATUS_PENDING: &str = "PENDING";
const STATUS_PROCESSING: &str = "PROCESSING";
const STATUS_DONE: &str = "DONE";

#[derive(Clone)]
pub struct PgChunkStore {
	pool: PgPool,
}
impl PgChunkStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

#[derive(Clone)]
pub struct PgBoostStore {
	pool: PgPool,
}
impl PgBoostStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

#[derive(Clone)]
pub struct PgAuditStore {
	pool: PgPool,
}
impl PgAuditStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

#[derive(Clone)]
pub struct PgRecommendationStore {
	pool: PgPool,
}
impl PgRecommendationStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

#[derive(Clone)]
pub struct PgFeedbackQueue {
	pool: PgPool,
}
impl PgFeedbackQueue {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

#[derive(sqlx::FromRow)]
struct ChunkHitRow {
	chunk_id: Uuid,
	source_id: Uuid,
	modality: String,
	content: String,
	crops: Vec<String>,
	regions: Vec<String>,
	topics: Vec<String>,
	chunk_position: i32,
	created_at: OffsetDateTime,
	source_title: String,
	authority: String,
	similarity: f32,
}
impl ChunkHitRow {
	fn into_hit(self) -> ChunkHit {
		ChunkHit {
			chunk: KnowledgeChunk {
				chunk_id: self.chunk_id,
				source_id: self.source_id,
				modality: Modality::parse(&self.modality),
				content: self.content,
				crops: self.crops,
				regions: self.regions,
				topics: self.topics,
				position: self.chunk_position,
				created_at: self.created_at,
			},
			source_title: self.source_title,
			authority: AuthorityClass::parse(&self.authority),
			similarity: self.similarity,
		}
	}
}

const HIT_COLUMNS: &str = "\
	c.chunk_id,
	c.source_id,
	c.modality,
	c.content,
	c.crops,
	c.regions,
	c.topics,
	c.chunk_position,
	c.created_at,
	s.title AS source_title,
	s.authority";

impl ChunkStore for PgChunkStore {
	fn search<'a>(&'a self, query: &'a ChunkQuery) -> BoxFuture<'a, Result<Vec<ChunkHit>>> {
		Box::pin(async move {
			let vec_text = vector_text(&query.vector);
			let sql = format!(
				"\
SELECT
{HIT_COLUMNS},
	(1 - (e.vec <=> $1::text::vector))::real AS similarity
FROM chunk_embeddings e
JOIN knowledge_chunks c ON c.chunk_id = e.chunk_id
JOIN knowledge_sources s ON s.source_id = c.source_id
WHERE c.modality = $2
ORDER BY e.vec <=> $1::text::vector
LIMIT $3"
			);
			let rows: Vec<ChunkHitRow> = sqlx::query_as(&sql)
				.bind(vec_text.as_str())
				.bind(query.modality.as_str())
				.bind(i64::from(query.limit))
				.fetch_all(&self.pool)
				.await?;

			Ok(rows.into_iter().map(ChunkHitRow::into_hit).collect())
		})
	}

	fn fetch_by_sources<'a>(
		&'a self,
		source_ids: &'a [Uuid],
		per_source: u32,
	) -> BoxFuture<'a, Result<Vec<ChunkHit>>> {
		Box::pin(async move {
			if source_ids.is_empty() {
				return Ok(Vec::new());
			}

			let sql = format!(
				"\
SELECT * FROM (
	SELECT
{HIT_COLUMNS},
		0::real AS similarity,
		ROW_NUMBER() OVER (PARTITION BY c.source_id ORDER BY c.chunk_position) AS source_rank
	FROM knowledge_chunks c
	JOIN knowledge_sources s ON s.source_id = c.source_id
	WHERE c.source_id = ANY($1)
) ranked
WHERE source_rank <= $2"
			);
			let rows: Vec<ChunkHitRow> = sqlx::query_as(&sql)
				.bind(source_ids)
				.bind(i64::from(per_source))
				.fetch_all(&self.pool)
				.await?;

			Ok(rows.into_iter().map(ChunkHitRow::into_hit).collect())
		})
	}

	fn sources_by_title<'a>(
		&'a self,
		fragments: &'a [String],
	) -> BoxFuture<'a, Result<Vec<KnowledgeSource>>> {
		Box::pin(async move {
			if fragments.is_empty() {
				return Ok(Vec::new());
			}

			let rows: Vec<(Uuid, String, Option<String>, String, OffsetDateTime)> =
				sqlx::query_as(
					"\
SELECT source_id, title, url, authority, created_at
FROM knowledge_sources s
WHERE EXISTS (
	SELECT 1
	FROM unnest($1::text[]) AS fragment
	WHERE s.title ILIKE '%' || fragment || '%'
)",
				)
				.bind(fragments)
				.fetch_all(&self.pool)
				.await?;

			Ok(rows
				.into_iter()
				.map(|(source_id, title, url, authority, created_at)| KnowledgeSource {
					source_id,
					title,
					url,
					authority: AuthorityClass::parse(&authority),
					created_at,
				})
				.collect())
		})
	}
}

impl BoostStore for PgBoostStore {
	fn get<'a>(&'a self, source_id: Uuid) -> BoxFuture<'a, Result<Option<SourceBoost>>> {
		Box::pin(async move {
			let row: Option<(Uuid, f32, i64, OffsetDateTime)> = sqlx::query_as(
				"SELECT source_id, boost, feedback_count, updated_at FROM source_boosts WHERE source_id = $1",
			)
			.bind(source_id)
			.fetch_optional(&self.pool)
			.await?;

			Ok(row.map(|(source_id, boost, feedback_count, updated_at)| SourceBoost {
				source_id,
				boost,
				feedback_count,
				updated_at,
			}))
		})
	}

	fn boosts_for<'a>(
		&'a self,
		source_ids: &'a [Uuid],
	) -> BoxFuture<'a, Result<HashMap<Uuid, f32>>> {
		Box::pin(async move {
			if source_ids.is_empty() {
				return Ok(HashMap::new());
			}

			let rows: Vec<(Uuid, f32)> =
				sqlx::query_as("SELECT source_id, boost FROM source_boosts WHERE source_id = ANY($1)")
					.bind(source_ids)
					.fetch_all(&self.pool)
					.await?;

			Ok(rows.into_iter().collect())
		})
	}

	fn affinities_for<'a>(
		&'a self,
		source_ids: &'a [Uuid],
		topics: &'a [String],
	) -> BoxFuture<'a, Result<HashMap<Uuid, f32>>> {
		Box::pin(async move {
			if source_ids.is_empty() || topics.is_empty() {
				return Ok(HashMap::new());
			}

			let rows: Vec<(Uuid, f32)> = sqlx::query_as(
				"\
SELECT source_id, SUM(boost)::real AS boost
FROM source_topic_boosts
WHERE source_id = ANY($1) AND topic = ANY($2)
GROUP BY source_id",
			)
			.bind(source_ids)
			.bind(topics)
			.fetch_all(&self.pool)
			.await?;

			Ok(rows.into_iter().collect())
		})
	}

	fn apply_source_delta<'a>(
		&'a self,
		source_id: Uuid,
		delta: f32,
		bounds: BoostBounds,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<f32>> {
		Box::pin(async move {
			// Clamped server-side so concurrent writers can never push the
			// stored value out of bounds, whichever write lands last.
			let boost: f32 = sqlx::query_scalar(
				"\
INSERT INTO source_boosts (source_id, boost, feedback_count, updated_at)
VALUES ($1, LEAST($4, GREATEST($3, $2)), 1, $5)
ON CONFLICT (source_id) DO UPDATE
SET
	boost = LEAST($4, GREATEST($3, source_boosts.boost + $2)),
	feedback_count = source_boosts.feedback_count + 1,
	updated_at = $5
RETURNING boost",
			)
			.bind(source_id)
			.bind(delta)
			.bind(bounds.min)
			.bind(bounds.max)
			.bind(now)
			.fetch_one(&self.pool)
			.await?;

			Ok(boost)
		})
	}

	fn apply_topic_delta<'a>(
		&'a self,
		source_id: Uuid,
		topic: &'a str,
		delta: f32,
		bounds: BoostBounds,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<f32>> {
		Box::pin(async move {
			let boost: f32 = sqlx::query_scalar(
				"\
INSERT INTO source_topic_boosts (source_id, topic, boost, sample_count, updated_at)
VALUES ($1, $2, LEAST($5, GREATEST($4, $3)), 1, $6)
ON CONFLICT (source_id, topic) DO UPDATE
SET
	boost = LEAST($5, GREATEST($4, source_topic_boosts.boost + $3)),
	sample_count = source_topic_boosts.sample_count + 1,
	updated_at = $6
RETURNING boost",
			)
			.bind(source_id)
			.bind(topic)
			.bind(delta)
			.bind(bounds.min)
			.bind(bounds.max)
			.bind(now)
			.fetch_one(&self.pool)
			.await?;

			Ok(boost)
		})
	}
}

impl AuditStore for PgAuditStore {
	fn write<'a>(&'a self, audit: &'a RetrievalAudit) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let candidates = serde_json::to_value(&audit.candidates)?;

			sqlx::query(
				"\
INSERT INTO retrieval_audits (
	audit_id,
	recommendation_id,
	query,
	topics,
	candidates,
	used_chunk_ids,
	missed_source_ids,
	config_hash,
	created_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
			)
			.bind(audit.audit_id)
			.bind(audit.recommendation_id)
			.bind(audit.query.as_str())
			.bind(&audit.topics)
			.bind(candidates)
			.bind(&audit.used_chunk_ids)
			.bind(&audit.missed_source_ids)
			.bind(audit.config_hash.as_str())
			.bind(audit.created_at)
			.execute(&self.pool)
			.await?;

			Ok(())
		})
	}

	fn read_latest<'a>(
		&'a self,
		recommendation_id: Uuid,
	) -> BoxFuture<'a, Result<Option<RetrievalAudit>>> {
		Box::pin(async move {
			type AuditRow = (
				Uuid,
				Uuid,
				String,
				Vec<String>,
				serde_json::Value,
				Vec<Uuid>,
				Vec<Uuid>,
				String,
				OffsetDateTime,
			);

			let row: Option<AuditRow> = sqlx::query_as(
				"\
SELECT
	audit_id,
	recommendation_id,
	query,
	topics,
	candidates,
	used_chunk_ids,
	missed_source_ids,
	config_hash,
	created_at
FROM retrieval_audits
WHERE recommendation_id = $1
ORDER BY created_at DESC
LIMIT 1",
			)
			.bind(recommendation_id)
			.fetch_optional(&self.pool)
			.await?;

			let Some((
				audit_id,
				recommendation_id,
				query,
				topics,
				candidates,
				used_chunk_ids,
				missed_source_ids,
				config_hash,
				created_at,
			)) = row
			else {
				return Ok(None);
			};
			let candidates: Vec<AuditCandidate> = serde_json::from_value(candidates)?;

			Ok(Some(RetrievalAudit {
				audit_id,
				recommendation_id,
				query,
				topics,
				candidates,
				used_chunk_ids,
				missed_source_ids,
				config_hash,
				created_at,
			}))
		})
	}
}

impl RecommendationStore for PgRecommendationStore {
	fn insert<'a>(&'a self, record: &'a RecommendationRecord) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query(
				"\
INSERT INTO recommendations (
	recommendation_id,
	payload,
	cited_chunk_ids,
	cited_source_ids,
	created_at
)
VALUES ($1,$2,$3,$4,$5)",
			)
			.bind(record.recommendation_id)
			.bind(&record.payload)
			.bind(&record.cited_chunk_ids)
			.bind(&record.cited_source_ids)
			.bind(record.created_at)
			.execute(&self.pool)
			.await?;

			Ok(())
		})
	}

	fn fetch<'a>(
		&'a self,
		recommendation_id: Uuid,
	) -> BoxFuture<'a, Result<Option<RecommendationRecord>>> {
		Box::pin(async move {
			let row: Option<(Uuid, serde_json::Value, Vec<Uuid>, Vec<Uuid>, OffsetDateTime)> =
				sqlx::query_as(
					"\
SELECT recommendation_id, payload, cited_chunk_ids, cited_source_ids, created_at
FROM recommendations
WHERE recommendation_id = $1",
				)
				.bind(recommendation_id)
				.fetch_optional(&self.pool)
				.await?;

			Ok(row.map(
				|(recommendation_id, payload, cited_chunk_ids, cited_source_ids, created_at)| {
					RecommendationRecord {
						recommendation_id,
						payload,
						cited_chunk_ids,
						cited_source_ids,
						created_at,
					}
				},
			))
		})
	}
}

type OutboxRow = (
	Uuid,
	Uuid,
	serde_json::Value,
	String,
	i32,
	Option<String>,
	OffsetDateTime,
	OffsetDateTime,
	OffsetDateTime,
);

fn outbox_entry(row: OutboxRow) -> FeedbackOutboxEntry {
	let (
		outbox_id,
		recommendation_id,
		payload,
		status,
		attempts,
		last_error,
		available_at,
		created_at,
		updated_at,
	) = row;

	FeedbackOutboxEntry {
		outbox_id,
		recommendation_id,
		payload,
		status,
		attempts,
		last_error,
		available_at,
		created_at,
		updated_at,
	}
}

impl FeedbackQueue for PgFeedbackQueue {
	fn enqueue<'a>(
		&'a self,
		recommendation_id: Uuid,
		event: &'a FeedbackEvent,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Uuid>> {
		Box::pin(async move {
			let outbox_id = Uuid::new_v4();
			let payload = serde_json::to_value(event)?;

			sqlx::query(
				"\
INSERT INTO feedback_outbox (
	outbox_id,
	recommendation_id,
	payload,
	status,
	attempts,
	available_at,
	created_at,
	updated_at
)
VALUES ($1,$2,$3,$4,0,$5,$6,$7)",
			)
			.bind(outbox_id)
			.bind(recommendation_id)
			.bind(payload)
			.bind(STATUS_PENDING)
			.bind(now)
			.bind(now)
			.bind(now)
			.execute(&self.pool)
			.await?;

			Ok(outbox_id)
		})
	}

	fn claim_due<'a>(
		&'a self,
		now: OffsetDateTime,
		lease: Duration,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<FeedbackOutboxEntry>>> {
		Box::pin(async move {
			let rows: Vec<OutboxRow> = sqlx::query_as(
				"\
UPDATE feedback_outbox
SET
	status = $4,
	attempts = attempts + 1,
	available_at = $2,
	updated_at = $3
WHERE outbox_id IN (
	SELECT outbox_id
	FROM feedback_outbox
	WHERE status <> $5 AND available_at <= $1
	ORDER BY available_at
	LIMIT $6
	FOR UPDATE SKIP LOCKED
)
RETURNING
	outbox_id,
	recommendation_id,
	payload,
	status,
	attempts,
	last_error,
	available_at,
	created_at,
	updated_at",
			)
			.bind(now)
			.bind(now + lease)
			.bind(now)
			.bind(STATUS_PROCESSING)
			.bind(STATUS_DONE)
			.bind(i64::from(limit))
			.fetch_all(&self.pool)
			.await?;

			Ok(rows.into_iter().map(outbox_entry).collect())
		})
	}

	fn complete<'a>(&'a self, outbox_id: Uuid, now: OffsetDateTime) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query(
				"UPDATE feedback_outbox SET status = $2, last_error = NULL, updated_at = $3 WHERE outbox_id = $1",
			)
			.bind(outbox_id)
			.bind(STATUS_DONE)
			.bind(now)
			.execute(&self.pool)
			.await?;

			Ok(())
		})
	}

	fn fail<'a>(
		&'a self,
		outbox_id: Uuid,
		error: &'a str,
		retry_at: OffsetDateTime,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query(
				"\
UPDATE feedback_outbox
SET status = $2, last_error = $3, available_at = $4, updated_at = $5
WHERE outbox_id = $1",
			)
			.bind(outbox_id)
			.bind(STATUS_PENDING)
			.bind(error)
			.bind(retry_at)
			.bind(now)
			.execute(&self.pool)
			.await?;

			Ok(())
		})
	}
}
