//! In-memory store implementations backing the service tests. Vector search
//! is brute-force cosine similarity over registered embeddings.

use std::{
	collections::HashMap,
	sync::{Mutex, MutexGuard},
};

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use verdant_domain::{boost::BoostBounds, signal::FeedbackEvent};
use verdant_storage::{
	Error, Result,
	models::{
		ChunkHit, FeedbackOutboxEntry, KnowledgeChunk, KnowledgeSource, RecommendationRecord,
		RetrievalAudit, SourceBoost, SourceTopicAffinity,
	},
	stores::{
		AuditStore, BoostStore, BoxFuture, ChunkQuery, ChunkStore, FeedbackQueue,
		RecommendationStore,
	},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|err| err.into_inner())
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let mut dot = 0.0_f32;
	let mut norm_a = 0.0_f32;
	let mut norm_b = 0.0_f32;

	for (x, y) in a.iter().zip(b) {
		dot += x * y;
		norm_a += x * x;
		norm_b += y * y;
	}

	if norm_a == 0.0 || norm_b == 0.0 {
		return 0.0;
	}

	dot / (norm_a.sqrt() * norm_b.sqrt())
}

struct StoredChunk {
	chunk: KnowledgeChunk,
	vector: Vec<f32>,
}

#[derive(Default)]
pub struct MemoryChunkStore {
	sources: Mutex<HashMap<Uuid, KnowledgeSource>>,
	chunks: Mutex<Vec<StoredChunk>>,
}
impl MemoryChunkStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_source(&self, source: KnowledgeSource) {
		lock(&self.sources).insert(source.source_id, source);
	}

	pub fn add_chunk(&self, chunk: KnowledgeChunk, vector: Vec<f32>) {
		lock(&self.chunks).push(StoredChunk { chunk, vector });
	}

	fn hit_for(&self, stored: &StoredChunk, similarity: f32) -> Option<ChunkHit> {
		let sources = lock(&self.sources);
		let source = sources.get(&stored.chunk.source_id)?;

		Some(ChunkHit {
			chunk: stored.chunk.clone(),
			source_title: source.title.clone(),
			authority: source.authority,
			similarity,
		})
	}
}
impl ChunkStore for MemoryChunkStore {
	fn search<'a>(&'a self, query: &'a ChunkQuery) -> BoxFuture<'a, Result<Vec<ChunkHit>>> {
		let mut scored: Vec<(f32, ChunkHit)> = {
			let chunks = lock(&self.chunks);

			chunks
				.iter()
				.filter(|stored| stored.chunk.modality == query.modality)
				.filter_map(|stored| {
					let similarity = cosine(&query.vector, &stored.vector);

					self.hit_for(stored, similarity).map(|hit| (similarity, hit))
				})
				.collect()
		};

		scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

		let hits =
			scored.into_iter().take(query.limit as usize).map(|(_, hit)| hit).collect::<Vec<_>>();

		Box::pin(async move { Ok(hits) })
	}

	fn fetch_by_sources<'a>(
		&'a self,
		source_ids: &'a [Uuid],
		per_source: u32,
	) -> BoxFuture<'a, Result<Vec<ChunkHit>>> {
		let mut per_source_seen: HashMap<Uuid, u32> = HashMap::new();
		let mut hits = Vec::new();

		{
			let chunks = lock(&self.chunks);
			let mut ordered: Vec<&StoredChunk> = chunks
				.iter()
				.filter(|stored| source_ids.contains(&stored.chunk.source_id))
				.collect();

			ordered.sort_by_key(|stored| (stored.chunk.source_id, stored.chunk.position));

			for stored in ordered {
				let seen = per_source_seen.entry(stored.chunk.source_id).or_insert(0);

				if *seen >= per_source {
					continue;
				}
				if let Some(hit) = self.hit_for(stored, 0.0) {
					*seen += 1;

					hits.push(hit);
				}
			}
		}

		Box::pin(async move { Ok(hits) })
	}

	fn sources_by_title<'a>(
		&'a self,
		fragments: &'a [String],
	) -> BoxFuture<'a, Result<Vec<KnowledgeSource>>> {
		let lowered: Vec<String> = fragments.iter().map(|fragment| fragment.to_lowercase()).collect();
		let sources = lock(&self.sources)
			.values()
			.filter(|source| {
				let title = source.title.to_lowercase();

				lowered.iter().any(|fragment| title.contains(fragment))
			})
			.cloned()
			.collect::<Vec<_>>();

		Box::pin(async move { Ok(sources) })
	}
}

#[derive(Default)]
pub struct MemoryBoostStore {
	boosts: Mutex<HashMap<Uuid, SourceBoost>>,
	topics: Mutex<HashMap<(Uuid, String), SourceTopicAffinity>>,
}
impl MemoryBoostStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_boost(&self, source_id: Uuid, boost: f32) {
		lock(&self.boosts).insert(
			source_id,
			SourceBoost {
				source_id,
				boost,
				feedback_count: 0,
				updated_at: OffsetDateTime::UNIX_EPOCH,
			},
		);
	}

	pub fn boost_snapshot(&self) -> HashMap<Uuid, f32> {
		lock(&self.boosts).iter().map(|(id, row)| (*id, row.boost)).collect()
	}

	pub fn topic_snapshot(&self) -> HashMap<(Uuid, String), f32> {
		lock(&self.topics).iter().map(|(key, row)| (key.clone(), row.boost)).collect()
	}

	pub fn write_count(&self) -> usize {
		lock(&self.boosts).len() + lock(&self.topics).len()
	}
}
impl BoostStore for MemoryBoostStore {
	fn get<'a>(&'a self, source_id: Uuid) -> BoxFuture<'a, Result<Option<SourceBoost>>> {
		let row = lock(&self.boosts).get(&source_id).cloned();

		Box::pin(async move { Ok(row) })
	}

	fn boosts_for<'a>(
		&'a self,
		source_ids: &'a [Uuid],
	) -> BoxFuture<'a, Result<HashMap<Uuid, f32>>> {
		let boosts = lock(&self.boosts);
		let out = source_ids
			.iter()
			.filter_map(|id| boosts.get(id).map(|row| (*id, row.boost)))
			.collect::<HashMap<_, _>>();

		Box::pin(async move { Ok(out) })
	}

	fn affinities_for<'a>(
		&'a self,
		source_ids: &'a [Uuid],
		topics: &'a [String],
	) -> BoxFuture<'a, Result<HashMap<Uuid, f32>>> {
		let rows = lock(&self.topics);
		let mut out: HashMap<Uuid, f32> = HashMap::new();

		for ((source_id, topic), row) in rows.iter() {
			if source_ids.contains(source_id) && topics.contains(topic) {
				*out.entry(*source_id).or_insert(0.0) += row.boost;
			}
		}

		Box::pin(async move { Ok(out) })
	}

	fn apply_source_delta<'a>(
		&'a self,
		source_id: Uuid,
		delta: f32,
		bounds: BoostBounds,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<f32>> {
		let boost = {
			let mut boosts = lock(&self.boosts);
			let row = boosts.entry(source_id).or_insert_with(|| SourceBoost {
				source_id,
				boost: 0.0,
				feedback_count: 0,
				updated_at: now,
			});

			row.boost = bounds.apply(row.boost, delta);
			row.feedback_count += 1;
			row.updated_at = now;

			row.boost
		};

		Box::pin(async move { Ok(boost) })
	}

	fn apply_topic_delta<'a>(
		&'a self,
		source_id: Uuid,
		topic: &'a str,
		delta: f32,
		bounds: BoostBounds,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<f32>> {
		let boost = {
			let mut topics = lock(&self.topics);
			let row =
				topics.entry((source_id, topic.to_string())).or_insert_with(|| SourceTopicAffinity {
					source_id,
					topic: topic.to_string(),
					boost: 0.0,
					sample_count: 0,
					updated_at: now,
				});

			row.boost = bounds.apply(row.boost, delta);
			row.sample_count += 1;
			row.updated_at = now;

			row.boost
		};

		Box::pin(async move { Ok(boost) })
	}
}

#[derive(Default)]
pub struct MemoryAuditStore {
	audits: Mutex<Vec<RetrievalAudit>>,
}
impl MemoryAuditStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn all(&self) -> Vec<RetrievalAudit> {
		lock(&self.audits).clone()
	}
}
impl AuditStore for MemoryAuditStore {
	fn write<'a>(&'a self, audit: &'a RetrievalAudit) -> BoxFuture<'a, Result<()>> {
		lock(&self.audits).push(audit.clone());

		Box::pin(async move { Ok(()) })
	}

	fn read_latest<'a>(
		&'a self,
		recommendation_id: Uuid,
	) -> BoxFuture<'a, Result<Option<RetrievalAudit>>> {
		let latest = lock(&self.audits)
			.iter()
			.filter(|audit| audit.recommendation_id == recommendation_id)
			.max_by_key(|audit| audit.created_at)
			.cloned();

		Box::pin(async move { Ok(latest) })
	}
}

#[derive(Default)]
pub struct MemoryRecommendationStore {
	records: Mutex<HashMap<Uuid, RecommendationRecord>>,
}
impl MemoryRecommendationStore {
	pub fn new() -> Self {
		Self::default()
	}
}
impl RecommendationStore for MemoryRecommendationStore {
	fn insert<'a>(&'a self, record: &'a RecommendationRecord) -> BoxFuture<'a, Result<()>> {
		let result = {
			let mut records = lock(&self.records);

			if records.contains_key(&record.recommendation_id) {
				Err(Error::InvalidArgument(format!(
					"Recommendation {} already exists.",
					record.recommendation_id
				)))
			} else {
				records.insert(record.recommendation_id, record.clone());

				Ok(())
			}
		};

		Box::pin(async move { result })
	}

	fn fetch<'a>(
		&'a self,
		recommendation_id: Uuid,
	) -> BoxFuture<'a, Result<Option<RecommendationRecord>>> {
		let record = lock(&self.records).get(&recommendation_id).cloned();

		Box::pin(async move { Ok(record) })
	}
}

#[derive(Default)]
pub struct MemoryFeedbackQueue {
	entries: Mutex<Vec<FeedbackOutboxEntry>>,
}
impl MemoryFeedbackQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn all(&self) -> Vec<FeedbackOutboxEntry> {
		lock(&self.entries).clone()
	}
}
impl FeedbackQueue for MemoryFeedbackQueue {
	fn enqueue<'a>(
		&'a self,
		recommendation_id: Uuid,
		event: &'a FeedbackEvent,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Uuid>> {
		let result = serde_json::to_value(event).map_err(Error::from).map(|payload| {
			let outbox_id = Uuid::new_v4();

			lock(&self.entries).push(FeedbackOutboxEntry {
				outbox_id,
				recommendation_id,
				payload,
				status: "PENDING".to_string(),
				attempts: 0,
				last_error: None,
				available_at: now,
				created_at: now,
				updated_at: now,
			});

			outbox_id
		});

		Box::pin(async move { result })
	}

	fn claim_due<'a>(
		&'a self,
		now: OffsetDateTime,
		lease: Duration,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<FeedbackOutboxEntry>>> {
		let claimed = {
			let mut entries = lock(&self.entries);
			let mut claimed = Vec::new();

			for entry in entries.iter_mut() {
				if claimed.len() >= limit as usize {
					break;
				}
				if entry.status != "DONE" && entry.available_at <= now {
					entry.status = "PROCESSING".to_string();
					entry.attempts += 1;
					entry.available_at = now + lease;
					entry.updated_at = now;

					claimed.push(entry.clone());
				}
			}

			claimed
		};

		Box::pin(async move { Ok(claimed) })
	}

	fn complete<'a>(&'a self, outbox_id: Uuid, now: OffsetDateTime) -> BoxFuture<'a, Result<()>> {
		{
			let mut entries = lock(&self.entries);

			if let Some(entry) = entries.iter_mut().find(|entry| entry.outbox_id == outbox_id) {
				entry.status = "DONE".to_string();
				entry.last_error = None;
				entry.updated_at = now;
			}
		}

		Box::pin(async move { Ok(()) })
	}

	fn fail<'a>(
		&'a self,
		outbox_id: Uuid,
		error: &'a str,
		retry_at: OffsetDateTime,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		{
			let mut entries = lock(&self.entries);

			if let Some(entry) = entries.iter_mut().find(|entry| entry.outbox_id == outbox_id) {
				entry.status = "PENDING".to_string();
				entry.last_error = Some(error.to_string());
				entry.available_at = retry_at;
				entry.updated_at = now;
			}
		}

		Box::pin(async move { Ok(()) })
	}
}
