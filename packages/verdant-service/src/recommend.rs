use std::collections::HashSet;

use ahash::AHashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Error, Result, VerdantService, assemble,
	config_hash,
	rerank::feature_rows,
	search::{Candidate, merge_ranked},
};
use verdant_domain::{
	plan::{DiagnosticInput, RetrievalPlan, build_plan},
	recommendation::RecommendationOutput,
};
use verdant_providers::ranker::FeatureRow;
use verdant_storage::{
	models::{AuditCandidate, Modality, RecommendationRecord, RetrievalAudit},
	stores::{AuditStore, RecommendationStore},
};

/// The persisted result of one diagnostic request.
#[derive(Clone, Debug)]
pub struct DiagnosisOutcome {
	pub recommendation_id: Uuid,
	pub audit_id: Uuid,
	pub output: RecommendationOutput,
	pub attempts: u32,
	pub context_chunks: u32,
}

impl VerdantService {
	/// Runs the full pipeline: plan, resolve hints, search text and image
	/// concurrently, force-fetch required sources, optionally rerank,
	/// assemble, generate with bounded retry, then persist the
	/// recommendation and its audit record.
	pub async fn diagnose(&self, input: DiagnosticInput) -> Result<DiagnosisOutcome> {
		let plan = build_plan(&input);

		tracing::debug!(topics = ?plan.topics, hints = plan.title_hints.len(), "Built retrieval plan.");

		if plan.query.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "Diagnostic input carries no searchable content.".to_string(),
			});
		}

		let hints = self.resolve_hints(&plan.title_hints).await?;
		let vector = self.embed_query(&plan.query).await?;
		// Text and image retrieval touch independent rows; run them
		// concurrently.
		let (text, image) = tokio::join!(
			self.hybrid_search(
				&plan,
				&hints.boosts,
				&vector,
				Modality::Text,
				self.cfg.retrieval.text_limit,
			),
			self.hybrid_search(
				&plan,
				&hints.boosts,
				&vector,
				Modality::Image,
				self.cfg.retrieval.image_limit,
			),
		);
		let ranked = merge_ranked(text?, image?);
		let required_fetched =
			self.fetch_required(&plan, &hints.boosts, &hints.required_source_ids).await?;
		// Feature rows are captured before reranking: the audit must record
		// exactly what the ranking endpoint was (or would have been) sent.
		let hybrid_features: AHashMap<Uuid, FeatureRow> = ranked
			.iter()
			.zip(feature_rows(&self.cfg.retrieval, &self.cfg.authority, &ranked))
			.map(|(candidate, features)| (candidate.hit.chunk.chunk_id, features))
			.collect();
		let ranked = match self.rerank(&ranked).await {
			Some(reranked) => reranked,
			None => ranked,
		};
		let required_set: HashSet<Uuid> = hints.required_source_ids.iter().copied().collect();
		let audit_pool = audit_candidates(&self.cfg, &ranked, &required_fetched, &hybrid_features);
		let context =
			assemble::assemble(ranked, required_fetched, &required_set, &self.cfg.retrieval);

		if context.total_chunks == 0 {
			tracing::info!("No qualifying chunks after assembly; skipping generation.");

			return Err(Error::RetrievalEmpty);
		}

		let (output, attempts) = self.generate_with_retry(&input, &context).await?;
		let recommendation_id = Uuid::new_v4();
		let audit_id = Uuid::new_v4();
		let now = OffsetDateTime::now_utc();
		let record = build_record(recommendation_id, &output, &audit_pool, now)?;
		let audit = build_audit(
			audit_id,
			recommendation_id,
			&plan,
			&context.chunk_ids(),
			audit_pool,
			&record,
			self.cfg.retrieval.relevance_threshold,
			config_hash(&self.cfg),
			now,
		);

		self.stores.recommendations.insert(&record).await?;
		self.stores.audits.write(&audit).await?;
		tracing::info!(
			%recommendation_id,
			attempts,
			chunks = context.total_chunks,
			tokens = context.total_tokens,
			"Recommendation generated."
		);

		Ok(DiagnosisOutcome {
			recommendation_id,
			audit_id,
			output,
			attempts,
			context_chunks: context.total_chunks,
		})
	}
}

struct AuditPoolEntry {
	candidate: AuditCandidate,
	score: f32,
}

/// Flattens the full candidate set (ranked + forced, deduplicated) into audit
/// rows carrying the exact ranking feature vector.
fn audit_candidates(
	cfg: &verdant_config::Config,
	ranked: &[Candidate],
	required_fetched: &[Candidate],
	hybrid_features: &AHashMap<Uuid, FeatureRow>,
) -> Vec<AuditPoolEntry> {
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for candidate in ranked.iter().chain(required_fetched) {
		if !seen.insert(candidate.hit.chunk.chunk_id) {
			continue;
		}

		let features = match hybrid_features.get(&candidate.hit.chunk.chunk_id) {
			Some(features) => *features,
			// Force-fetched chunks were never sent to the ranker; their row
			// is derived from the hybrid scoring state directly.
			None => feature_rows(&cfg.retrieval, &cfg.authority, std::slice::from_ref(candidate))
				.remove(0),
		};

		out.push(AuditPoolEntry {
			candidate: AuditCandidate {
				chunk_id: candidate.hit.chunk.chunk_id,
				source_id: candidate.hit.chunk.source_id,
				similarity: candidate.hit.similarity,
				rank_score: candidate.score,
				features: features.to_vec(),
				cited: false,
			},
			score: candidate.score,
		});
	}

	out
}

fn build_record(
	recommendation_id: Uuid,
	output: &RecommendationOutput,
	audit_pool: &[AuditPoolEntry],
	now: OffsetDateTime,
) -> Result<RecommendationRecord> {
	let source_by_chunk: AHashMap<Uuid, Uuid> = audit_pool
		.iter()
		.map(|entry| (entry.candidate.chunk_id, entry.candidate.source_id))
		.collect();
	let cited_chunk_ids = output.cited_chunk_ids();
	let mut cited_source_ids = Vec::new();
	let mut seen_sources = HashSet::new();

	for chunk_id in &cited_chunk_ids {
		if let Some(source_id) = source_by_chunk.get(chunk_id)
			&& seen_sources.insert(*source_id)
		{
			cited_source_ids.push(*source_id);
		}
	}

	let payload = serde_json::to_value(output).map_err(verdant_storage::Error::from)?;

	Ok(RecommendationRecord {
		recommendation_id,
		payload,
		cited_chunk_ids,
		cited_source_ids,
		created_at: now,
	})
}

#[allow(clippy::too_many_arguments)]
fn build_audit(
	audit_id: Uuid,
	recommendation_id: Uuid,
	plan: &RetrievalPlan,
	used_chunk_ids: &HashSet<Uuid>,
	audit_pool: Vec<AuditPoolEntry>,
	record: &RecommendationRecord,
	relevance_threshold: f32,
	config_hash: String,
	now: OffsetDateTime,
) -> RetrievalAudit {
	let cited_chunks: HashSet<Uuid> = record.cited_chunk_ids.iter().copied().collect();
	let cited_sources: HashSet<Uuid> = record.cited_source_ids.iter().copied().collect();
	// Missed sources: relevant candidates the generator never cited, best
	// score first. Negative feedback later nudges the top few upward.
	let mut missed: Vec<(f32, Uuid)> = Vec::new();
	let mut missed_seen = HashSet::new();
	let mut candidates = Vec::with_capacity(audit_pool.len());

	for mut entry in audit_pool {
		entry.candidate.cited = cited_chunks.contains(&entry.candidate.chunk_id);

		if entry.candidate.similarity >= relevance_threshold
			&& !cited_sources.contains(&entry.candidate.source_id)
			&& missed_seen.insert(entry.candidate.source_id)
		{
			missed.push((entry.score, entry.candidate.source_id));
		}

		candidates.push(entry.candidate);
	}

	missed.sort_by(|a, b| crate::search::cmp_f32_desc(a.0, b.0));

	RetrievalAudit {
		audit_id,
		recommendation_id,
		query: plan.query.clone(),
		topics: plan.topics.clone(),
		candidates,
		used_chunk_ids: used_chunk_ids.iter().copied().collect(),
		missed_source_ids: missed.into_iter().map(|(_, source_id)| source_id).collect(),
		config_hash,
		created_at: now,
	}
}
