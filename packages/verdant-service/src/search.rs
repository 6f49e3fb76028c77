use std::{
	cmp::Ordering,
	collections::{HashMap, HashSet},
};

use uuid::Uuid;

use crate::{EmbeddingProvider, Error, Result, VerdantService, authority_weight, boost_bounds};
use verdant_domain::plan::{RetrievalPlan, normalize_tag, query_terms, term_density};
use verdant_storage::{
	models::{ChunkHit, Modality},
	stores::{BoostStore, ChunkQuery, ChunkStore},
};

/// A scored retrieval candidate. `score` starts as the hybrid score and is
/// replaced by the reranker when one is available; `rank` is the 1-based
/// position in the owning result list.
#[derive(Clone, Debug)]
pub struct Candidate {
	pub hit: ChunkHit,
	pub score: f32,
	pub rank: u32,
	pub boost: f32,
	pub crop_match: bool,
	pub region_match: bool,
	pub term_density: f32,
	pub required: bool,
}

impl VerdantService {
	pub(crate) async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
		let vectors = self
			.providers
			.embedding
			.embed(&self.cfg.providers.embedding, &[query.to_string()])
			.await
			.map_err(|err| Error::Provider { message: err.to_string() })?;

		vectors.into_iter().next().ok_or_else(|| Error::Provider {
			message: "Embedding provider returned no vectors.".to_string(),
		})
	}

	/// Similarity search for one modality, scored with the full hybrid
	/// formula. Text and image searches are independent; callers run them
	/// concurrently.
	pub(crate) async fn hybrid_search(
		&self,
		plan: &RetrievalPlan,
		hint_boosts: &HashMap<Uuid, f32>,
		vector: &[f32],
		modality: Modality,
		limit: u32,
	) -> Result<Vec<Candidate>> {
		let query = ChunkQuery { vector: vector.to_vec(), modality, limit };
		let hits = self.stores.chunks.search(&query).await?;

		self.score_hits(plan, hint_boosts, hits, false).await
	}

	/// Retrieves chunks for required sources directly by source id, bypassing
	/// similarity ranking and the relevance threshold. Guarantees forced
	/// citations are available to the generator even at low similarity.
	pub(crate) async fn fetch_required(
		&self,
		plan: &RetrievalPlan,
		hint_boosts: &HashMap<Uuid, f32>,
		required_source_ids: &[Uuid],
	) -> Result<Vec<Candidate>> {
		if required_source_ids.is_empty() {
			return Ok(Vec::new());
		}

		let hits = self
			.stores
			.chunks
			.fetch_by_sources(required_source_ids, self.cfg.retrieval.required_per_source)
			.await?;

		self.score_hits(plan, hint_boosts, hits, true).await
	}

	async fn score_hits(
		&self,
		plan: &RetrievalPlan,
		hint_boosts: &HashMap<Uuid, f32>,
		hits: Vec<ChunkHit>,
		required: bool,
	) -> Result<Vec<Candidate>> {
		if hits.is_empty() {
			return Ok(Vec::new());
		}

		let source_ids: Vec<Uuid> = {
			let mut seen = HashSet::new();

			hits.iter().map(|hit| hit.chunk.source_id).filter(|id| seen.insert(*id)).collect()
		};
		let learned = self.stores.boosts.boosts_for(&source_ids).await?;
		let affinities = self.stores.boosts.affinities_for(&source_ids, &plan.topics).await?;
		let terms = query_terms(&plan.query);
		let bounds = boost_bounds(&self.cfg.boosts);
		let retrieval = &self.cfg.retrieval;
		let mut candidates: Vec<Candidate> = hits
			.into_iter()
			.map(|hit| {
				let source_id = hit.chunk.source_id;
				// Learned signal plus the synthetic hint boost, clamped back
				// into bounds so stacked adjustments cannot dominate ranking.
				let boost = bounds.clamp(
					learned.get(&source_id).copied().unwrap_or(0.0)
						+ affinities.get(&source_id).copied().unwrap_or(0.0)
						+ hint_boosts.get(&source_id).copied().unwrap_or(0.0),
				);
				let crop_match = matches_tag(plan.crop.as_deref(), &hit.chunk.crops);
				let region_match = matches_tag(plan.region.as_deref(), &hit.chunk.regions);
				let density = term_density(&terms, &hit.chunk.content);
				let score = hit.similarity
					+ authority_weight(&self.cfg.authority, hit.authority)
					+ boost + if crop_match { retrieval.crop_match_bonus } else { 0.0 }
					+ if region_match { retrieval.region_match_bonus } else { 0.0 }
					+ density * retrieval.term_density_weight;

				Candidate {
					hit,
					score,
					rank: 0,
					boost,
					crop_match,
					region_match,
					term_density: density,
					required,
				}
			})
			.collect();

		sort_and_rank(&mut candidates);

		Ok(candidates)
	}
}

/// Merges per-modality result lists into one ranked list.
pub(crate) fn merge_ranked(text: Vec<Candidate>, image: Vec<Candidate>) -> Vec<Candidate> {
	let mut merged = text;

	merged.extend(image);
	sort_and_rank(&mut merged);

	merged
}

pub(crate) fn sort_and_rank(candidates: &mut [Candidate]) {
	candidates.sort_by(|a, b| cmp_f32_desc(a.score, b.score));

	for (idx, candidate) in candidates.iter_mut().enumerate() {
		candidate.rank = idx as u32 + 1;
	}
}

pub(crate) fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

fn matches_tag(tag: Option<&str>, values: &[String]) -> bool {
	let Some(tag) = tag else {
		return false;
	};

	values.iter().any(|value| normalize_tag(value) == tag)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn descending_sort_pushes_nan_last() {
		let mut values = [0.2, f32::NAN, 0.9, 0.5];

		values.sort_by(|a, b| cmp_f32_desc(*a, *b));

		assert_eq!(values[0], 0.9);
		assert_eq!(values[1], 0.5);
		assert_eq!(values[2], 0.2);
		assert!(values[3].is_nan());
	}

	#[test]
	fn tag_matching_is_case_insensitive() {
		let values = vec!["Corn".to_string(), "soybean".to_string()];

		assert!(matches_tag(Some("corn"), &values));
		assert!(!matches_tag(Some("wheat"), &values));
		assert!(!matches_tag(None, &values));
	}
}
