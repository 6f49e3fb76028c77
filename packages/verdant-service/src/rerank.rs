use std::time::Duration;

use crate::{
	RankerProvider, VerdantService, authority_weight,
	search::{Candidate, sort_and_rank},
};
use verdant_config::{AuthorityWeights, Retrieval};
use verdant_providers::ranker::FeatureRow;

impl VerdantService {
	/// Second-stage ML re-scoring with a hard fail-open contract: an
	/// unconfigured endpoint, an empty candidate list, a call error, a
	/// timeout, or a malformed response all yield `None`, and callers keep
	/// the hybrid order. `Some` preserves 1:1 index correspondence with the
	/// input before the descending re-sort.
	pub(crate) async fn rerank(&self, candidates: &[Candidate]) -> Option<Vec<Candidate>> {
		let cfg = self.cfg.providers.ranker.as_ref()?;

		if candidates.is_empty() {
			return None;
		}

		let rows = feature_rows(&self.cfg.retrieval, &self.cfg.authority, candidates);
		let call = self.providers.ranker.rank(cfg, &rows);
		let scores = match tokio::time::timeout(Duration::from_millis(cfg.timeout_ms), call).await {
			Ok(Ok(scores)) => scores,
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "Ranking endpoint failed; keeping hybrid order.");

				return None;
			},
			Err(_) => {
				tracing::warn!(
					timeout_ms = cfg.timeout_ms,
					"Ranking call timed out; keeping hybrid order."
				);

				return None;
			},
		};

		if scores.len() != candidates.len() {
			tracing::warn!(
				expected = candidates.len(),
				got = scores.len(),
				"Ranking response row count mismatch; keeping hybrid order."
			);

			return None;
		}
		if scores.iter().any(|score| !score.is_finite()) {
			tracing::warn!("Ranking response carried a non-finite score; keeping hybrid order.");

			return None;
		}

		let mut out = candidates.to_vec();

		for (candidate, score) in out.iter_mut().zip(&scores) {
			candidate.score = *score;
		}

		sort_and_rank(&mut out);

		Some(out)
	}
}

/// One feature row per candidate, in the fixed column order the ranking model
/// was trained with: similarity, rank score, authority score, boost, crop
/// match, term density, normalized position.
pub(crate) fn feature_rows(
	retrieval: &Retrieval,
	authority: &AuthorityWeights,
	candidates: &[Candidate],
) -> Vec<FeatureRow> {
	let cap = retrieval.max_feature_position.max(1) as f32;

	candidates
		.iter()
		.map(|candidate| {
			let position = (candidate.hit.chunk.position.max(0) as f32).min(cap);

			[
				candidate.hit.similarity,
				candidate.score,
				authority_weight(authority, candidate.hit.authority),
				candidate.boost,
				if candidate.crop_match { 1.0 } else { 0.0 },
				candidate.term_density,
				position / cap,
			]
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use time::OffsetDateTime;
	use uuid::Uuid;

	use super::*;
	use verdant_domain::authority::AuthorityClass;
	use verdant_storage::models::{ChunkHit, KnowledgeChunk, Modality};

	fn candidate(similarity: f32, position: i32) -> Candidate {
		Candidate {
			hit: ChunkHit {
				chunk: KnowledgeChunk {
					chunk_id: Uuid::new_v4(),
					source_id: Uuid::new_v4(),
					modality: Modality::Text,
					content: "chunk".to_string(),
					crops: vec![],
					regions: vec![],
					topics: vec![],
					position,
					created_at: OffsetDateTime::UNIX_EPOCH,
				},
				source_title: "Guide".to_string(),
				authority: AuthorityClass::Extension,
				similarity,
			},
			score: similarity + 0.1,
			rank: 1,
			boost: 0.05,
			crop_match: true,
			region_match: false,
			term_density: 0.5,
			required: false,
		}
	}

	#[test]
	fn feature_rows_follow_the_training_column_order() {
		let retrieval = Retrieval::default();
		let weights = AuthorityWeights::default();
		let rows = feature_rows(&retrieval, &weights, &[candidate(0.8, 4)]);

		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0][0], 0.8);
		assert!((rows[0][1] - 0.9).abs() < 1e-6);
		assert_eq!(rows[0][2], weights.extension);
		assert_eq!(rows[0][3], 0.05);
		assert_eq!(rows[0][4], 1.0);
		assert_eq!(rows[0][5], 0.5);
		assert!((rows[0][6] - 0.4).abs() < 1e-6);
	}

	#[test]
	fn positions_cap_before_normalization() {
		let retrieval = Retrieval::default();
		let weights = AuthorityWeights::default();
		let rows = feature_rows(&retrieval, &weights, &[candidate(0.8, 40)]);

		assert_eq!(rows[0][6], 1.0);
	}
}
