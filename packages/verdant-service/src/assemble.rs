use std::collections::HashSet;

use ahash::AHashSet;
use uuid::Uuid;

use crate::search::Candidate;
use verdant_config::Retrieval;
use verdant_domain::tokens::estimate_tokens;

/// The token-budgeted context handed to the generator. An empty context is a
/// first-class "insufficient knowledge" signal; callers must skip generation
/// entirely instead of invoking the model ungrounded.
#[derive(Clone, Debug)]
pub struct AssembledContext {
	pub chunks: Vec<Candidate>,
	pub total_chunks: u32,
	pub total_tokens: u32,
	pub relevance_threshold: f32,
}
impl AssembledContext {
	pub fn chunk_ids(&self) -> HashSet<Uuid> {
		self.chunks.iter().map(|candidate| candidate.hit.chunk.chunk_id).collect()
	}
}

/// Packs ranked and force-fetched candidates into the token budget: dedupe by
/// chunk id keeping the highest-ranked copy, drop sub-threshold chunks unless
/// their source is required, then add required-source chunks first and the
/// rest in rank order until the budget would be exceeded.
pub(crate) fn assemble(
	ranked: Vec<Candidate>,
	required_fetched: Vec<Candidate>,
	required_source_ids: &HashSet<Uuid>,
	cfg: &Retrieval,
) -> AssembledContext {
	// Ranked copies come first so a chunk that also arrived via the forced
	// fetch keeps its ranked score.
	let mut merged = ranked;

	merged.extend(required_fetched);

	let mut seen = AHashSet::new();
	let mut unique: Vec<Candidate> = merged
		.into_iter()
		.filter(|candidate| seen.insert(candidate.hit.chunk.chunk_id))
		.collect();

	for candidate in &mut unique {
		if required_source_ids.contains(&candidate.hit.chunk.source_id) {
			candidate.required = true;
		}
	}

	unique.retain(|candidate| {
		candidate.required || candidate.hit.similarity >= cfg.relevance_threshold
	});
	// Stable sort: required sources first, rank order preserved within each
	// group.
	unique.sort_by_key(|candidate| !candidate.required);

	let mut chunks = Vec::new();
	let mut total_tokens = 0_u32;

	for candidate in unique {
		let tokens = estimate_tokens(&candidate.hit.chunk.content, cfg.chars_per_token);

		if total_tokens + tokens > cfg.token_budget {
			break;
		}

		total_tokens += tokens;
		chunks.push(candidate);
	}

	AssembledContext {
		total_chunks: chunks.len() as u32,
		chunks,
		total_tokens,
		relevance_threshold: cfg.relevance_threshold,
	}
}

#[cfg(test)]
mod tests {
	use time::OffsetDateTime;

	use super::*;
	use verdant_domain::authority::AuthorityClass;
	use verdant_storage::models::{ChunkHit, KnowledgeChunk, Modality};

	fn candidate(chunk_id: Uuid, source_id: Uuid, similarity: f32, content: &str) -> Candidate {
		Candidate {
			hit: ChunkHit {
				chunk: KnowledgeChunk {
					chunk_id,
					source_id,
					modality: Modality::Text,
					content: content.to_string(),
					crops: vec![],
					regions: vec![],
					topics: vec![],
					position: 0,
					created_at: OffsetDateTime::UNIX_EPOCH,
				},
				source_title: "Guide".to_string(),
				authority: AuthorityClass::Extension,
				similarity,
			},
			score: similarity,
			rank: 0,
			boost: 0.0,
			crop_match: false,
			region_match: false,
			term_density: 0.0,
			required: false,
		}
	}

	fn cfg() -> Retrieval {
		Retrieval { token_budget: 20, chars_per_token: 4, relevance_threshold: 0.25, ..Default::default() }
	}

	#[test]
	fn duplicate_chunk_ids_collapse_to_the_ranked_copy() {
		let chunk_id = Uuid::new_v4();
		let source_id = Uuid::new_v4();
		let ranked = vec![candidate(chunk_id, source_id, 0.9, "ranked copy")];
		let mut forced = candidate(chunk_id, source_id, 0.0, "forced copy");

		forced.required = true;

		let required: HashSet<Uuid> = [source_id].into_iter().collect();
		let context = assemble(ranked, vec![forced], &required, &cfg());

		assert_eq!(context.total_chunks, 1);
		assert_eq!(context.chunks[0].hit.similarity, 0.9);
	}

	#[test]
	fn sub_threshold_chunks_survive_only_for_required_sources() {
		let required_source = Uuid::new_v4();
		let ranked = vec![
			candidate(Uuid::new_v4(), Uuid::new_v4(), 0.1, "weak"),
			candidate(Uuid::new_v4(), required_source, 0.1, "weak but required"),
		];
		let required: HashSet<Uuid> = [required_source].into_iter().collect();
		let context = assemble(ranked, vec![], &required, &cfg());

		assert_eq!(context.total_chunks, 1);
		assert_eq!(context.chunks[0].hit.chunk.source_id, required_source);
		assert!(context.chunks[0].required);
	}

	#[test]
	fn token_budget_is_never_exceeded() {
		let source_id = Uuid::new_v4();
		let ranked = vec![
			candidate(Uuid::new_v4(), source_id, 0.9, "twelve chars"),
			candidate(Uuid::new_v4(), source_id, 0.8, "twelve chars"),
			candidate(Uuid::new_v4(), source_id, 0.7, "twelve chars"),
			candidate(Uuid::new_v4(), source_id, 0.6, "twelve chars"),
			candidate(Uuid::new_v4(), source_id, 0.5, "twelve chars"),
			candidate(Uuid::new_v4(), source_id, 0.4, "twelve chars"),
			candidate(Uuid::new_v4(), source_id, 0.3, "twelve chars"),
		];
		let context = assemble(ranked, vec![], &HashSet::new(), &cfg());

		assert!(context.total_tokens <= 20);
		assert_eq!(context.total_chunks, 6);
	}

	#[test]
	fn required_sources_pack_before_higher_ranked_chunks() {
		let required_source = Uuid::new_v4();
		let ranked = vec![
			candidate(Uuid::new_v4(), Uuid::new_v4(), 0.95, "top ranked"),
			candidate(Uuid::new_v4(), required_source, 0.3, "required"),
		];
		let required: HashSet<Uuid> = [required_source].into_iter().collect();
		let context = assemble(ranked, vec![], &required, &cfg());

		assert_eq!(context.chunks[0].hit.chunk.source_id, required_source);
	}

	#[test]
	fn empty_input_yields_the_empty_signal() {
		let context = assemble(vec![], vec![], &HashSet::new(), &cfg());

		assert_eq!(context.total_chunks, 0);
		assert_eq!(context.total_tokens, 0);
	}
}
