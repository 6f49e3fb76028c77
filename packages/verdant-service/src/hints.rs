use std::collections::HashMap;

use uuid::Uuid;

use crate::{Result, VerdantService};
use verdant_storage::stores::ChunkStore;

/// Sources resolved from title hints. Each becomes a required retrieval
/// target and carries the synthetic hint boost so it also surfaces in ranked
/// output — deliberate redundancy in case forced inclusion is bypassed
/// downstream.
#[derive(Clone, Debug, Default)]
pub struct ResolvedHints {
	pub required_source_ids: Vec<Uuid>,
	pub boosts: HashMap<Uuid, f32>,
}

impl VerdantService {
	pub(crate) async fn resolve_hints(&self, title_hints: &[String]) -> Result<ResolvedHints> {
		if title_hints.is_empty() {
			return Ok(ResolvedHints::default());
		}

		let sources = self.stores.chunks.sources_by_title(title_hints).await?;
		let mut resolved = ResolvedHints::default();

		for source in sources {
			if resolved.boosts.contains_key(&source.source_id) {
				continue;
			}

			tracing::debug!(source_id = %source.source_id, title = %source.title, "Resolved title hint to a required source.");
			resolved.required_source_ids.push(source.source_id);
			resolved.boosts.insert(source.source_id, self.cfg.retrieval.hint_boost);
		}

		Ok(resolved)
	}
}
