use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub authority: AuthorityWeights,
	#[serde(default)]
	pub boosts: Boosts,
	#[serde(default)]
	pub generation: Generation,
	#[serde(default)]
	pub feedback: Feedback,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	/// Optional second-stage ranking model. Absent means the reranker is
	/// unconfigured and hybrid order is always kept.
	pub ranker: Option<RankerProviderConfig>,
	pub llm: LlmProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct RankerProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub text_limit: u32,
	pub image_limit: u32,
	/// Chunks fetched per required source when forcing inclusion.
	pub required_per_source: u32,
	pub relevance_threshold: f32,
	pub token_budget: u32,
	pub chars_per_token: u32,
	pub crop_match_bonus: f32,
	pub region_match_bonus: f32,
	pub term_density_weight: f32,
	/// Synthetic boost applied to sources resolved from title hints.
	pub hint_boost: f32,
	/// Chunk positions are capped here before normalization in the ranking
	/// feature row.
	pub max_feature_position: u32,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			text_limit: 12,
			image_limit: 6,
			required_per_source: 2,
			relevance_threshold: 0.25,
			token_budget: 8_000,
			chars_per_token: 4,
			crop_match_bonus: 0.08,
			region_match_bonus: 0.04,
			term_density_weight: 0.05,
			hint_boost: 0.2,
			max_feature_position: 10,
		}
	}
}

/// Additive ranking weight per authority tier. Validation keeps these
/// non-increasing from government down to other.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthorityWeights {
	pub government: f32,
	pub extension: f32,
	pub research: f32,
	pub manufacturer: f32,
	pub retailer: f32,
	pub other: f32,
}
impl Default for AuthorityWeights {
	fn default() -> Self {
		Self {
			government: 0.15,
			extension: 0.12,
			research: 0.09,
			manufacturer: 0.05,
			retailer: 0.02,
			other: 0.0,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Boosts {
	pub min: f32,
	pub max: f32,
	/// Per-signal-unit delta applied to cited sources.
	pub increment: f32,
	/// Flat reward for sources the generator overlooked on negative feedback.
	pub missed_source_increment: f32,
	pub missed_source_limit: u32,
}
impl Default for Boosts {
	fn default() -> Self {
		Self {
			min: -0.5,
			max: 0.5,
			increment: 0.05,
			missed_source_increment: 0.02,
			missed_source_limit: 3,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Generation {
	pub max_attempts: u32,
}
impl Default for Generation {
	fn default() -> Self {
		Self { max_attempts: 2 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Feedback {
	pub sustained_view_secs: u32,
	pub poll_interval_ms: u64,
	pub claim_lease_seconds: i64,
	pub claim_batch_size: u32,
	pub base_backoff_ms: i64,
	pub max_backoff_ms: i64,
}
impl Default for Feedback {
	fn default() -> Self {
		Self {
			sustained_view_secs: 30,
			poll_interval_ms: 500,
			claim_lease_seconds: 30,
			claim_batch_size: 16,
			base_backoff_ms: 500,
			max_backoff_ms: 30_000,
		}
	}
}
