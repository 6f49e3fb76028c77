pub mod assemble;
pub mod feedback;
pub mod generate;
pub mod hints;
pub mod recommend;
pub mod rerank;
pub mod search;

mod error;

pub use error::{Error, Result};

use std::sync::Arc;

use serde_json::Value;

use verdant_config::{
	AuthorityWeights, Config, EmbeddingProviderConfig, LlmProviderConfig, RankerProviderConfig,
};
use verdant_domain::{authority::AuthorityClass, boost::BoostBounds};
use verdant_providers::{embedding, llm, ranker, ranker::FeatureRow};
use verdant_storage::stores::{
	AuditStore, BoostStore, BoxFuture, ChunkStore, FeedbackQueue, RecommendationStore,
};

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, verdant_providers::Result<Vec<Vec<f32>>>>;
}

pub trait RankerProvider
where
	Self: Send + Sync,
{
	fn rank<'a>(
		&'a self,
		cfg: &'a RankerProviderConfig,
		rows: &'a [FeatureRow],
	) -> BoxFuture<'a, verdant_providers::Result<Vec<f32>>>;
}

pub trait LlmProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, verdant_providers::Result<String>>;
}

struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, verdant_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}

impl RankerProvider for DefaultProviders {
	fn rank<'a>(
		&'a self,
		cfg: &'a RankerProviderConfig,
		rows: &'a [FeatureRow],
	) -> BoxFuture<'a, verdant_providers::Result<Vec<f32>>> {
		Box::pin(ranker::rank(cfg, rows))
	}
}

impl LlmProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, verdant_providers::Result<String>> {
		Box::pin(llm::complete(cfg, messages))
	}
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub ranker: Arc<dyn RankerProvider>,
	pub llm: Arc<dyn LlmProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		ranker: Arc<dyn RankerProvider>,
		llm: Arc<dyn LlmProvider>,
	) -> Self {
		Self { embedding, ranker, llm }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), ranker: provider.clone(), llm: provider }
	}
}

/// Injected persistence seams. Everything the pipeline reads or writes goes
/// through these trait objects, so tests run against in-memory stores.
#[derive(Clone)]
pub struct Stores {
	pub chunks: Arc<dyn ChunkStore>,
	pub boosts: Arc<dyn BoostStore>,
	pub audits: Arc<dyn AuditStore>,
	pub recommendations: Arc<dyn RecommendationStore>,
	pub feedback: Arc<dyn FeedbackQueue>,
}

pub struct VerdantService {
	pub cfg: Config,
	pub stores: Stores,
	pub providers: Providers,
}
impl VerdantService {
	pub fn new(cfg: Config, stores: Stores) -> Self {
		Self { cfg, stores, providers: Providers::default() }
	}

	pub fn with_providers(cfg: Config, stores: Stores, providers: Providers) -> Self {
		Self { cfg, stores, providers }
	}
}

pub(crate) fn authority_weight(weights: &AuthorityWeights, class: AuthorityClass) -> f32 {
	match class {
		AuthorityClass::Government => weights.government,
		AuthorityClass::Extension => weights.extension,
		AuthorityClass::Research => weights.research,
		AuthorityClass::Manufacturer => weights.manufacturer,
		AuthorityClass::Retailer => weights.retailer,
		AuthorityClass::Other => weights.other,
	}
}

pub(crate) fn boost_bounds(cfg: &verdant_config::Boosts) -> BoostBounds {
	BoostBounds { min: cfg.min, max: cfg.max }
}

/// Hash of the ranking-relevant configuration, stored on every audit so
/// offline scoring can group comparable retrievals.
pub(crate) fn config_hash(cfg: &Config) -> String {
	let snapshot = serde_json::json!({
		"providers": {
			"embedding": {
				"provider_id": cfg.providers.embedding.provider_id,
				"model": cfg.providers.embedding.model,
				"dimensions": cfg.providers.embedding.dimensions,
			},
			"ranker": cfg.providers.ranker.as_ref().map(|ranker| {
				serde_json::json!({ "provider_id": ranker.provider_id, "model": ranker.model })
			}),
			"llm": {
				"provider_id": cfg.providers.llm.provider_id,
				"model": cfg.providers.llm.model,
			},
		},
		"retrieval": {
			"relevance_threshold": cfg.retrieval.relevance_threshold,
			"token_budget": cfg.retrieval.token_budget,
			"crop_match_bonus": cfg.retrieval.crop_match_bonus,
			"region_match_bonus": cfg.retrieval.region_match_bonus,
			"term_density_weight": cfg.retrieval.term_density_weight,
			"hint_boost": cfg.retrieval.hint_boost,
		},
		"authority": {
			"government": cfg.authority.government,
			"extension": cfg.authority.extension,
			"research": cfg.authority.research,
			"manufacturer": cfg.authority.manufacturer,
			"retailer": cfg.authority.retailer,
			"other": cfg.authority.other,
		},
		"boosts": {
			"min": cfg.boosts.min,
			"max": cfg.boosts.max,
			"increment": cfg.boosts.increment,
		},
	});
	let raw = serde_json::to_vec(&snapshot).unwrap_or_default();

	blake3::hash(&raw).to_hex().to_string()
}
