mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	AuthorityWeights, Boosts, Config, EmbeddingProviderConfig, Feedback, Generation,
	LlmProviderConfig, Postgres, Providers, RankerProviderConfig, Retrieval, Service, Storage,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}

	if cfg.providers.embedding.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "Provider embedding api_key must be non-empty.".to_string(),
		});
	}
	if cfg.providers.llm.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "Provider llm api_key must be non-empty.".to_string(),
		});
	}
	if let Some(ranker) = cfg.providers.ranker.as_ref() {
		if ranker.api_key.trim().is_empty() {
			return Err(Error::Validation {
				message: "Provider ranker api_key must be non-empty.".to_string(),
			});
		}
		if ranker.timeout_ms == 0 {
			return Err(Error::Validation {
				message: "providers.ranker.timeout_ms must be greater than zero.".to_string(),
			});
		}
	}

	if !cfg.retrieval.relevance_threshold.is_finite()
		|| !(0.0..=1.0).contains(&cfg.retrieval.relevance_threshold)
	{
		return Err(Error::Validation {
			message: "retrieval.relevance_threshold must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.retrieval.text_limit == 0 {
		return Err(Error::Validation {
			message: "retrieval.text_limit must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.token_budget == 0 {
		return Err(Error::Validation {
			message: "retrieval.token_budget must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.chars_per_token == 0 {
		return Err(Error::Validation {
			message: "retrieval.chars_per_token must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.required_per_source == 0 {
		return Err(Error::Validation {
			message: "retrieval.required_per_source must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.max_feature_position == 0 {
		return Err(Error::Validation {
			message: "retrieval.max_feature_position must be greater than zero.".to_string(),
		});
	}

	for (path, value) in [
		("retrieval.crop_match_bonus", cfg.retrieval.crop_match_bonus),
		("retrieval.region_match_bonus", cfg.retrieval.region_match_bonus),
		("retrieval.term_density_weight", cfg.retrieval.term_density_weight),
		("retrieval.hint_boost", cfg.retrieval.hint_boost),
	] {
		if !value.is_finite() || value < 0.0 {
			return Err(Error::Validation {
				message: format!("{path} must be zero or greater."),
			});
		}
	}

	let tiers = [
		("authority.government", cfg.authority.government),
		("authority.extension", cfg.authority.extension),
		("authority.research", cfg.authority.research),
		("authority.manufacturer", cfg.authority.manufacturer),
		("authority.retailer", cfg.authority.retailer),
		("authority.other", cfg.authority.other),
	];

	for (path, value) in tiers {
		if !value.is_finite() || value < 0.0 {
			return Err(Error::Validation {
				message: format!("{path} must be zero or greater."),
			});
		}
	}
	for window in tiers.windows(2) {
		if window[1].1 > window[0].1 {
			return Err(Error::Validation {
				message: format!(
					"Authority weights must be non-increasing: {} exceeds {}.",
					window[1].0, window[0].0
				),
			});
		}
	}

	if !cfg.boosts.min.is_finite() || !cfg.boosts.max.is_finite() || cfg.boosts.min >= cfg.boosts.max
	{
		return Err(Error::Validation {
			message: "boosts.min must be less than boosts.max.".to_string(),
		});
	}
	if !cfg.boosts.increment.is_finite() || cfg.boosts.increment <= 0.0 {
		return Err(Error::Validation {
			message: "boosts.increment must be greater than zero.".to_string(),
		});
	}
	if !cfg.boosts.missed_source_increment.is_finite() || cfg.boosts.missed_source_increment < 0.0 {
		return Err(Error::Validation {
			message: "boosts.missed_source_increment must be zero or greater.".to_string(),
		});
	}

	if cfg.generation.max_attempts == 0 {
		return Err(Error::Validation {
			message: "generation.max_attempts must be greater than zero.".to_string(),
		});
	}

	if cfg.feedback.poll_interval_ms == 0 {
		return Err(Error::Validation {
			message: "feedback.poll_interval_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.feedback.claim_lease_seconds <= 0 {
		return Err(Error::Validation {
			message: "feedback.claim_lease_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.feedback.claim_batch_size == 0 {
		return Err(Error::Validation {
			message: "feedback.claim_batch_size must be greater than zero.".to_string(),
		});
	}
	if cfg.feedback.base_backoff_ms <= 0 || cfg.feedback.max_backoff_ms < cfg.feedback.base_backoff_ms
	{
		return Err(Error::Validation {
			message: "feedback.max_backoff_ms must be at least feedback.base_backoff_ms."
				.to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	// A ranker section without an endpoint is the same as no ranker at all;
	// downstream treats None as the unconfigured fail-open case.
	if cfg
		.providers
		.ranker
		.as_ref()
		.map(|ranker| ranker.api_base.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.providers.ranker = None;
	}
}
