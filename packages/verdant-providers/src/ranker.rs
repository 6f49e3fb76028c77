use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// Fixed feature-row layout for the ranking endpoint:
/// `[similarity, rank_score, authority_score, boost, crop_match, term_density,
/// normalized_position]`. Column order is part of the external contract and
/// must match the deployed model's training columns.
pub const FEATURE_COLUMNS: usize = 7;

pub type FeatureRow = [f32; FEATURE_COLUMNS];

/// Scores one batch of candidate feature rows. The response must carry
/// exactly one numeric prediction per request row, in request order; anything
/// else is an `InvalidResponse` for the caller's fail-open path to absorb.
pub async fn rank(
	cfg: &verdant_config::RankerProviderConfig,
	rows: &[FeatureRow],
) -> Result<Vec<f32>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({ "model": cfg.model, "instances": rows });
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_rank_response(json, rows.len())
}

fn parse_rank_response(json: Value, row_count: usize) -> Result<Vec<f32>> {
	let predictions = json
		.get("predictions")
		.or_else(|| json.get("scores"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::response("Rank response is missing predictions array."))?;

	if predictions.len() != row_count {
		return Err(Error::response(format!(
			"Rank response carries {} predictions for {row_count} rows.",
			predictions.len()
		)));
	}

	let mut scores = Vec::with_capacity(predictions.len());

	for value in predictions {
		let number = value
			.as_f64()
			.filter(|number| number.is_finite())
			.ok_or_else(|| Error::response("Rank prediction must be a finite number."))?;

		scores.push(number as f32);
	}

	Ok(scores)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accepts_exactly_one_score_per_row() {
		let json = serde_json::json!({ "predictions": [0.9, 0.2, 0.4] });
		let scores = parse_rank_response(json, 3).expect("parse failed");

		assert_eq!(scores, vec![0.9, 0.2, 0.4]);
	}

	#[test]
	fn rejects_row_count_mismatch() {
		let json = serde_json::json!({ "predictions": [0.9, 0.2] });

		assert!(parse_rank_response(json, 3).is_err());
	}

	#[test]
	fn rejects_non_numeric_predictions() {
		let json = serde_json::json!({ "predictions": [0.9, "high", 0.4] });

		assert!(parse_rank_response(json, 3).is_err());
	}
}
