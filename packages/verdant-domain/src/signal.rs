use serde::{Deserialize, Serialize};

pub const MAX_SIGNAL: i8 = 2;
pub const MIN_SIGNAL: i8 = -2;

const POSITIVE_RATING: u8 = 4;
const NEGATIVE_RATING: u8 = 2;

/// Explicit feedback fields attached to a recommendation.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct FeedbackParams {
	pub outcome_success: Option<bool>,
	pub helpful: Option<bool>,
	pub rating: Option<u8>,
	pub accuracy: Option<u8>,
}

/// Usage telemetry for the implicit feedback variant.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct ImplicitParams {
	pub view_duration_secs: Option<u32>,
	#[serde(default)]
	pub product_click: bool,
	#[serde(default)]
	pub rediagnosis: bool,
}

/// One queued feedback event. Serialized into the outbox payload and decoded
/// by the worker.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FeedbackEvent {
	Explicit {
		#[serde(flatten)]
		params: FeedbackParams,
	},
	Implicit {
		#[serde(flatten)]
		params: ImplicitParams,
	},
}

/// Collapses explicit feedback into one signal in [-2, 2].
///
/// A reported outcome dominates and short-circuits the sub-signals; otherwise
/// helpful/rating/accuracy contribute ±1 each and the sum is clamped.
pub fn compute_signal(params: &FeedbackParams) -> i8 {
	if let Some(success) = params.outcome_success {
		return if success { MAX_SIGNAL } else { MIN_SIGNAL };
	}

	let mut signal = 0_i8;

	if let Some(helpful) = params.helpful {
		signal += if helpful { 1 } else { -1 };
	}

	signal += threshold_signal(params.rating);
	signal += threshold_signal(params.accuracy);

	signal.clamp(MIN_SIGNAL, MAX_SIGNAL)
}

/// Maps usage telemetry onto the same signal scale as [`compute_signal`].
pub fn compute_implicit_signal(params: &ImplicitParams, sustained_view_secs: u32) -> i8 {
	let mut signal = 0_i8;

	if params.view_duration_secs.map(|secs| secs >= sustained_view_secs).unwrap_or(false) {
		signal += 1;
	}
	if params.product_click {
		signal += 1;
	}
	if params.rediagnosis {
		signal -= 1;
	}

	signal.clamp(MIN_SIGNAL, MAX_SIGNAL)
}

fn threshold_signal(value: Option<u8>) -> i8 {
	match value {
		Some(value) if value >= POSITIVE_RATING => 1,
		Some(value) if value <= NEGATIVE_RATING => -1,
		_ => 0,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn outcome_dominates_contradictory_sub_signals() {
		let params = FeedbackParams {
			outcome_success: Some(true),
			helpful: Some(false),
			rating: Some(1),
			accuracy: Some(1),
		};

		assert_eq!(compute_signal(&params), 2);

		let params = FeedbackParams { outcome_success: Some(false), helpful: Some(true), rating: Some(5), accuracy: Some(5) };

		assert_eq!(compute_signal(&params), -2);
	}

	#[test]
	fn additive_signals_cap_at_two() {
		let params = FeedbackParams {
			outcome_success: None,
			helpful: Some(true),
			rating: Some(5),
			accuracy: Some(5),
		};

		assert_eq!(compute_signal(&params), 2);

		let params = FeedbackParams {
			outcome_success: None,
			helpful: Some(false),
			rating: Some(1),
			accuracy: Some(2),
		};

		assert_eq!(compute_signal(&params), -2);
	}

	#[test]
	fn mixed_signals_cancel() {
		let params = FeedbackParams {
			outcome_success: None,
			helpful: Some(true),
			rating: Some(1),
			accuracy: Some(3),
		};

		assert_eq!(compute_signal(&params), 0);
	}

	#[test]
	fn empty_feedback_is_zero() {
		assert_eq!(compute_signal(&FeedbackParams::default()), 0);
	}

	#[test]
	fn implicit_telemetry_maps_to_the_same_scale() {
		let params =
			ImplicitParams { view_duration_secs: Some(45), product_click: true, rediagnosis: false };

		assert_eq!(compute_implicit_signal(&params, 30), 2);

		let params =
			ImplicitParams { view_duration_secs: Some(5), product_click: false, rediagnosis: true };

		assert_eq!(compute_implicit_signal(&params, 30), -1);
		assert_eq!(compute_implicit_signal(&ImplicitParams::default(), 30), 0);
	}
}
