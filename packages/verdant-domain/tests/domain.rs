use verdant_domain::{
	authority::AuthorityClass,
	boost::BoostBounds,
	plan::{DiagnosticInput, build_plan},
	recommendation::{MAX_CONFIDENCE, MIN_CONFIDENCE},
	signal::{FeedbackParams, compute_signal},
	tokens::estimate_tokens,
};

#[test]
fn plan_for_field_symptoms_covers_topic_and_hints() {
	let input = DiagnosticInput {
		kind: "symptom".to_string(),
		description: Some("Severe yellowing on lower leaves, possible nitrogen issue".to_string()),
		crop: Some("corn".to_string()),
		region: Some("Iowa".to_string()),
		growth_stage: Some("V6".to_string()),
		..Default::default()
	};
	let plan = build_plan(&input);

	assert!(plan.topics.contains(&"nutrient_deficiency".to_string()));
	assert!(plan.title_hints.contains(&"nutrient deficiency".to_string()));
	assert!(plan.query.contains("growth stage: V6"));
}

#[test]
fn signal_table_matches_the_feedback_contract() {
	let cases: [(FeedbackParams, i8); 5] = [
		(
			FeedbackParams {
				outcome_success: Some(true),
				helpful: Some(false),
				rating: Some(1),
				accuracy: Some(1),
			},
			2,
		),
		(
			FeedbackParams {
				outcome_success: None,
				helpful: Some(true),
				rating: Some(5),
				accuracy: Some(5),
			},
			2,
		),
		(
			FeedbackParams {
				outcome_success: None,
				helpful: Some(false),
				rating: Some(1),
				accuracy: Some(2),
			},
			-2,
		),
		(
			FeedbackParams {
				outcome_success: None,
				helpful: Some(true),
				rating: Some(1),
				accuracy: Some(3),
			},
			0,
		),
		(FeedbackParams::default(), 0),
	];

	for (params, expected) in cases {
		assert_eq!(compute_signal(&params), expected, "params {params:?}");
	}
}

#[test]
fn boost_bounds_survive_hostile_sequences() {
	let bounds = BoostBounds { min: -0.5, max: 0.5 };
	let mut boost = 0.0_f32;

	for _ in 0..1_000 {
		boost = bounds.apply(boost, 0.05);
	}

	assert_eq!(boost, 0.5);

	for _ in 0..1_000 {
		boost = bounds.apply(boost, -0.05);
	}

	assert_eq!(boost, -0.5);
}

#[test]
fn confidence_bounds_are_inside_the_unit_interval() {
	assert!(MIN_CONFIDENCE > 0.0 && MAX_CONFIDENCE < 1.0 && MIN_CONFIDENCE < MAX_CONFIDENCE);
}

#[test]
fn token_estimate_scales_with_content_length() {
	let short = estimate_tokens("short text", 4);
	let long = estimate_tokens(&"long text ".repeat(100), 4);

	assert!(long > short);
	assert!(AuthorityClass::parse("extension").tier() < AuthorityClass::parse("other").tier());
}
