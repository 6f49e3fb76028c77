use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Raw diagnostic request as submitted upstream.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DiagnosticInput {
	#[serde(rename = "type")]
	pub kind: String,
	pub description: Option<String>,
	pub lab_data: Option<BTreeMap<String, serde_json::Value>>,
	pub image_url: Option<String>,
	pub crop: Option<String>,
	#[serde(alias = "location")]
	pub region: Option<String>,
	pub growth_stage: Option<String>,
}

/// Retrieval plan derived from one diagnostic input. Immutable, never
/// persisted; built fresh per request.
#[derive(Clone, Debug)]
pub struct RetrievalPlan {
	pub query: String,
	pub topics: Vec<String>,
	pub title_hints: Vec<String>,
	pub crop: Option<String>,
	pub region: Option<String>,
	pub growth_stage: Option<String>,
}

struct TopicRule {
	topic: &'static str,
	terms: &'static [&'static str],
}

const TOPIC_RULES: &[TopicRule] = &[
	TopicRule {
		topic: "nutrient_deficiency",
		terms: &[
			"yellowing",
			"chlorosis",
			"chlorotic",
			"interveinal",
			"stunted",
			"pale",
			"purpling",
			"necrosis",
			"deficiency",
			"deficient",
			"nitrogen",
			"phosphorus",
			"potassium",
			"magnesium",
			"sulfur",
			"zinc",
			"iron",
			"manganese",
			"boron",
			"ph",
		],
	},
	TopicRule {
		topic: "disease",
		terms: &[
			"blight",
			"rust",
			"mildew",
			"rot",
			"lesion",
			"lesions",
			"wilt",
			"wilting",
			"canker",
			"scab",
			"smut",
			"mosaic",
			"damping",
			"fungus",
			"fungal",
			"bacterial",
			"spots",
			"spotting",
		],
	},
	TopicRule {
		topic: "pest",
		terms: &[
			"aphid",
			"aphids",
			"beetle",
			"beetles",
			"borer",
			"larva",
			"larvae",
			"caterpillar",
			"mite",
			"mites",
			"thrips",
			"weevil",
			"grub",
			"maggot",
			"webbing",
			"chewed",
			"holes",
			"insect",
			"insects",
		],
	},
	TopicRule {
		topic: "environmental_stress",
		terms: &[
			"drought",
			"frost",
			"freeze",
			"heat",
			"scorch",
			"waterlogged",
			"waterlogging",
			"flooding",
			"hail",
			"wind",
			"salinity",
			"compaction",
			"sunscald",
		],
	},
];

struct TitleHint {
	trigger: &'static str,
	fragment: &'static str,
}

/// Known authoritative-document title fragments keyed by the term that makes
/// them relevant. Matching sources become required retrieval targets.
const TITLE_HINTS: &[TitleHint] = &[
	TitleHint { trigger: "nitrogen", fragment: "nutrient deficiency" },
	TitleHint { trigger: "yellowing", fragment: "nutrient deficiency" },
	TitleHint { trigger: "chlorosis", fragment: "nutrient deficiency" },
	TitleHint { trigger: "deficiency", fragment: "nutrient deficiency" },
	TitleHint { trigger: "ph", fragment: "soil fertility" },
	TitleHint { trigger: "fertilizer", fragment: "nutrient management" },
	TitleHint { trigger: "blight", fragment: "disease management" },
	TitleHint { trigger: "fungicide", fragment: "disease management" },
	TitleHint { trigger: "rust", fragment: "disease management" },
	TitleHint { trigger: "aphid", fragment: "pest management" },
	TitleHint { trigger: "insecticide", fragment: "pest management" },
	TitleHint { trigger: "borer", fragment: "pest management" },
	TitleHint { trigger: "drought", fragment: "irrigation" },
	TitleHint { trigger: "irrigation", fragment: "irrigation" },
];

const MIN_TERM_CHARS: usize = 3;

/// Builds the retrieval plan for one diagnostic input. Pure and
/// deterministic; always succeeds, even on an empty input.
pub fn build_plan(input: &DiagnosticInput) -> RetrievalPlan {
	let mut parts = Vec::new();

	if let Some(description) = non_empty(input.description.as_deref()) {
		parts.push(description.to_string());
	}
	if let Some(crop) = non_empty(input.crop.as_deref()) {
		parts.push(format!("crop: {crop}"));
	}
	if let Some(region) = non_empty(input.region.as_deref()) {
		parts.push(format!("region: {region}"));
	}
	if let Some(stage) = non_empty(input.growth_stage.as_deref()) {
		parts.push(format!("growth stage: {stage}"));
	}
	if let Some(lab_data) = input.lab_data.as_ref() {
		for (name, value) in lab_data {
			parts.push(format!("{name}: {}", lab_value_text(value)));
		}
	}

	let query = parts.join("\n");
	let haystack = query.to_lowercase();
	let terms: HashSet<&str> = haystack.unicode_words().collect();
	let mut topics = Vec::new();

	for rule in TOPIC_RULES {
		if rule.terms.iter().any(|term| terms.contains(term)) {
			topics.push(rule.topic.to_string());
		}
	}

	let mut title_hints = Vec::new();
	let mut seen = HashSet::new();

	for hint in TITLE_HINTS {
		if terms.contains(hint.trigger) && seen.insert(hint.fragment) {
			title_hints.push(hint.fragment.to_string());
		}
	}

	RetrievalPlan {
		query,
		topics,
		title_hints,
		crop: input.crop.as_deref().map(normalize_tag),
		region: input.region.as_deref().map(normalize_tag),
		growth_stage: input.growth_stage.clone(),
	}
}

/// Distinct lowercase query terms used for term-density scoring.
pub fn query_terms(query: &str) -> Vec<String> {
	let lowered = query.to_lowercase();
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for word in lowered.unicode_words() {
		if word.len() >= MIN_TERM_CHARS && seen.insert(word.to_string()) {
			out.push(word.to_string());
		}
	}

	out
}

/// Fraction of query terms present in the content, in [0.0, 1.0].
pub fn term_density(terms: &[String], content: &str) -> f32 {
	if terms.is_empty() {
		return 0.0;
	}

	let lowered = content.to_lowercase();
	let content_terms: HashSet<&str> = lowered.unicode_words().collect();
	let matched = terms.iter().filter(|term| content_terms.contains(term.as_str())).count();

	matched as f32 / terms.len() as f32
}

pub fn normalize_tag(value: &str) -> String {
	value.trim().to_lowercase()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
	value.map(str::trim).filter(|text| !text.is_empty())
}

fn lab_value_text(value: &serde_json::Value) -> String {
	match value {
		serde_json::Value::String(text) => text.clone(),
		other => other.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn yellowing_description_plans_a_deficiency_topic() {
		let input = DiagnosticInput {
			kind: "symptom".to_string(),
			description: Some("yellowing lower leaves".to_string()),
			crop: Some("corn".to_string()),
			region: Some("Iowa".to_string()),
			..Default::default()
		};
		let plan = build_plan(&input);

		assert!(plan.topics.iter().any(|topic| topic == "nutrient_deficiency"));
		assert!(plan.query.contains("yellowing lower leaves"));
		assert!(plan.query.contains("crop: corn"));
		assert_eq!(plan.crop.as_deref(), Some("corn"));
		assert_eq!(plan.region.as_deref(), Some("iowa"));
	}

	#[test]
	fn lab_data_becomes_query_phrases() {
		let mut lab_data = BTreeMap::new();

		lab_data.insert("pH".to_string(), serde_json::json!(5.8));
		lab_data.insert("nitrogen ppm".to_string(), serde_json::json!("12"));

		let input = DiagnosticInput { lab_data: Some(lab_data), ..Default::default() };
		let plan = build_plan(&input);

		assert!(plan.query.contains("pH: 5.8"));
		assert!(plan.query.contains("nitrogen ppm: 12"));
		assert!(plan.topics.iter().any(|topic| topic == "nutrient_deficiency"));
	}

	#[test]
	fn sparse_input_still_produces_a_plan() {
		let plan = build_plan(&DiagnosticInput::default());

		assert!(plan.query.is_empty());
		assert!(plan.topics.is_empty());
		assert!(plan.title_hints.is_empty());
	}

	#[test]
	fn title_hints_deduplicate_by_fragment() {
		let input = DiagnosticInput {
			description: Some("nitrogen deficiency with yellowing".to_string()),
			..Default::default()
		};
		let plan = build_plan(&input);

		assert_eq!(plan.title_hints, vec!["nutrient deficiency".to_string()]);
	}

	#[test]
	fn term_density_counts_distinct_matches() {
		let terms = query_terms("yellowing lower leaves");

		assert_eq!(terms.len(), 3);
		assert!((term_density(&terms, "Yellowing of the lower canopy") - 2.0 / 3.0).abs() < 1e-6);
		assert_eq!(term_density(&terms, "unrelated text"), 0.0);
		assert_eq!(term_density(&[], "anything"), 0.0);
	}
}
