use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_CONFIDENCE: f64 = 0.5;
pub const MAX_CONFIDENCE: f64 = 0.95;
pub const MIN_ACTIONS: usize = 1;
pub const MAX_ACTIONS: usize = 5;
pub const MAX_PRODUCTS: usize = 6;
pub const MIN_SOURCES: usize = 1;
pub const MAX_EXCERPT_CHARS: usize = 500;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
	NutrientDeficiency,
	Disease,
	Pest,
	Environmental,
	Other,
}
impl ConditionType {
	pub fn parse(value: &str) -> Option<Self> {
		match value.trim().to_ascii_lowercase().as_str() {
			"nutrient_deficiency" => Some(Self::NutrientDeficiency),
			"disease" => Some(Self::Disease),
			"pest" => Some(Self::Pest),
			"environmental" => Some(Self::Environmental),
			"other" => Some(Self::Other),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPriority {
	Immediate,
	High,
	Moderate,
	Low,
}
impl ActionPriority {
	pub fn parse(value: &str) -> Option<Self> {
		match value.trim().to_ascii_lowercase().as_str() {
			"immediate" => Some(Self::Immediate),
			"high" => Some(Self::High),
			"moderate" => Some(Self::Moderate),
			"low" => Some(Self::Low),
			_ => None,
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Diagnosis {
	pub condition: String,
	pub condition_type: ConditionType,
	pub confidence: f64,
	pub summary: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RecommendedAction {
	pub instruction: String,
	pub priority: ActionPriority,
	pub citations: Vec<Uuid>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProductSuggestion {
	pub name: String,
	pub purpose: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CitedSource {
	pub chunk_id: Uuid,
	pub relevance: f64,
	pub excerpt: String,
}

/// A recommendation that has passed structural validation. This is the only
/// shape of model output allowed past the generation boundary.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RecommendationOutput {
	pub diagnosis: Diagnosis,
	pub actions: Vec<RecommendedAction>,
	pub products: Vec<ProductSuggestion>,
	pub sources: Vec<CitedSource>,
}
impl RecommendationOutput {
	pub fn cited_chunk_ids(&self) -> Vec<Uuid> {
		let mut seen = HashSet::new();
		let mut out = Vec::new();

		for id in self
			.actions
			.iter()
			.flat_map(|action| action.citations.iter())
			.chain(self.sources.iter().map(|source| &source.chunk_id))
		{
			if seen.insert(*id) {
				out.push(*id);
			}
		}

		out
	}
}

/// One violated field/constraint pair, reported back to the model on retry
/// and carried on the terminal validation error.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Violation {
	pub field: String,
	pub constraint: String,
}
impl Violation {
	fn new(field: impl Into<String>, constraint: impl Into<String>) -> Self {
		Self { field: field.into(), constraint: constraint.into() }
	}
}
impl fmt::Display for Violation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.field, self.constraint)
	}
}

/// Loosely-typed mirror of [`RecommendationOutput`] as the model emits it.
/// Everything is optional so that validation can enumerate all problems at
/// once instead of failing on the first serde mismatch.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RecommendationDraft {
	pub diagnosis: Option<DiagnosisDraft>,
	#[serde(default)]
	pub actions: Vec<ActionDraft>,
	#[serde(default)]
	pub products: Vec<ProductDraft>,
	#[serde(default)]
	pub sources: Vec<SourceDraft>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DiagnosisDraft {
	pub condition: Option<String>,
	pub condition_type: Option<String>,
	pub confidence: Option<f64>,
	pub summary: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ActionDraft {
	pub instruction: Option<String>,
	pub priority: Option<String>,
	#[serde(default)]
	pub citations: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProductDraft {
	pub name: Option<String>,
	pub purpose: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SourceDraft {
	pub chunk_id: Option<serde_json::Value>,
	pub relevance: Option<f64>,
	pub excerpt: Option<String>,
}

/// Validates a draft against the output schema. `known_chunks` is the set of
/// chunk ids present in the assembled context; every citation must point into
/// it.
pub fn validate_draft(
	draft: &RecommendationDraft,
	known_chunks: &HashSet<Uuid>,
) -> Result<RecommendationOutput, Vec<Violation>> {
	let mut violations = Vec::new();
	let diagnosis = validate_diagnosis(draft.diagnosis.as_ref(), &mut violations);
	let actions = validate_actions(&draft.actions, known_chunks, &mut violations);
	let products = validate_products(&draft.products, &mut violations);
	let sources = validate_sources(&draft.sources, known_chunks, &mut violations);

	if !violations.is_empty() {
		return Err(violations);
	}

	// All collectors succeed once the violation list is empty.
	match (diagnosis, actions, products, sources) {
		(Some(diagnosis), Some(actions), Some(products), Some(sources)) =>
			Ok(RecommendationOutput { diagnosis, actions, products, sources }),
		_ => Err(vec![Violation::new("$", "Response is structurally incomplete.")]),
	}
}

fn validate_diagnosis(
	draft: Option<&DiagnosisDraft>,
	violations: &mut Vec<Violation>,
) -> Option<Diagnosis> {
	let Some(draft) = draft else {
		violations.push(Violation::new("$.diagnosis", "A diagnosis object is required."));

		return None;
	};
	let condition = match draft.condition.as_deref().map(str::trim) {
		Some(text) if !text.is_empty() => Some(text.to_string()),
		_ => {
			violations.push(Violation::new(
				"$.diagnosis.condition",
				"A non-empty condition name is required.",
			));

			None
		},
	};
	let condition_type = match draft.condition_type.as_deref() {
		Some(raw) => match ConditionType::parse(raw) {
			Some(parsed) => Some(parsed),
			None => {
				violations.push(Violation::new(
					"$.diagnosis.condition_type",
					format!(
						"Must be one of nutrient_deficiency, disease, pest, environmental, other. Got {raw}."
					),
				));

				None
			},
		},
		None => {
			violations.push(Violation::new("$.diagnosis.condition_type", "Field is required."));

			None
		},
	};
	let confidence = match draft.confidence {
		Some(value) if value.is_finite() && (MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&value) =>
			Some(value),
		Some(value) => {
			violations.push(Violation::new(
				"$.diagnosis.confidence",
				format!("Must be between {MIN_CONFIDENCE} and {MAX_CONFIDENCE}. Got {value}."),
			));

			None
		},
		None => {
			violations.push(Violation::new("$.diagnosis.confidence", "Field is required."));

			None
		},
	};

	Some(Diagnosis {
		condition: condition?,
		condition_type: condition_type?,
		confidence: confidence?,
		summary: draft.summary.clone(),
	})
}

fn validate_actions(
	drafts: &[ActionDraft],
	known_chunks: &HashSet<Uuid>,
	violations: &mut Vec<Violation>,
) -> Option<Vec<RecommendedAction>> {
	if drafts.len() < MIN_ACTIONS || drafts.len() > MAX_ACTIONS {
		violations.push(Violation::new(
			"$.actions",
			format!("Between {MIN_ACTIONS} and {MAX_ACTIONS} actions are required. Got {}.", drafts.len()),
		));
	}

	let mut out = Vec::with_capacity(drafts.len());
	let mut complete = true;

	for (idx, draft) in drafts.iter().enumerate() {
		let instruction = match draft.instruction.as_deref().map(str::trim) {
			Some(text) if !text.is_empty() => Some(text.to_string()),
			_ => {
				violations.push(Violation::new(
					format!("$.actions[{idx}].instruction"),
					"A non-empty instruction is required.",
				));

				None
			},
		};
		let priority = match draft.priority.as_deref() {
			Some(raw) => match ActionPriority::parse(raw) {
				Some(parsed) => Some(parsed),
				None => {
					violations.push(Violation::new(
						format!("$.actions[{idx}].priority"),
						format!("Must be one of immediate, high, moderate, low. Got {raw}."),
					));

					None
				},
			},
			None => {
				violations
					.push(Violation::new(format!("$.actions[{idx}].priority"), "Field is required."));

				None
			},
		};
		let citations =
			validate_citations(&draft.citations, &format!("$.actions[{idx}].citations"), known_chunks, violations);

		match (instruction, priority, citations) {
			(Some(instruction), Some(priority), Some(citations)) =>
				out.push(RecommendedAction { instruction, priority, citations }),
			_ => complete = false,
		}
	}

	(complete && out.len() >= MIN_ACTIONS && out.len() <= MAX_ACTIONS).then_some(out)
}

fn validate_citations(
	raw: &[serde_json::Value],
	field: &str,
	known_chunks: &HashSet<Uuid>,
	violations: &mut Vec<Violation>,
) -> Option<Vec<Uuid>> {
	if raw.is_empty() {
		violations.push(Violation::new(
			field,
			"At least one citation referencing a context chunk id is required.",
		));

		return None;
	}

	let mut out = Vec::with_capacity(raw.len());
	let mut complete = true;

	for value in raw {
		let Some(id) = value.as_str().and_then(|text| Uuid::parse_str(text.trim()).ok()) else {
			violations.push(Violation::new(field, format!("Citation {value} is not a chunk id.")));

			complete = false;

			continue;
		};

		if !known_chunks.contains(&id) {
			violations.push(Violation::new(
				field,
				format!("Citation {id} does not reference a chunk in the provided context."),
			));

			complete = false;

			continue;
		}

		out.push(id);
	}

	complete.then_some(out)
}

fn validate_products(
	drafts: &[ProductDraft],
	violations: &mut Vec<Violation>,
) -> Option<Vec<ProductSuggestion>> {
	if drafts.len() > MAX_PRODUCTS {
		violations.push(Violation::new(
			"$.products",
			format!("At most {MAX_PRODUCTS} product suggestions are allowed. Got {}.", drafts.len()),
		));

		return None;
	}

	let mut out = Vec::with_capacity(drafts.len());
	let mut complete = true;

	for (idx, draft) in drafts.iter().enumerate() {
		match draft.name.as_deref().map(str::trim) {
			Some(name) if !name.is_empty() =>
				out.push(ProductSuggestion { name: name.to_string(), purpose: draft.purpose.clone() }),
			_ => {
				violations.push(Violation::new(
					format!("$.products[{idx}].name"),
					"A non-empty product name is required.",
				));

				complete = false;
			},
		}
	}

	complete.then_some(out)
}

fn validate_sources(
	drafts: &[SourceDraft],
	known_chunks: &HashSet<Uuid>,
	violations: &mut Vec<Violation>,
) -> Option<Vec<CitedSource>> {
	if drafts.len() < MIN_SOURCES {
		violations
			.push(Violation::new("$.sources", "At least one cited source is required."));

		return None;
	}

	let mut out = Vec::with_capacity(drafts.len());
	let mut complete = true;

	for (idx, draft) in drafts.iter().enumerate() {
		let chunk_id = match draft
			.chunk_id
			.as_ref()
			.and_then(|value| value.as_str())
			.and_then(|text| Uuid::parse_str(text.trim()).ok())
		{
			Some(id) if known_chunks.contains(&id) => Some(id),
			Some(id) => {
				violations.push(Violation::new(
					format!("$.sources[{idx}].chunk_id"),
					format!("Chunk {id} is not part of the provided context."),
				));

				None
			},
			None => {
				violations.push(Violation::new(
					format!("$.sources[{idx}].chunk_id"),
					"A context chunk id is required.",
				));

				None
			},
		};
		let excerpt = match draft.excerpt.as_deref() {
			Some(text) if text.chars().count() <= MAX_EXCERPT_CHARS => Some(text.to_string()),
			Some(_) => {
				violations.push(Violation::new(
					format!("$.sources[{idx}].excerpt"),
					format!("Excerpt must be at most {MAX_EXCERPT_CHARS} characters."),
				));

				None
			},
			None => {
				violations.push(Violation::new(
					format!("$.sources[{idx}].excerpt"),
					"A supporting excerpt is required.",
				));

				None
			},
		};

		match (chunk_id, excerpt) {
			(Some(chunk_id), Some(excerpt)) => out.push(CitedSource {
				chunk_id,
				relevance: draft.relevance.unwrap_or(0.0),
				excerpt,
			}),
			_ => complete = false,
		}
	}

	complete.then_some(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn known(ids: &[Uuid]) -> HashSet<Uuid> {
		ids.iter().copied().collect()
	}

	fn valid_draft(chunk_id: Uuid) -> RecommendationDraft {
		RecommendationDraft {
			diagnosis: Some(DiagnosisDraft {
				condition: Some("Nitrogen deficiency".to_string()),
				condition_type: Some("nutrient_deficiency".to_string()),
				confidence: Some(0.8),
				summary: None,
			}),
			actions: vec![ActionDraft {
				instruction: Some("Apply 40 lb/ac sidedress N.".to_string()),
				priority: Some("high".to_string()),
				citations: vec![serde_json::json!(chunk_id.to_string())],
			}],
			products: vec![],
			sources: vec![SourceDraft {
				chunk_id: Some(serde_json::json!(chunk_id.to_string())),
				relevance: Some(0.9),
				excerpt: Some("Lower-leaf yellowing indicates nitrogen shortage.".to_string()),
			}],
		}
	}

	#[test]
	fn valid_draft_passes() {
		let chunk_id = Uuid::new_v4();
		let output =
			validate_draft(&valid_draft(chunk_id), &known(&[chunk_id])).expect("validation failed");

		assert_eq!(output.diagnosis.condition_type, ConditionType::NutrientDeficiency);
		assert_eq!(output.cited_chunk_ids(), vec![chunk_id]);
	}

	#[test]
	fn missing_citation_is_a_named_violation() {
		let chunk_id = Uuid::new_v4();
		let mut draft = valid_draft(chunk_id);

		draft.actions[0].citations.clear();

		let violations =
			validate_draft(&draft, &known(&[chunk_id])).expect_err("validation should fail");

		assert!(violations.iter().any(|violation| {
			violation.field == "$.actions[0].citations" && violation.constraint.contains("citation")
		}));
	}

	#[test]
	fn unknown_citation_target_is_rejected() {
		let chunk_id = Uuid::new_v4();
		let draft = valid_draft(chunk_id);
		let violations = validate_draft(&draft, &known(&[])).expect_err("validation should fail");

		assert!(violations.iter().any(|violation| violation.field == "$.actions[0].citations"));
	}

	#[test]
	fn confidence_out_of_range_is_rejected() {
		let chunk_id = Uuid::new_v4();
		let mut draft = valid_draft(chunk_id);

		draft.diagnosis.as_mut().unwrap().confidence = Some(0.99);

		let violations =
			validate_draft(&draft, &known(&[chunk_id])).expect_err("validation should fail");

		assert!(violations.iter().any(|violation| violation.field == "$.diagnosis.confidence"));
	}

	#[test]
	fn multiple_violations_are_enumerated_together() {
		let chunk_id = Uuid::new_v4();
		let mut draft = valid_draft(chunk_id);

		draft.diagnosis.as_mut().unwrap().condition_type = Some("fungal".to_string());
		draft.actions[0].priority = Some("urgent".to_string());
		draft.sources[0].excerpt = Some("x".repeat(MAX_EXCERPT_CHARS + 1));

		let violations =
			validate_draft(&draft, &known(&[chunk_id])).expect_err("validation should fail");

		assert_eq!(violations.len(), 3);
	}

	#[test]
	fn too_many_actions_are_rejected() {
		let chunk_id = Uuid::new_v4();
		let mut draft = valid_draft(chunk_id);
		let action = draft.actions[0].clone();

		draft.actions = vec![action; MAX_ACTIONS + 1];

		let violations =
			validate_draft(&draft, &known(&[chunk_id])).expect_err("validation should fail");

		assert!(violations.iter().any(|violation| violation.field == "$.actions"));
	}
}
