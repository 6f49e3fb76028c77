use std::{collections::HashSet, sync::OnceLock};

use regex::Regex;
use uuid::Uuid;

use crate::{Error, LlmProvider, Result, VerdantService, assemble::AssembledContext};
use verdant_domain::{
	plan::DiagnosticInput,
	recommendation::{
		MAX_ACTIONS, MAX_CONFIDENCE, MAX_EXCERPT_CHARS, MAX_PRODUCTS, MIN_CONFIDENCE,
		RecommendationDraft, RecommendationOutput, Violation, validate_draft,
	},
};

const SYSTEM_PROMPT: &str = "\
You are an agronomy assistant. Ground every statement in the provided \
knowledge context and respond with a single JSON object, no prose.";

/// Result of parsing and validating one model response.
#[derive(Debug)]
pub enum AttemptOutcome {
	Valid(Box<RecommendationOutput>),
	Invalid(Vec<Violation>),
}

/// Explicit retry state machine for the generation loop. Provider failures
/// bypass it entirely (`InfraFailure` is terminal on the first occurrence);
/// validation failures feed back into one bounded retry.
#[derive(Debug)]
pub enum GenerationState {
	Attempting { attempt: u32 },
	RetryWithFeedback { attempt: u32, violations: Vec<Violation> },
	Validated(Box<RecommendationOutput>),
	ExhaustedRetries { violations: Vec<Violation> },
	InfraFailure,
}

pub(crate) fn next_state(attempt: u32, max_attempts: u32, outcome: AttemptOutcome) -> GenerationState {
	match outcome {
		AttemptOutcome::Valid(output) => GenerationState::Validated(output),
		AttemptOutcome::Invalid(violations) if attempt < max_attempts =>
			GenerationState::RetryWithFeedback { attempt, violations },
		AttemptOutcome::Invalid(violations) => GenerationState::ExhaustedRetries { violations },
	}
}

impl VerdantService {
	/// Invokes the model at most `generation.max_attempts` times. A parse or
	/// schema failure on a non-final attempt re-prompts once with the full
	/// violation list; provider errors propagate immediately and are never
	/// retried here. Returns the validated output and the attempt count.
	pub(crate) async fn generate_with_retry(
		&self,
		input: &DiagnosticInput,
		context: &AssembledContext,
	) -> Result<(RecommendationOutput, u32)> {
		let known_chunks = context.chunk_ids();
		let max_attempts = self.cfg.generation.max_attempts;
		let mut state = GenerationState::Attempting { attempt: 1 };

		loop {
			let (attempt, feedback) = match &state {
				GenerationState::Attempting { attempt } => (*attempt, None),
				GenerationState::RetryWithFeedback { attempt, violations } =>
					(*attempt + 1, Some(violations.as_slice())),
				GenerationState::Validated(_)
				| GenerationState::ExhaustedRetries { .. }
				| GenerationState::InfraFailure => break,
			};
			let prompt = build_prompt(input, context, feedback);
			let messages = [
				serde_json::json!({ "role": "system", "content": SYSTEM_PROMPT }),
				serde_json::json!({ "role": "user", "content": prompt }),
			];
			let text = match self.providers.llm.complete(&self.cfg.providers.llm, &messages).await {
				Ok(text) => text,
				Err(err) => {
					tracing::error!(error = %err, attempt, "Generation provider failed.");

					return Err(Error::GenerationInfra { message: err.to_string() });
				},
			};
			let outcome = evaluate_attempt(&text, &known_chunks);

			if let AttemptOutcome::Invalid(violations) = &outcome {
				tracing::warn!(
					attempt,
					violations = violations.len(),
					"Generated output failed validation."
				);
			}

			state = match next_state(attempt, max_attempts, outcome) {
				GenerationState::Validated(output) => return Ok((*output, attempt)),
				other => other,
			};
		}

		match state {
			GenerationState::ExhaustedRetries { violations } =>
				Err(Error::GenerationValidation { violations }),
			_ => Err(Error::GenerationInfra {
				message: "Generation loop ended in an unexpected state.".to_string(),
			}),
		}
	}
}

pub(crate) fn build_prompt(
	input: &DiagnosticInput,
	context: &AssembledContext,
	feedback: Option<&[Violation]>,
) -> String {
	let mut out = String::new();

	out.push_str("## Diagnostic input\n");
	out.push_str(&format!("type: {}\n", input.kind));

	if let Some(description) = input.description.as_deref() {
		out.push_str(&format!("description: {description}\n"));
	}
	if let Some(crop) = input.crop.as_deref() {
		out.push_str(&format!("crop: {crop}\n"));
	}
	if let Some(region) = input.region.as_deref() {
		out.push_str(&format!("region: {region}\n"));
	}
	if let Some(stage) = input.growth_stage.as_deref() {
		out.push_str(&format!("growth stage: {stage}\n"));
	}
	if let Some(image_url) = input.image_url.as_deref() {
		out.push_str(&format!("image: {image_url}\n"));
	}
	if let Some(lab_data) = input.lab_data.as_ref() {
		for (name, value) in lab_data {
			out.push_str(&format!("{name}: {value}\n"));
		}
	}

	out.push_str("\n## Knowledge context\n");

	for candidate in &context.chunks {
		out.push_str(&format!(
			"[chunk {}] (similarity {:.2}, authority {})\n{}\n\n",
			candidate.hit.chunk.chunk_id,
			candidate.hit.similarity,
			candidate.hit.authority.as_str(),
			candidate.hit.chunk.content,
		));
	}

	out.push_str(&format!(
		"## Output\nRespond with one JSON object: diagnosis {{condition, condition_type \
		 (nutrient_deficiency|disease|pest|environmental|other), confidence ({MIN_CONFIDENCE}-{MAX_CONFIDENCE}), \
		 summary}}, actions (1-{MAX_ACTIONS}, each {{instruction, priority \
		 (immediate|high|moderate|low), citations: [chunk ids from the context]}}), products \
		 (0-{MAX_PRODUCTS}, each {{name, purpose}}), sources (1+, each {{chunk_id, relevance, \
		 excerpt of at most {MAX_EXCERPT_CHARS} characters}}). Every action needs at least one \
		 citation.\n"
	));

	if let Some(violations) = feedback {
		out.push_str("\n## Previous attempt was rejected\nFix every violation below and return the corrected JSON object:\n");

		for violation in violations {
			out.push_str(&format!("- {violation}\n"));
		}
	}

	out
}

/// Parses one raw model response: strip markdown fences, pull out the first
/// balanced JSON object, deserialize leniently, then validate strictly.
pub(crate) fn evaluate_attempt(text: &str, known_chunks: &HashSet<Uuid>) -> AttemptOutcome {
	let cleaned = strip_code_fences(text);
	let Some(json_text) = extract_json(&cleaned) else {
		return AttemptOutcome::Invalid(vec![Violation {
			field: "$".to_string(),
			constraint: "Response does not contain a JSON object.".to_string(),
		}]);
	};
	let draft: RecommendationDraft = match serde_json::from_str(json_text) {
		Ok(draft) => draft,
		Err(err) => {
			return AttemptOutcome::Invalid(vec![Violation {
				field: "$".to_string(),
				constraint: format!("Response is not a valid recommendation object: {err}."),
			}]);
		},
	};

	match validate_draft(&draft, known_chunks) {
		Ok(output) => AttemptOutcome::Valid(Box::new(output)),
		Err(violations) => AttemptOutcome::Invalid(violations),
	}
}

fn fence_regex() -> &'static Regex {
	static FENCE: OnceLock<Regex> = OnceLock::new();

	FENCE.get_or_init(|| {
		Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fence pattern is valid")
	})
}

/// Returns fenced content when the response wraps its JSON in a markdown code
/// block, otherwise the input unchanged.
pub(crate) fn strip_code_fences(text: &str) -> String {
	if let Some(captures) = fence_regex().captures(text)
		&& let Some(inner) = captures.get(1)
		&& inner.as_str().contains('{')
	{
		return inner.as_str().to_string();
	}

	text.to_string()
}

/// Extracts the first balanced JSON object from free text, tolerating prose
/// around it and braces inside string literals.
pub(crate) fn extract_json(text: &str) -> Option<&str> {
	let start = text.find('{')?;
	let bytes = text.as_bytes();
	let mut depth = 0_i32;
	let mut in_string = false;
	let mut escaped = false;

	for (offset, byte) in bytes[start..].iter().enumerate() {
		if in_string {
			match byte {
				b'\\' if !escaped => escaped = true,
				b'"' if !escaped => in_string = false,
				_ => escaped = false,
			}

			continue;
		}

		match byte {
			b'"' => in_string = true,
			b'{' => depth += 1,
			b'}' => {
				depth -= 1;

				if depth == 0 {
					return Some(&text[start..=start + offset]);
				}
			},
			_ => {},
		}
	}

	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_json_surrounded_by_prose() {
		let text = "Here is the result:\n{\"a\": {\"b\": 1}}\nHope that helps!";

		assert_eq!(extract_json(text), Some("{\"a\": {\"b\": 1}}"));
	}

	#[test]
	fn braces_inside_strings_do_not_unbalance() {
		let text = r#"{"note": "a } inside", "x": 1} trailing"#;

		assert_eq!(extract_json(text), Some(r#"{"note": "a } inside", "x": 1}"#));
	}

	#[test]
	fn escaped_quotes_stay_inside_strings() {
		let text = r#"{"note": "she said \"}\"", "x": 1}"#;

		assert_eq!(extract_json(text), Some(text));
	}

	#[test]
	fn fenced_blocks_are_unwrapped() {
		let text = "```json\n{\"a\": 1}\n```";

		assert_eq!(strip_code_fences(text), "{\"a\": 1}");

		let bare = "{\"a\": 1}";

		assert_eq!(strip_code_fences(bare), bare);
	}

	#[test]
	fn missing_object_is_a_root_violation() {
		let outcome = evaluate_attempt("no json here", &HashSet::new());

		match outcome {
			AttemptOutcome::Invalid(violations) => {
				assert_eq!(violations.len(), 1);
				assert_eq!(violations[0].field, "$");
			},
			AttemptOutcome::Valid(_) => panic!("expected invalid outcome"),
		}
	}

	#[test]
	fn retry_transition_is_bounded() {
		let violations = vec![Violation {
			field: "$.actions".to_string(),
			constraint: "test".to_string(),
		}];

		assert!(matches!(
			next_state(1, 2, AttemptOutcome::Invalid(violations.clone())),
			GenerationState::RetryWithFeedback { attempt: 1, .. }
		));
		assert!(matches!(
			next_state(2, 2, AttemptOutcome::Invalid(violations)),
			GenerationState::ExhaustedRetries { .. }
		));
	}

	#[test]
	fn feedback_prompt_names_each_violation() {
		let input = DiagnosticInput { kind: "symptom".to_string(), ..Default::default() };
		let context = AssembledContext {
			chunks: vec![],
			total_chunks: 0,
			total_tokens: 0,
			relevance_threshold: 0.25,
		};
		let violations = vec![Violation {
			field: "$.actions[0].citations".to_string(),
			constraint: "At least one citation referencing a context chunk id is required."
				.to_string(),
		}];
		let prompt = build_prompt(&input, &context, Some(&violations));

		assert!(prompt.contains("Previous attempt was rejected"));
		assert!(prompt.contains("$.actions[0].citations"));
	}
}
