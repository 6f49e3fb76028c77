/// Estimates the token count of a text from its character length. The
/// assembler only needs a stable upper-bound heuristic, not a tokenizer.
pub fn estimate_tokens(text: &str, chars_per_token: u32) -> u32 {
	let chars = text.chars().count() as u32;
	let divisor = chars_per_token.max(1);

	chars.div_ceil(divisor)
}

/// Truncates an excerpt to at most `max_chars` characters on a char boundary.
pub fn truncate_excerpt(text: &str, max_chars: usize) -> String {
	if text.chars().count() <= max_chars {
		return text.to_string();
	}

	text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn estimate_rounds_up() {
		assert_eq!(estimate_tokens("", 4), 0);
		assert_eq!(estimate_tokens("abcd", 4), 1);
		assert_eq!(estimate_tokens("abcde", 4), 2);
	}

	#[test]
	fn truncate_respects_char_boundaries() {
		let text = "ümlaut heavy ünicode";

		assert_eq!(truncate_excerpt(text, 500), text);
		assert_eq!(truncate_excerpt(text, 6).chars().count(), 6);
	}
}
