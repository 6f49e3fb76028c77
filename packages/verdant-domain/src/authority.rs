use serde::{Deserialize, Serialize};

/// Coarse trust tier assigned to a knowledge source. Lower tier number means
/// higher trust; config validation keeps the per-tier ranking weights
/// non-increasing in this order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityClass {
	Government,
	Extension,
	Research,
	Manufacturer,
	Retailer,
	Other,
}
impl AuthorityClass {
	pub const ALL: [Self; 6] =
		[Self::Government, Self::Extension, Self::Research, Self::Manufacturer, Self::Retailer, Self::Other];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Government => "government",
			Self::Extension => "extension",
			Self::Research => "research",
			Self::Manufacturer => "manufacturer",
			Self::Retailer => "retailer",
			Self::Other => "other",
		}
	}

	pub fn tier(self) -> u8 {
		match self {
			Self::Government => 0,
			Self::Extension => 1,
			Self::Research => 2,
			Self::Manufacturer => 3,
			Self::Retailer => 4,
			Self::Other => 5,
		}
	}

	/// Unknown labels fall back to the least-trusted tier rather than failing;
	/// authority is a ranking signal, not an access control.
	pub fn parse(value: &str) -> Self {
		match value.trim().to_ascii_lowercase().as_str() {
			"government" | "gov" => Self::Government,
			"extension" | "university" | "university_extension" => Self::Extension,
			"research" | "research_paper" | "journal" => Self::Research,
			"manufacturer" => Self::Manufacturer,
			"retailer" => Self::Retailer,
			_ => Self::Other,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tiers_follow_trust_order() {
		let tiers: Vec<u8> = AuthorityClass::ALL.iter().map(|class| class.tier()).collect();
		let mut sorted = tiers.clone();

		sorted.sort_unstable();

		assert_eq!(tiers, sorted);
		assert!(AuthorityClass::Extension.tier() < AuthorityClass::Retailer.tier());
	}

	#[test]
	fn parse_accepts_aliases_and_defaults_to_other() {
		assert_eq!(AuthorityClass::parse("University"), AuthorityClass::Extension);
		assert_eq!(AuthorityClass::parse("gov"), AuthorityClass::Government);
		assert_eq!(AuthorityClass::parse("blog"), AuthorityClass::Other);
	}
}
