use verdant_domain::recommendation::Violation;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	/// Zero qualifying chunks after filtering and budgeting. Generation is
	/// skipped entirely; the model is never invoked without grounding.
	#[error("No qualifying knowledge found for this request.")]
	RetrievalEmpty,
	/// Schema or parse failure that survived every generation attempt. Carries
	/// the full violation list from the final attempt.
	#[error("Generated output failed validation after all attempts.")]
	GenerationValidation { violations: Vec<Violation> },
	/// Provider or network failure during generation. Never retried by this
	/// component.
	#[error("Generation provider failure: {message}")]
	GenerationInfra { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error(transparent)]
	Storage(#[from] verdant_storage::Error),
}
