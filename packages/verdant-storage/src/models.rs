use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use verdant_domain::authority::AuthorityClass;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
	Text,
	Image,
}
impl Modality {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Text => "text",
			Self::Image => "image",
		}
	}

	pub fn parse(value: &str) -> Self {
		match value.trim().to_ascii_lowercase().as_str() {
			"image" => Self::Image,
			_ => Self::Text,
		}
	}
}

#[derive(Clone, Debug)]
pub struct KnowledgeSource {
	pub source_id: Uuid,
	pub title: String,
	pub url: Option<String>,
	pub authority: AuthorityClass,
	pub created_at: OffsetDateTime,
}

/// A retrievable unit of source content: a text passage or a captioned image,
/// with a precomputed embedding stored alongside.
#[derive(Clone, Debug)]
pub struct KnowledgeChunk {
	pub chunk_id: Uuid,
	pub source_id: Uuid,
	pub modality: Modality,
	pub content: String,
	pub crops: Vec<String>,
	pub regions: Vec<String>,
	pub topics: Vec<String>,
	pub position: i32,
	pub created_at: OffsetDateTime,
}

/// A chunk returned from retrieval together with its source metadata and the
/// raw similarity score. Forced fetches carry similarity 0.
#[derive(Clone, Debug)]
pub struct ChunkHit {
	pub chunk: KnowledgeChunk,
	pub source_title: String,
	pub authority: AuthorityClass,
	pub similarity: f32,
}

#[derive(Clone, Debug)]
pub struct SourceBoost {
	pub source_id: Uuid,
	pub boost: f32,
	pub feedback_count: i64,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct SourceTopicAffinity {
	pub source_id: Uuid,
	pub topic: String,
	pub boost: f32,
	pub sample_count: i64,
	pub updated_at: OffsetDateTime,
}

/// One candidate row captured in the audit, including the exact feature
/// vector sent to the ranking endpoint so training data can be exported
/// without recomputation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AuditCandidate {
	pub chunk_id: Uuid,
	pub source_id: Uuid,
	pub similarity: f32,
	pub rank_score: f32,
	pub features: Vec<f32>,
	pub cited: bool,
}

/// Write-once record of what one generation attempt retrieved, used, and
/// overlooked. Read later by the feedback loop and the offline scorer.
#[derive(Clone, Debug)]
pub struct RetrievalAudit {
	pub audit_id: Uuid,
	pub recommendation_id: Uuid,
	pub query: String,
	pub topics: Vec<String>,
	pub candidates: Vec<AuditCandidate>,
	pub used_chunk_ids: Vec<Uuid>,
	pub missed_source_ids: Vec<Uuid>,
	pub config_hash: String,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct RecommendationRecord {
	pub recommendation_id: Uuid,
	pub payload: Value,
	pub cited_chunk_ids: Vec<Uuid>,
	pub cited_source_ids: Vec<Uuid>,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct FeedbackOutboxEntry {
	pub outbox_id: Uuid,
	pub recommendation_id: Uuid,
	pub payload: Value,
	pub status: String,
	pub attempts: i32,
	pub last_error: Option<String>,
	pub available_at: OffsetDateTime,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}
