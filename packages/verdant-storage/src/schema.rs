const INIT_SQL: &str = "\
CREATE EXTENSION IF NOT EXISTS vector;

CREATE TABLE IF NOT EXISTS knowledge_sources (
	source_id UUID PRIMARY KEY,
	title TEXT NOT NULL,
	url TEXT,
	authority TEXT NOT NULL,
	created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS knowledge_chunks (
	chunk_id UUID PRIMARY KEY,
	source_id UUID NOT NULL REFERENCES knowledge_sources(source_id),
	modality TEXT NOT NULL,
	content TEXT NOT NULL,
	crops TEXT[] NOT NULL DEFAULT '{}',
	regions TEXT[] NOT NULL DEFAULT '{}',
	topics TEXT[] NOT NULL DEFAULT '{}',
	chunk_position INTEGER NOT NULL DEFAULT 0,
	created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS knowledge_chunks_source_idx
	ON knowledge_chunks (source_id);

CREATE TABLE IF NOT EXISTS chunk_embeddings (
	chunk_id UUID PRIMARY KEY REFERENCES knowledge_chunks(chunk_id) ON DELETE CASCADE,
	vec VECTOR(<VECTOR_DIM>) NOT NULL,
	created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS source_boosts (
	source_id UUID PRIMARY KEY,
	boost REAL NOT NULL DEFAULT 0,
	feedback_count BIGINT NOT NULL DEFAULT 0,
	updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS source_topic_boosts (
	source_id UUID NOT NULL,
	topic TEXT NOT NULL,
	boost REAL NOT NULL DEFAULT 0,
	sample_count BIGINT NOT NULL DEFAULT 0,
	updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
	PRIMARY KEY (source_id, topic)
);

CREATE TABLE IF NOT EXISTS recommendations (
	recommendation_id UUID PRIMARY KEY,
	payload JSONB NOT NULL,
	cited_chunk_ids UUID[] NOT NULL DEFAULT '{}',
	cited_source_ids UUID[] NOT NULL DEFAULT '{}',
	created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS retrieval_audits (
	audit_id UUID PRIMARY KEY,
	recommendation_id UUID NOT NULL,
	query TEXT NOT NULL,
	topics TEXT[] NOT NULL DEFAULT '{}',
	candidates JSONB NOT NULL,
	used_chunk_ids UUID[] NOT NULL DEFAULT '{}',
	missed_source_ids UUID[] NOT NULL DEFAULT '{}',
	config_hash TEXT NOT NULL,
	created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS retrieval_audits_recommendation_idx
	ON retrieval_audits (recommendation_id, created_at DESC);

CREATE TABLE IF NOT EXISTS feedback_outbox (
	outbox_id UUID PRIMARY KEY,
	recommendation_id UUID NOT NULL,
	payload JSONB NOT NULL,
	status TEXT NOT NULL DEFAULT 'PENDING',
	attempts INTEGER NOT NULL DEFAULT 0,
	last_error TEXT,
	available_at TIMESTAMPTZ NOT NULL DEFAULT now(),
	created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
	updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS feedback_outbox_due_idx
	ON feedback_outbox (status, available_at);
";

pub fn render_schema(vector_dim: u32) -> String {
	INIT_SQL.replace("<VECTOR_DIM>", &vector_dim.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_the_vector_dimension() {
		let sql = render_schema(1_536);

		assert!(sql.contains("VECTOR(1536)"));
		assert!(!sql.contains("<VECTOR_DIM>"));
	}
}
