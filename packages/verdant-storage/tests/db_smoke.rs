use time::OffsetDateTime;
use uuid::Uuid;

use verdant_config::Postgres;
use verdant_domain::boost::BoostBounds;
use verdant_storage::{
	db::Db,
	pg::PgBoostStore,
	stores::BoostStore,
};
use verdant_testkit::TestDatabase;

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set VERDANT_PG_DSN to run."]
async fn db_connects_and_bootstraps() {
	let Some(base_dsn) = verdant_testkit::env_dsn() else {
		eprintln!("Skipping db_connects_and_bootstraps; set VERDANT_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 1 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema(1_536).await.expect("Failed to ensure schema.");

	for table in ["knowledge_chunks", "source_boosts", "retrieval_audits", "feedback_outbox"] {
		let count: i64 = sqlx::query_scalar(
			"SELECT count(*) FROM information_schema.tables WHERE table_name = $1",
		)
		.bind(table)
		.fetch_one(&db.pool)
		.await
		.expect("Failed to query schema tables.");

		assert_eq!(count, 1, "missing table {table}");
	}

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set VERDANT_PG_DSN to run."]
async fn boost_upserts_clamp_server_side() {
	let Some(base_dsn) = verdant_testkit::env_dsn() else {
		eprintln!("Skipping boost_upserts_clamp_server_side; set VERDANT_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 1 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema(1_536).await.expect("Failed to ensure schema.");

	let store = PgBoostStore::new(db.pool.clone());
	let bounds = BoostBounds { min: -0.5, max: 0.5 };
	let source_id = Uuid::new_v4();
	let now = OffsetDateTime::now_utc();

	for _ in 0..20 {
		let boost = store
			.apply_source_delta(source_id, 0.1, bounds, now)
			.await
			.expect("Failed to apply delta.");

		assert!(boost <= bounds.max);
	}

	let stored = store.get(source_id).await.expect("Failed to read boost.").expect("Boost missing.");

	assert_eq!(stored.boost, bounds.max);
	assert_eq!(stored.feedback_count, 20);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
