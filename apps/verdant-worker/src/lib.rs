pub mod worker;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use verdant_service::Stores;
use verdant_storage::pg::{
	PgAuditStore, PgBoostStore, PgChunkStore, PgFeedbackQueue, PgRecommendationStore,
};

#[derive(Debug, Parser)]
#[command(
	version = verdant_cli::VERSION,
	rename_all = "kebab",
	styles = verdant_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: std::path::PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = verdant_config::load(&args.config)?;
	let filter = EnvFilter::try_new(&config.service.log_level)
		.unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = verdant_storage::db::Db::connect(&config.storage.postgres).await?;

	db.ensure_schema(config.providers.embedding.dimensions).await?;

	let pool = db.pool.clone();
	let stores = Stores {
		chunks: Arc::new(PgChunkStore::new(pool.clone())),
		boosts: Arc::new(PgBoostStore::new(pool.clone())),
		audits: Arc::new(PgAuditStore::new(pool.clone())),
		recommendations: Arc::new(PgRecommendationStore::new(pool.clone())),
		feedback: Arc::new(PgFeedbackQueue::new(pool)),
	};

	worker::run_worker(config, stores).await
}
