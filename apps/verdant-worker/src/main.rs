use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	verdant_worker::run(verdant_worker::Args::parse()).await
}
