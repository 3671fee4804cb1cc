pub mod routes;
pub mod state;
pub mod stream;

use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;

use crate::state::AppState;
use sage_cli::ConfigArgs;

#[derive(Debug, Parser)]
#[command(
	version = sage_cli::VERSION,
	rename_all = "kebab",
	styles = sage_cli::styles(),
)]
pub struct Args {
	#[command(flatten)]
	pub config: ConfigArgs,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = sage_config::load(&args.config.config)?;

	sage_cli::init_tracing(&config.service.log_level);

	let http_addr: SocketAddr = config.service.http_bind.parse()?;
	let state = AppState::new(config);
	let app = routes::router(state);
	let listener = TcpListener::bind(http_addr).await?;

	tracing::info!(%http_addr, "HTTP server listening.");

	axum::serve(listener, app).await?;

	Ok(())
}
