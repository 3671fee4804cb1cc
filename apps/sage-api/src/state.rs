use std::sync::Arc;

use sage_service::{Providers, SageService};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<SageService>,
}
impl AppState {
	pub fn new(config: sage_config::Config) -> Self {
		Self { service: Arc::new(SageService::new(config)) }
	}

	pub fn with_providers(config: sage_config::Config, providers: Providers) -> Self {
		Self { service: Arc::new(SageService::with_providers(config, providers)) }
	}
}
