// Server entry point - composition root

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use openai_proxy::api::{self, AppState};
use openai_proxy::config;
use openai_proxy::providers::ProviderRegistry;
use openai_proxy::rotation::{CredentialStore, EnvFileStore, ProcessSupervisor, TokenRotator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    config::init_config()?;
    let cfg = config::get_config().unwrap_or_default();

    let store = Arc::new(EnvFileStore::new(config::resolve_env_file()));

    let env_entries = match store.read_all() {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to read env store {:?}: {}", store.path(), e);
            Vec::new()
        }
    };

    let supervisor = ProcessSupervisor::new(
        cfg.supervisor.command.clone(),
        cfg.supervisor.app_name.clone(),
        cfg.supervisor.ecosystem_file.clone(),
    );

    let rotator = match TokenRotator::initialize(
        cfg.token_rotation.family.clone(),
        &cfg.token_rotation.secret_prefixes,
        store.clone() as Arc<dyn CredentialStore>,
        supervisor,
        cfg.token_rotation.policy(),
    ) {
        Ok(rotator) => Some(Arc::new(rotator)),
        Err(e) => {
            tracing::warn!("Token rotator not initialized: {}", e);
            None
        }
    };

    let providers = Arc::new(ProviderRegistry::from_config(&cfg, &env_entries));

    api::start_server(AppState { rotator, providers }).await
}
