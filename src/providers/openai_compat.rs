// Config-driven OpenAI-compatible upstreams (OpenRouter, LiteLLM and the like)

use crate::config::{AppConfig, OpenAICompatEntry};
use crate::rotation::CredentialPool;

use super::UpstreamProvider;

/// Build an adapter for one configured upstream. The pool comes from the
/// entry's API keys; routing is purely by the configured prefix since these
/// upstreams carry no static catalog.
pub fn build(config: &AppConfig, entry: &OpenAICompatEntry) -> UpstreamProvider {
    let keys: Vec<(String, String)> = entry
        .api_key_entries
        .iter()
        .enumerate()
        .map(|(i, key)| (format!("{}-key-{}", entry.name, i + 1), key.api_key.clone()))
        .collect();

    // no format requirement for third-party keys
    let pool = CredentialPool::new(
        entry.name.clone(),
        keys,
        &[],
        config.token_rotation.policy(),
    );

    let prefix = entry
        .prefix
        .clone()
        .unwrap_or_else(|| format!("{}-", entry.name));

    UpstreamProvider::new(
        entry.name.clone(),
        entry.base_url.clone(),
        "/v1/chat/completions",
        prefix,
        Vec::new(),
        pool,
    )
}
