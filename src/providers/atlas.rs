// ATLAS provider - GitHub Models inference API behind one adapter

use crate::config::AppConfig;
use crate::rotation::CredentialPool;

use super::UpstreamProvider;

pub const NAME: &str = "atlas";
pub const MODEL_PREFIX: &str = "atlas-";

/// The GitHub Models catalog served through this adapter. Models route both
/// as `atlas-<id>` and as the bare id.
pub fn model_catalog() -> Vec<&'static str> {
    vec![
        "ai21-jamba-1.5-large",
        "ai21-jamba-1.5-mini",
        "cohere-command-a",
        "cohere-command-r-08-2024",
        "cohere-command-r-plus-08-2024",
        "jais-30b-chat",
        "deepseek-r1",
        "deepseek-r1-0528",
        "deepseek-v3-0324",
        "llama-3.2-11b-vision-instruct",
        "llama-3.2-90b-vision-instruct",
        "llama-3.3-70b-instruct",
        "llama-4-maverick-17b-128e-instruct-fp8",
        "llama-4-scout-17b-16e-instruct",
        "meta-llama-3.1-405b-instruct",
        "meta-llama-3.1-8b-instruct",
        "mai-ds-r1",
        "phi-3-medium-128k-instruct",
        "phi-3-medium-4k-instruct",
        "phi-3-mini-128k-instruct",
        "phi-3-mini-4k-instruct",
        "phi-3-small-128k-instruct",
        "phi-3-small-8k-instruct",
        "phi-3.5-mini-instruct",
        "phi-3.5-moe-instruct",
        "phi-3.5-vision-instruct",
        "phi-4",
        "phi-4-mini-instruct",
        "phi-4-mini-reasoning",
        "phi-4-multimodal-instruct",
        "phi-4-reasoning",
        "codestral-2501",
        "ministral-3b",
        "mistral-large-2411",
        "mistral-medium-2505",
        "mistral-nemo",
        "mistral-small-2503",
        "gpt-4.1",
        "gpt-4.1-mini",
        "gpt-4.1-nano",
        "gpt-4o",
        "gpt-4o-mini",
        "gpt-5",
        "gpt-5-chat",
        "gpt-5-mini",
        "gpt-5-nano",
        "o1",
        "o1-mini",
        "o1-preview",
        "o3",
        "o3-mini",
        "o4-mini",
        "grok-3",
        "grok-3-mini",
    ]
}

/// Build the adapter with its own pool over the GitHub token family.
pub fn build(config: &AppConfig, env_entries: &[(String, String)]) -> UpstreamProvider {
    let rotation = &config.token_rotation;
    let entries: Vec<(String, String)> = env_entries
        .iter()
        .filter(|(key, _)| key.starts_with(&rotation.family))
        .cloned()
        .collect();

    let pool = CredentialPool::new(
        NAME,
        entries,
        &rotation.secret_prefixes,
        rotation.policy(),
    );

    UpstreamProvider::new(
        NAME,
        config.atlas.base_url.clone(),
        "/chat/completions",
        MODEL_PREFIX,
        model_catalog(),
        pool,
    )
}
