// GitHub Copilot provider - shares the GitHub token family with ATLAS

use crate::config::AppConfig;
use crate::rotation::CredentialPool;

use super::UpstreamProvider;

pub const NAME: &str = "githubcopilot";
pub const MODEL_PREFIX: &str = "ext-copilot-";

pub fn model_catalog() -> Vec<&'static str> {
    vec![
        "gpt-4",
        "gpt-4-turbo",
        "gpt-3.5-turbo",
        "claude-3-opus",
        "claude-3-sonnet",
    ]
}

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
        config.copilot.base_url.clone(),
        "/v1/chat/completions",
        MODEL_PREFIX,
        model_catalog(),
        pool,
    )
}
