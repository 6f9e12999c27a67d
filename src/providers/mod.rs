// Upstream provider adapters - thin consumers of the credential pool

pub mod atlas;
pub mod copilot;
pub mod openai_compat;

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::error::ProviderError;
use crate::rotation::{is_rate_limited, CredentialPool, FailureReason};

/// One OpenAI-compatible upstream plus its own credential pool. The
/// adapters differ only in construction, so a single generic type carries
/// all of them.
pub struct UpstreamProvider {
    name: String,
    base_url: String,
    chat_path: String,
    model_prefix: String,
    models: Vec<&'static str>,
    pool: CredentialPool,
    http_client: reqwest::Client,
}

impl UpstreamProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        chat_path: impl Into<String>,
        model_prefix: impl Into<String>,
        models: Vec<&'static str>,
        pool: CredentialPool,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            name: name.into(),
            base_url,
            chat_path: chat_path.into(),
            model_prefix: model_prefix.into(),
            models,
            pool,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_prefix(&self) -> &str {
        &self.model_prefix
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Known model ids, without the routing prefix.
    pub fn model_ids(&self) -> &[&'static str] {
        &self.models
    }

    /// Whether this adapter serves `model`: either the routing prefix is
    /// present, or the bare name appears in the adapter's model list.
    pub fn handles_model(&self, model: &str) -> bool {
        if model.is_empty() {
            return false;
        }
        if model.starts_with(&self.model_prefix) {
            return true;
        }
        self.models.iter().any(|m| *m == model)
    }

    /// Model name as the upstream expects it (routing prefix stripped).
    pub fn upstream_model_name<'a>(&self, model: &'a str) -> &'a str {
        model.strip_prefix(self.model_prefix.as_str()).unwrap_or(model)
    }

    /// Forward an OpenAI-shaped chat completion body. On a 429 the active
    /// credential is blocked and rotated and the caller gets a retryable
    /// `RateLimited`; other upstream failures pass through untouched.
    pub async fn chat_completions(&self, body: &Value) -> Result<Value, ProviderError> {
        let secret = self.pool.current().ok_or_else(|| ProviderError::NoCredential {
            provider: self.name.clone(),
        })?;

        let mut payload = body.clone();
        if let Some(model) = payload.get("model").and_then(|m| m.as_str()) {
            let upstream_model = self.upstream_model_name(model).to_string();
            payload["model"] = json!(upstream_model);
        }

        let url = format!("{}{}", self.base_url, self.chat_path);
        let response = match self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .bearer_auth(&secret)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // transport errors carry no status; message matching is the
                // only classification left
                if is_rate_limited(e.status().map(|s| s.as_u16()), &e.to_string()) {
                    tracing::warn!("{}: rate limit hit, rotating credential", self.name);
                    self.pool.mark_failure(FailureReason::RateLimited);
                    return Err(ProviderError::RateLimited);
                }
                return Err(ProviderError::Http(e));
            }
        };

        let status = response.status().as_u16();
        if is_rate_limited(Some(status), "") {
            tracing::warn!("{}: rate limit hit, rotating credential", self.name);
            self.pool.mark_failure(FailureReason::RateLimited);
            return Err(ProviderError::RateLimited);
        }

        let body: Value = response.json().await?;
        if !(200..300).contains(&status) {
            let message = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
                .unwrap_or_else(|| body.to_string());
            self.pool.mark_failure(FailureReason::Other);
            return Err(ProviderError::Upstream { status, message });
        }

        self.pool.mark_success();
        Ok(body)
    }
}

/// Name → adapter lookup plus model-based resolution, in registration
/// order.
pub struct ProviderRegistry {
    providers: Vec<Arc<UpstreamProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Build every enabled adapter from the live configuration and the
    /// credential entries discovered in the env store.
    pub fn from_config(config: &AppConfig, env_entries: &[(String, String)]) -> Self {
        let mut registry = Self::new();

        if config.atlas.enabled {
            registry.register(atlas::build(config, env_entries));
        }
        if config.copilot.enabled {
            registry.register(copilot::build(config, env_entries));
        }
        for entry in &config.openai_compatibility {
            registry.register(openai_compat::build(config, entry));
        }

        registry
    }

    pub fn register(&mut self, provider: UpstreamProvider) {
        tracing::info!("registered provider: {}", provider.name());
        self.providers.push(Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<UpstreamProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// First adapter claiming the model, in registration order.
    pub fn find_for_model(&self, model: &str) -> Option<Arc<UpstreamProvider>> {
        self.providers
            .iter()
            .find(|p| p.handles_model(model))
            .cloned()
    }

    pub fn all(&self) -> &[Arc<UpstreamProvider>] {
        &self.providers
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::RotationPolicy;

    fn provider(name: &str, prefix: &str, models: Vec<&'static str>) -> UpstreamProvider {
        let pool = CredentialPool::new(
            name.to_string(),
            vec![("KEY1".to_string(), "gho_test".to_string())],
            &[],
            RotationPolicy::default(),
        );
        UpstreamProvider::new(
            name.to_string(),
            "https://example.test/",
            "/v1/chat/completions",
            prefix.to_string(),
            models,
            pool,
        )
    }

    #[test]
    fn handles_model_by_prefix_or_catalog() {
        let p = provider("atlas", "atlas-", vec!["gpt-4o", "phi-4"]);
        assert!(p.handles_model("atlas-gpt-4o"));
        assert!(p.handles_model("atlas-anything"));
        assert!(p.handles_model("phi-4"));
        assert!(!p.handles_model("claude-3-opus"));
        assert!(!p.handles_model(""));
    }

    #[test]
    fn upstream_model_name_strips_only_the_routing_prefix() {
        let p = provider("atlas", "atlas-", vec!["gpt-4o"]);
        assert_eq!(p.upstream_model_name("atlas-gpt-4o"), "gpt-4o");
        assert_eq!(p.upstream_model_name("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let p = provider("atlas", "atlas-", vec![]);
        assert_eq!(p.base_url, "https://example.test");
    }

    #[test]
    fn registry_resolves_in_registration_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(provider("atlas", "atlas-", vec!["gpt-4o"]));
        registry.register(provider("copilot", "ext-copilot-", vec!["gpt-4o"]));

        let found = registry.find_for_model("gpt-4o").unwrap();
        assert_eq!(found.name(), "atlas");

        let found = registry.find_for_model("ext-copilot-gpt-4o").unwrap();
        assert_eq!(found.name(), "copilot");

        assert!(registry.find_for_model("unknown-model").is_none());
        assert!(registry.get("copilot").is_some());
        assert!(registry.get("nope").is_none());
    }
}
