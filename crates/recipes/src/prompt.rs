// SPDX-License-Identifier: Apache-2.0

//! Prompt service SPI.
//!
//! The minimal interface the generator uses to request business-logic bodies
//! for recipe slots. Providers register statically by name; selection,
//! budgets, and timeouts are configuration, not code paths. The kernel is
//! provider-agnostic: nothing in the runtime depends on a specific provider.

use crate::RecipeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Static configuration selecting and bounding a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PromptConfig {
    /// Registered provider name.
    pub provider: String,
    /// Model identifier passed through to the provider.
    #[serde(default)]
    pub model: String,
    /// Token budget per generation request.
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: u32,
    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_budget_tokens() -> u32 {
    4_096
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Per-request generation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Override the configured model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Cap the response length in tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// A provider of generated text and embeddings.
#[async_trait(?Send)]
pub trait PromptService {
    /// Generates text for a prompt.
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String, RecipeError>;

    /// Embeds text into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RecipeError>;

    /// The registered provider name.
    fn provider_name(&self) -> &'static str;
}

/// A factory constructing a provider from its configuration.
pub struct PromptProviderFactory {
    /// Registered provider name.
    pub name: &'static str,
    /// Constructor.
    pub create: fn(&PromptConfig) -> Box<dyn PromptService>,
}

/// A deterministic offline provider: the generated "body" is a stable
/// transcript of the prompt. Used by tests and by offline expansion where no
/// real provider is configured.
pub struct StaticPromptService;

#[async_trait(?Send)]
impl PromptService for StaticPromptService {
    async fn generate(&self, prompt: &str, _opts: &GenerateOptions) -> Result<String, RecipeError> {
        // Deterministic: a stable digest of the prompt, no wall clock, no rng.
        let digest: u64 = prompt
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
                (acc ^ u64::from(b)).wrapping_mul(0x1000_0000_01b3)
            });
        Ok(format!(
            "// generated body (static provider, digest {digest:016x})\n{prompt}\n"
        ))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RecipeError> {
        Ok(text
            .bytes()
            .take(16)
            .map(|b| f32::from(b) / 255.0)
            .collect())
    }

    fn provider_name(&self) -> &'static str {
        "static"
    }
}

static PROVIDERS: &[PromptProviderFactory] = &[PromptProviderFactory {
    name: "static",
    create: |_config| Box::new(StaticPromptService),
}];

static PROVIDER_MAP: OnceLock<HashMap<&'static str, &'static PromptProviderFactory>> =
    OnceLock::new();

/// The provider registry, keyed by provider name.
pub fn providers() -> &'static HashMap<&'static str, &'static PromptProviderFactory> {
    PROVIDER_MAP.get_or_init(|| PROVIDERS.iter().map(|f| (f.name, f)).collect())
}

/// Constructs the provider selected by the configuration.
///
/// # Errors
///
/// Returns [`RecipeError::Prompt`] for unregistered provider names.
pub fn create_service(config: &PromptConfig) -> Result<Box<dyn PromptService>, RecipeError> {
    let factory = providers()
        .get(config.provider.as_str())
        .ok_or_else(|| RecipeError::Prompt {
            provider: config.provider.clone(),
            error: "unknown provider".to_owned(),
        })?;
    Ok((factory.create)(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_is_deterministic() {
        let service = StaticPromptService;
        let opts = GenerateOptions::default();
        let a = service.generate("transform body", &opts).await.unwrap();
        let b = service.generate("transform body", &opts).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(
            a,
            service.generate("other body", &opts).await.unwrap()
        );
        assert_eq!(service.provider_name(), "static");
    }

    #[tokio::test]
    async fn selection_is_by_registered_name() {
        let config = PromptConfig {
            provider: "static".to_owned(),
            model: String::new(),
            budget_tokens: 1024,
            timeout_ms: 1_000,
        };
        let service = create_service(&config).expect("registered");
        assert_eq!(service.provider_name(), "static");
        assert!(!service.embed("abc").await.unwrap().is_empty());

        let missing = PromptConfig {
            provider: "gpt-x".to_owned(),
            ..config
        };
        assert!(matches!(
            create_service(&missing),
            Err(RecipeError::Prompt { .. })
        ));
    }
}
