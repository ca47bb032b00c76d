//! Model gateway resolving the primary and fallback provider configurations.
//!
//! The gateway performs no implicit failover: the turn handler asks for an
//! explicit [`ModelSelection`] per invocation and decides itself when a
//! rate-limited primary warrants re-issuing the turn against the fallback.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::ModelsConfig;
use crate::credentials::{Credentials, ANTHROPIC_API_KEY, ANTHROPIC_BASE_URL, GEMINI_API_KEY};

use super::anthropic::AnthropicProvider;
use super::gemini::GeminiProvider;
use super::{parse_model_spec, LlmProvider};

/// Gateway construction errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Unsupported provider type in the spec prefix.
    #[error("unsupported provider '{provider}' in model spec '{spec}'")]
    UnsupportedProvider {
        /// Provider prefix.
        provider: String,
        /// Full model spec.
        spec: String,
    },
    /// Required API credential missing for a configured provider.
    #[error("missing credential for provider '{provider}': {key}")]
    MissingCredential {
        /// Provider name.
        provider: String,
        /// Missing credential key.
        key: String,
    },
}

/// Which of the two interchangeable model configurations to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSelection {
    /// The default configuration.
    Primary,
    /// The configuration used when the primary is rate-limited.
    Fallback,
}

/// Holds the two provider configurations and resolves them per call.
#[derive(Clone)]
pub struct ModelGateway {
    primary: Arc<dyn LlmProvider>,
    fallback: Arc<dyn LlmProvider>,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("primary", &self.primary.model_id())
            .field("fallback", &self.fallback.model_id())
            .finish()
    }
}

impl ModelGateway {
    /// Build a gateway from model config and loaded credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either spec cannot be parsed or its provider
    /// cannot be instantiated (unknown prefix, missing credential).
    pub fn from_config(models: &ModelsConfig, credentials: &Credentials) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(models.request_timeout_secs);
        let primary = instantiate_provider(&models.primary, credentials, timeout)
            .with_context(|| format!("failed to build primary provider '{}'", models.primary))?;
        let fallback = instantiate_provider(&models.fallback, credentials, timeout)
            .with_context(|| format!("failed to build fallback provider '{}'", models.fallback))?;
        Ok(Self { primary, fallback })
    }

    /// Create a gateway from explicit providers for integration tests.
    #[doc(hidden)]
    pub fn for_testing(primary: Arc<dyn LlmProvider>, fallback: Arc<dyn LlmProvider>) -> Self {
        Self { primary, fallback }
    }

    /// Resolve the provider for a selection.
    pub fn resolve(&self, selection: ModelSelection) -> Arc<dyn LlmProvider> {
        match selection {
            ModelSelection::Primary => Arc::clone(&self.primary),
            ModelSelection::Fallback => Arc::clone(&self.fallback),
        }
    }

    /// Model identifier for a selection, for reporting to the caller.
    pub fn model_id(&self, selection: ModelSelection) -> String {
        self.resolve(selection).model_id().to_owned()
    }
}

fn instantiate_provider(
    spec: &str,
    credentials: &Credentials,
    timeout: Duration,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let (provider, model) = parse_model_spec(spec)?;
    match provider {
        "gemini" => {
            let key = credentials.get(GEMINI_API_KEY).ok_or_else(|| {
                GatewayError::MissingCredential {
                    provider: provider.to_owned(),
                    key: GEMINI_API_KEY.to_owned(),
                }
            })?;
            Ok(Arc::new(GeminiProvider::new(
                spec.to_owned(),
                model.to_owned(),
                key.to_owned(),
                timeout,
            )))
        }
        "anthropic" => {
            let key = credentials.get(ANTHROPIC_API_KEY).ok_or_else(|| {
                GatewayError::MissingCredential {
                    provider: provider.to_owned(),
                    key: ANTHROPIC_API_KEY.to_owned(),
                }
            })?;
            let base_url = credentials.get(ANTHROPIC_BASE_URL).map(ToOwned::to_owned);
            Ok(Arc::new(AnthropicProvider::new(
                spec.to_owned(),
                model.to_owned(),
                key.to_owned(),
                base_url,
                timeout,
            )))
        }
        other => Err(GatewayError::UnsupportedProvider {
            provider: other.to_owned(),
            spec: spec.to_owned(),
        }
        .into()),
    }
}
