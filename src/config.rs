//! Configuration loading and validation.
//!
//! Configuration lives in a TOML file; secrets (API keys, base-URL
//! override) come from the environment via [`crate::credentials`].

use std::path::Path;

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Model configuration (primary and fallback specs).
    #[serde(default)]
    pub models: ModelsConfig,

    /// Agent loop limits.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Practice-plan lifecycle settings.
    #[serde(default)]
    pub plans: PlansConfig,
}

/// Model specs for the two interchangeable configurations.
#[derive(Debug, Deserialize)]
pub struct ModelsConfig {
    /// Primary model spec (e.g. "gemini/gemini-3-flash-preview").
    #[serde(default = "default_primary")]
    pub primary: String,

    /// Fallback model spec, used when the primary is rate-limited.
    #[serde(default = "default_fallback")]
    pub fallback: String,

    /// Per-request timeout applied to model calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            fallback: default_fallback(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Agent loop limits.
#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    /// Maximum model/tool rounds per turn before the loop degrades to an
    /// "unable to complete" answer.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Maximum tokens to request from the model per call.
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_response_tokens: default_max_response_tokens(),
        }
    }
}

/// Practice-plan lifecycle settings.
#[derive(Debug, Deserialize)]
pub struct PlansConfig {
    /// Words that confirm a pending plan (case-insensitive substring match
    /// against the user message).
    #[serde(default = "default_confirmation_words")]
    pub confirmation_words: Vec<String>,
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            confirmation_words: default_confirmation_words(),
        }
    }
}

// Default value functions for serde

fn default_primary() -> String {
    "gemini/gemini-3-flash-preview".to_owned()
}
fn default_fallback() -> String {
    "anthropic/MiniMax-M2.1".to_owned()
}
fn default_request_timeout() -> u64 {
    60
}
fn default_max_rounds() -> u32 {
    6
}
fn default_max_response_tokens() -> u32 {
    4096
}
fn default_confirmation_words() -> Vec<String> {
    [
        "yes", "yeah", "yep", "sure", "ok", "okay", "confirm", "save", "please",
    ]
    .into_iter()
    .map(ToOwned::to_owned)
    .collect()
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}
