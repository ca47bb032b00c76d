//! Credential loading from the process environment.
//!
//! The binary loads `.env` via `dotenvy` before calling [`Credentials::from_env`];
//! tests build deterministic credentials with [`Credentials::from_map`].

use std::collections::BTreeMap;

/// Environment variable holding the Gemini API key.
pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
/// Environment variable holding the Anthropic-compatible API key.
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
/// Environment variable overriding the Anthropic-compatible base URL
/// (set when the fallback model is fronted by a compatible gateway).
pub const ANTHROPIC_BASE_URL: &str = "ANTHROPIC_BASE_URL";

/// Runtime credentials.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Collect the known credential keys from the process environment.
    ///
    /// Unset keys are simply absent; validation happens at provider
    /// construction time where a missing key is an actual problem.
    pub fn from_env() -> Self {
        let mut vars = BTreeMap::new();
        for key in [GEMINI_API_KEY, ANTHROPIC_API_KEY, ANTHROPIC_BASE_URL] {
            if let Ok(value) = std::env::var(key) {
                if !value.trim().is_empty() {
                    vars.insert(key.to_owned(), value);
                }
            }
        }
        Self { vars }
    }

    /// Returns a credential value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns a required credential or an error when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the key does not exist in loaded credentials.
    pub fn require(&self, key: &str) -> anyhow::Result<String> {
        self.vars
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing required credential: {key}"))
    }
}
