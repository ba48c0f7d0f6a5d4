//! API configuration.
//!
//! The API key is always supplied at startup, either as a flag or through the
//! environment (including a `.env` file). It is never compiled in.

use std::fmt;

use clap::Args;

use crate::prelude::*;

/// Default API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.mistral.ai/v1";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "pixtral-12b-latest";

/// Command-line options for talking to the OCR API.
#[derive(Args, Clone)]
pub struct ApiOpts {
    /// The API key to send as a bearer token.
    #[clap(long, env = "MISTRAL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the API server URL.
    #[clap(long, env = "MISTRAL_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// The vision model to use for both OCR stages.
    #[clap(long, env = "MISTRAL_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// A TOML or JSON file overriding the built-in OCR prompts.
    #[clap(long = "prompts", value_name = "PATH")]
    pub prompts_path: Option<PathBuf>,
}

/// Validated API configuration.
#[derive(Clone)]
pub struct ApiConfig {
    /// Bearer token.
    api_key: String,

    /// Base URL, without a trailing slash.
    api_base: String,

    /// Model name.
    pub model: String,
}

impl ApiConfig {
    /// Build a configuration from explicit values.
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(anyhow!("API key is empty"));
        }
        let api_base = api_base.into().trim_end_matches('/').to_owned();
        if api_base.is_empty() {
            return Err(anyhow!("API base URL is empty"));
        }
        Ok(Self {
            api_key,
            api_base,
            model: model.into(),
        })
    }

    /// Build a configuration from our command-line options.
    pub fn from_opts(opts: &ApiOpts) -> Result<Self> {
        let api_key = opts.api_key.clone().ok_or_else(|| {
            anyhow!("no API key: pass --api-key or set MISTRAL_API_KEY")
        })?;
        Self::new(api_key, opts.api_base.clone(), opts.model.clone())
    }

    /// The bearer token.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// The full URL of the chat completions endpoint.
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

// Keep the key out of debug logs.
impl fmt::Debug for ApiOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiOpts")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("prompts_path", &self.prompts_path)
            .finish()
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}
