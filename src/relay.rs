//! Static upstream configuration. This is the only state the relay holds,
//! and it is read-only for the life of the process.
use bon::Builder;
use serde::{Deserialize, Serialize};
use url::Url;

/// Substituted when a request omits `model` or sends a blank one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Path of the completion endpoint, relative to the upstream base URL.
pub(crate) const COMPLETIONS_PATH: &str = "v1/chat/completions";

/// Path of the models-list endpoint, relative to the upstream base URL.
pub(crate) const MODELS_PATH: &str = "v1/models";

/// Where the upstream lives and how to authenticate against it.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct RelayConfig {
    /// Base URL of the OpenAI-compatible upstream.
    pub url: Url,
    /// Server-held bearer credential. When absent, every endpoint that talks
    /// upstream degrades to a 500.
    pub key: Option<String>,
    /// Model used when the request does not pick one.
    #[builder(default = DEFAULT_MODEL.to_string())]
    pub default_model: String,
}

impl RelayConfig {
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }
}
