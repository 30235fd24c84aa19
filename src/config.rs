//! Configuration parsing and validation for the relay binary.
//!
//! Command-line argument parsing via clap; the upstream credential comes
//! from the environment so it never appears in process listings.
use anyhow::anyhow;
use chat_relay::relay::DEFAULT_MODEL;
use clap::Parser;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The port on which the relay will listen.
    #[arg(short = 'p', long, default_value_t = 3000)]
    pub port: u16,

    /// Base URL of the OpenAI-compatible upstream API.
    #[arg(long, default_value = "https://api.openai.com")]
    pub upstream: Url,

    /// Upstream API credential. Without it, every endpoint that talks
    /// upstream answers with a 500.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model substituted when a request omits one or sends a blank one.
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub default_model: String,

    /// Whether to enable the metrics endpoint.
    #[arg(short = 'm', long, default_value_t = true)]
    pub metrics: bool,

    /// The port on which the metrics server will listen.
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// The prefix to use for metrics.
    #[arg(long, default_value = "chat_relay")]
    pub metrics_prefix: String,

    /// Maximum number of idle upstream connections to keep alive.
    #[arg(long, default_value_t = 100)]
    pub pool_max_idle_per_host: usize,

    /// How long (in seconds) to keep idle upstream connections alive.
    #[arg(long, default_value_t = 90)]
    pub pool_idle_timeout_secs: u64,
}

impl Config {
    pub fn validate(self) -> Result<Self, anyhow::Error> {
        if !matches!(self.upstream.scheme(), "http" | "https") {
            return Err(anyhow!(
                "Upstream URL '{}' must use http or https",
                self.upstream
            ));
        }
        Ok(self)
    }
}
