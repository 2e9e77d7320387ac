use std::{
    env, fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

use crate::{
    error::ServiceError,
    precision::{DevicePreference, Precision},
};

pub const DEFAULT_MODEL_ID: &str = "HeySalad/Cheri-ML-1.3B";
pub const DEFAULT_PORT: u16 = 8000;

/// Which HTTP contract the server exposes.
///
/// `Full` serves `/`, a `"healthy"` health check, temperature sampling, an
/// echoed prompt and caught errors with their message. `Simple` serves a
/// `"ok"` health check and greedy generation returning `{"text": ...}`, with
/// every failure collapsed into a bare 500.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiProfile {
    Full,
    Simple,
}

impl fmt::Display for ApiProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiProfile::Full => f.write_str("full"),
            ApiProfile::Simple => f.write_str("simple"),
        }
    }
}

impl FromStr for ApiProfile {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "full" => Ok(ApiProfile::Full),
            "simple" => Ok(ApiProfile::Simple),
            other => Err(ServiceError::Other(format!("unknown api profile '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_id: String,
    pub revision: Option<String>,
    pub model_path: PathBuf,
    pub tokenizer_path: Option<PathBuf>,
    pub precision: Precision,
    pub device: DevicePreference,
    pub profile: ApiProfile,
    pub default_max_tokens: usize,
    pub default_temperature: f64,
    pub max_tokens_limit: usize,
    pub max_concurrent_generations: usize,
    pub eos_token_id: Option<u32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: None,
            model_path: PathBuf::from("models/cheri-ml-1.3b.ts"),
            tokenizer_path: None,
            precision: Precision::F16,
            device: DevicePreference::Auto,
            profile: ApiProfile::Full,
            default_max_tokens: 100,
            default_temperature: 0.7,
            max_tokens_limit: 2048,
            max_concurrent_generations: 1,
            eos_token_id: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Numeric values that do
    /// not parse fall back to their defaults; enumerated values that do not
    /// parse are rejected so a typo never silently changes the contract.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let listen_addr = lookup("SERVER_ADDR")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.listen_addr);

        let model_id = lookup("MODEL_ID").unwrap_or(defaults.model_id);
        let revision = lookup("MODEL_REVISION");
        let model_path = lookup("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_path);
        let tokenizer_path = lookup("TOKENIZER_PATH").map(PathBuf::from);

        let precision: Precision = match lookup("DTYPE") {
            Some(raw) => raw.parse()?,
            None => defaults.precision,
        };
        let device: DevicePreference = match lookup("DEVICE") {
            Some(raw) => raw.parse()?,
            None => defaults.device,
        };
        let profile: ApiProfile = match lookup("API_PROFILE") {
            Some(raw) => raw.parse()?,
            None => defaults.profile,
        };

        let default_max_tokens = lookup("DEFAULT_MAX_TOKENS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.default_max_tokens);
        let default_temperature = lookup("DEFAULT_TEMPERATURE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.default_temperature);
        let max_tokens_limit = lookup("MAX_TOKENS_LIMIT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_tokens_limit);
        let max_concurrent_generations = lookup("MAX_CONCURRENT_GENERATIONS")
            .and_then(|v| v.parse::<usize>().ok())
            .map(|n| n.max(1))
            .unwrap_or(defaults.max_concurrent_generations);
        let eos_token_id = lookup("EOS_TOKEN_ID").and_then(|v| v.parse().ok());

        Ok(Self {
            listen_addr,
            model_id,
            revision,
            model_path,
            tokenizer_path,
            precision,
            device,
            profile,
            default_max_tokens,
            default_temperature,
            max_tokens_limit,
            max_concurrent_generations,
            eos_token_id,
        })
    }
}
