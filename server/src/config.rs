use std::env;

use config::{Config, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub sponsor: SponsorConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    pub auth: AuthConfig,
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".into(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Optional prefix isolating this deployment's keys.
    pub namespace: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/".into(),
            namespace: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
}

/// Sponsored-execution integration. The gasless path is available exactly
/// when the bundler and paymaster endpoints and the sponsor account are all
/// present; no network probe is performed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SponsorConfig {
    pub bundler_url: Option<String>,
    pub paymaster_url: Option<String>,
    pub api_key: Option<String>,
    /// Sponsor-managed smart account that executes on the engine's behalf.
    pub account: Option<String>,
    /// Entrypoint override; defaults to the canonical v0.6 address.
    pub entrypoint: Option<String>,
}

impl SponsorConfig {
    pub fn is_configured(&self) -> bool {
        self.bundler_url.is_some() && self.paymaster_url.is_some() && self.account.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Funded private key for the gas-paid path, hex encoded.
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Secret the bearer-token HMAC is verified against.
    pub token_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsConfig {
    pub escrow_address: String,
    pub nft_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_attempts: u32,
    pub max_retries: u32,
    pub pending_grace_secs: u64,
    /// Must exceed the confirmation timeout: the attempt record is the only
    /// thing standing between a slow confirmation and a double submission.
    pub attempt_ttl_secs: u64,
    pub record_ttl_secs: u64,
    pub confirmation_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    /// Coarse time bucket folded into the dedup key.
    pub dedup_bucket_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_secs: 60,
            rate_limit_max_attempts: 5,
            max_retries: 3,
            pending_grace_secs: 120,
            attempt_ttl_secs: 300,
            record_ttl_secs: 24 * 60 * 60,
            confirmation_timeout_secs: 120,
            receipt_poll_interval_ms: 3000,
            dedup_bucket_secs: 3600,
        }
    }
}

pub fn get_config() -> EngineConfig {
    let base_path = env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    // Detect the running environment
    let environment: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");

    let environment_filename = format!("server_{}.yaml", environment.as_str());

    // Load configuration from files
    let config = Config::builder()
        .add_source(File::from(configuration_directory.join("server_base.yaml")))
        .add_source(File::from(
            configuration_directory.join(environment_filename),
        ))
        .add_source(config::Environment::with_prefix("app").separator("__"))
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Configuration error: {}", e);
            panic!("Failed to build configuration");
        });

    // Deserialize the configuration
    config.try_deserialize::<EngineConfig>()
        .unwrap_or_else(|e| {
            eprintln!("Configuration error: {}", e);
            eprintln!("Make sure all required fields are set correctly in your configuration files or environment variables.");
            panic!("Failed to deserialize configuration");
        })
}

/// The possible runtime environment for our application.
pub enum Environment {
    Local,
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local`, `development`, or `production`.",
                other
            )),
        }
    }
}
