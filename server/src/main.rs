use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use giftrelay_core::constants::DEFAULT_ENTRYPOINT_ADDRESS_V0_6;
use giftrelay_engine::{
    chains::RelayChainService,
    config,
    execution_router::ExecutionRouter,
    http::server::{EngineServer, EngineServerState},
};
use giftrelay_executors::{
    executor::TransactionExecutor,
    rate_limiter::RedisRateLimiter,
    registry::{AttemptRegistry, RegistryConfig},
    verifier::ChainEventVerifier,
};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::get_config();

    let subscriber = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to debug level if RUST_LOG environment variable is not set
            "giftrelay_engine=debug,tower_http=debug,axum=debug,giftrelay_executors=debug,giftrelay_core=debug"
                .into()
        }),
    );

    match config.server.log_format {
        config::LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        config::LogFormat::Pretty => subscriber.with(tracing_subscriber::fmt::layer()).init(),
    }

    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let redis = redis_client.get_connection_manager().await?;
    tracing::info!("Redis connection established");

    let chains = Arc::new(RelayChainService::new(
        config.chain.clone(),
        config.sponsor.clone(),
    ));

    let signer = config
        .signer
        .private_key
        .as_deref()
        .map(|key| key.parse::<PrivateKeySigner>())
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid signer private key: {e}"))?;
    if let Some(signer) = &signer {
        tracing::info!(address = %signer.address(), "Funded signer configured");
    }

    let sponsor_account = config
        .sponsor
        .account
        .as_deref()
        .map(|account| account.parse::<Address>())
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid sponsor account: {e}"))?;

    let entrypoint = config
        .sponsor
        .entrypoint
        .as_deref()
        .map(|entrypoint| entrypoint.parse::<Address>())
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid entrypoint address: {e}"))?
        .unwrap_or(DEFAULT_ENTRYPOINT_ADDRESS_V0_6);

    let escrow_address: Address = config
        .contracts
        .escrow_address
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid escrow address: {e}"))?;
    let nft_address: Address = config
        .contracts
        .nft_address
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid NFT address: {e}"))?;

    let limits = &config.limits;

    let rate_limiter = RedisRateLimiter::new(
        redis.clone(),
        config.redis.namespace.clone(),
        Duration::from_secs(limits.rate_limit_window_secs),
        limits.rate_limit_max_attempts,
    );

    let registry = AttemptRegistry::new(
        redis,
        config.redis.namespace.clone(),
        RegistryConfig {
            attempt_ttl: Duration::from_secs(limits.attempt_ttl_secs),
            record_ttl: Duration::from_secs(limits.record_ttl_secs),
            pending_grace: Duration::from_secs(limits.pending_grace_secs),
            ..Default::default()
        },
    );

    let executor = TransactionExecutor {
        max_retries: limits.max_retries,
        confirmation_timeout: Duration::from_secs(limits.confirmation_timeout_secs),
        receipt_poll_interval: Duration::from_millis(limits.receipt_poll_interval_ms),
    };

    let execution_router = ExecutionRouter {
        chains,
        rate_limiter,
        registry,
        executor,
        verifier: ChainEventVerifier::default(),
        signer,
        sponsor_account,
        entrypoint,
        escrow_address,
        nft_address,
        dedup_bucket: Duration::from_secs(limits.dedup_bucket_secs),
    };

    let mut server = EngineServer::new(EngineServerState {
        router: Arc::new(execution_router),
        auth_secret: config.auth.token_secret.clone(),
    })
    .await;

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    server.start(listener)?;

    tracing::info!("Server started, waiting for shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Shutdown signal received");

    if let Err(e) = server.shutdown().await {
        tracing::error!("Error during coordinated shutdown: {}", e);
    } else {
        tracing::info!("Server shut down successfully");
    }

    Ok(())
}
