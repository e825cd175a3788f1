use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::{sync::watch, task::JoinHandle};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::execution_router::ExecutionRouter;

use super::routes::{
    claim::claim_gift,
    gift_return::return_gift,
    mint::{mint_nft, mint_nft_batch},
    status::operation_status,
    transfer::transfer_token,
};

#[derive(Clone)]
pub struct EngineServerState {
    pub router: Arc<ExecutionRouter>,
    pub auth_secret: String,
}

pub struct EngineServer {
    handle: Option<JoinHandle<Result<(), std::io::Error>>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    app: Router,
}

impl EngineServer {
    pub async fn new(state: EngineServerState) -> Self {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false);

        let router = Router::new()
            .route("/claim", post(claim_gift))
            .route("/mint", post(mint_nft))
            .route("/mint/batch", post(mint_nft_batch))
            .route("/transfer", post(transfer_token))
            .route("/gift/return", post(return_gift))
            .route("/status/{nonce}", get(operation_status))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        Self {
            handle: None,
            shutdown_tx: None,
            app: router,
        }
    }

    pub fn start(&mut self, listener: tokio::net::TcpListener) -> Result<(), std::io::Error> {
        // Create a shutdown channel
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = self.app.clone();

        // Start the HTTP server in a background task
        let handle = tokio::spawn(async move {
            tracing::info!("HTTP server starting on {}", listener.local_addr().unwrap());

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let mut rx = shutdown_rx;
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                    tracing::info!("HTTP server shutting down");
                })
                .await
        });

        self.handle = Some(handle);
        self.shutdown_tx = Some(shutdown_tx);

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), std::io::Error> {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(true).is_err() {
                tracing::error!("Failed to send shutdown signal to HTTP server");
            }
        }

        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(result) => {
                    if let Err(e) = result {
                        tracing::error!("HTTP server error during shutdown: {}", e);
                        return Err(e);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to join HTTP server task: {}", e);
                    return Err(std::io::Error::other(format!("Task join error: {}", e)));
                }
            }
        }

        Ok(())
    }
}
