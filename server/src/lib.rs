pub mod chains;
pub mod config;
pub mod execution_router;
pub mod http;

// Re-export commonly used types for integration tests and external usage
pub use chains::RelayChainService;
pub use config::EngineConfig;
pub use execution_router::ExecutionRouter;
pub use http::server::{EngineServer, EngineServerState};
