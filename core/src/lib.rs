pub mod chain;
pub mod constants;
pub mod defs;
pub mod error;
pub mod operation;
pub mod rpc_clients;
pub mod transaction;
pub mod userop;
