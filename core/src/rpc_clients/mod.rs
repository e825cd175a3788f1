mod bundler;
mod paymaster;
pub mod transport;

pub use bundler::BundlerClient;
pub use paymaster::{PaymasterClient, PaymasterSponsorship};
