//! Aggregator gateway: the provider's seamless-wallet callback protocol and
//! the outbound game-launch client.

pub mod crypto;
pub mod handler;
pub mod launch;
pub mod protocol;

pub use crypto::PayloadCipher;
pub use handler::Gateway;
pub use launch::LaunchClient;
