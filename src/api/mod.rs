//! HTTP surface: the aggregator callback endpoint and the internal
//! settlement/wallet/jackpot API, served over axum.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod monitoring;
pub mod routes;
pub mod server;

pub use server::ApiServer;
