// rackdash-api: Stateless async client for the router vendor's cloud API

pub mod auth;
pub mod client;
pub mod devices;
pub mod error;
mod lenient;
pub mod models;
pub mod speedtest;
pub mod transport;

pub use client::ApiClient;
pub use error::{Error, ErrorClass};
pub use transport::TransportConfig;
