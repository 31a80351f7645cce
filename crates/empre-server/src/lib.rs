pub mod actor;
pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod ingest;
pub mod server;
pub mod session;
pub mod settings;
pub mod ws;

pub use config::{ServerConfig, SlowConsumerPolicy};
pub use hub::Hub;
pub use server::{start, ServerHandle};
pub use settings::{load_settings, Settings};
