pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod security;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
pub use realtime::ChannelHub;
pub use state::AppState;
