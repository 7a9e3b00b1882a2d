pub mod auth;
pub mod bus;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod services;
pub mod state;
pub mod websocket;

pub use error::{AppError, Result};
pub use server::{NotificationServer, ServerHandle};
