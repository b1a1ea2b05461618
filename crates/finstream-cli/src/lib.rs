//! Terminal client for finstream.
//!
//! Wires the configuration, the HTTP token provider and the connection
//! manager together, renders stream updates as log lines and records
//! connection metrics.

pub mod app;
pub mod config;
pub mod error;
pub mod input;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use input::InputCommand;
