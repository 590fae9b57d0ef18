//! Real-time notification core for the home services marketplace client.
//!
//! A [`NotificationCenter`] owns the socket connection, the notification
//! store and the delivery policy; the `adapters` module projects their state
//! for the badge, dropdown, list and toast stack.

pub mod adapters;
pub mod config;
pub mod db;
pub mod error;
pub mod i18n;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AppError, AppResult, ConnectionError, CoreError};
pub use services::center::{CenterDeps, CoreSnapshot, NotificationCenter};
pub use services::transport::ConnectionStatus;
