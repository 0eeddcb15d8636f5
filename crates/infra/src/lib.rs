//! Infrastructure layer: configuration, component wiring and background workers.

pub mod config;
pub mod expiry_worker;
pub mod services;

pub use config::{ConfigError, InventoryConfig, bootstrap};
pub use expiry_worker::{ExpiryWorker, ExpiryWorkerConfig, ExpiryWorkerHandle};
pub use services::InventoryServices;
