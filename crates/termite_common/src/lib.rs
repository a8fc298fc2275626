pub mod config;
pub mod error;

pub use config::{DatabaseConfig, DestinationConfig, DriverConfig, ExecMode, TermiteConfig};
pub use error::ConfigError;
