pub mod advertiser;
pub mod builder;
pub mod config;
pub mod daemon;
pub mod error;
pub mod link;
pub mod logging;
pub mod ndp;
pub mod plugin;
#[cfg(unix)]
pub mod signal;
pub mod sysctl;

#[cfg(test)]
mod testutil;

pub use advertiser::Advertiser;
pub use builder::{BuildError, Builder};
pub use config::{Config, ConfigError, Interface};
pub use error::Error;
