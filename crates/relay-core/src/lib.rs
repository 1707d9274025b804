pub mod chain;
pub mod config;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod monitor;
pub mod parser;
pub mod provider;
pub mod registry;
pub mod reliability;
pub mod rewards;
pub mod server;
pub mod session;
pub mod spec;
pub mod spec_validator;
pub mod state;
pub mod types;

#[cfg(test)]
mod mock;
#[cfg(test)]
mod test_util;

pub use config::ProviderConfig;
pub use error::{CoreError, ParseError, RelayError, SetupError};
pub use provider::{HttpBackend, ProviderPhase, RpcProvider};
