pub mod common;
pub mod server;

pub type Error = crate::common::error::HubError;
pub type Result<T> = std::result::Result<T, Error>;

pub const HUB_VERSION: &str = env!("CARGO_PKG_VERSION");
