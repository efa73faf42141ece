#[macro_use]
pub(crate) mod common;
pub mod auth;
pub mod cluster;
pub mod configuration;
pub mod model;
pub mod reaper;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod tests;
