pub mod cli;
pub mod config;
pub mod entity;
pub mod error;
pub mod health;
pub mod instance;
pub mod model;
pub mod quota;
pub mod reconciler;
pub mod registry;
pub mod server;
pub mod store;
pub mod usage;

#[cfg(test)]
mod testing;

pub use error::{NodeError, Result};
