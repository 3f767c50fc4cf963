mod database_config;
mod node_config;

pub use database_config::DatabaseConfig;
pub use node_config::{NodeConfig, RestartPolicy};
