use crate::config::NodeConfig;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "ssnode")]
#[command(about = "Per-user proxy node driven by an SSPanel database", long_about = None)]
pub struct CliArgs {
    /// Config file path
    #[arg(short, long, default_value = "node.toml")]
    pub config: String,

    /// Row id of this node in ss_node
    #[arg(long, env = "SSNODE_NODE_ID")]
    pub node_id: Option<i32>,

    #[arg(long, env = "SSNODE_DB_HOST")]
    pub db_host: Option<String>,

    #[arg(long, env = "SSNODE_DB_PORT")]
    pub db_port: Option<u16>,

    #[arg(long, env = "SSNODE_DB_USER")]
    pub db_user: Option<String>,

    #[arg(long, env = "SSNODE_DB_PASS")]
    pub db_pass: Option<String>,

    #[arg(long, env = "SSNODE_DB_NAME")]
    pub db_name: Option<String>,

    /// Seconds between two synchronization ticks
    #[arg(long, env = "SSNODE_SYNC_INTERVAL")]
    pub sync_interval: Option<u64>,

    /// Also relay UDP on every user port
    #[arg(long)]
    pub udp: bool,

    #[arg(long, env = "SSNODE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Print the supported ciphers and exit
    #[arg(long)]
    pub list_ciphers: bool,
}

impl CliArgs {
    /// Command line values win over the config file.
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(node_id) = self.node_id {
            config.node_id = Some(node_id);
        }
        if let Some(host) = &self.db_host {
            config.database.host = host.clone();
        }
        if let Some(port) = self.db_port {
            config.database.port = port;
        }
        if let Some(user) = &self.db_user {
            config.database.user = user.clone();
        }
        if let Some(password) = &self.db_pass {
            config.database.password = password.clone();
        }
        if let Some(name) = &self.db_name {
            config.database.name = name.clone();
        }
        if let Some(interval) = self.sync_interval {
            config.sync_interval_secs = interval;
        }
        if self.udp {
            config.udp_enabled = true;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}
