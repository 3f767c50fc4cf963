use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the individual fields
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

fn default_name() -> String {
    "sspanel".to_string()
}

fn default_max_connections() -> u32 {
    4
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            name: default_name(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// Credentials are percent-encoded so any password yields a valid DSN.
    pub fn url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "mysql://{}:{}@{}:{}/{}",
                urlencoding::encode(&self.user),
                urlencoding::encode(&self.password),
                self.host,
                self.port,
                self.name
            ),
        }
    }
}
