use crate::entity::{ss_node, user};
use crate::error::{NodeError, Result};

/// One enabled user as read from the store at the start of a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i32,
    pub port: u16,
    pub method: String,
    pub password: String,
    pub enabled: bool,
    pub upload: u64,
    pub download: u64,
    pub transfer_ceiling: u64,
}

impl TryFrom<user::Model> for UserRecord {
    type Error = NodeError;

    fn try_from(model: user::Model) -> Result<Self> {
        let port = u16::try_from(model.port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| {
                NodeError::DataIntegrity(format!(
                    "user {} has invalid port {}",
                    model.id, model.port
                ))
            })?;

        Ok(Self {
            id: model.id,
            port,
            upload: unsigned(model.u, "u", model.id)?,
            download: unsigned(model.d, "d", model.id)?,
            transfer_ceiling: unsigned(model.transfer_enable, "transfer_enable", model.id)?,
            enabled: model.enable != 0,
            method: model.method,
            password: model.passwd,
        })
    }
}

/// Aggregate bandwidth state of this node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeQuota {
    pub consumed: u64,
    /// Zero means unlimited
    pub limit: u64,
    pub traffic_rate: f64,
}

impl TryFrom<ss_node::Model> for NodeQuota {
    type Error = NodeError;

    fn try_from(model: ss_node::Model) -> Result<Self> {
        if !model.traffic_rate.is_finite() || model.traffic_rate < 0.0 {
            return Err(NodeError::DataIntegrity(format!(
                "node {} has invalid traffic rate {}",
                model.id, model.traffic_rate
            )));
        }

        Ok(Self {
            consumed: unsigned(model.node_bandwidth, "node_bandwidth", model.id)?,
            limit: unsigned(model.node_bandwidth_limit, "node_bandwidth_limit", model.id)?,
            traffic_rate: model.traffic_rate,
        })
    }
}

/// Rated traffic of one flush, written as a `user_traffic_log` row and
/// added to the user's cumulative totals.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficEntry {
    pub user_id: i32,
    pub upload: u64,
    pub download: u64,
    pub rate: f64,
    pub logged_at: i64,
}

impl TrafficEntry {
    pub fn traffic(&self) -> Option<u64> {
        self.upload.checked_add(self.download)
    }
}

/// Host health sample written to `ss_node_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub uptime_secs: u64,
    pub load: [f64; 3],
    pub logged_at: i64,
}

impl NodeInfo {
    pub fn load_text(&self) -> String {
        format!("{:.2} {:.2} {:.2}", self.load[0], self.load[1], self.load[2])
    }
}

fn unsigned(value: i64, column: &str, id: i32) -> Result<u64> {
    u64::try_from(value).map_err(|_| {
        NodeError::DataIntegrity(format!("row {} has negative {} ({})", id, column, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_model() -> user::Model {
        user::Model {
            id: 5,
            u: 100,
            d: 200,
            t: 0,
            port: 10_005,
            method: "aes-256-gcm".to_string(),
            passwd: "pw".to_string(),
            enable: 1,
            transfer_enable: 1_000,
        }
    }

    #[test]
    fn test_user_conversion() {
        let user = UserRecord::try_from(user_model()).unwrap();
        assert_eq!(user.port, 10_005);
        assert_eq!(user.upload, 100);
        assert_eq!(user.download, 200);
        assert_eq!(user.transfer_ceiling, 1_000);
        assert!(user.enabled);
        assert_eq!(user.password, "pw");
    }

    #[test]
    fn test_user_rejects_bad_port_and_negative_counters() {
        let mut model = user_model();
        model.port = 70_000;
        assert!(matches!(
            UserRecord::try_from(model),
            Err(NodeError::DataIntegrity(_))
        ));

        let mut model = user_model();
        model.port = 0;
        assert!(UserRecord::try_from(model).is_err());

        let mut model = user_model();
        model.d = -1;
        assert!(matches!(
            UserRecord::try_from(model),
            Err(NodeError::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_node_quota_rejects_invalid_rate() {
        let model = ss_node::Model {
            id: 1,
            traffic_rate: f64::NAN,
            node_bandwidth: 0,
            node_bandwidth_limit: 0,
            node_heartbeat: 0,
        };
        assert!(NodeQuota::try_from(model.clone()).is_err());

        let quota = NodeQuota::try_from(ss_node::Model {
            traffic_rate: 1.5,
            node_bandwidth: 10,
            node_bandwidth_limit: 20,
            ..model
        })
        .unwrap();
        assert_eq!(quota.consumed, 10);
        assert_eq!(quota.limit, 20);
    }

    #[test]
    fn test_load_text_format() {
        let info = NodeInfo {
            uptime_secs: 10,
            load: [0.5, 1.234, 12.0],
            logged_at: 0,
        };
        assert_eq!(info.load_text(), "0.50 1.23 12.00");
    }
}
