use crate::error::{NodeError, Result};
use crate::model::{NodeQuota, UserRecord};

/// Bytes the user has already consumed.
pub fn used(user: &UserRecord) -> Result<u64> {
    user.upload.checked_add(user.download).ok_or_else(|| {
        NodeError::DataIntegrity(format!(
            "usage of user {} overflows: {} + {}",
            user.id, user.upload, user.download
        ))
    })
}

/// A user may run an instance while the ceiling is strictly above usage.
pub fn is_eligible(user: &UserRecord) -> Result<bool> {
    Ok(user.transfer_ceiling > used(user)?)
}

impl NodeQuota {
    /// The whole node is out of bandwidth; every instance must go.
    pub fn is_exhausted(&self) -> bool {
        self.limit != 0 && self.consumed >= self.limit
    }
}

/// Apply the node's traffic multiplier to a raw byte count.
pub fn rate_bytes(raw: u64, rate: f64) -> Result<u64> {
    let rated = raw as f64 * rate;
    if !rated.is_finite() || rated < 0.0 || rated >= u64::MAX as f64 {
        return Err(NodeError::DataIntegrity(format!(
            "rated traffic out of range: {} * {}",
            raw, rate
        )));
    }
    Ok(rated as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(upload: u64, download: u64, ceiling: u64) -> UserRecord {
        UserRecord {
            id: 1,
            port: 100,
            method: "aes-256-gcm".to_string(),
            password: "pw".to_string(),
            enabled: true,
            upload,
            download,
            transfer_ceiling: ceiling,
        }
    }

    #[test]
    fn test_eligible_below_ceiling() {
        assert!(is_eligible(&user(0, 0, 1000)).unwrap());
        assert!(is_eligible(&user(400, 599, 1000)).unwrap());
    }

    #[test]
    fn test_equal_usage_is_exhausted() {
        assert!(!is_eligible(&user(500, 500, 1000)).unwrap());
        assert!(!is_eligible(&user(0, 0, 0)).unwrap());
        assert!(!is_eligible(&user(900, 200, 1000)).unwrap());
    }

    #[test]
    fn test_overflow_is_integrity_error() {
        let result = is_eligible(&user(u64::MAX, 1, u64::MAX));
        assert!(matches!(result, Err(NodeError::DataIntegrity(_))));
    }

    #[test]
    fn test_large_counters_do_not_wrap() {
        let big = 1u64 << 62;
        assert!(is_eligible(&user(big, big, u64::MAX)).unwrap());
        assert!(!is_eligible(&user(big, big, big)).unwrap());
    }

    #[test]
    fn test_node_exhaustion() {
        let quota = |consumed, limit| NodeQuota {
            consumed,
            limit,
            traffic_rate: 1.0,
        };
        assert!(quota(5000, 4000).is_exhausted());
        assert!(quota(4000, 4000).is_exhausted());
        assert!(!quota(3999, 4000).is_exhausted());
        assert!(!quota(u64::MAX, 0).is_exhausted());
    }

    #[test]
    fn test_rate_bytes() {
        assert_eq!(rate_bytes(1000, 1.0).unwrap(), 1000);
        assert_eq!(rate_bytes(1000, 0.5).unwrap(), 500);
        assert_eq!(rate_bytes(3, 1.5).unwrap(), 4);
        assert_eq!(rate_bytes(1000, 0.0).unwrap(), 0);
        assert!(rate_bytes(u64::MAX, 2.0).is_err());
    }
}
