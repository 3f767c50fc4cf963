use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sea_orm::DbErr),

    #[error("Store operation '{0}' timed out")]
    StoreTimeout(&'static str),

    #[error("Node {0} not found")]
    NodeNotFound(i32),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Instance error: {0}")]
    Instance(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl NodeError {
    /// Whether the failed tick should simply be retried after the sync interval.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NodeError::StoreUnavailable(_) | NodeError::StoreTimeout(_) | NodeError::NodeNotFound(_)
        )
    }
}

impl From<relay::RelayError> for NodeError {
    fn from(err: relay::RelayError) -> Self {
        NodeError::Instance(err.to_string())
    }
}
