use crate::aggregator::MissingData;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("coordinator has not been set up")]
    NotSetUp,
    #[error("Powerwall rejected the configured credentials")]
    AuthenticationRejected,
    #[error("authentication failed: {0}")]
    Authentication(#[source] anyhow::Error),
    #[error("{field} fetch failed: {source}")]
    Fetch {
        field: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("no data for: {0}")]
    MissingData(MissingData),
    #[error("poll did not complete within {0:?}")]
    Timeout(Duration),
    #[error("{field} fetch task did not finish: {source}")]
    Task {
        field: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl From<MissingData> for PollError {
    fn from(missing: MissingData) -> Self {
        Self::MissingData(missing)
    }
}
