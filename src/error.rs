use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to fetch {noun} state from the primary datacenter: {source}")]
    Unavailable {
        noun: &'static str,
        source: anyhow::Error,
    },

    #[error("failed to read local {noun} state: {source}")]
    StateRead {
        noun: &'static str,
        source: anyhow::Error,
    },

    #[error("consensus rejected {noun} apply: {reason}")]
    ApplyRejected { noun: &'static str, reason: String },

    #[error("corrupt {noun} catalogue: {detail}")]
    Corrupt { noun: &'static str, detail: String },

    #[error("replication cancelled")]
    Cancelled,
}

impl Error {
    /// True for failures that should feed the backoff counter and be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::StateRead { .. } | Self::ApplyRejected { .. }
        )
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
