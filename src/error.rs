use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// Used by the in-memory store to simulate outages.
    #[cfg(test)]
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by an outbound notification channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("channel not configured: {0}")]
    NotConfigured(String),

    #[error("channel rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}
