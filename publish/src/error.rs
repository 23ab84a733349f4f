//! Failure modes of the downstream fanout

/// Anything that can go wrong publishing a record downstream. Callers log
/// these; a publish failure never interrupts recording.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Redis connection or command failure
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    /// HTTP transport failure
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    /// Payload serialization failure
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Login rejected or no token in the response
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Non-success status from a downstream endpoint
    #[error("{endpoint} returned {status}")]
    Status {
        /// Path that was called
        endpoint: String,
        /// HTTP status received
        status: reqwest::StatusCode,
    },
}
