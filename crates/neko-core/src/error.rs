use thiserror::Error;

#[derive(Debug, Error)]
pub enum NekoError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("store error: {0}")]
    Store(String),
}
