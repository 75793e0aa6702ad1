pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Metal error: {0}")]
    MetalError(#[from] crate::metal::error::MetalError),
    #[error("Config error: {0}")]
    ConfigError(String),
}
