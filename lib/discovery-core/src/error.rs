use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Registry client not initialized")]
    NotInitialized,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No healthy endpoints for service: {0}")]
    NoEndpoints(String),

    #[error("Unsupported load balancing strategy: {0}")]
    UnsupportedStrategy(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
