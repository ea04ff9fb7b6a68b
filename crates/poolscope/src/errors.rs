use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PoolscopeError {
    #[error("no tipset could be resolved at height {0}")]
    ChainResolution(u64),

    #[error("upstream query failed: {0}")]
    UpstreamQuery(String),

    #[error("numeric conversion failed: {0}")]
    Conversion(String),

    #[error("unsupported chain id: {0}")]
    UnsupportedNetwork(u64),
    // Add more structured errors as the query surface expands.
}
