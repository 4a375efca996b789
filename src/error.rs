use thiserror::Error;

/// Proxy acquisition failures surfaced to workers. These are per-task
/// errors: the task is marked failed, the process keeps running.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProxyError {
    #[error("no proxy pools configured")]
    NoPools,

    #[error("no healthy proxies available in pool {0}")]
    NoHealthyProxy(String),

    #[error("invalid proxy endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Profile generation failures. Rare in practice, but a worker must be able
/// to report them in the result rather than panic.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProfileError {
    #[error("user agent rotation enabled but no user agents configured")]
    NoUserAgents,
}
