use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed market data for asset '{asset}': {detail}")]
    Decode { asset: String, detail: String },

    #[error("environment provisioning failed: {0}")]
    Provisioning(String),

    #[error("dependency '{package}' failed to install: {detail}")]
    DependencyInstall { package: String, detail: String },

    #[error("strategy failed to load: {0}")]
    Load(String),

    #[error("strategy raised during execution: {0}")]
    Runtime(String),

    #[error("strategy output violates the weights contract: {0}")]
    ContractViolation(String),

    #[error("strategy execution exceeded the {limit_secs}s budget")]
    Timeout { limit_secs: u64 },

    #[error("statistics undefined: {0}")]
    Statistics(String),

    #[error("market data API error: {0}")]
    Exchange(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Pipeline stage reported to API clients alongside the detail text.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Request(_) => "request",
            Error::Exchange(_) | Error::Http(_) => "collect",
            Error::Decode { .. } | Error::Json(_) => "marshal",
            Error::Provisioning(_) => "provision",
            Error::DependencyInstall { .. } => "install",
            Error::Load(_)
            | Error::Runtime(_)
            | Error::ContractViolation(_)
            | Error::Timeout { .. } => "execute",
            Error::Statistics(_) => "statistics",
            Error::Io(_) => "io",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
