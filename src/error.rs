//! Error types shared across the crate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LstagsError>;

#[derive(Error, Debug)]
pub enum LstagsError {
    /// Bad flags, unparseable YAML, broken credentials file
    #[error("Configuration error: {0}")]
    Config(String),
    /// Repository reference failed to match the reference grammar
    #[error("{0}")]
    Reference(String),
    /// Authentication method negotiation or token acquisition failure
    #[error("Authentication error: {0}")]
    Auth(String),
    /// Registry answered with an unexpected status
    #[error("Bad response status: {status} >> {url}")]
    BadStatus { status: u16, url: String },
    /// Registry answered 404; callers decide if this means "empty set"
    #[error("404 Not Found >> {0}")]
    NotFound(String),
    /// Tag model violation (empty name or digest)
    #[error("Invalid tag: {0}")]
    Tag(String),
    /// Push path/tag template could not be rendered
    #[error("Template error: {0}")]
    Template(String),
    /// Local Docker daemon failure
    #[error("Docker daemon error: {0}")]
    Docker(String),
    /// Partial pull/push failure summary
    #[error("{failed} of {total} operations failed")]
    Partial { failed: usize, total: usize },
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<bollard::errors::Error> for LstagsError {
    fn from(err: bollard::errors::Error) -> Self {
        LstagsError::Docker(err.to_string())
    }
}

impl LstagsError {
    /// Not-found responses are recoverable on some paths (e.g. probing a
    /// "push" repository that does not exist yet).
    pub fn is_not_found(&self) -> bool {
        matches!(self, LstagsError::NotFound(_))
    }
}
