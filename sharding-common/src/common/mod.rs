/// Sharding Error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A table needs a sharding strategy that is missing or ambiguous, or the
    /// binding table declarations conflict. Raised while building a rule.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The statement shape cannot be routed or merged safely.
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("sharding algorithm error: {0}")]
    Algorithm(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    General(String),
}

/// Sharding Result type
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::fmt::Error> for Error {
    fn from(e: std::fmt::Error) -> Self {
        Error::General(e.to_string())
    }
}

impl Error {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::UnsupportedConstruct(_))
    }
}
