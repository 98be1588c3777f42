use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A failure raised inside a named stage. Only the innermost stage tags it.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<ChainError>,
    },

    /// Shape mismatch between connected stages.
    #[error("Cannot connect '{from}' to '{to}': {message}")]
    Composition {
        from: String,
        to: String,
        message: String,
    },

    #[error("Undefined template variable '{0}'")]
    UndefinedVariable(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Unexpected input: {0}")]
    InvalidInput(String),

    #[error("Model returned error {status}: {body}")]
    Model { status: u16, body: String },

    #[error("Failed to parse model output: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl ChainError {
    /// Tag this error with the stage that raised it, unless a deeper stage already did.
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            err @ ChainError::StageFailed { .. } => err,
            err @ ChainError::Composition { .. } => err,
            err => ChainError::StageFailed {
                stage: stage.to_string(),
                source: Box::new(err),
            },
        }
    }

    /// Name of the stage the failure originated in, if tagged.
    pub fn stage(&self) -> Option<&str> {
        match self {
            ChainError::StageFailed { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// The underlying failure with any stage tag removed.
    pub fn root_cause(&self) -> &ChainError {
        match self {
            ChainError::StageFailed { source, .. } => source.root_cause(),
            err => err,
        }
    }
}

impl From<anyhow::Error> for ChainError {
    fn from(err: anyhow::Error) -> Self {
        ChainError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
