// Error taxonomy for the valuation pipeline. Every operation reports one of these
// instead of panicking, so callers can tell "train first" apart from bad input.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValuationError {
    /// A required upstream artifact (normalized table, trained model) is absent.
    #[error("{artifact} not found. {hint}")]
    MissingArtifact { artifact: String, hint: String },

    #[error("missing required columns: {}", .missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("no data: {0}")]
    EmptyDataset(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] Box<figment::Error>),
}

/// Coarse classification used to pick exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingPrerequisite,
    Schema,
    NotFound,
    Data,
    Internal,
}

impl ValuationError {
    pub fn missing_artifact(artifact: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingArtifact {
            artifact: artifact.into(),
            hint: hint.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingArtifact { .. } => ErrorKind::MissingPrerequisite,
            Self::SchemaMismatch { .. } => ErrorKind::Schema,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::EmptyDataset(_) | Self::InvalidInput(_) => ErrorKind::Data,
            Self::Training(_) | Self::Io(_) | Self::Csv(_) | Self::Json(_) | Self::Config(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::MissingPrerequisite => 3,
            ErrorKind::Schema => 4,
            ErrorKind::NotFound => 5,
            ErrorKind::Data => 6,
            ErrorKind::Internal => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, ValuationError>;
