use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaskError {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Invalid action '{0}': expected 'done' or 'skip'")]
    InvalidAction(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Segmentation collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Invalid image name: {0:?}")]
    InvalidName(String),

    #[error("No points provided")]
    NoPoints,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to persist file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

impl MaskError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// True for the "not found" family, including a missing backing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<image::ImageError> for MaskError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => Self::Io(e),
            other => Self::Decode(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MaskError>;
