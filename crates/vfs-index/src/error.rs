#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index build is already running")]
    BuildAlreadyRunning,

    #[error("index build is not running")]
    BuildNotRunning,

    #[error("search is not available")]
    SearchNotAvailable,

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("failed to list {path}: {message}")]
    Listing { path: String, message: String },

    #[error("search backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IndexError {
    /// True when a build start was rejected because another build holds the run token.
    ///
    /// Callers should poll progress instead of retrying immediately.
    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::BuildAlreadyRunning)
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_running_is_distinct() {
        assert!(IndexError::BuildAlreadyRunning.is_already_running());
        assert!(!IndexError::BuildNotRunning.is_already_running());
        assert!(!IndexError::Backend("down".into()).is_already_running());
    }

    #[test]
    fn listing_error_names_the_path() {
        let error = IndexError::Listing {
            path: "/a/b".into(),
            message: "denied".into(),
        };
        assert_eq!(error.to_string(), "failed to list /a/b: denied");
    }
}
