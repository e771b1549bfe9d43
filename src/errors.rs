//! Error taxonomy for project operations.
//!
//! Every service operation returns [`ProjectError`].  Request handlers
//! translate variants with [`ProjectError::status_code`]; the variants
//! themselves never leak store internals beyond the `Io` message.

use http::StatusCode;
use thiserror::Error;

/// Rejection from the path deriver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// A path segment was empty.
    #[error("{segment} must not be empty")]
    Empty { segment: &'static str },

    /// A path segment contained a separator or traversal sequence.
    #[error("{segment} must not contain path separators or traversal sequences")]
    Unsafe { segment: &'static str },
}

/// Errors surfaced by [`crate::service::ProjectService`].
#[derive(Debug, Error)]
pub enum ProjectError {
    /// Malformed or oversized input. Raised before any store mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The caller does not own the resource (and it is not readable publicly).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A metadata record or required blob is missing.
    #[error("{0} not found")]
    NotFound(String),

    /// Upload confirmation found no blob at the derived path.
    #[error("blob has not been uploaded yet")]
    NotYetUploaded,

    /// Store unavailable, malformed response, or storage URL rejected.
    #[error("storage error: {0:#}")]
    Io(#[from] anyhow::Error),
}

impl From<PathError> for ProjectError {
    fn from(err: PathError) -> Self {
        ProjectError::Validation(err.to_string())
    }
}

impl From<garde::Report> for ProjectError {
    fn from(report: garde::Report) -> Self {
        ProjectError::Validation(report.to_string().trim().to_string())
    }
}

impl ProjectError {
    /// Return a stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ProjectError::Validation(_) => "ValidationError",
            ProjectError::Unauthorized(_) => "Unauthorized",
            ProjectError::NotFound(_) => "NotFound",
            ProjectError::NotYetUploaded => "NotYetUploaded",
            ProjectError::Io(_) => "IOError",
        }
    }

    /// Return the HTTP status a request handler should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProjectError::Validation(_) => StatusCode::BAD_REQUEST,
            ProjectError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ProjectError::NotFound(_) => StatusCode::NOT_FOUND,
            ProjectError::NotYetUploaded => StatusCode::NOT_FOUND,
            ProjectError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ProjectError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProjectError::Unauthorized("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ProjectError::NotYetUploaded.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ProjectError::Io(anyhow::anyhow!("down")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_path_error_is_validation() {
        let err: ProjectError = PathError::Unsafe { segment: "owner id" }.into();
        assert_eq!(err.code(), "ValidationError");
        assert!(err.to_string().contains("owner id"));
    }
}
