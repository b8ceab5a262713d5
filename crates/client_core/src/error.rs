use reqwest::StatusCode;
use shared::domain::CoordinateError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
    #[error("location lookup timed out after {0} seconds")]
    Timeout(u64),
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(#[from] CoordinateError),
}

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error("an attendance session is already active: {message}")]
    Conflict { message: String },
    #[error("unauthorized: credentials cleared, sign in again")]
    Unauthorized,
    #[error("request failed with status {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("backend data contract violation: {0}")]
    ContractViolation(String),
}

impl AttendanceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }

    /// Any failure of the HTTP exchange itself, as opposed to local checks.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            AttendanceError::Status { .. }
                | AttendanceError::Transport(_)
                | AttendanceError::Unauthorized
                | AttendanceError::Conflict { .. }
        )
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            AttendanceError::Status { status, .. } => Some(*status),
            AttendanceError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            AttendanceError::Conflict { .. } => Some(StatusCode::CONFLICT),
            AttendanceError::Transport(err) => err.status(),
            _ => None,
        }
    }
}

pub type AttendanceResult<T> = std::result::Result<T, AttendanceError>;
