use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Coarse classification every error collapses to at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadInput,
    Conflict,
    NotFound,
    StorageFailure,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::BadInput => "bad_input",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Business-rule violations. These are expected outcomes and are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    DuplicateLotName,
    LotFull,
    AlreadyParked,
    NotParked,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ConflictReason::DuplicateLotName => "parking lot with this name already exists",
            ConflictReason::LotFull => "parking lot is full",
            ConflictReason::AlreadyParked => "vehicle is already parked",
            ConflictReason::NotParked => "vehicle not found or already unparked",
        };
        f.write_str(message)
    }
}

/// What a `NotFound` refers to. An unknown lot and a lot without activity on
/// the requested day share the kind but not the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundSubject {
    Lot,
    Slot,
    DailyActivity,
}

impl fmt::Display for NotFoundSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            NotFoundSubject::Lot => "parking lot not found",
            NotFoundSubject::Slot => "slot not found",
            NotFoundSubject::DailyActivity => "no records found for this date or parking lot",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Error, Debug)]
pub enum ParkingError {
    #[error("Invalid {field}: {reason}")]
    BadInput { field: String, reason: String },

    #[error("{reason}: {detail}")]
    Conflict {
        reason: ConflictReason,
        detail: String,
    },

    #[error("{subject}: {detail}")]
    NotFound {
        subject: NotFoundSubject,
        detail: String,
    },

    #[error("Storage failure while {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Operation cancelled before commit: {operation}")]
    Cancelled { operation: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<rusqlite::Error> for ParkingError {
    fn from(source: rusqlite::Error) -> Self {
        ParkingError::Storage {
            context: "accessing the database".to_string(),
            source,
        }
    }
}

impl ParkingError {
    pub fn bad_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ParkingError::BadInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: ConflictReason, detail: impl Into<String>) -> Self {
        ParkingError::Conflict {
            reason,
            detail: detail.into(),
        }
    }

    pub fn not_found(subject: NotFoundSubject, detail: impl Into<String>) -> Self {
        ParkingError::NotFound {
            subject,
            detail: detail.into(),
        }
    }

    /// Builds a `map_err` adapter that tags a rusqlite error with what was being done.
    pub fn storage(context: &'static str) -> impl FnOnce(rusqlite::Error) -> ParkingError {
        move |source| ParkingError::Storage {
            context: context.to_string(),
            source,
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        ParkingError::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ParkingError::BadInput { .. } | ParkingError::ConfigError { .. } => ErrorKind::BadInput,
            ParkingError::Conflict { .. } => ErrorKind::Conflict,
            ParkingError::NotFound { .. } => ErrorKind::NotFound,
            ParkingError::Cancelled { .. } => ErrorKind::Cancelled,
            ParkingError::Storage { .. }
            | ParkingError::IoError(_)
            | ParkingError::SerializationError(_)
            | ParkingError::Internal { .. } => ErrorKind::StorageFailure,
        }
    }

    pub fn conflict_reason(&self) -> Option<ConflictReason> {
        match self {
            ParkingError::Conflict { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn not_found_subject(&self) -> Option<NotFoundSubject> {
        match self {
            ParkingError::NotFound { subject, .. } => Some(*subject),
            _ => None,
        }
    }

    /// True for store-level serialization failures (SQLite busy/locked), the
    /// only class a caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ParkingError::Storage {
                source: rusqlite::Error::SqliteFailure(err, _),
                ..
            } => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            ErrorKind::Conflict | ErrorKind::NotFound | ErrorKind::Cancelled => ErrorSeverity::Low,
            ErrorKind::BadInput => ErrorSeverity::Medium,
            ErrorKind::StorageFailure if self.is_retryable() => ErrorSeverity::High,
            ErrorKind::StorageFailure => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ParkingError::BadInput { .. } => "Check the command arguments and try again",
            ParkingError::ConfigError { .. } => "Check the configuration file and environment variables",
            ParkingError::Conflict {
                reason: ConflictReason::LotFull,
                ..
            } => "Try another parking lot or wait for a vehicle to leave",
            ParkingError::Conflict {
                reason: ConflictReason::DuplicateLotName,
                ..
            } => "Choose a different parking lot name",
            ParkingError::Conflict { .. } => "Check the vehicle's current parking state",
            ParkingError::NotFound { .. } => "Verify the parking lot ID and date",
            ParkingError::Cancelled { .. } => "Nothing was written; run the operation again if needed",
            ParkingError::Storage { .. } if self.is_retryable() => {
                "The database is busy; retry the operation"
            }
            ParkingError::Storage { .. } | ParkingError::IoError(_) => {
                "Check that the database file is reachable and writable"
            }
            ParkingError::SerializationError(_) | ParkingError::Internal { .. } => {
                "This is a bug; please report it with the logs"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ParkingError::Storage { context, .. } => {
                format!("unexpected database error while {}", context)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParkingError>;
