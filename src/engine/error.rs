use ulid::Ulid;

use super::validator::Rejection;

/// Failures of administrative operations and of the log.
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidCapacity,
    /// Team still has users attached.
    TeamInUse(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidCapacity => write!(f, "room capacity must be at least 1"),
            EngineError::TeamInUse(id) => {
                write!(f, "cannot delete team {id}: users still belong to it")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Local pre/postcondition failures of the interval index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Duplicate(Ulid),
    NotFound(Ulid),
    /// The insert would overlap these reservations.
    InsertConflict(Vec<Ulid>),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Duplicate(id) => write!(f, "reservation {id} already stored"),
            StoreError::NotFound(id) => write!(f, "reservation {id} not stored"),
            StoreError::InsertConflict(ids) => {
                write!(f, "insert collides with {} reservation(s)", ids.len())
            }
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug)]
pub enum CreateError {
    /// The proposal was refused; nothing was written.
    Rejected(Rejection),
    Engine(EngineError),
}

impl std::fmt::Display for CreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateError::Rejected(r) => write!(f, "{r}"),
            CreateError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CreateError {}

impl From<EngineError> for CreateError {
    fn from(e: EngineError) -> Self {
        CreateError::Engine(e)
    }
}

impl From<Rejection> for CreateError {
    fn from(r: Rejection) -> Self {
        CreateError::Rejected(r)
    }
}

#[derive(Debug)]
pub enum CancellationError {
    NotFound(Ulid),
    PermissionDenied,
    Engine(EngineError),
}

impl std::fmt::Display for CancellationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancellationError::NotFound(id) => write!(f, "reservation not found: {id}"),
            CancellationError::PermissionDenied => {
                write!(f, "permission denied: cannot cancel another team's reservation")
            }
            CancellationError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CancellationError {}

impl From<EngineError> for CancellationError {
    fn from(e: EngineError) -> Self {
        CancellationError::Engine(e)
    }
}
