//! Error types shared across the client core.
//!
//! Every public operation returns `Result<_, Error>`. Variants carry the
//! domain-specific detail; `ErrorKind` collapses them into the five coarse
//! classes callers branch on.

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A lookup (user, role, pending request) found nothing.
    NotFound,
    /// The operation contradicts existing state.
    Conflict,
    /// The caller passed something invalid.
    InvalidArgument,
    /// The store's rules rejected the operation.
    Forbidden,
    /// The store is unreachable or gave up mid-operation.
    Unavailable,
}

/// Errors surfaced by the client core.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    NotFound(String),
    /// The pair is already linked in the friends graph.
    AlreadyFriends,
    /// A request to this user is already pending from us.
    RequestAlreadySent,
    /// The other user already has a pending request to us.
    RequestAlreadyReceived,
    /// The staged role order was built against a committed order that has
    /// since changed; saving it would clobber someone else's reorder.
    OrderOutOfDate,
    InvalidArgument(String),
    Forbidden(String),
    Unavailable(String),
}

impl Error {
    /// Classify this error into one of the five coarse kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyFriends
            | Error::RequestAlreadySent
            | Error::RequestAlreadyReceived
            | Error::OrderOutOfDate => ErrorKind::Conflict,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument(reason.into())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound(what) => write!(f, "{} not found", what),
            Error::AlreadyFriends => write!(f, "already friends with this user"),
            Error::RequestAlreadySent => write!(f, "friend request already sent"),
            Error::RequestAlreadyReceived => {
                write!(f, "this user already sent you a friend request")
            }
            Error::OrderOutOfDate => {
                write!(f, "role order changed remotely; refresh before saving")
            }
            Error::InvalidArgument(reason) => write!(f, "{}", reason),
            Error::Forbidden(reason) => write!(f, "forbidden: {}", reason),
            Error::Unavailable(reason) => write!(f, "store unavailable: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

/// Errors from the keyed store boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Store-side rules rejected the read or write.
    PermissionDenied(String),
    /// The store is unreachable.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::PermissionDenied(path) => write!(f, "permission denied at {}", path),
            StoreError::Unavailable(reason) => write!(f, "unavailable: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PermissionDenied(path) => Error::Forbidden(path),
            StoreError::Unavailable(reason) => Error::Unavailable(reason),
        }
    }
}
