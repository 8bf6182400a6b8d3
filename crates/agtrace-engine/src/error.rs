use std::fmt;

/// Result type for agtrace-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the aggregation layer
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// The underlying store reported a failure
    Store(agtrace_index::Error),

    /// A caller supplied an out-of-range or disallowed argument (e.g. an
    /// unrecognized granularity string, a search query over 100 chars)
    InvalidArgument(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "store error: {}", err),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::InvalidArgument(_) => None,
        }
    }
}

impl From<agtrace_index::Error> for Error {
    fn from(err: agtrace_index::Error) -> Self {
        Error::Store(err)
    }
}
