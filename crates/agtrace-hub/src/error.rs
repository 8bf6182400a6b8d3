use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Engine(agtrace_engine::Error),
    Io(std::io::Error),
    Bind(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Engine(err) => write!(f, "query error: {err}"),
            Error::Io(err) => write!(f, "IO error: {err}"),
            Error::Bind(msg) => write!(f, "failed to bind subscription endpoint: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Engine(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Bind(_) => None,
        }
    }
}

impl From<agtrace_engine::Error> for Error {
    fn from(err: agtrace_engine::Error) -> Self {
        Error::Engine(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
