use std::fmt::Display;

/// tierdb errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A merge reached the deepest level and found it occupied; the tree has
    /// no room left for another run.
    TreeFull,
    /// A bulk-load input file could not be opened.
    FileNotFound(String),
    /// A bulk-load input file ended in the middle of a record.
    CorruptInput(String),
    /// On-disk damage in a run file: bad checksum, truncated footer, or an
    /// undecodable meta block.
    Corrupt(String),
    /// An operation was attempted in the wrong run state, e.g. reading a run
    /// that is still being written.
    InvalidOperation(String),
    /// Invalid user input, typically malformed commands.
    InvalidInput(String),
    /// Rejected construction parameters.
    InvalidConfig(String),
    /// An IO error.
    IO(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::TreeFull => write!(f, "no more space in tree"),
            Error::FileNotFound(path) => write!(f, "could not locate file '{path}'"),
            Error::CorruptInput(msg) => write!(f, "corrupt input: {msg}"),
            Error::Corrupt(msg) => write!(f, "corrupt run: {msg}"),
            Error::InvalidOperation(msg) => write!(f, "invalid operation: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// A tierdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::Corrupt(err.to_string())
    }
}
