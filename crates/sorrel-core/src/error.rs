use thiserror::Error;

pub const ERROR_TAG: &str = "\x1b[31m[ERROR]\x1b[0m";
pub const WARN_TAG: &str = "\x1b[33m[WARN]\x1b[0m";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SorrelError {
    #[error("word not bound: {0}")]
    UnboundWord(String),

    #[error("nothing to read: {0}")]
    NothingToRead(String),

    #[error("unknown refinement kind: /{0}")]
    UnknownRefinement(String),

    #[error("no input channel on the right side of pipe")]
    NoInputChannel,

    #[error("{0} is read only")]
    ReadOnly(String),

    #[error("thrown: {0}")]
    Thrown(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("malformed module: {0}")]
    MalformedModule(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("runtime error: {0}")]
    Other(String),
}

impl SorrelError {
    pub fn unbound(sym: impl Into<String>) -> Self {
        SorrelError::UnboundWord(sym.into())
    }

    pub fn nothing_to_read(sym: impl Into<String>) -> Self {
        SorrelError::NothingToRead(sym.into())
    }

    pub fn read_only(sym: impl Into<String>) -> Self {
        SorrelError::ReadOnly(sym.into())
    }

    pub fn thrown(message: impl Into<String>) -> Self {
        SorrelError::Thrown(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        SorrelError::Parse(message.into())
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        SorrelError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        SorrelError::Other(message.into())
    }
}

impl From<String> for SorrelError {
    fn from(s: String) -> Self {
        SorrelError::runtime(s)
    }
}

impl From<&str> for SorrelError {
    fn from(s: &str) -> Self {
        SorrelError::runtime(s.to_string())
    }
}

pub fn format_error(err: &SorrelError) -> String {
    format!("{} {}", ERROR_TAG, err)
}
