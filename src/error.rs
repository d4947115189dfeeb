use std::fmt;

/// Main error type for the tattler cache-invalidation service
#[derive(Debug)]
pub enum TattlerError {
    /// Configuration errors
    Config(String),

    /// Group connect/session setup failures, wrapping the underlying cause
    Connection(Box<TattlerError>),

    /// Transport layer errors
    Transport(String),

    /// Command encoding/decoding errors
    Codec(CodecError),

    /// Local cache store errors surfaced during dispatch
    Cache(String),

    /// System I/O errors
    Io(std::io::Error),
}

/// Command codec specific errors
#[derive(Debug)]
pub enum CodecError {
    /// Binary encoding errors
    Encode(bincode::error::EncodeError),

    /// Binary decoding errors
    Decode(bincode::error::DecodeError),
}

impl fmt::Display for TattlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TattlerError::Config(msg) => write!(f, "Configuration error: {}", msg),
            TattlerError::Connection(err) => write!(f, "Connection error: {}", err),
            TattlerError::Transport(msg) => write!(f, "Transport error: {}", msg),
            TattlerError::Codec(err) => write!(f, "Codec error: {}", err),
            TattlerError::Cache(msg) => write!(f, "Cache error: {}", msg),
            TattlerError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(err) => write!(f, "Encode: {}", err),
            CodecError::Decode(err) => write!(f, "Decode: {}", err),
        }
    }
}

impl std::error::Error for TattlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TattlerError::Connection(err) => Some(err),
            TattlerError::Io(err) => Some(err),
            TattlerError::Codec(CodecError::Encode(err)) => Some(err),
            TattlerError::Codec(CodecError::Decode(err)) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Encode(err) => Some(err),
            CodecError::Decode(err) => Some(err),
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, TattlerError>;

impl TattlerError {
    /// Wrap any tattler error as a fatal connection failure
    pub fn connection(cause: TattlerError) -> Self {
        TattlerError::Connection(Box::new(cause))
    }
}

// Conversions from common error types
impl From<std::io::Error> for TattlerError {
    fn from(err: std::io::Error) -> Self {
        TattlerError::Io(err)
    }
}

impl From<CodecError> for TattlerError {
    fn from(err: CodecError) -> Self {
        TattlerError::Codec(err)
    }
}

impl From<bincode::error::EncodeError> for TattlerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        TattlerError::Codec(CodecError::Encode(err))
    }
}

impl From<bincode::error::DecodeError> for TattlerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        TattlerError::Codec(CodecError::Decode(err))
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::TattlerError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::TattlerError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::TattlerError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::TattlerError::Transport(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! cache_error {
    ($msg:expr) => {
        $crate::error::TattlerError::Cache($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::TattlerError::Cache(format!($fmt, $($arg)*))
    };
}
