use std::path::PathBuf;

/// Result alias that carries the custom [`KboxError`] type.
pub type Result<T> = std::result::Result<T, KboxError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum KboxError {
    /// Free-form failure that does not warrant its own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Song text rejected before it reaches the text-format parser, such as
    /// oversized input or excessive nesting. Positions are 1-based.
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },
    /// Song text that does not match the song schema.
    #[error("{0}")]
    TextFormat(#[from] prost_reflect::text_format::ParseError),
    /// The embedded song schema could not be loaded.
    #[error("{0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),
    #[error("{0}")]
    Decode(#[from] prost::DecodeError),
    /// A song file that could not be read or parsed.
    #[error("bad song file {}: {source}", path.display())]
    InvalidRecord {
        path: PathBuf,
        #[source]
        source: Box<KboxError>,
    },
    /// Configuration values that cannot drive the service.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl KboxError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_record(path: impl Into<PathBuf>, source: KboxError) -> Self {
        Self::InvalidRecord {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

impl From<&str> for KboxError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for KboxError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
