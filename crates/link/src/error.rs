use thiserror::Error;

/// A frame payload that is not a recognised control or data message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    #[error("unknown message '{0}'")]
    UnknownVerb(String),

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("invalid mode '{0}' (expected 0, 1 or 2)")]
    InvalidMode(String),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload does not start with '{{'")]
    MissingOpeningBrace,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {size} bytes exceeds peer limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },
}
