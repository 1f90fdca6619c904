use crate::frame::FrameKind;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The command line does not name a known frame kind.
    #[error("unknown frame command '{0}'")]
    UnknownCommand(String),

    /// A header required by the frame kind is absent.
    #[error("{kind} frame is missing required header '{header}'")]
    MissingHeader {
        kind: FrameKind,
        header: &'static str,
    },

    /// A header line could not be parsed.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Command or header bytes are not valid UTF-8.
    #[error("frame headers are not valid UTF-8")]
    InvalidUtf8,

    /// The `content-length` header is not a valid length.
    #[error("invalid content-length '{0}'")]
    InvalidContentLength(String),

    /// The body was not followed by the NUL terminator.
    #[error("frame body is not NUL-terminated")]
    MissingTerminator,

    /// The frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The frame carries more headers than allowed.
    #[error("too many headers ({count}, max {max})")]
    TooManyHeaders { count: usize, max: usize },

    /// The input ended before a complete frame.
    #[error("incomplete frame")]
    Incomplete,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True for errors that mean the byte stream no longer parses.
    ///
    /// After one of these the stream is unsynchronized and cannot be resumed.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, FrameError::Io(_) | FrameError::Incomplete)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
