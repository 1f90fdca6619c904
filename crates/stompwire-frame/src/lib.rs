//! STOMP 1.2 frame model and wire codec.
//!
//! Every frame on the wire is:
//! - a command line (`SEND`, `MESSAGE`, ...)
//! - `name:value` header lines (escaped, except on CONNECT/CONNECTED)
//! - a blank line
//! - an optional body, terminated by a NUL byte
//!
//! Bare EOLs between frames are heart-beats and are skipped. Partial input is
//! buffered until a whole frame is available.

pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod reader;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_HEADERS};
#[cfg(feature = "async")]
pub use codec::StompCodec;
pub use error::{FrameError, Result};
pub use frame::{Frame, FrameKind, Headers};
pub use reader::{FrameBuffer, FrameReader};
