//! Well-known header names.

pub const ACCEPT_VERSION: &str = "accept-version";
pub const CONTENT_LENGTH: &str = "content-length";
pub const CONTENT_TYPE: &str = "content-type";
pub const DESTINATION: &str = "destination";
pub const HEART_BEAT: &str = "heart-beat";
pub const HOST: &str = "host";
pub const ID: &str = "id";
pub const LOGIN: &str = "login";
pub const MESSAGE: &str = "message";
pub const MESSAGE_ID: &str = "message-id";
pub const PASSCODE: &str = "passcode";
pub const RECEIPT: &str = "receipt";
pub const RECEIPT_ID: &str = "receipt-id";
pub const SERVER: &str = "server";
pub const SESSION: &str = "session";
pub const SUBSCRIPTION: &str = "subscription";
pub const VERSION: &str = "version";

/// Returns true for headers whose values are credentials and must not be logged.
pub fn is_sensitive(name: &str) -> bool {
    name.eq_ignore_ascii_case(PASSCODE) || name.eq_ignore_ascii_case(LOGIN)
}
