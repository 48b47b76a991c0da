//! Test error types.

use std::fmt;

/// Errors that can occur during testing.
#[derive(Debug)]
pub enum TestError {
    /// A condition did not hold in time
    Timeout(String),
    /// A relay operation failed
    Relay(relay_ws::WsError),
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(what) => write!(f, "Timed out waiting for {what}"),
            Self::Relay(e) => write!(f, "Relay error: {e}"),
        }
    }
}

impl std::error::Error for TestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Relay(e) => Some(e),
            Self::Timeout(_) => None,
        }
    }
}

impl From<relay_ws::WsError> for TestError {
    fn from(e: relay_ws::WsError) -> Self {
        Self::Relay(e)
    }
}
