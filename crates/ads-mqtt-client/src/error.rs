//! Engine error type.

use crate::transport::TransportError;
use ads_mqtt_proto::index::codes;
use ads_mqtt_proto::{FrameError, ValueError};

/// Errors surfaced by ADS operations.
///
/// None of these are retried internally.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdsError {
    /// Undersized or malformed frame or response body
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    /// Response body does not have the shape the request expects
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The device answered with a nonzero result code
    #[error("ADS error {code:#06x}{}", describe(.code))]
    Device {
        /// ADS return code
        code: u32,
    },
    /// Symbol name not present in the cached table
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
    /// Required address fields are missing
    #[error("missing address: {0}")]
    MissingAddress(String),
    /// Caller value cannot be packed into the symbol
    #[error("unsupported payload: {0}")]
    UnsupportedPayload(#[from] ValueError),
    /// No response within the request deadline
    #[error("request {invoke_id} timed out")]
    Timeout {
        /// Invocation id of the expired request
        invoke_id: u32,
    },
    /// The device's symbol table changed; handles must be re-acquired
    #[error("symbol version changed, reload the symbol table")]
    SymbolVersionChanged {
        /// Raw sum-read data returned alongside the condition
        raw: Vec<u8>,
    },
    /// Symbol upload info was unusable
    #[error("symbol upload info: {0}")]
    UploadInfo(String),
    /// Device reported an empty symbol table
    #[error("symbol table empty")]
    EmptySymbolTable,
    /// No cached symbol matches the filter groups
    #[error("no symbols match {0}")]
    NoMatchingSymbols(String),
    /// The transport cannot publish right now
    #[error("not connected to broker")]
    NotConnected,
    /// Transport failure
    #[error("transport error: {0}")]
    Transport(String),
    /// Invocation id already outstanding
    #[error("invocation id {0} already registered")]
    DuplicateInvokeId(u32),
    /// Pending request dropped without a response
    #[error("request {invoke_id} cancelled")]
    Cancelled {
        /// Invocation id of the dropped request
        invoke_id: u32,
    },
}

impl AdsError {
    /// Device return code, if this is a device-reported error.
    #[must_use]
    pub fn device_code(&self) -> Option<u32> {
        match self {
            Self::Device { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<TransportError> for AdsError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => Self::NotConnected,
            other => Self::Transport(other.to_string()),
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn describe(code: &u32) -> String {
    codes::name(*code)
        .map(|name| format!(" ({name})"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_names_known_codes() {
        let err = AdsError::Device { code: 0x0710 };
        assert_eq!(err.to_string(), "ADS error 0x0710 (symbol not found)");
        assert_eq!(err.device_code(), Some(0x0710));

        let err = AdsError::Device { code: 0x1234 };
        assert_eq!(err.to_string(), "ADS error 0x1234");
    }
}
