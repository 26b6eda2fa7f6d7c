//! Error types for wallet broker operations
//!
//! Every failure a caller can observe from a wallet operation is a
//! [`WalletError`]: a machine [`ErrorCode`], a message and an optional UI title.
//! Configuration and storage failures use their own types since they are
//! raised before any wallet round trip begins.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for wallet operations
pub type Result<T> = std::result::Result<T, WalletError>;

/// Machine code carried by every [`WalletError`].
///
/// The numeric value is the declaration index and is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    // ============ Consent Errors ============
    UserCanceled,

    // ============ Identity Errors ============
    NetworkMismatch,
    WalletMismatch,
    WalletContainsNoAccount,

    // ============ Operation Errors ============
    SigningMessageFailed,
    UnexpectedResponse,
    SigningTransactionFailed,

    // ============ Connection Errors ============
    ConnectionFailed,
    RefusedByWallet,
    LinkOpenFailed,
    InvalidSession,
    InvalidInput,

    // ============ Chain Errors ============
    AddChainFailed,
    AddChainNotSupported,
}

impl ErrorCode {
    /// All codes in declaration order
    pub const ALL: [ErrorCode; 14] = [
        ErrorCode::UserCanceled,
        ErrorCode::NetworkMismatch,
        ErrorCode::WalletMismatch,
        ErrorCode::WalletContainsNoAccount,
        ErrorCode::SigningMessageFailed,
        ErrorCode::UnexpectedResponse,
        ErrorCode::SigningTransactionFailed,
        ErrorCode::ConnectionFailed,
        ErrorCode::RefusedByWallet,
        ErrorCode::LinkOpenFailed,
        ErrorCode::InvalidSession,
        ErrorCode::InvalidInput,
        ErrorCode::AddChainFailed,
        ErrorCode::AddChainNotSupported,
    ];

    /// Stable numeric value
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Look up a code by its numeric value
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Message used when the raising handler does not supply one
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::UserCanceled => "User canceled",
            ErrorCode::NetworkMismatch => "Network mismatch",
            ErrorCode::WalletMismatch => "Wallet mismatch",
            ErrorCode::WalletContainsNoAccount => "Unable to obtain account",
            ErrorCode::SigningMessageFailed => "Signing message failed",
            ErrorCode::UnexpectedResponse => "Unexpected response",
            ErrorCode::SigningTransactionFailed => "Signing transaction failed",
            ErrorCode::ConnectionFailed => "Connection failed",
            ErrorCode::RefusedByWallet => "Refused by wallet",
            ErrorCode::LinkOpenFailed => "Unable to open link",
            ErrorCode::InvalidSession => "Invalid session",
            ErrorCode::InvalidInput => "Invalid input",
            ErrorCode::AddChainFailed => "Add or switch chain failed",
            ErrorCode::AddChainNotSupported => "Add or switch chain method not supported",
        }
    }

    /// Title used when the raising handler does not supply one
    pub fn default_title(self) -> &'static str {
        match self {
            ErrorCode::UserCanceled => "Canceled",
            ErrorCode::NetworkMismatch => "Network Mismatch",
            ErrorCode::WalletMismatch => "Wallet Mismatch",
            ErrorCode::WalletContainsNoAccount => "No Account",
            ErrorCode::SigningMessageFailed | ErrorCode::SigningTransactionFailed => {
                "Signing Failed"
            }
            ErrorCode::ConnectionFailed | ErrorCode::RefusedByWallet => "Connection Failed",
            ErrorCode::LinkOpenFailed => "Unable to Open Wallet",
            ErrorCode::AddChainFailed | ErrorCode::AddChainNotSupported => "Network Error",
            ErrorCode::UnexpectedResponse | ErrorCode::InvalidSession | ErrorCode::InvalidInput => {
                "Wallet Error"
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// The single tagged error surfaced by every wallet operation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct WalletError {
    pub code: ErrorCode,
    pub title: Option<String>,
    pub message: String,
}

impl WalletError {
    /// Error with the code's default message
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            title: None,
            message: code.default_message().to_string(),
        }
    }

    /// Error with a specific message; an empty message falls back to the default
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.is_empty() {
            return Self::new(code);
        }
        Self {
            code,
            title: None,
            message,
        }
    }

    /// Attach a UI title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.title = (!title.is_empty()).then_some(title);
        self
    }

    /// Title to render, falling back to the code's default
    pub fn title(&self) -> &str {
        self.title
            .as_deref()
            .unwrap_or_else(|| self.code.default_title())
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    /// Malformed wallet payloads are reported as unexpected responses
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::UnexpectedResponse, message)
    }
}

impl From<ErrorCode> for WalletError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::unexpected(e.to_string())
    }
}

/// Fatal configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Catalog or configuration file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog document is malformed
    #[error("Malformed wallet catalog: {0}")]
    Catalog(String),

    /// Configuration document is malformed
    #[error("Malformed configuration: {0}")]
    Malformed(String),

    /// A configured URL does not parse
    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },

    /// A required configuration section is absent
    #[error("Missing configuration: {0}")]
    Missing(&'static str),
}

/// Persisted-session store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session record not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
