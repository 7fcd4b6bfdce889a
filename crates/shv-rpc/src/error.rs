//! RPC-level errors: the wire error code table and the parse error type.

use shv_chainpack::CpError;
use thiserror::Error;

/// Error codes carried in the error reply shape
/// `IMap{3: IMap{1: code, 2: message?}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    MethodNotFound = 2,
    InvalidParams = 3,
    /// A platform specific operation (file I/O, reset hook) failed.
    PlatformError = 6,
    /// A file operation went beyond the maximum size.
    FileMaxSize = 7,
    MethodCallException = 8,
    LoginRequired = 10,
    UserIdRequired = 11,
    NotImplemented = 12,
    TryAgainLater = 13,
    RequestInvalid = 14,
}

impl RpcErrorCode {
    /// Integer value written to the wire.
    pub fn code(self) -> i64 {
        self as i64
    }
}

impl std::fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RpcErrorCode::MethodNotFound => "MethodNotFound",
            RpcErrorCode::InvalidParams => "InvalidParams",
            RpcErrorCode::PlatformError => "PlatformError",
            RpcErrorCode::FileMaxSize => "FileMaxSize",
            RpcErrorCode::MethodCallException => "MethodCallException",
            RpcErrorCode::LoginRequired => "LoginRequired",
            RpcErrorCode::UserIdRequired => "UserIdRequired",
            RpcErrorCode::NotImplemented => "NotImplemented",
            RpcErrorCode::TryAgainLater => "TryAgainLater",
            RpcErrorCode::RequestInvalid => "RequestInvalid",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Failure while parsing or building an RPC message.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The frame does not select the ChainPack protocol.
    #[error("unsupported protocol selector")]
    BadProtocol,

    /// The message does not start with a meta map.
    #[error("message does not start with a meta map")]
    BadMeta,

    #[error(transparent)]
    Codec(#[from] CpError),
}

impl RpcError {
    /// True when the failure is a clean end of stream rather than garbage.
    pub fn is_underflow(&self) -> bool {
        matches!(self, RpcError::Codec(e) if e.is_underflow())
    }
}

/// RPC layer result type.
pub type Result<T> = std::result::Result<T, RpcError>;
