//! Error types of the device client.

use shv_chainpack::CpError;
use shv_rpc::RpcError;
use thiserror::Error;

/// Failure inside request processing. Handlers bubble these up to the
/// worker; method-level problems are *not* reported this way, they go to
/// the peer as error replies while the connection stays up.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CpError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the peer simply stopped sending bytes.
    pub fn is_underflow(&self) -> bool {
        match self {
            Error::Codec(e) => e.is_underflow(),
            Error::Rpc(e) => e.is_underflow(),
            Error::Io(_) => false,
        }
    }
}

/// SHV result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal condition of a connection worker, reported through
/// [`last_error`](crate::DeviceConnection::last_error) and the attention
/// callback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("process thread creation failed")]
    ThreadCreate,

    #[error("transport layer initialization failed: {0}")]
    TransportInit(String),

    #[error("transport read failed: {0}")]
    TransportRead(String),

    #[error("maximum number of reconnects reached")]
    TooManyReconnects,

    #[error("login to the broker failed: {0}")]
    Login(String),

    #[error("chainpack packing failed: {0}")]
    Pack(String),

    #[error("chainpack unpacking failed: {0}")]
    Unpack(String),
}
