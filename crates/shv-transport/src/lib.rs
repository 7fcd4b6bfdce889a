//! Transport layer for the SHV broker connection.
//!
//! The connection worker sees only the [`Transport`] trait: blocking
//! read/write, an interruptible [`data_ready`](Transport::data_ready) wait
//! and a [`WakeHandle`] that `shutdown` pokes from the application thread.
//! TCP and Unix-domain implementations are provided; serial and CAN links
//! carry their own framing layers and stay outside this crate.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
mod poller;
pub mod tcp;
pub mod traits;
pub mod unix;

pub use config::{TransportConfig, make_transport};
pub use error::{InitError, TransportError};
pub use tcp::TcpTransport;
pub use traits::{Ready, Transport, Wake, WakeHandle, write_all};
pub use unix::UnixTransport;
