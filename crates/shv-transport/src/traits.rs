//! The transport contract the connection worker runs against.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::error::InitError;

/// Result of waiting for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ready {
    /// At least one byte can be read without blocking (or the peer has
    /// closed and a read will report it).
    Readable,
    /// The wait ran out, or the wake channel was poked. The caller decides
    /// between sending a keep-alive and shutting down by checking its
    /// running flag.
    Idle,
}

/// Interrupts a blocked [`Transport::data_ready`] from another thread.
///
/// Obtained before the transport is handed to the worker; waking must be
/// valid in every connection state, including while disconnected.
pub trait Wake: Send + Sync {
    fn wake(&self);
}

/// A handle that can be poked from the application thread.
pub type WakeHandle = Arc<dyn Wake>;

/// Byte transport towards the broker.
///
/// All calls happen on the connection worker thread. `read` and `write` may
/// block; `data_ready` blocks up to its timeout and must return early when
/// the wake handle fires.
pub trait Transport: Send {
    /// Establish the connection. Retryable failures surface as
    /// [`InitError::Unreachable`]; anything else aborts the worker.
    fn init(&mut self) -> Result<(), InitError>;

    /// Read up to `buf.len()` bytes. `Ok(0)` means the peer closed the
    /// stream cleanly.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes, returning the short count.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Tear the connection down. Idempotent; called before every reconnect
    /// attempt and at worker exit.
    fn close(&mut self);

    /// Wait for readable input, the wake channel, or the timeout.
    fn data_ready(&mut self, timeout: Duration) -> io::Result<Ready>;

    /// Handle used by `shutdown` to interrupt the worker's wait.
    fn wake_handle(&self) -> WakeHandle;
}

/// Write the whole buffer, looping over short writes.
pub fn write_all(transport: &mut dyn Transport, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = transport.write(buf)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "transport accepted no bytes",
            ));
        }
        buf = &buf[n..];
    }
    Ok(())
}
