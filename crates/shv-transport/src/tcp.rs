//! TCP transport.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpStream;

use crate::error::InitError;
use crate::poller::{self, ConnectCheck, Poller};
use crate::traits::{Ready, Transport, WakeHandle};

/// Default bound on a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client TCP stream towards the broker, with poll-based readiness and a
/// wake channel for shutdown.
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    poller: Poller,
    stream: Option<TcpStream>,
    pending: Option<u8>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> io::Result<Self> {
        Self::with_timeout(host, port, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeout(
        host: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
    ) -> io::Result<Self> {
        Ok(TcpTransport {
            host: host.into(),
            port,
            connect_timeout,
            poller: Poller::new()?,
            stream: None,
            pending: None,
        })
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no address for {}:{}", self.host, self.port),
                )
            })
    }
}

impl ConnectCheck for TcpStream {
    fn connected(&self) -> io::Result<bool> {
        if let Some(err) = self.take_error()? {
            return Err(err);
        }
        match self.peer_addr() {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl Transport for TcpTransport {
    fn init(&mut self) -> Result<(), InitError> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.pending = None;

        let addr = self.resolve().map_err(InitError::Fatal)?;
        let mut stream = TcpStream::connect(addr).map_err(InitError::from_connect_error)?;
        self.poller.register(&mut stream).map_err(InitError::Fatal)?;

        match poller::wait_connected(&mut self.poller, &stream, self.connect_timeout) {
            Ok(()) => {
                log::info!("connected to the broker at {}:{}", self.host, self.port);
                self.stream = Some(stream);
                Ok(())
            }
            Err(err) => {
                self.poller.deregister(&mut stream);
                Err(err)
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "tcp not connected"))?;
        poller::blocking_read(&mut self.poller, stream, &mut self.pending, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "tcp not connected"))?;
        poller::blocking_write(&mut self.poller, stream, buf)
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            self.poller.deregister(&mut stream);
            log::info!("disconnected from {}:{}", self.host, self.port);
        }
        self.pending = None;
    }

    fn data_ready(&mut self, timeout: Duration) -> io::Result<Ready> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "tcp not connected"))?;
        poller::wait_readable(&mut self.poller, stream, &mut self.pending, timeout)
    }

    fn wake_handle(&self) -> WakeHandle {
        let handle: Arc<dyn crate::traits::Wake> = self.poller.wake_handle();
        handle
    }
}
