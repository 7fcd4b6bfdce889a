//! Unix domain socket transport, the local-broker variant.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mio::net::UnixStream;

use crate::error::InitError;
use crate::poller::{self, ConnectCheck, Poller};
use crate::tcp::DEFAULT_CONNECT_TIMEOUT;
use crate::traits::{Ready, Transport, WakeHandle};

/// Client stream over a local domain socket.
pub struct UnixTransport {
    path: PathBuf,
    connect_timeout: Duration,
    poller: Poller,
    stream: Option<UnixStream>,
    pending: Option<u8>,
}

impl UnixTransport {
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::with_timeout(path, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeout(path: impl Into<PathBuf>, connect_timeout: Duration) -> io::Result<Self> {
        Ok(UnixTransport {
            path: path.into(),
            connect_timeout,
            poller: Poller::new()?,
            stream: None,
            pending: None,
        })
    }
}

impl ConnectCheck for UnixStream {
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

impl Transport for UnixTransport {
    fn init(&mut self) -> Result<(), InitError> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.pending = None;

        let mut stream =
            UnixStream::connect(&self.path).map_err(InitError::from_connect_error)?;
        self.poller.register(&mut stream).map_err(InitError::Fatal)?;

        match poller::wait_connected(&mut self.poller, &stream, self.connect_timeout) {
            Ok(()) => {
                log::info!("connected to the broker at {}", self.path.display());
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
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket not connected"))?;
        poller::blocking_read(&mut self.poller, stream, &mut self.pending, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket not connected"))?;
        poller::blocking_write(&mut self.poller, stream, buf)
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            self.poller.deregister(&mut stream);
            log::info!("disconnected from {}", self.path.display());
        }
        self.pending = None;
    }

    fn data_ready(&mut self, timeout: Duration) -> io::Result<Ready> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket not connected"))?;
        poller::wait_readable(&mut self.poller, stream, &mut self.pending, timeout)
    }

    fn wake_handle(&self) -> WakeHandle {
        let handle: Arc<dyn crate::traits::Wake> = self.poller.wake_handle();
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixListener;
    use std::thread;

    #[test]
    fn roundtrip_over_local_socket() {
        let dir = std::env::temp_dir().join(format!("shv-uds-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broker.sock");
        let _ = std::fs::remove_file(&path);

        let listener = UnixListener::bind(&path).unwrap();
        let server = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(b"ok").unwrap();
        });

        let mut t = UnixTransport::new(&path).unwrap();
        t.init().unwrap();
        assert_eq!(
            t.data_ready(Duration::from_secs(5)).unwrap(),
            Ready::Readable
        );
        let mut buf = [0u8; 4];
        let mut got = 0;
        while got < 2 {
            got += t.read(&mut buf[got..]).unwrap();
        }
        assert_eq!(&buf[..got], b"ok");

        server.join().unwrap();
        t.close();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_socket_is_retryable() {
        let mut t = UnixTransport::new("/nonexistent/shv/broker.sock").unwrap();
        match t.init() {
            Err(err) => assert!(err.is_retryable(), "unexpected class: {err}"),
            Ok(()) => panic!("connect to a missing socket succeeded"),
        }
    }
}
