//! Shared mio plumbing: one poll instance per transport, a wake channel
//! for shutdown, and blocking read/write helpers over non-blocking
//! streams.
//!
//! mio delivers edge-triggered readiness, so a "was there data before we
//! slept" probe is performed with a one-byte non-blocking read whose
//! result is pushed back and served first by the next read. That keeps
//! `data_ready` level-like without a second syscall layer.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::error::InitError;
use crate::traits::{Ready, Wake};

pub(crate) const SOCKET: Token = Token(0);
pub(crate) const WAKE: Token = Token(1);

/// What a single poll round observed.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Fired {
    pub readable: bool,
    pub writable: bool,
    pub woken: bool,
}

/// Wake channel half handed out to the application thread.
pub(crate) struct MioWake {
    waker: Waker,
    woken: Arc<AtomicBool>,
}

impl Wake for MioWake {
    fn wake(&self) {
        self.woken.store(true, Ordering::SeqCst);
        if let Err(err) = self.waker.wake() {
            log::warn!("wake channel poke failed: {err}");
        }
    }
}

/// Poll instance plus its wake channel.
pub(crate) struct Poller {
    poll: Poll,
    events: Events,
    woken: Arc<AtomicBool>,
    wake: Arc<MioWake>,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let woken = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(MioWake {
            waker: Waker::new(poll.registry(), WAKE)?,
            woken: woken.clone(),
        });
        Ok(Poller {
            poll,
            events: Events::with_capacity(8),
            woken,
            wake,
        })
    }

    pub fn wake_handle(&self) -> Arc<MioWake> {
        self.wake.clone()
    }

    /// True once the wake channel has fired. The flag is sticky; waking is
    /// a one-shot shutdown signal.
    pub fn woken(&self) -> bool {
        self.woken.load(Ordering::SeqCst)
    }

    pub fn register(&mut self, source: &mut impl Source) -> io::Result<()> {
        self.poll
            .registry()
            .register(source, SOCKET, Interest::READABLE | Interest::WRITABLE)
    }

    pub fn deregister(&mut self, source: &mut impl Source) {
        if let Err(err) = self.poll.registry().deregister(source) {
            log::debug!("transport deregister failed: {err}");
        }
    }

    /// One poll round. A `None` timeout waits indefinitely (the wake
    /// channel still interrupts it).
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Fired> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        let mut fired = Fired::default();
        for event in self.events.iter() {
            if event.token() == SOCKET {
                // Closed and errored states surface through read().
                fired.readable |=
                    event.is_readable() || event.is_read_closed() || event.is_error();
                fired.writable |= event.is_writable() || event.is_write_closed();
            }
        }
        fired.woken = self.woken();
        Ok(fired)
    }
}

/// Tells a transport whether its in-progress non-blocking connect has
/// settled.
pub(crate) trait ConnectCheck {
    /// `Ok(true)` connected, `Ok(false)` still in progress, `Err` failed.
    fn connected(&self) -> io::Result<bool>;
}

/// Drive a freshly started non-blocking connect to completion.
pub(crate) fn wait_connected<S: ConnectCheck>(
    poller: &mut Poller,
    stream: &S,
    timeout: Duration,
) -> Result<(), InitError> {
    let deadline = Instant::now() + timeout;
    loop {
        match stream.connected() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(err) => return Err(InitError::from_connect_error(err)),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(InitError::Unreachable(io::Error::new(
                io::ErrorKind::TimedOut,
                "connect timed out",
            )));
        }

        let fired = poller.wait(Some(remaining)).map_err(InitError::Fatal)?;
        if fired.woken {
            return Err(InitError::Unreachable(io::Error::new(
                io::ErrorKind::Interrupted,
                "shutdown during connect",
            )));
        }
    }
}

/// Blocking read over a non-blocking stream. Serves the probe pushback
/// first, then the socket; parks on the poll when the socket is dry.
/// A wake while parked reads as a clean close so the worker unwinds.
pub(crate) fn blocking_read<S: Read>(
    poller: &mut Poller,
    stream: &mut S,
    pending: &mut Option<u8>,
    buf: &mut [u8],
) -> io::Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }

    if let Some(byte) = pending.take() {
        buf[0] = byte;
        return match stream.read(&mut buf[1..]) {
            Ok(n) => Ok(1 + n),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(1)
            }
            // The byte is already delivered; the error resurfaces on the
            // next call.
            Err(_) => Ok(1),
        };
    }

    loop {
        match stream.read(buf) {
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                let fired = poller.wait(None)?;
                if fired.woken {
                    return Ok(0);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

/// Blocking write over a non-blocking stream.
pub(crate) fn blocking_write<S: Write>(
    poller: &mut Poller,
    stream: &mut S,
    buf: &[u8],
) -> io::Result<usize> {
    loop {
        match stream.write(buf) {
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                let fired = poller.wait(None)?;
                if fired.woken {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "shutdown during write",
                    ));
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

/// Wait for readable input, the wake channel or the timeout.
pub(crate) fn wait_readable<S: Read>(
    poller: &mut Poller,
    stream: &mut S,
    pending: &mut Option<u8>,
    timeout: Duration,
) -> io::Result<Ready> {
    if poller.woken() {
        return Ok(Ready::Idle);
    }
    if pending.is_some() {
        return Ok(Ready::Readable);
    }

    // Probe for bytes that arrived while edge notifications were consumed
    // elsewhere (e.g. during a blocking write).
    let mut probe = [0u8; 1];
    match stream.read(&mut probe) {
        // A closed peer is readable: the zero-length read happens in read().
        Ok(0) => return Ok(Ready::Readable),
        Ok(_) => {
            *pending = Some(probe[0]);
            return Ok(Ready::Readable);
        }
        Err(err)
            if err.kind() == io::ErrorKind::WouldBlock
                || err.kind() == io::ErrorKind::Interrupted => {}
        Err(err) => return Err(err),
    }

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(Ready::Idle);
        }
        let fired = poller.wait(Some(remaining))?;
        if fired.woken {
            return Ok(Ready::Idle);
        }
        if fired.readable {
            return Ok(Ready::Readable);
        }
        // Writable or spurious event; keep waiting out the timeout.
    }
}
