//! The application-facing connection handle.
//!
//! [`DeviceConnection::spawn`] takes the finished node tree and a
//! transport, and starts the worker thread that owns both from then on.
//! The application keeps the handle to observe the connection state and
//! to shut it down; typed-value cells shared with the tree remain the way
//! to exchange data with handlers.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;

use shv_chainpack::ChainPackReader;
use shv_transport::{Transport, WakeHandle};

use crate::com::TransportLink;
use crate::error::ConnectionError;
use crate::tree::Node;
use crate::worker::{Shared, Worker};

/// Default idle watchdog advertised to the broker.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(360);
/// Default pause between reconnect attempts.
pub const DEFAULT_RECONNECT_PERIOD: Duration = Duration::from_secs(30);

/// Why the attention callback fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attention {
    /// The worker hit a nonrecoverable error; inspect
    /// [`DeviceConnection::last_error`].
    Error,
    /// Login finished, the device is reachable through the broker.
    Connected,
    /// The broker connection was lost (a reconnect may follow).
    Disconnected,
}

/// User hook observing connection state changes. Runs on the worker
/// thread and must not block.
pub type AttentionCallback = Box<dyn Fn(Attention) + Send>;

/// Broker session parameters.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub user: String,
    pub password: String,
    /// Device identification sent with login.
    pub device_id: String,
    /// Where the broker mounts this device.
    pub mount_point: String,
    /// `idleWatchDogTimeOut` sent to the broker; pings go out at half
    /// this period.
    pub idle_timeout: Duration,
    pub reconnect_period: Duration,
    /// Limit on reconnect attempts; anything at or below zero means keep
    /// trying forever.
    pub reconnect_retries: i32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            user: String::new(),
            password: String::new(),
            device_id: "pysim".into(),
            mount_point: "test/pysim".into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reconnect_period: DEFAULT_RECONNECT_PERIOD,
            reconnect_retries: 0,
        }
    }
}

/// Handle of a running broker connection.
pub struct DeviceConnection {
    shared: Arc<Shared>,
    wake: WakeHandle,
    worker: Option<JoinHandle<()>>,
}

impl DeviceConnection {
    /// Start the connection worker for the given tree and transport.
    pub fn spawn(
        root: Node,
        transport: Box<dyn Transport>,
        config: ConnectionConfig,
    ) -> Result<Self, ConnectionError> {
        Self::spawn_with_attention(root, transport, config, None)
    }

    /// Like [`spawn`](DeviceConnection::spawn), with a state-change hook.
    pub fn spawn_with_attention(
        root: Node,
        transport: Box<dyn Transport>,
        config: ConnectionConfig,
        attention: Option<AttentionCallback>,
    ) -> Result<Self, ConnectionError> {
        let wake = transport.wake_handle();
        let shared = Arc::new(Shared::new());

        let mut worker = Worker {
            root,
            link: ChainPackReader::new(TransportLink { transport }),
            cids: Vec::new(),
            rid: 3,
            config,
            shared: shared.clone(),
            attention,
            reconnects: 0,
            write_err: false,
        };

        let handle = std::thread::Builder::new()
            .name("shv-connection".into())
            .spawn(move || worker.run())
            .map_err(|_| ConnectionError::ThreadCreate)?;

        Ok(DeviceConnection {
            shared,
            wake,
            worker: Some(handle),
        })
    }

    /// Terminal error of the worker, if it hit one.
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.shared
            .last_error
            .lock()
            .expect("last error lock")
            .clone()
    }

    /// True once the worker thread has returned.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(|h| h.is_finished())
    }

    fn signal_stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        {
            let mut stopped = self.shared.stopped.lock().expect("stop lock");
            *stopped = true;
            self.shared.stop_cv.notify_all();
        }
        self.wake.wake();
    }

    /// Cooperative shutdown: drop the running flag, poke the wake channel
    /// and join the worker. Returns once the transport is closed; the
    /// latency is one wake-up plus any read in flight, not the pump's
    /// idle timeout.
    pub fn shutdown(mut self) {
        self.signal_stop();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.signal_stop();
            let _ = handle.join();
        }
    }
}
