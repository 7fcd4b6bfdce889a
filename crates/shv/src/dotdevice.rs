//! The `.device` node: device identification, uptime and reset.

use std::io;
use std::time::{Duration, Instant};

use shv_rpc::RpcErrorCode;

use crate::com::RequestScope;
use crate::error::Result;
use crate::methods::{
    ACCESS_BROWSE, ACCESS_COMMAND, ACCESS_READ, DIR_DESC, LS_DESC, METHOD_GETTER, MethodDesc,
    MethodTable,
};
use crate::tree::{Children, Node, NodeKind};

/// How long the reset acknowledgement gets to drain before the platform
/// hook fires.
const RESET_DRAIN: Duration = Duration::from_secs(2);

/// Platform hooks of the `.device` node.
pub trait DeviceOps: Send {
    /// Seconds the device has been up.
    fn uptime(&self) -> io::Result<u64>;

    /// Whether a reset hook exists; `reset` is only invoked when true.
    fn has_reset(&self) -> bool {
        false
    }

    /// Restart the device. Only called after the acknowledgement reply
    /// has been given time to drain.
    fn reset(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no reset hook installed",
        ))
    }
}

/// `DeviceOps` for a plain POSIX process: uptime from `/proc/uptime` when
/// available (process age otherwise), no reset hook.
pub struct PosixDeviceOps {
    started: Instant,
}

impl PosixDeviceOps {
    pub fn new() -> Self {
        PosixDeviceOps {
            started: Instant::now(),
        }
    }
}

impl Default for PosixDeviceOps {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceOps for PosixDeviceOps {
    fn uptime(&self) -> io::Result<u64> {
        if let Ok(text) = std::fs::read_to_string("/proc/uptime") {
            if let Some(secs) = text
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<f64>().ok())
            {
                return Ok(secs as u64);
            }
        }
        Ok(self.started.elapsed().as_secs())
    }
}

/// State of the `.device` node.
pub struct DotDeviceNode {
    pub device_name: String,
    pub device_version: String,
    pub serial_number: String,
    ops: Box<dyn DeviceOps>,
}

impl DotDeviceNode {
    pub fn new(
        device_name: impl Into<String>,
        device_version: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        DotDeviceNode {
            device_name: device_name.into(),
            device_version: device_version.into(),
            serial_number: serial_number.into(),
            ops: Box::new(PosixDeviceOps::new()),
        }
    }

    /// Replace the platform hooks.
    pub fn with_ops(mut self, ops: Box<dyn DeviceOps>) -> Self {
        self.ops = ops;
        self
    }
}

fn with_device<'n>(
    scope: &mut RequestScope<'_>,
    node: &'n mut Node,
    rid: i64,
) -> Result<Option<&'n mut DotDeviceNode>> {
    match &mut node.kind {
        NodeKind::DotDevice(dev) => Ok(Some(dev)),
        _ => {
            scope.reply_error(
                rid,
                RpcErrorCode::MethodCallException,
                Some("Node is not a device node."),
            )?;
            Ok(None)
        }
    }
}

fn device_name(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    match with_device(scope, node, rid)? {
        Some(dev) => {
            let name = dev.device_name.clone();
            scope.reply_str(rid, &name)
        }
        None => Ok(()),
    }
}

fn device_version(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    match with_device(scope, node, rid)? {
        Some(dev) => {
            let version = dev.device_version.clone();
            scope.reply_str(rid, &version)
        }
        None => Ok(()),
    }
}

fn serial_number(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    match with_device(scope, node, rid)? {
        Some(dev) => {
            let serial = dev.serial_number.clone();
            scope.reply_str(rid, &serial)
        }
        None => Ok(()),
    }
}

fn uptime(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    match with_device(scope, node, rid)? {
        Some(dev) => match dev.ops.uptime() {
            Ok(secs) => scope.reply_int(rid, secs as i64),
            Err(err) => {
                log::warn!("uptime hook failed: {err}");
                scope.reply_error(rid, RpcErrorCode::PlatformError, Some("I/O Error"))
            }
        },
        None => Ok(()),
    }
}

/// `reset`: acknowledge with `0`, let the reply drain, then hand control
/// to the platform hook and drop the broker connection.
fn reset(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    let Some(dev) = with_device(scope, node, rid)? else {
        return Ok(());
    };
    if !dev.ops.has_reset() {
        return scope.reply_error(
            rid,
            RpcErrorCode::NotImplemented,
            Some("Reset hook not installed."),
        );
    }

    scope.reply_int(rid, 0)?;
    std::thread::sleep(RESET_DRAIN);
    if let Err(err) = dev.ops.reset() {
        log::error!("device reset hook failed: {err}");
    }
    scope.request_disconnect();
    Ok(())
}

const NAME_DESC: MethodDesc = MethodDesc {
    name: "name",
    flags: METHOD_GETTER,
    param: None,
    result: Some("s"),
    access: ACCESS_BROWSE,
    handler: device_name,
};

const RESET_DESC: MethodDesc = MethodDesc {
    name: "reset",
    flags: 0,
    param: None,
    result: None,
    access: ACCESS_COMMAND,
    handler: reset,
};

const SERIAL_NUMBER_DESC: MethodDesc = MethodDesc {
    name: "serialNumber",
    flags: METHOD_GETTER,
    param: None,
    result: Some("s"),
    access: ACCESS_BROWSE,
    handler: serial_number,
};

const UPTIME_DESC: MethodDesc = MethodDesc {
    name: "uptime",
    flags: METHOD_GETTER,
    param: None,
    result: Some("i"),
    access: ACCESS_READ,
    handler: uptime,
};

const VERSION_DESC: MethodDesc = MethodDesc {
    name: "version",
    flags: METHOD_GETTER,
    param: None,
    result: Some("s"),
    access: ACCESS_BROWSE,
    handler: device_version,
};

/// Method table of the `.device` node.
pub static DOTDEVICE_DMAP: MethodTable = MethodTable::new(&[
    DIR_DESC,
    LS_DESC,
    NAME_DESC,
    RESET_DESC,
    SERIAL_NUMBER_DESC,
    UPTIME_DESC,
    VERSION_DESC,
]);

impl Node {
    /// The `.device` node; add it directly under the root.
    pub fn dot_device(device: DotDeviceNode) -> Node {
        let mut node = Node::new(".device", &DOTDEVICE_DMAP, Children::array());
        node.kind = NodeKind::DotDevice(device);
        node
    }
}
