//! Silicon Heaven device client.
//!
//! A device builds a [`Node`] tree, hands it together with a transport to
//! [`DeviceConnection::spawn`], and from then on a worker thread logs in
//! to the broker, keeps the session alive and serves remote method calls
//! against the tree.
//!
//! ```no_run
//! use std::sync::{Arc, Mutex};
//! use shv::{Children, ConnectionConfig, DeviceConnection, DotAppNode, Node};
//! use shv::methods::DIR_LS_DMAP;
//! use shv_transport::TcpTransport;
//!
//! let setpoint = Arc::new(Mutex::new(0.0));
//!
//! let mut root = Node::new("", &DIR_LS_DMAP, Children::tree());
//! root.add_child(Node::dot_app(DotAppNode::new("demo", "1.0").with_date_now()));
//! root.add_child(Node::typed_double("setpoint", setpoint.clone()));
//!
//! let transport = Box::new(TcpTransport::new("localhost", 3755).unwrap());
//! let connection = DeviceConnection::spawn(
//!     root,
//!     transport,
//!     ConnectionConfig {
//!         user: "device".into(),
//!         password: "secret".into(),
//!         ..Default::default()
//!     },
//! )
//! .unwrap();
//!
//! // … the application reads and writes `setpoint` concurrently …
//! connection.shutdown();
//! ```

#![forbid(unsafe_code)]

mod com;
pub mod connection;
pub mod dotapp;
pub mod dotdevice;
pub mod error;
pub mod file_node;
pub mod methods;
pub mod tree;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use com::RequestScope;
pub use connection::{
    Attention, AttentionCallback, ConnectionConfig, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_RECONNECT_PERIOD, DeviceConnection,
};
pub use dotapp::DotAppNode;
pub use dotdevice::{DeviceOps, DotDeviceNode, PosixDeviceOps};
pub use error::{ConnectionError, Error, Result};
pub use file_node::{FileOps, FileType, PosixFileOps};
pub use methods::{MethodDesc, MethodHandler, MethodTable};
pub use tree::{Children, Node, NodeKind, TypedValueNode};

pub use shv_chainpack as chainpack;
pub use shv_rpc as rpc;
pub use shv_transport as transport;
