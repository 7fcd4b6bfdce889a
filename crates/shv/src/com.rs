//! Request-scoped I/O: the reader the payload comes from and the reply
//! send path, bundled for method handlers.

use std::io::{self, Read};

use shv_chainpack::{ChainPackReader, Item};
use shv_rpc::{DirEntry, NumberParam, RpcErrorCode, message};
use shv_transport::{Transport, write_all};

use crate::error::Result;

/// Adapter making a boxed transport readable by the ChainPack reader;
/// this is the underflow hook of the unpack path.
pub(crate) struct TransportLink {
    pub transport: Box<dyn Transport>,
}

impl Read for TransportLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.transport.read(buf)
    }
}

/// Reader pulling messages off the broker connection.
pub(crate) type MsgReader = ChainPackReader<TransportLink>;

/// Everything a method handler may touch while serving one request: the
/// unpack reader positioned at the payload, the caller ids to mirror, and
/// the reply send path.
///
/// Replies are emitted as single length-prefixed frames. A transport write
/// failure flips the sticky write-error flag; the rest of the frame and
/// any further frames are silently dropped and the worker tears the
/// session down after the request.
pub struct RequestScope<'a> {
    pub(crate) reader: &'a mut MsgReader,
    pub(crate) cids: &'a [i64],
    pub(crate) write_err: &'a mut bool,
    pub(crate) disconnect: &'a mut bool,
}

impl RequestScope<'_> {
    /// Item-level access to the request payload, for handlers that run
    /// their own parsing state machines.
    pub fn next_item(&mut self) -> shv_chainpack::Result<Item> {
        self.reader.next()
    }

    /// Finish consuming `item` (nested containers, remaining chunks).
    pub fn discard_item(&mut self, item: &Item) -> shv_chainpack::Result<()> {
        self.reader.discard_item(item)
    }

    /// Consume items until `depth` open containers are closed.
    pub fn discard_container(&mut self, depth: u32) -> shv_chainpack::Result<()> {
        self.reader.discard_container(depth)
    }

    /// Drain the payload, capturing a numeric parameter if present.
    pub fn drain_params(&mut self) -> Result<NumberParam> {
        Ok(shv_rpc::read_param_number(self.reader)?)
    }

    /// Ask the worker to close the connection once this request finishes.
    /// Used by the device reset method.
    pub fn request_disconnect(&mut self) {
        *self.disconnect = true;
    }

    fn send(&mut self, frame: shv_chainpack::Result<Vec<u8>>) -> Result<()> {
        let frame = frame?;
        if *self.write_err {
            return Ok(());
        }
        if let Err(err) = write_all(self.reader.get_mut().transport.as_mut(), &frame) {
            log::error!("reply write failed: {err}");
            *self.write_err = true;
        }
        Ok(())
    }

    pub fn reply_empty(&mut self, rid: i64) -> Result<()> {
        self.send(message::reply_empty(rid, self.cids))
    }

    pub fn reply_int(&mut self, rid: i64, num: i64) -> Result<()> {
        self.send(message::reply_int(rid, self.cids, num))
    }

    pub fn reply_uint(&mut self, rid: i64, num: u64) -> Result<()> {
        self.send(message::reply_uint(rid, self.cids, num))
    }

    pub fn reply_double(&mut self, rid: i64, num: f64) -> Result<()> {
        self.send(message::reply_double(rid, self.cids, num))
    }

    pub fn reply_str(&mut self, rid: i64, s: &str) -> Result<()> {
        self.send(message::reply_str(rid, self.cids, s))
    }

    pub fn reply_str_list<I, S>(&mut self, rid: i64, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.send(message::reply_str_list(rid, self.cids, names))
    }

    pub fn reply_dir<'d, I>(&mut self, rid: i64, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = DirEntry<'d>>,
    {
        self.send(message::reply_dir(rid, self.cids, entries))
    }

    /// Emit a result packed by the given closure under key 2.
    pub fn reply_result(
        &mut self,
        rid: i64,
        pack: impl FnOnce(&mut message::BodyWriter) -> shv_chainpack::Result<()>,
    ) -> Result<()> {
        self.send(message::reply_result(rid, self.cids, pack))
    }

    pub fn reply_error(
        &mut self,
        rid: i64,
        code: RpcErrorCode,
        msg: Option<&str>,
    ) -> Result<()> {
        self.send(message::reply_error(rid, self.cids, code, msg))
    }
}
