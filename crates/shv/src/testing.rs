//! Test doubles shared by the unit tests: a scripted transport and an
//! in-memory file.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shv_chainpack::{ChainPackReader, ChainPackWriter, Item};
use shv_transport::{InitError, Ready, Transport, Wake, WakeHandle};

use crate::com::{MsgReader, RequestScope, TransportLink};
use crate::file_node::FileOps;

pub(crate) struct NoopWake;

impl Wake for NoopWake {
    fn wake(&self) {}
}

/// Transport fed from a script of read results; writes are captured.
pub(crate) struct ScriptedTransport {
    pub reads: VecDeque<Vec<u8>>,
    pub written: Arc<Mutex<Vec<u8>>>,
    pub init_results: VecDeque<Result<(), InitError>>,
}

impl ScriptedTransport {
    pub fn new(reads: Vec<Vec<u8>>) -> Self {
        ScriptedTransport {
            reads: reads.into(),
            written: Arc::new(Mutex::new(Vec::new())),
            init_results: VecDeque::new(),
        }
    }

    pub fn written_handle(&self) -> Arc<Mutex<Vec<u8>>> {
        self.written.clone()
    }
}

impl Transport for ScriptedTransport {
    fn init(&mut self) -> Result<(), InitError> {
        self.init_results.pop_front().unwrap_or(Ok(()))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(front) = self.reads.front_mut() else {
            return Ok(0);
        };
        let n = front.len().min(buf.len());
        buf[..n].copy_from_slice(&front[..n]);
        front.drain(..n);
        if front.is_empty() {
            self.reads.pop_front();
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) {}

    fn data_ready(&mut self, _timeout: Duration) -> io::Result<Ready> {
        // Everything scripted is immediately available; past the script a
        // read observes the clean close.
        Ok(Ready::Readable)
    }

    fn wake_handle(&self) -> WakeHandle {
        Arc::new(NoopWake)
    }
}

/// Reader/scope pair over a scripted transport, for driving handlers
/// directly with payload bytes.
pub(crate) struct TestIo {
    pub reader: MsgReader,
    pub cids: Vec<i64>,
    pub write_err: bool,
    pub disconnect: bool,
    pub written: Arc<Mutex<Vec<u8>>>,
}

impl TestIo {
    /// `reads` are handed to the decoder exactly as scripted, so small
    /// pieces exercise refills and chunked strings.
    pub fn from_reads(reads: Vec<Vec<u8>>) -> Self {
        let transport = ScriptedTransport::new(reads);
        let written = transport.written_handle();
        TestIo {
            reader: ChainPackReader::new(TransportLink {
                transport: Box::new(transport),
            }),
            cids: Vec::new(),
            write_err: false,
            disconnect: false,
            written,
        }
    }

    pub fn new(payload: Vec<u8>) -> Self {
        Self::from_reads(vec![payload])
    }

    pub fn scope(&mut self) -> RequestScope<'_> {
        RequestScope {
            reader: &mut self.reader,
            cids: &self.cids,
            write_err: &mut self.write_err,
            disconnect: &mut self.disconnect,
        }
    }

    /// Captured reply frames, decoded to item sequences (length prefix
    /// and protocol selector stripped).
    pub fn replies(&self) -> Vec<Vec<Item>> {
        decode_frames(&self.written.lock().unwrap())
    }
}

/// Split a captured byte stream into frames and decode each into items.
pub(crate) fn decode_frames(mut bytes: &[u8]) -> Vec<Vec<Item>> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let mut r = ChainPackReader::new(bytes);
        let len = r.read_uint_data().expect("frame length") as usize;

        let mut prefix = ChainPackWriter::new(Vec::new());
        prefix.write_uint_data(len as u64).expect("reencode length");
        let skip = prefix.into_inner().len();

        let frame = &bytes[skip..skip + len];
        let mut fr = ChainPackReader::new(frame);
        let mut items = Vec::new();
        // Leading protocol selector decodes as UInt(1); keep it.
        while let Ok(item) = fr.next() {
            items.push(item);
        }
        frames.push(items);
        bytes = &bytes[skip + len..];
    }
    frames
}

/// Items of the payload section (everything after the meta map) of a
/// decoded frame.
pub(crate) fn payload_of(frame: &[Item]) -> &[Item] {
    let mut depth = 0;
    for (at, item) in frame.iter().enumerate() {
        if item.opens_container() {
            depth += 1;
        } else if matches!(item, Item::ContainerEnd) {
            depth -= 1;
            if depth == 0 {
                return &frame[at + 1..];
            }
        }
    }
    &[]
}

/// In-memory `FileOps`; the backing vector grows on writes up to whatever
/// the node-level bounds allow through.
pub(crate) struct MemFileOps {
    pub data: Arc<Mutex<Vec<u8>>>,
    pos: u64,
    pub fail_writes: bool,
}

impl MemFileOps {
    pub fn new() -> Self {
        MemFileOps {
            data: Arc::new(Mutex::new(Vec::new())),
            pos: 0,
            fail_writes: false,
        }
    }

    pub fn with_content(content: &[u8]) -> Self {
        let ops = Self::new();
        ops.data.lock().unwrap().extend_from_slice(content);
        ops
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<u8>>> {
        self.data.clone()
    }
}

impl FileOps for MemFileOps {
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.data.lock().unwrap().len() as u64)
    }

    fn seek(&mut self, pos: u64) -> io::Result<u64> {
        self.pos = pos;
        Ok(pos)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted failure"));
        }
        let mut data = self.data.lock().unwrap();
        let end = self.pos as usize + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[self.pos as usize..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.lock().unwrap();
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        drop(data);
        self.pos += n as u64;
        Ok(n)
    }

    fn crc32(&mut self, start: u64, size: u64) -> io::Result<u32> {
        let data = self.data.lock().unwrap();
        let from = (start as usize).min(data.len());
        let to = (start.saturating_add(size) as usize).min(data.len());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[from..to]);
        Ok(hasher.finalize())
    }
}
