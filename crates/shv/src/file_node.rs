//! File nodes: streaming `write`, `read`, `crc`, `stat` and `size`.
//!
//! The write and CRC request parsers are explicit state machines over the
//! payload unpacker, so a blob arriving split across many transport reads
//! is written out chunk by chunk without ever being resident. A mismatch
//! in the expected item sequence drains the enclosing containers, resets
//! the machine and answers `InvalidParams`; platform I/O failures are
//! collected in a per-request flag and answered as `PlatformError` after
//! the payload has been consumed in full, so the stream stays in frame
//! either way.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use shv_chainpack::Item;
use shv_rpc::RpcErrorCode;

use crate::com::RequestScope;
use crate::error::Result;
use crate::methods::{DIR_DESC, LS_DESC, MethodDesc, MethodTable};
use crate::tree::{Children, Node, NodeKind};

/// Stat keys of the inner IMap.
pub const FN_TYPE: i64 = 0;
pub const FN_SIZE: i64 = 1;
pub const FN_PAGESIZE: i64 = 2;
pub const FN_ACCESSTIME: i64 = 3;
pub const FN_MODTIME: i64 = 4;
pub const FN_MAXWRITE: i64 = 5;

/// File type reported by `stat`. Regular files are the only kind the
/// protocol supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular = 0,
}

/// Platform file operations injected into a file node.
///
/// The CRC implementation must use the IEEE 802.3 polynomial and tolerate
/// short files: a read that ends early finalizes over what was read.
pub trait FileOps: Send {
    fn open(&mut self) -> io::Result<()>;
    fn size(&mut self) -> io::Result<u64>;
    fn seek(&mut self, pos: u64) -> io::Result<u64>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn crc32(&mut self, start: u64, size: u64) -> io::Result<u32>;
}

/// The write request parser state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    #[default]
    ImapStart,
    Request1,
    ListStart,
    Offset,
    Blob,
    ListStop,
    ImapStop,
}

/// The crc/read request parser state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum RangeState {
    #[default]
    ImapStart,
    /// Inside the IMap, awaiting the params key or the IMap end.
    Body,
    ListStart,
    Offset,
    Size,
    ListEnd,
}

/// Outcome of running a request parser to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseOutcome {
    Done,
    /// The payload did not follow the expected shape; it has been drained
    /// and the machine reset.
    Garbled,
}

/// Finish the offending item and close the still-open containers around
/// it, so the next request starts on a frame boundary.
fn recover(
    scope: &mut RequestScope<'_>,
    item: &Item,
    mut enclosing: u32,
) -> shv_chainpack::Result<()> {
    if matches!(item, Item::ContainerEnd) {
        enclosing = enclosing.saturating_sub(1);
    } else {
        scope.discard_item(item)?;
    }
    if enclosing > 0 {
        scope.discard_container(enclosing)?;
    }
    Ok(())
}

/// File exposed to the broker, with bounds enforcement against
/// `maxsize`.
pub struct FileNode {
    ops: Box<dyn FileOps>,
    file_type: FileType,
    maxsize: u64,
    pagesize: u64,

    write_state: WriteState,
    file_offset: u64,

    range_state: RangeState,
    range_offset: Option<u64>,
    range_size: Option<u64>,
    crc: u32,

    platform_error: bool,
}

impl FileNode {
    pub fn new(ops: Box<dyn FileOps>, maxsize: u64, pagesize: u64) -> Self {
        FileNode {
            ops,
            file_type: FileType::Regular,
            maxsize,
            pagesize,
            write_state: WriteState::default(),
            file_offset: 0,
            range_state: RangeState::default(),
            range_offset: None,
            range_size: None,
            crc: 0,
            platform_error: false,
        }
    }

    pub fn maxsize(&self) -> u64 {
        self.maxsize
    }

    pub fn pagesize(&self) -> u64 {
        self.pagesize
    }

    /// Write one blob chunk at the current offset. Writes never extend the
    /// file past `maxsize`: a chunk starting beyond it is a silent no-op,
    /// one crossing it is truncated.
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() || self.file_offset >= self.maxsize {
            return Ok(());
        }
        let count = (data.len() as u64).min(self.maxsize - self.file_offset) as usize;
        let mut written = 0;
        while written < count {
            let n = self.ops.write(&data[written..count])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "file accepted no bytes",
                ));
            }
            written += n;
        }
        self.file_offset += count as u64;
        Ok(())
    }

    fn write_mismatch(
        &mut self,
        scope: &mut RequestScope<'_>,
        item: &Item,
        enclosing: u32,
    ) -> Result<ParseOutcome> {
        self.write_state = WriteState::ImapStart;
        recover(scope, item, enclosing)?;
        Ok(ParseOutcome::Garbled)
    }

    /// Run the write state machine over the payload:
    /// `IMap{1: [offset, blob…]}`. Platform failures are remembered and
    /// parsing continues, so the request is always consumed whole.
    fn process_write(&mut self, scope: &mut RequestScope<'_>) -> Result<ParseOutcome> {
        self.platform_error = false;

        loop {
            let item = scope.next_item()?;
            match self.write_state {
                WriteState::ImapStart => {
                    if matches!(item, Item::IMapBegin) {
                        self.write_state = WriteState::Request1;
                    } else {
                        return self.write_mismatch(scope, &item, 0);
                    }
                }
                WriteState::Request1 => {
                    if item.as_int() == Some(1) {
                        self.write_state = WriteState::ListStart;
                    } else {
                        return self.write_mismatch(scope, &item, 1);
                    }
                }
                WriteState::ListStart => {
                    if matches!(item, Item::ListBegin) {
                        self.write_state = WriteState::Offset;
                    } else {
                        return self.write_mismatch(scope, &item, 1);
                    }
                }
                WriteState::Offset => match item.as_int() {
                    Some(offset) if offset >= 0 => {
                        self.file_offset = offset as u64;
                        self.write_state = WriteState::Blob;
                        if !self.platform_error {
                            // Seeks are capped at the file boundary; the
                            // real offset still rules the bounds checks.
                            let target = self.file_offset.min(self.maxsize);
                            if let Err(err) = self.ops.seek(target) {
                                log::warn!("file seek failed: {err}");
                                self.platform_error = true;
                            }
                        }
                    }
                    _ => return self.write_mismatch(scope, &item, 2),
                },
                WriteState::Blob => match &item {
                    Item::Blob(chunk) => {
                        if !self.platform_error {
                            if let Err(err) = self.write_chunk(&chunk.data) {
                                log::warn!("file write failed: {err}");
                                self.platform_error = true;
                            }
                        }
                        if chunk.last {
                            self.write_state = WriteState::ListStop;
                        }
                    }
                    _ => return self.write_mismatch(scope, &item, 2),
                },
                WriteState::ListStop => {
                    if matches!(item, Item::ContainerEnd) {
                        self.write_state = WriteState::ImapStop;
                    } else {
                        return self.write_mismatch(scope, &item, 2);
                    }
                }
                WriteState::ImapStop => {
                    if matches!(item, Item::ContainerEnd) {
                        self.write_state = WriteState::ImapStart;
                        return Ok(ParseOutcome::Done);
                    }
                    return self.write_mismatch(scope, &item, 1);
                }
            }
        }
    }

    fn range_mismatch(
        &mut self,
        scope: &mut RequestScope<'_>,
        item: &Item,
        enclosing: u32,
    ) -> Result<ParseOutcome> {
        self.range_state = RangeState::ImapStart;
        recover(scope, item, enclosing)?;
        Ok(ParseOutcome::Garbled)
    }

    /// Parse an `IMap{1: [offset?, size?]}` request. On success the
    /// captured bounds sit in `range_offset`/`range_size`; which of them
    /// arrived distinguishes the whole-file, tail and window cases.
    fn process_range(&mut self, scope: &mut RequestScope<'_>) -> Result<ParseOutcome> {
        loop {
            let item = scope.next_item()?;
            match self.range_state {
                RangeState::ImapStart => {
                    if matches!(item, Item::IMapBegin) {
                        self.range_state = RangeState::Body;
                        self.range_offset = None;
                        self.range_size = None;
                    } else {
                        return self.range_mismatch(scope, &item, 0);
                    }
                }
                RangeState::Body => {
                    if matches!(item, Item::ContainerEnd) {
                        self.range_state = RangeState::ImapStart;
                        return Ok(ParseOutcome::Done);
                    }
                    if item.as_int() == Some(1) {
                        self.range_state = RangeState::ListStart;
                    } else {
                        return self.range_mismatch(scope, &item, 1);
                    }
                }
                RangeState::ListStart => {
                    if matches!(item, Item::ListBegin) {
                        self.range_state = RangeState::Offset;
                    } else {
                        return self.range_mismatch(scope, &item, 1);
                    }
                }
                RangeState::Offset => match item.as_int() {
                    Some(offset) if offset >= 0 => {
                        self.range_offset = Some(offset as u64);
                        self.range_state = RangeState::Size;
                    }
                    _ => return self.range_mismatch(scope, &item, 2),
                },
                RangeState::Size => {
                    if matches!(item, Item::ContainerEnd) {
                        self.range_state = RangeState::Body;
                        continue;
                    }
                    match item.as_int() {
                        Some(size) if size >= 0 => {
                            self.range_size = Some(size as u64);
                            self.range_state = RangeState::ListEnd;
                        }
                        _ => return self.range_mismatch(scope, &item, 2),
                    }
                }
                RangeState::ListEnd => {
                    if matches!(item, Item::ContainerEnd) {
                        self.range_state = RangeState::Body;
                    } else {
                        return self.range_mismatch(scope, &item, 2);
                    }
                }
            }
        }
    }

    /// Resolve the parsed range into the CRC window: empty request covers
    /// the whole file, offset-only runs to `maxsize`, both bound it
    /// exactly.
    fn crc_window(&self) -> (u64, u64) {
        match (self.range_offset, self.range_size) {
            (None, _) => (0, self.maxsize),
            (Some(offset), None) => (offset, self.maxsize.saturating_sub(offset)),
            (Some(offset), Some(size)) => (offset, size),
        }
    }

    /// Read back `size` bytes from `offset`, clamped at `maxsize`. A file
    /// shorter than the window yields what is actually there.
    fn read_window(&mut self, offset: u64, size: u64) -> io::Result<Vec<u8>> {
        let end = offset.saturating_add(size).min(self.maxsize);
        if offset >= end {
            return Ok(Vec::new());
        }
        self.ops.seek(offset)?;

        let mut remaining = (end - offset) as usize;
        let mut out = Vec::with_capacity(remaining);
        let mut buf = [0u8; shv_chainpack::BUF_LEN];
        while remaining > 0 {
            let want = remaining.min(buf.len());
            let n = self.ops.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
            remaining -= n;
        }
        Ok(out)
    }
}

/// `write` method: `IMap{1: [offset, blob]}`, empty IMap reply on success.
pub fn write(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    let NodeKind::File(file) = &mut node.kind else {
        return scope.reply_error(
            rid,
            RpcErrorCode::MethodCallException,
            Some("Node is not a file."),
        );
    };

    match file.process_write(scope)? {
        ParseOutcome::Garbled => {
            scope.reply_error(rid, RpcErrorCode::InvalidParams, Some("Garbled data"))
        }
        ParseOutcome::Done if file.platform_error => {
            scope.reply_error(rid, RpcErrorCode::PlatformError, Some("I/O Error"))
        }
        ParseOutcome::Done => scope.reply_empty(rid),
    }
}

/// `crc` method: CRC32 over the requested window, `UInt` reply.
pub fn crc(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    let NodeKind::File(file) = &mut node.kind else {
        return scope.reply_error(
            rid,
            RpcErrorCode::MethodCallException,
            Some("Node is not a file."),
        );
    };

    match file.process_range(scope)? {
        ParseOutcome::Garbled => {
            scope.reply_error(rid, RpcErrorCode::InvalidParams, Some("Garbled data"))
        }
        ParseOutcome::Done => {
            let (start, size) = file.crc_window();
            match file.ops.crc32(start, size) {
                Ok(crc) => {
                    file.crc = crc;
                    file.platform_error = false;
                    scope.reply_uint(rid, file.crc as u64)
                }
                Err(err) => {
                    log::warn!("file crc failed: {err}");
                    file.platform_error = true;
                    scope.reply_error(rid, RpcErrorCode::PlatformError, Some("I/O Error"))
                }
            }
        }
    }
}

/// `read` method: `IMap{1: [offset, size]}`, blob reply.
pub fn read(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    let NodeKind::File(file) = &mut node.kind else {
        return scope.reply_error(
            rid,
            RpcErrorCode::MethodCallException,
            Some("Node is not a file."),
        );
    };

    match file.process_range(scope)? {
        ParseOutcome::Garbled => {
            scope.reply_error(rid, RpcErrorCode::InvalidParams, Some("Garbled data"))
        }
        ParseOutcome::Done => {
            let (Some(offset), Some(size)) = (file.range_offset, file.range_size) else {
                return scope.reply_error(
                    rid,
                    RpcErrorCode::InvalidParams,
                    Some("Expected offset and size."),
                );
            };
            match file.read_window(offset, size) {
                Ok(data) => scope.reply_result(rid, |w| w.write_blob(&data)),
                Err(err) => {
                    log::warn!("file read failed: {err}");
                    file.platform_error = true;
                    scope.reply_error(rid, RpcErrorCode::PlatformError, Some("I/O Error"))
                }
            }
        }
    }
}

/// `stat` method: `IMap{0: type, 1: size, 2: pagesize, 5: maxwrite}`.
pub fn stat(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    let NodeKind::File(file) = &mut node.kind else {
        return scope.reply_error(
            rid,
            RpcErrorCode::MethodCallException,
            Some("Node is not a file."),
        );
    };
    if file.file_type != FileType::Regular {
        return scope.reply_error(rid, RpcErrorCode::InvalidParams, None);
    }

    let (file_type, maxsize, pagesize) = (file.file_type as i64, file.maxsize, file.pagesize);
    scope.reply_result(rid, |w| {
        w.begin_imap()?;
        w.write_int(FN_TYPE)?;
        w.write_int(file_type)?;
        w.write_int(FN_SIZE)?;
        w.write_int(maxsize as i64)?;
        w.write_int(FN_PAGESIZE)?;
        w.write_int(pagesize as i64)?;
        // Cap single transfers at a few pages.
        w.write_int(FN_MAXWRITE)?;
        w.write_int(4 * pagesize as i64)?;
        w.end_container()
    })
}

/// `size` method: `UInt(maxsize)`.
pub fn size(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    let NodeKind::File(file) = &node.kind else {
        return scope.reply_error(
            rid,
            RpcErrorCode::MethodCallException,
            Some("Node is not a file."),
        );
    };
    let maxsize = file.maxsize;
    scope.reply_uint(rid, maxsize)
}

const CRC_DESC: MethodDesc = MethodDesc {
    name: "crc",
    flags: 0,
    param: None,
    result: None,
    access: 0,
    handler: crc,
};

const READ_DESC: MethodDesc = MethodDesc {
    name: "read",
    flags: 0,
    param: None,
    result: None,
    access: 0,
    handler: read,
};

const SIZE_DESC: MethodDesc = MethodDesc {
    name: "size",
    flags: 0,
    param: None,
    result: None,
    access: 0,
    handler: size,
};

const STAT_DESC: MethodDesc = MethodDesc {
    name: "stat",
    flags: 0,
    param: None,
    result: None,
    access: 0,
    handler: stat,
};

const WRITE_DESC: MethodDesc = MethodDesc {
    name: "write",
    flags: 0,
    param: None,
    result: None,
    access: 0,
    handler: write,
};

/// Method table of file nodes.
pub static FILE_NODE_DMAP: MethodTable = MethodTable::new(&[
    CRC_DESC, DIR_DESC, LS_DESC, READ_DESC, SIZE_DESC, STAT_DESC, WRITE_DESC,
]);

impl Node {
    /// File node with injected platform operations.
    pub fn file(
        name: impl Into<String>,
        ops: Box<dyn FileOps>,
        maxsize: u64,
        pagesize: u64,
    ) -> Node {
        let mut node = Node::new(name, &FILE_NODE_DMAP, Children::array());
        node.kind = NodeKind::File(FileNode::new(ops, maxsize, pagesize));
        node
    }

    /// File node backed by a file in the local filesystem.
    pub fn posix_file(
        name: impl Into<String>,
        fs_path: impl Into<PathBuf>,
        maxsize: u64,
        pagesize: u64,
    ) -> Node {
        Node::file(
            name,
            Box::new(PosixFileOps::new(fs_path)),
            maxsize,
            pagesize,
        )
    }
}

/// `FileOps` over `std::fs`, opening the backing file on first use.
pub struct PosixFileOps {
    path: PathBuf,
    file: Option<File>,
}

impl PosixFileOps {
    /// How many bytes the CRC loop pulls per read.
    const CRC_CHUNK: usize = 64;

    pub fn new(path: impl Into<PathBuf>) -> Self {
        PosixFileOps {
            path: path.into(),
            file: None,
        }
    }

    fn ensure_open(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?;
            self.file = Some(file);
        }
        Ok(self.file.as_mut().expect("file just opened"))
    }
}

impl FileOps for PosixFileOps {
    fn open(&mut self) -> io::Result<()> {
        self.ensure_open().map(|_| ())
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn seek(&mut self, pos: u64) -> io::Result<u64> {
        self.ensure_open()?.seek(SeekFrom::Start(pos))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?.write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?.read(buf)
    }

    fn crc32(&mut self, start: u64, size: u64) -> io::Result<u32> {
        // Make sure everything written so far is measured, then reopen.
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        let file = self.ensure_open()?;
        file.seek(SeekFrom::Start(start))?;

        let mut hasher = crc32fast::Hasher::new();
        let mut buf = [0u8; Self::CRC_CHUNK];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = file.read(&mut buf[..want])?;
            if n == 0 {
                // End of the actual file contents; finalize over what was
                // read.
                break;
            }
            hasher.update(&buf[..n]);
            remaining -= n as u64;
        }
        self.file = None;
        Ok(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shv_chainpack::{ChainPackWriter, Item};

    use crate::testing::{MemFileOps, TestIo, payload_of};

    fn payload(build: impl FnOnce(&mut ChainPackWriter<Vec<u8>>)) -> Vec<u8> {
        let mut w = ChainPackWriter::new(Vec::new());
        build(&mut w);
        w.into_inner()
    }

    fn write_payload(offset: i64, data: &[u8]) -> Vec<u8> {
        payload(|w| {
            w.begin_imap().unwrap();
            w.write_int(1).unwrap();
            w.begin_list().unwrap();
            w.write_int(offset).unwrap();
            w.write_blob(data).unwrap();
            w.end_container().unwrap();
            w.end_container().unwrap();
        })
    }

    fn range_payload(bounds: &[i64]) -> Vec<u8> {
        payload(|w| {
            w.begin_imap().unwrap();
            if !bounds.is_empty() {
                w.write_int(1).unwrap();
                w.begin_list().unwrap();
                for &b in bounds {
                    w.write_int(b).unwrap();
                }
                w.end_container().unwrap();
            }
            w.end_container().unwrap();
        })
    }

    fn file_node(content: &[u8], maxsize: u64) -> (Node, std::sync::Arc<std::sync::Mutex<Vec<u8>>>) {
        let ops = MemFileOps::with_content(content);
        let handle = ops.handle();
        (Node::file("fw", Box::new(ops), maxsize, 4), handle)
    }

    fn error_code(frame: &[Item]) -> Option<(i64, Vec<u8>)> {
        let p = payload_of(frame);
        if p.get(1) != Some(&Item::Int(3)) {
            return None;
        }
        let code = match p.get(4) {
            Some(Item::Int(c)) => *c,
            _ => return None,
        };
        let msg = match p.get(6) {
            Some(Item::String(c)) => c.data.clone(),
            _ => Vec::new(),
        };
        Some((code, msg))
    }

    #[test]
    fn write_is_truncated_at_maxsize() {
        // 17 bytes against a 16 byte file, delivered in small pieces so
        // the blob streams through several chunks.
        let (mut node, data) = file_node(b"", 16);
        let request = write_payload(0, b"hello world!!!!!!");
        let reads = request.chunks(4).map(|c| c.to_vec()).collect();
        let mut io = TestIo::from_reads(reads);

        write(&mut io.scope(), &mut node, 5).unwrap();

        assert_eq!(data.lock().unwrap().as_slice(), b"hello world!!!!!");
        let replies = io.replies();
        assert_eq!(payload_of(&replies[0]), [Item::IMapBegin, Item::ContainerEnd]);
    }

    #[test]
    fn write_garbled_payload_recovers_for_the_next_request() {
        let (mut node, data) = file_node(b"", 8);

        // Wrong params key, then a well-formed write in the same stream.
        let mut bytes = payload(|w| {
            w.begin_imap().unwrap();
            w.write_int(2).unwrap();
            w.write_int(5).unwrap();
            w.end_container().unwrap();
        });
        bytes.extend_from_slice(&write_payload(0, b"ok"));
        let mut io = TestIo::new(bytes);

        write(&mut io.scope(), &mut node, 1).unwrap();
        write(&mut io.scope(), &mut node, 2).unwrap();

        let replies = io.replies();
        assert_eq!(
            error_code(&replies[0]),
            Some((RpcErrorCode::InvalidParams.code(), b"Garbled data".to_vec()))
        );
        assert_eq!(payload_of(&replies[1]), [Item::IMapBegin, Item::ContainerEnd]);
        assert_eq!(data.lock().unwrap().as_slice(), b"ok");
    }

    #[test]
    fn write_platform_failure_consumes_payload_and_reports() {
        let mut ops = MemFileOps::new();
        ops.fail_writes = true;
        let mut node = Node::file("fw", Box::new(ops), 16, 4);

        let mut io = TestIo::new(write_payload(0, b"data"));
        write(&mut io.scope(), &mut node, 3).unwrap();

        let replies = io.replies();
        assert_eq!(
            error_code(&replies[0]),
            Some((RpcErrorCode::PlatformError.code(), b"I/O Error".to_vec()))
        );
        // The payload was consumed whole; the stream is at its end.
        assert!(io.reader.next().is_err());
    }

    #[test]
    fn crc_distinguishes_empty_offset_and_window() {
        let content = b"123456789";
        let (mut node, _) = file_node(content, 9);

        // Empty IMap: the whole file. The value is the classic IEEE
        // 802.3 check constant.
        let mut io = TestIo::new(range_payload(&[]));
        crc(&mut io.scope(), &mut node, 1).unwrap();
        assert_eq!(payload_of(&io.replies()[0])[2], Item::UInt(0xCBF43926));

        // Explicit full window.
        let mut io = TestIo::new(range_payload(&[0, 9]));
        crc(&mut io.scope(), &mut node, 2).unwrap();
        assert_eq!(payload_of(&io.replies()[0])[2], Item::UInt(0xCBF43926));

        // Offset only: from there to the end.
        let mut io = TestIo::new(range_payload(&[4]));
        crc(&mut io.scope(), &mut node, 3).unwrap();
        let expected = crc32fast::hash(b"56789") as u64;
        assert_eq!(payload_of(&io.replies()[0])[2], Item::UInt(expected));
    }

    #[test]
    fn read_returns_the_clamped_window() {
        let (mut node, _) = file_node(b"abcdef", 6);
        let mut io = TestIo::new(range_payload(&[2, 10]));
        read(&mut io.scope(), &mut node, 4).unwrap();

        match &payload_of(&io.replies()[0])[2] {
            Item::Blob(c) => assert_eq!(c.data, b"cdef"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn read_without_bounds_is_invalid() {
        let (mut node, _) = file_node(b"abcdef", 6);
        let mut io = TestIo::new(range_payload(&[]));
        read(&mut io.scope(), &mut node, 4).unwrap();
        assert_eq!(
            error_code(&io.replies()[0]).map(|(c, _)| c),
            Some(RpcErrorCode::InvalidParams.code())
        );
    }

    #[test]
    fn stat_reports_type_sizes_and_maxwrite() {
        let (mut node, _) = file_node(b"", 64);
        let mut io = TestIo::new(range_payload(&[]));
        stat(&mut io.scope(), &mut node, 6).unwrap();

        let replies = io.replies();
        let p = payload_of(&replies[0]);
        assert_eq!(
            p,
            [
                Item::IMapBegin,
                Item::Int(2),
                Item::IMapBegin,
                Item::Int(FN_TYPE),
                Item::Int(0),
                Item::Int(FN_SIZE),
                Item::Int(64),
                Item::Int(FN_PAGESIZE),
                Item::Int(4),
                Item::Int(FN_MAXWRITE),
                Item::Int(16),
                Item::ContainerEnd,
                Item::ContainerEnd,
            ]
        );
    }

    #[test]
    fn size_replies_with_maxsize() {
        let (mut node, _) = file_node(b"", 128);
        let mut io = TestIo::new(range_payload(&[]));
        size(&mut io.scope(), &mut node, 7).unwrap();
        assert_eq!(payload_of(&io.replies()[0])[2], Item::UInt(128));
    }
}
