//! Meta-header parsing and emission.
//!
//! Every SHV message starts with `UInt(length) · UInt(protocol) ·
//! MetaMap{…}`. The meta map uses small integer tags; unknown tags of any
//! shape must be skipped without losing frame alignment.

use std::io::{Read, Write};

use shv_chainpack::{ChainPackReader, ChainPackWriter, Item};

use crate::error::{Result, RpcError};

/// Meta tag: request id. Inside the error payload map the same small
/// integer happens to be the error tag; the two never meet in one map.
pub const TAG_REQUEST_ID: i64 = 8;
/// Meta tag: node path the request targets.
pub const TAG_SHV_PATH: i64 = 9;
/// Meta tag: method name.
pub const TAG_METHOD: i64 = 10;
/// Meta tag: broker routing ids, mirrored verbatim into the reply.
pub const TAG_CALLER_IDS: i64 = 11;

/// Payload key: request parameters.
pub const KEY_PARAMS: i64 = 1;
/// Payload key: method result.
pub const KEY_RESULT: i64 = 2;
/// Payload key: error shape.
pub const KEY_ERROR: i64 = 3;

/// Protocol selector for ChainPack payloads.
pub const PROTOCOL_CHAINPACK: u64 = 1;

/// Longest accepted path, terminator included.
pub const PATH_MAX: usize = 256;
/// Longest accepted method name, terminator included.
pub const METHOD_MAX: usize = 64;

/// Parsed request meta header.
///
/// An overlong path or method leaves the corresponding string empty and
/// sets the overflow flag; the message is still consumed in full so the
/// caller can answer with an error and keep the stream in frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub rid: i64,
    pub path: String,
    pub method: String,
    pub path_overflow: bool,
    pub method_overflow: bool,
}

impl RequestHead {
    /// Messages without a method are replies to our own requests.
    pub fn is_request(&self) -> bool {
        !self.method.is_empty() || self.method_overflow
    }
}

/// Collect a possibly chunked string, refusing values of `limit` bytes or
/// more. The chunks are drained either way.
fn collect_string<R: Read>(
    reader: &mut ChainPackReader<R>,
    first: shv_chainpack::Chunk,
    limit: usize,
) -> Result<Option<String>> {
    let keep = (first.total as usize) < limit;
    let mut data = if keep {
        Vec::with_capacity(first.total as usize)
    } else {
        Vec::new()
    };
    let mut chunk = first;
    loop {
        if keep {
            data.extend_from_slice(&chunk.data);
        }
        if chunk.last {
            break;
        }
        match reader.next()? {
            Item::String(c) | Item::Blob(c) => chunk = c,
            _ => return Err(RpcError::BadMeta),
        }
    }
    Ok(keep.then(|| String::from_utf8_lossy(&data).into_owned()))
}

/// Parse one message head: length prefix, protocol selector and the meta
/// map. Caller ids land in `cids` (cleared first); recognized tags fill the
/// returned [`RequestHead`]; everything else is skipped with a
/// container-balanced drain. Exactly the meta is consumed; the payload is
/// left for the method handler.
pub fn unpack_head<R: Read>(
    reader: &mut ChainPackReader<R>,
    cids: &mut Vec<i64>,
) -> Result<RequestHead> {
    let _frame_len = reader.read_uint_data()?;

    match reader.next()? {
        Item::UInt(p) if p == PROTOCOL_CHAINPACK => {}
        _ => return Err(RpcError::BadProtocol),
    }
    match reader.next()? {
        Item::MetaBegin => {}
        _ => return Err(RpcError::BadMeta),
    }

    let mut head = RequestHead::default();
    cids.clear();

    loop {
        let key_item = reader.next()?;
        if matches!(key_item, Item::ContainerEnd) {
            break;
        }
        let key = key_item.as_int().unwrap_or(0);
        // Non-integer keys carry no meaning here but must stay balanced.
        reader.discard_item(&key_item)?;

        match reader.next()? {
            value @ (Item::Int(_) | Item::UInt(_)) => {
                let v = value.as_int().unwrap_or(0);
                if key == TAG_REQUEST_ID {
                    head.rid = v;
                } else if key == TAG_CALLER_IDS {
                    cids.push(v);
                }
            }
            Item::ListBegin => {
                if key == TAG_CALLER_IDS {
                    loop {
                        let item = reader.next()?;
                        match item {
                            Item::ContainerEnd => break,
                            Item::Int(_) | Item::UInt(_) => {
                                cids.push(item.as_int().unwrap_or(0));
                            }
                            other => reader.discard_item(&other)?,
                        }
                    }
                } else {
                    reader.discard_container(1)?;
                }
            }
            Item::MapBegin | Item::IMapBegin | Item::MetaBegin => {
                reader.discard_container(1)?;
            }
            Item::String(chunk) => {
                if key == TAG_SHV_PATH {
                    match collect_string(reader, chunk, PATH_MAX)? {
                        Some(s) => head.path = s,
                        None => head.path_overflow = true,
                    }
                } else if key == TAG_METHOD {
                    match collect_string(reader, chunk, METHOD_MAX)? {
                        Some(s) => head.method = s,
                        None => head.method_overflow = true,
                    }
                } else {
                    reader.discard_item(&Item::String(chunk))?;
                }
            }
            other => reader.discard_item(&other)?,
        }
    }

    Ok(head)
}

/// Emit a reply meta: `MetaMap{1:1, 8:rid, 11:cids}`. A single caller id is
/// packed bare, several as a list, mirroring the request exactly.
pub fn pack_reply_head<W: Write>(
    writer: &mut ChainPackWriter<W>,
    rid: i64,
    cids: &[i64],
) -> shv_chainpack::Result<()> {
    writer.begin_meta()?;

    writer.write_int(1)?;
    writer.write_int(1)?;

    writer.write_int(TAG_REQUEST_ID)?;
    writer.write_int(rid)?;

    writer.write_int(TAG_CALLER_IDS)?;
    if cids.len() == 1 {
        writer.write_int(cids[0])?;
    } else {
        writer.begin_list()?;
        for &cid in cids {
            writer.write_int(cid)?;
        }
        writer.end_container()?;
    }

    writer.end_container()
}

/// Emit a request meta: `MetaMap{1:1, 8:rid, [9:path,] 10:method}`.
pub fn pack_request_head<W: Write>(
    writer: &mut ChainPackWriter<W>,
    rid: i64,
    method: &str,
    path: Option<&str>,
) -> shv_chainpack::Result<()> {
    writer.begin_meta()?;

    writer.write_int(1)?;
    writer.write_int(1)?;

    writer.write_int(TAG_REQUEST_ID)?;
    writer.write_int(rid)?;

    if let Some(path) = path {
        writer.write_int(TAG_SHV_PATH)?;
        writer.write_str(path)?;
    }

    writer.write_int(TAG_METHOD)?;
    writer.write_str(method)?;

    writer.end_container()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shv_chainpack::ChainPackWriter;

    fn framed(build: impl FnOnce(&mut ChainPackWriter<Vec<u8>>)) -> Vec<u8> {
        let mut w = ChainPackWriter::new(Vec::new());
        w.write_uint_data(PROTOCOL_CHAINPACK).unwrap();
        build(&mut w);
        let body = w.into_inner();

        let mut prefix = ChainPackWriter::new(Vec::new());
        prefix.write_uint_data(body.len() as u64).unwrap();
        let mut frame = prefix.into_inner();
        frame.extend_from_slice(&body);
        frame
    }

    #[test]
    fn head_parses_basic_request() {
        let frame = framed(|w| {
            pack_request_head(w, 5, "ls", Some("a/b")).unwrap();
            w.begin_imap().unwrap();
            w.end_container().unwrap();
        });

        let mut r = ChainPackReader::new(frame.as_slice());
        let mut cids = Vec::new();
        let head = unpack_head(&mut r, &mut cids).unwrap();
        assert_eq!(head.rid, 5);
        assert_eq!(head.path, "a/b");
        assert_eq!(head.method, "ls");
        assert!(cids.is_empty());
        // The payload is untouched.
        assert_eq!(r.next().unwrap(), Item::IMapBegin);
    }

    #[test]
    fn head_skips_unknown_tags() {
        let frame = framed(|w| {
            w.begin_meta().unwrap();
            w.write_int(1).unwrap();
            w.write_int(1).unwrap();
            w.write_int(TAG_REQUEST_ID).unwrap();
            w.write_int(7).unwrap();
            w.write_int(TAG_SHV_PATH).unwrap();
            w.write_str("x").unwrap();
            w.write_int(TAG_METHOD).unwrap();
            w.write_str("dir").unwrap();
            // Unknown tag with a nested IMap value.
            w.write_int(42).unwrap();
            w.begin_imap().unwrap();
            w.write_int(1).unwrap();
            w.begin_list().unwrap();
            w.write_str("junk").unwrap();
            w.end_container().unwrap();
            w.end_container().unwrap();
            w.end_container().unwrap();
            w.begin_imap().unwrap();
            w.end_container().unwrap();
        });

        let mut r = ChainPackReader::new(frame.as_slice());
        let mut cids = Vec::new();
        let head = unpack_head(&mut r, &mut cids).unwrap();
        assert_eq!((head.rid, head.path.as_str(), head.method.as_str()), (7, "x", "dir"));
        assert_eq!(r.next().unwrap(), Item::IMapBegin);
        assert_eq!(r.next().unwrap(), Item::ContainerEnd);
    }

    #[test]
    fn head_reads_caller_ids_single_and_list() {
        let frame = framed(|w| {
            w.begin_meta().unwrap();
            w.write_int(TAG_CALLER_IDS).unwrap();
            w.write_int(12).unwrap();
            w.end_container().unwrap();
        });
        let mut cids = Vec::new();
        unpack_head(&mut ChainPackReader::new(frame.as_slice()), &mut cids).unwrap();
        assert_eq!(cids, [12]);

        let frame = framed(|w| {
            w.begin_meta().unwrap();
            w.write_int(TAG_CALLER_IDS).unwrap();
            w.begin_list().unwrap();
            w.write_int(7).unwrap();
            w.write_int(9).unwrap();
            w.end_container().unwrap();
            w.end_container().unwrap();
        });
        unpack_head(&mut ChainPackReader::new(frame.as_slice()), &mut cids).unwrap();
        assert_eq!(cids, [7, 9]);
    }

    #[test]
    fn head_flags_overlong_method() {
        let long = "m".repeat(METHOD_MAX);
        let frame = framed(|w| {
            pack_request_head(w, 1, &long, None).unwrap();
        });
        let mut cids = Vec::new();
        let head = unpack_head(&mut ChainPackReader::new(frame.as_slice()), &mut cids).unwrap();
        assert!(head.method_overflow);
        assert!(head.method.is_empty());
        assert!(head.is_request());
    }

    #[test]
    fn reply_head_mirrors_single_cid_bare() {
        let mut one = Vec::new();
        pack_reply_head(&mut ChainPackWriter::new(&mut one), 3, &[7]).unwrap();
        let mut many = Vec::new();
        pack_reply_head(&mut ChainPackWriter::new(&mut many), 3, &[7, 9]).unwrap();

        // Single id is bare, several become a list.
        assert!(!one.contains(&0x88));
        assert!(many.contains(&0x88));
    }

    #[test]
    fn reply_without_method_is_not_a_request() {
        let head = RequestHead {
            rid: 4,
            ..Default::default()
        };
        assert!(!head.is_request());
    }
}
