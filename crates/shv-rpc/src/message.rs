//! Whole-message builders.
//!
//! A message body (protocol selector, meta, payload) is recorded into a
//! `Vec<u8>` and the frame length prefix is computed from the finished
//! recording, so every frame reaches the transport as one
//! `UInt(len) · bytes` write.

use shv_chainpack::ChainPackWriter;

use crate::error::RpcErrorCode;
use crate::meta::{self, KEY_ERROR, KEY_PARAMS, KEY_RESULT, PROTOCOL_CHAINPACK};

/// Initial recording capacity; matches the transport buffer size.
pub const PACK_BUF_LEN: usize = 1024;

/// Writer recording a message body.
pub type BodyWriter = ChainPackWriter<Vec<u8>>;

/// Record a message body and wrap it into a length-prefixed frame.
pub fn build_frame(
    build: impl FnOnce(&mut BodyWriter) -> shv_chainpack::Result<()>,
) -> shv_chainpack::Result<Vec<u8>> {
    let mut writer = ChainPackWriter::new(Vec::with_capacity(PACK_BUF_LEN));
    writer.write_uint_data(PROTOCOL_CHAINPACK)?;
    build(&mut writer)?;
    let body = writer.into_inner();

    let mut frame = ChainPackWriter::new(Vec::with_capacity(body.len() + 4));
    frame.write_uint_data(body.len() as u64)?;
    let mut frame = frame.into_inner();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reply carrying a result produced by `pack_result` under key 2.
pub fn reply_result(
    rid: i64,
    cids: &[i64],
    pack_result: impl FnOnce(&mut BodyWriter) -> shv_chainpack::Result<()>,
) -> shv_chainpack::Result<Vec<u8>> {
    build_frame(|w| {
        meta::pack_reply_head(w, rid, cids)?;
        w.begin_imap()?;
        w.write_int(KEY_RESULT)?;
        pack_result(w)?;
        w.end_container()
    })
}

/// Reply with an empty payload IMap; the acknowledgement form.
pub fn reply_empty(rid: i64, cids: &[i64]) -> shv_chainpack::Result<Vec<u8>> {
    build_frame(|w| {
        meta::pack_reply_head(w, rid, cids)?;
        w.begin_imap()?;
        w.end_container()
    })
}

pub fn reply_int(rid: i64, cids: &[i64], num: i64) -> shv_chainpack::Result<Vec<u8>> {
    reply_result(rid, cids, |w| w.write_int(num))
}

pub fn reply_uint(rid: i64, cids: &[i64], num: u64) -> shv_chainpack::Result<Vec<u8>> {
    reply_result(rid, cids, |w| w.write_uint(num))
}

pub fn reply_double(rid: i64, cids: &[i64], num: f64) -> shv_chainpack::Result<Vec<u8>> {
    reply_result(rid, cids, |w| w.write_double(num))
}

pub fn reply_str(rid: i64, cids: &[i64], s: &str) -> shv_chainpack::Result<Vec<u8>> {
    reply_result(rid, cids, |w| w.write_str(s))
}

/// Reply with a list of strings, fed from an iterator so node trees can
/// stream child names without collecting them first.
pub fn reply_str_list<I, S>(rid: i64, cids: &[i64], names: I) -> shv_chainpack::Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    reply_result(rid, cids, |w| {
        w.begin_list()?;
        for name in names {
            w.write_str(name.as_ref())?;
        }
        w.end_container()
    })
}

/// One method descriptor of a `dir` reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirEntry<'a> {
    pub name: &'a str,
    pub flags: i64,
    pub param: Option<&'a str>,
    pub result: Option<&'a str>,
    pub access: i64,
}

/// Reply to `dir`: a list of IMaps keyed 1 name, 2 flags, 3 param,
/// 4 result, 5 access. Zero flags/access and absent signatures are
/// omitted.
pub fn reply_dir<'a, I>(rid: i64, cids: &[i64], entries: I) -> shv_chainpack::Result<Vec<u8>>
where
    I: IntoIterator<Item = DirEntry<'a>>,
{
    reply_result(rid, cids, |w| {
        w.begin_list()?;
        for entry in entries {
            w.begin_imap()?;
            w.write_int(1)?;
            w.write_str(entry.name)?;
            if entry.flags != 0 {
                w.write_int(2)?;
                w.write_int(entry.flags)?;
            }
            if let Some(param) = entry.param {
                w.write_int(3)?;
                w.write_str(param)?;
            }
            if let Some(result) = entry.result {
                w.write_int(4)?;
                w.write_str(result)?;
            }
            if entry.access != 0 {
                w.write_int(5)?;
                w.write_int(entry.access)?;
            }
            w.end_container()?;
        }
        w.end_container()
    })
}

/// Error reply: `IMap{3: IMap{1: code, 2: message?}}`.
pub fn reply_error(
    rid: i64,
    cids: &[i64],
    code: RpcErrorCode,
    message: Option<&str>,
) -> shv_chainpack::Result<Vec<u8>> {
    build_frame(|w| {
        meta::pack_reply_head(w, rid, cids)?;
        w.begin_imap()?;
        w.write_int(KEY_ERROR)?;

        w.begin_imap()?;
        w.write_int(1)?;
        w.write_int(code.code())?;
        if let Some(message) = message {
            w.write_int(2)?;
            w.write_str(message)?;
        }
        w.end_container()?;

        w.end_container()
    })
}

/// Request without parameters, the shape used for `ping`.
pub fn request_empty(rid: i64, method: &str, path: Option<&str>) -> shv_chainpack::Result<Vec<u8>> {
    build_frame(|w| {
        meta::pack_request_head(w, rid, method, path)?;
        w.begin_imap()?;
        w.end_container()
    })
}

/// Request with a parameter section packed by `pack_params` under key 1.
pub fn request_with_params(
    rid: i64,
    method: &str,
    path: Option<&str>,
    pack_params: impl FnOnce(&mut BodyWriter) -> shv_chainpack::Result<()>,
) -> shv_chainpack::Result<Vec<u8>> {
    build_frame(|w| {
        meta::pack_request_head(w, rid, method, path)?;
        w.begin_imap()?;
        w.write_int(KEY_PARAMS)?;
        pack_params(w)?;
        w.end_container()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shv_chainpack::{ChainPackReader, ChainPackWriter, Item};

    /// Every emitted frame is prefixed with the length of the remaining
    /// bytes.
    #[test]
    fn frame_length_matches_body() {
        let frame = reply_int(3, &[], 42).unwrap();
        let mut r = ChainPackReader::new(frame.as_slice());
        let len = r.read_uint_data().unwrap();

        let mut prefix = ChainPackWriter::new(Vec::new());
        prefix.write_uint_data(len).unwrap();
        assert_eq!(len as usize, frame.len() - prefix.into_inner().len());
    }

    fn items(frame: &[u8]) -> Vec<Item> {
        let mut r = ChainPackReader::new(frame);
        r.read_uint_data().unwrap();
        let mut out = Vec::new();
        while let Ok(item) = r.next() {
            out.push(item);
        }
        out
    }

    #[test]
    fn empty_reply_payload_is_empty_imap() {
        let frame = reply_empty(9, &[2]).unwrap();
        let seq = items(&frame);
        let tail = &seq[seq.len() - 2..];
        assert_eq!(tail, [Item::IMapBegin, Item::ContainerEnd]);
    }

    #[test]
    fn error_reply_shape() {
        let frame = reply_error(1, &[], RpcErrorCode::MethodCallException, Some("boom")).unwrap();
        let seq = items(&frame);
        // The payload is IMap{3: IMap{1: 8, 2: "boom"}}; locate the inner map.
        let inner = seq
            .iter()
            .rposition(|i| matches!(i, Item::IMapBegin))
            .unwrap();
        assert_eq!(seq[inner - 2], Item::IMapBegin);
        assert_eq!(seq[inner - 1], Item::Int(3));
        assert_eq!(seq[inner + 1], Item::Int(1));
        assert_eq!(seq[inner + 2], Item::Int(8));
        assert_eq!(seq[inner + 3], Item::Int(2));
        match &seq[inner + 4] {
            Item::String(c) => assert_eq!(c.data, b"boom"),
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn dir_entry_omits_empty_fields() {
        let frame = reply_dir(
            1,
            &[],
            [DirEntry {
                name: "ls",
                access: 1,
                ..Default::default()
            }],
        )
        .unwrap();
        let seq = items(&frame);
        let entry_at = seq
            .iter()
            .rposition(|i| matches!(i, Item::IMapBegin))
            .unwrap();
        // Only name (1) and access (5) keys are present.
        assert_eq!(seq[entry_at + 1], Item::Int(1));
        match &seq[entry_at + 2] {
            Item::String(c) => assert_eq!(c.data, b"ls"),
            other => panic!("unexpected item {other:?}"),
        }
        assert_eq!(seq[entry_at + 3], Item::Int(5));
        assert_eq!(seq[entry_at + 4], Item::Int(1));
        assert_eq!(seq[entry_at + 5], Item::ContainerEnd);
    }
}
