//! SHV RPC message layer.
//!
//! Sits between the ChainPack codec and the connection logic: meta-header
//! parsing and emission, the caller-id mirror, length framing and the
//! standard reply shapes, including the wire error code table.

#![forbid(unsafe_code)]

pub mod error;
pub mod message;
pub mod meta;
pub mod params;

pub use error::{Result, RpcError, RpcErrorCode};
pub use message::{BodyWriter, DirEntry, PACK_BUF_LEN};
pub use meta::{
    KEY_ERROR, KEY_PARAMS, KEY_RESULT, METHOD_MAX, PATH_MAX, PROTOCOL_CHAINPACK, RequestHead,
    TAG_CALLER_IDS, TAG_METHOD, TAG_REQUEST_ID, TAG_SHV_PATH, pack_reply_head, pack_request_head,
    unpack_head,
};
pub use params::{NumberParam, read_param_number};
