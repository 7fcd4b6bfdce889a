//! ChainPack, the self-describing binary format of Silicon Heaven.
//!
//! The codec is split into a pull-style [`ChainPackReader`] and a
//! [`ChainPackWriter`], both operating on plain `std::io` streams. Values
//! are exchanged as [`Item`]s; containers are walked via begin/end markers
//! and large strings/blobs stream through as bounded [`Chunk`]s.

#![forbid(unsafe_code)]

pub mod error;
pub mod reader;
pub mod schema;
pub mod value;
pub mod writer;

pub use error::{CpError, Result};
pub use reader::{BUF_LEN, ChainPackReader};
pub use value::{Chunk, DateTime, Decimal, Item, SHV_EPOCH_MSEC};
pub use writer::ChainPackWriter;
