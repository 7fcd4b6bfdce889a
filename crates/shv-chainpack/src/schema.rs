//! ChainPack packing schema bytes.
//!
//! Values below 128 are inline tiny integers: `0vxxxxxx` unsigned when bit
//! 6 is clear, signed when set, six bits of payload either way.

pub const NULL: u8 = 0x80;
pub const UINT: u8 = 0x81;
pub const INT: u8 = 0x82;
pub const DOUBLE: u8 = 0x83;
/// Reserved; booleans are packed as [`TRUE`]/[`FALSE`].
pub const BOOL: u8 = 0x84;
pub const BLOB: u8 = 0x85;
pub const STRING: u8 = 0x86;
/// Obsolete epoch datetime, accepted on decode only.
pub const DATETIME_EPOCH_DEPR: u8 = 0x87;
pub const LIST: u8 = 0x88;
pub const MAP: u8 = 0x89;
pub const IMAP: u8 = 0x8A;
pub const META_MAP: u8 = 0x8B;
pub const DECIMAL: u8 = 0x8C;
pub const DATETIME: u8 = 0x8D;
pub const CSTRING: u8 = 0x8E;
pub const FALSE: u8 = 0xFD;
pub const TRUE: u8 = 0xFE;
/// Container terminator.
pub const TERM: u8 = 0xFF;

/// Human readable schema name, for diagnostics.
pub fn name(schema: u8) -> &'static str {
    match schema {
        NULL => "Null",
        UINT => "UInt",
        INT => "Int",
        DOUBLE => "Double",
        BOOL => "Bool",
        BLOB => "Blob",
        STRING => "String",
        DATETIME_EPOCH_DEPR => "DateTimeEpoch_depr",
        LIST => "List",
        MAP => "Map",
        IMAP => "IMap",
        META_MAP => "MetaMap",
        DECIMAL => "Decimal",
        DATETIME => "DateTime",
        CSTRING => "CString",
        FALSE => "FALSE",
        TRUE => "TRUE",
        TERM => "TERM",
        _ => "",
    }
}
