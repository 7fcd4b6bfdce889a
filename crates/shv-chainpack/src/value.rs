//! The ChainPack item model.
//!
//! Decoding is pull-based: [`Item`] is what one step of the reader yields.
//! Container contents are not aggregated into an owned tree; the reader
//! reports the begin/end markers and the caller walks the structure. This
//! keeps memory bounded no matter how large the incoming message is.

/// UTC milliseconds since 2018-02-02T00:00:00Z, the SHV date-time epoch.
pub const SHV_EPOCH_MSEC: i64 = 1_517_529_600_000;

/// Fixed-point decimal number: `mantissa * 10^exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    pub mantissa: i64,
    pub exponent: i32,
}

impl Decimal {
    pub fn new(mantissa: i64, exponent: i32) -> Self {
        Decimal { mantissa, exponent }
    }

    /// Approximate floating point view, used when a decimal arrives where
    /// a double is expected.
    pub fn to_f64(self) -> f64 {
        self.mantissa as f64 * 10f64.powi(self.exponent)
    }
}

/// Point in time with an attached UTC offset.
///
/// The wire form quantizes the offset to quarter hours, so any offset not
/// divisible by 15 minutes does not survive a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    /// Milliseconds since the Unix epoch, UTC.
    pub epoch_msec: i64,
    /// Local offset from UTC in minutes.
    pub utc_offset_min: i32,
}

impl DateTime {
    pub fn new(epoch_msec: i64, utc_offset_min: i32) -> Self {
        DateTime {
            epoch_msec,
            utc_offset_min,
        }
    }

    /// Convert from a `time` crate timestamp, keeping its UTC offset.
    pub fn from_offset_date_time(odt: time::OffsetDateTime) -> Self {
        DateTime {
            epoch_msec: (odt.unix_timestamp_nanos() / 1_000_000) as i64,
            utc_offset_min: odt.offset().whole_seconds() / 60,
        }
    }

    /// Convert into a `time` crate timestamp, mainly for display.
    pub fn to_offset_date_time(self) -> Option<time::OffsetDateTime> {
        let utc = time::OffsetDateTime::from_unix_timestamp_nanos(self.epoch_msec as i128 * 1_000_000)
            .ok()?;
        let offset = time::UtcOffset::from_whole_seconds(self.utc_offset_min * 60).ok()?;
        Some(utc.to_offset(offset))
    }
}

/// One delivered piece of a streamed string or blob.
///
/// Large strings and blobs do not arrive as a single item; the reader hands
/// them out in buffer-sized chunks and the consumer iterates until
/// [`last`](Chunk::last) is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The bytes of this chunk.
    pub data: Vec<u8>,
    /// Offset of `data[0]` within the whole value.
    pub offset: u64,
    /// Declared size of the whole value.
    pub total: u64,
    /// Set on the final chunk.
    pub last: bool,
}

impl Chunk {
    /// A chunk carrying a complete (non-streamed) value.
    pub fn whole(data: Vec<u8>) -> Self {
        let total = data.len() as u64;
        Chunk {
            data,
            offset: 0,
            total,
            last: true,
        }
    }
}

/// One decoded ChainPack item.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Decimal(Decimal),
    DateTime(DateTime),
    /// Length-prefixed binary data, possibly one chunk of many.
    Blob(Chunk),
    /// Length-prefixed UTF-8 data, possibly one chunk of many.
    String(Chunk),
    /// Zero-terminated, backslash-escaped byte string. Always delivered
    /// whole.
    CString(Vec<u8>),
    ListBegin,
    MapBegin,
    IMapBegin,
    MetaBegin,
    ContainerEnd,
}

impl Item {
    /// Integer view of an item, promoting unsigned values. Used by parsers
    /// that accept Int and UInt interchangeably (map keys, caller ids).
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Item::Int(i) => Some(*i),
            Item::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// True for the four container-begin markers.
    pub fn opens_container(&self) -> bool {
        matches!(
            self,
            Item::ListBegin | Item::MapBegin | Item::IMapBegin | Item::MetaBegin
        )
    }
}
