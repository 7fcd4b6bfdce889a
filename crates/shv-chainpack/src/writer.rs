//! ChainPack packer.
//!
//! [`ChainPackWriter`] serializes items onto any [`std::io::Write`] sink.
//! Message senders typically record into a `Vec<u8>` first and emit the
//! finished body behind a length prefix in one piece, so the sink sees one
//! write per frame.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::Result;
use crate::schema;
use crate::value::{DateTime, Decimal, SHV_EPOCH_MSEC};

/// Number of bits the value occupies, ignoring leading zeros.
fn significant_bits(n: u64) -> u32 {
    64 - n.leading_zeros()
}

/// Number of bytes (head included) used to encode `bit_len` value bits.
///
/// Up to 28 bits the head byte contributes payload bits; beyond that the
/// head only carries the byte count and the payload follows whole.
fn bytes_needed(bit_len: u32) -> usize {
    if bit_len == 0 {
        1
    } else if bit_len <= 28 {
        ((bit_len - 1) / 7 + 1) as usize
    } else {
        ((bit_len - 1) / 8 + 2) as usize
    }
}

/// Highest bit position addressable by the encoding chosen for `bit_len`.
/// The sign bit of a negative number is stored there.
fn expand_bit_len(bit_len: u32) -> u32 {
    let byte_cnt = bytes_needed(bit_len) as u32;
    if bit_len <= 28 {
        byte_cnt * 7 - 1
    } else {
        (byte_cnt - 1) * 8 - 1
    }
}

/// Streaming ChainPack serializer.
pub struct ChainPackWriter<W> {
    sink: W,
}

impl<W: Write> ChainPackWriter<W> {
    pub fn new(sink: W) -> Self {
        ChainPackWriter { sink }
    }

    /// Access the underlying sink.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    fn put(&mut self, byte: u8) -> Result<()> {
        self.sink.write_all(&[byte])?;
        Ok(())
    }

    fn put_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write_all(bytes)?;
        Ok(())
    }

    /// Emit the raw variable-length integer envelope. `num` is widened so
    /// a sign bit placed above bit 63 still fits.
    fn write_uint_bits(&mut self, num: u128, bit_len: u32) -> Result<()> {
        let byte_cnt = bytes_needed(bit_len);
        let mut bytes = [0u8; 16];
        let mut n = num;
        for i in (0..byte_cnt).rev() {
            bytes[i] = (n & 0xff) as u8;
            n >>= 8;
        }

        if bit_len <= 28 {
            let mask = (0xf0u32 << (4 - byte_cnt)) as u8;
            bytes[0] &= !mask;
            bytes[0] |= mask << 1;
        } else {
            bytes[0] = 0xf0 | (byte_cnt as u8 - 5);
        }

        self.put_slice(&bytes[..byte_cnt])
    }

    /// Bare unsigned integer data without a schema byte. Used for the frame
    /// length prefix and the protocol selector.
    pub fn write_uint_data(&mut self, num: u64) -> Result<()> {
        self.write_uint_bits(num as u128, significant_bits(num))
    }

    /// Signed integer data: magnitude plus a sign bit at the top of the
    /// chosen envelope.
    fn write_int_data(&mut self, num: i64) -> Result<()> {
        let neg = num < 0;
        let mag = num.unsigned_abs();
        let bit_len = significant_bits(mag) + 1;
        let mut wide = mag as u128;
        if neg {
            wide |= 1u128 << expand_bit_len(bit_len);
        }
        self.write_uint_bits(wide, bit_len)
    }

    pub fn write_null(&mut self) -> Result<()> {
        self.put(schema::NULL)
    }

    pub fn write_bool(&mut self, b: bool) -> Result<()> {
        self.put(if b { schema::TRUE } else { schema::FALSE })
    }

    pub fn write_uint(&mut self, num: u64) -> Result<()> {
        if num < 64 {
            self.put(num as u8)
        } else {
            self.put(schema::UINT)?;
            self.write_uint_data(num)
        }
    }

    pub fn write_int(&mut self, num: i64) -> Result<()> {
        if (0..64).contains(&num) {
            self.put(num as u8 + 64)
        } else {
            self.put(schema::INT)?;
            self.write_int_data(num)
        }
    }

    /// Doubles go over the wire as eight little-endian bytes, regardless of
    /// host endianness.
    pub fn write_double(&mut self, num: f64) -> Result<()> {
        self.put(schema::DOUBLE)?;
        self.sink.write_f64::<LittleEndian>(num)?;
        Ok(())
    }

    pub fn write_decimal(&mut self, dec: Decimal) -> Result<()> {
        self.put(schema::DECIMAL)?;
        self.write_int_data(dec.mantissa)?;
        self.write_int_data(dec.exponent as i64)
    }

    /// Packs the date as a single signed integer relative to the SHV epoch,
    /// with two low flag bits and an optional 7-bit quarter-hour offset.
    /// Sub-second-less values drop to second resolution to save a byte.
    pub fn write_datetime(&mut self, dt: DateTime) -> Result<()> {
        self.put(schema::DATETIME)?;
        let mut msecs = dt.epoch_msec - SHV_EPOCH_MSEC;
        let offset = (dt.utc_offset_min / 15) & 0x7F;
        let ms = msecs % 1000;
        if ms == 0 {
            msecs /= 1000;
        }
        if offset != 0 {
            msecs <<= 7;
            msecs |= offset as i64;
        }
        msecs <<= 2;
        if offset != 0 {
            msecs |= 1;
        }
        if ms == 0 {
            msecs |= 2;
        }
        self.write_int_data(msecs)
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_string_start(s.len() as u64, s.as_bytes())
    }

    /// Open a string of `total_len` bytes and emit the first chunk. The
    /// remaining bytes follow through [`write_string_cont`].
    ///
    /// [`write_string_cont`]: ChainPackWriter::write_string_cont
    pub fn write_string_start(&mut self, total_len: u64, chunk: &[u8]) -> Result<()> {
        self.put(schema::STRING)?;
        self.write_uint_data(total_len)?;
        self.put_slice(chunk)
    }

    pub fn write_string_cont(&mut self, chunk: &[u8]) -> Result<()> {
        self.put_slice(chunk)
    }

    pub fn write_blob(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_blob_start(bytes.len() as u64, bytes)
    }

    /// Open a blob of `total_len` bytes and emit the first chunk.
    pub fn write_blob_start(&mut self, total_len: u64, chunk: &[u8]) -> Result<()> {
        self.put(schema::BLOB)?;
        self.write_uint_data(total_len)?;
        self.put_slice(chunk)
    }

    pub fn write_blob_cont(&mut self, chunk: &[u8]) -> Result<()> {
        self.put_slice(chunk)
    }

    /// Zero-terminated string; NUL and backslash payload bytes are escaped
    /// with a backslash.
    pub fn write_cstring(&mut self, bytes: &[u8]) -> Result<()> {
        self.put(schema::CSTRING)?;
        for &b in bytes {
            if b == 0 || b == b'\\' {
                self.put(b'\\')?;
            }
            self.put(b)?;
        }
        self.put(0)
    }

    pub fn begin_list(&mut self) -> Result<()> {
        self.put(schema::LIST)
    }

    pub fn begin_map(&mut self) -> Result<()> {
        self.put(schema::MAP)
    }

    pub fn begin_imap(&mut self) -> Result<()> {
        self.put(schema::IMAP)
    }

    pub fn begin_meta(&mut self) -> Result<()> {
        self.put(schema::META_MAP)
    }

    pub fn end_container(&mut self) -> Result<()> {
        self.put(schema::TERM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    macro_rules! test_pack {
        ($($name:ident: |$w:ident| $body:expr => $expected:literal,)+) => {
            pastey::paste! {
                $(
                    #[test]
                    fn [<pack_ $name>]() {
                        let mut buf = Vec::new();
                        {
                            let mut $w = ChainPackWriter::new(&mut buf);
                            $body;
                        }
                        assert_eq!(hex(&buf), $expected);
                    }
                )+
            }
        };
    }

    test_pack! {
        null: |w| w.write_null().unwrap() => "80",
        bool_true: |w| w.write_bool(true).unwrap() => "fe",
        bool_false: |w| w.write_bool(false).unwrap() => "fd",

        // Tiny integers occupy a single byte.
        uint_tiny_zero: |w| w.write_uint(0).unwrap() => "00",
        uint_tiny_max: |w| w.write_uint(63).unwrap() => "3f",
        int_tiny_zero: |w| w.write_int(0).unwrap() => "40",
        int_tiny_max: |w| w.write_int(63).unwrap() => "7f",

        // First values that need the schema byte.
        uint_64: |w| w.write_uint(64).unwrap() => "8140",
        uint_127: |w| w.write_uint(127).unwrap() => "817f",
        uint_128: |w| w.write_uint(128).unwrap() => "818080",
        int_64: |w| w.write_int(64).unwrap() => "828040",
        int_neg_1: |w| w.write_int(-1).unwrap() => "8241",
        int_neg_64: |w| w.write_int(-64).unwrap() => "82a040",

        // 32-bit boundary switches to the counted form (head 0xf0).
        uint_u32_max: |w| w.write_uint(u32::MAX as u64).unwrap() => "81f0ffffffff",
        uint_u64_max: |w| w.write_uint(u64::MAX).unwrap() => "81f4ffffffffffffffff",
        int_i64_max: |w| w.write_int(i64::MAX).unwrap() => "82f47fffffffffffffff",

        double_one: |w| w.write_double(1.0).unwrap() => "83000000000000f03f",
        decimal_small: |w| w.write_decimal(Decimal::new(25, -2)).unwrap() => "8c1942",

        string_ab: |w| w.write_str("ab").unwrap() => "86026162",
        blob_ff: |w| w.write_blob(&[0xff]).unwrap() => "8501ff",
        cstring_escapes: |w| w.write_cstring(b"a\\b\0c").unwrap() => "8e615c5c625c006300",

        list_of_tiny: |w| {
            w.begin_list().unwrap();
            w.write_int(1).unwrap();
            w.write_int(2).unwrap();
            w.end_container().unwrap();
        } => "884142ff",

        imap_entry: |w| {
            w.begin_imap().unwrap();
            w.write_int(1).unwrap();
            w.write_str("a").unwrap();
            w.end_container().unwrap();
        } => "8a41860161ff",

        // Epoch instant, zero offset, no millisecond part: flags are 0b10.
        datetime_epoch: |w| w.write_datetime(DateTime::new(SHV_EPOCH_MSEC, 0)).unwrap() => "8d02",
    }

    #[test]
    fn pack_datetime_flag_bits() {
        // ms == 0, tz == 0 -> low bits 0b10.
        let mut buf = Vec::new();
        ChainPackWriter::new(&mut buf)
            .write_datetime(DateTime::new(SHV_EPOCH_MSEC + 2000, 0))
            .unwrap();
        assert_eq!(buf[1] & 0b11, 0b10);

        // ms == 0, tz == +60 min (4 quarter hours) -> low bits 0b11.
        let mut buf = Vec::new();
        ChainPackWriter::new(&mut buf)
            .write_datetime(DateTime::new(SHV_EPOCH_MSEC + 2000, 60))
            .unwrap();
        let last = *buf.last().unwrap();
        assert_eq!(last & 0b11, 0b11);
    }

    #[test]
    fn pack_uint_data_is_bare() {
        let mut buf = Vec::new();
        ChainPackWriter::new(&mut buf).write_uint_data(1).unwrap();
        assert_eq!(buf, [0x01]);
    }

    #[test]
    fn chunked_string_matches_whole_string() {
        let mut whole = Vec::new();
        ChainPackWriter::new(&mut whole).write_str("hello world").unwrap();

        let mut chunked = Vec::new();
        {
            let mut w = ChainPackWriter::new(&mut chunked);
            w.write_string_start(11, b"hello ").unwrap();
            w.write_string_cont(b"world").unwrap();
        }
        assert_eq!(whole, chunked);
    }
}
