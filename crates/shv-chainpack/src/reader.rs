//! ChainPack streaming unpacker.
//!
//! [`ChainPackReader`] is a pull-style producer over any [`std::io::Read`]
//! source. Each [`next`](ChainPackReader::next) call yields one [`Item`];
//! when the internal buffer runs dry it refills from the source, and a
//! source that reports end-of-stream mid-item surfaces as
//! [`CpError::BufferUnderflow`].
//!
//! Strings and blobs are not collected whole: they come out as a sequence
//! of buffer-bounded [`Chunk`]s so a value larger than the read buffer can
//! be consumed (written to a file, hashed) without ever being resident.

use std::io::Read;

use crate::error::{CpError, Result};
use crate::schema;
use crate::value::{Chunk, DateTime, Decimal, Item, SHV_EPOCH_MSEC};

/// Size of the internal read buffer, which also bounds chunk size.
pub const BUF_LEN: usize = 1024;

#[derive(Clone, Copy)]
enum ChunkKind {
    Blob,
    String,
}

struct ChunkState {
    kind: ChunkKind,
    remaining: u64,
    offset: u64,
    total: u64,
}

/// Streaming ChainPack deserializer.
pub struct ChainPackReader<R> {
    src: R,
    buf: Box<[u8]>,
    pos: usize,
    end: usize,
    chunk: Option<ChunkState>,
}

impl<R: Read> ChainPackReader<R> {
    pub fn new(src: R) -> Self {
        ChainPackReader {
            src,
            buf: vec![0u8; BUF_LEN].into_boxed_slice(),
            pos: 0,
            end: 0,
            chunk: None,
        }
    }

    /// Access the underlying source.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.src
    }

    pub fn into_inner(self) -> R {
        self.src
    }

    /// True when bytes already pulled from the source are waiting to be
    /// decoded. Connection pumps use this to finish buffered messages
    /// before going back to poll.
    pub fn has_buffered(&self) -> bool {
        self.pos < self.end
    }

    /// Drop any buffered bytes and in-flight chunk state. Called after a
    /// decode error or a reconnect, when the remaining bytes no longer
    /// belong to a valid frame.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.end = 0;
        self.chunk = None;
    }

    fn fill(&mut self) -> Result<usize> {
        if self.pos < self.end {
            return Ok(self.end - self.pos);
        }
        let n = self.src.read(&mut self.buf)?;
        if n == 0 {
            return Err(CpError::BufferUnderflow);
        }
        self.pos = 0;
        self.end = n;
        Ok(n)
    }

    fn get(&mut self) -> Result<u8> {
        self.fill()?;
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Split an integer envelope head byte into the value bits it carries,
    /// the number of payload bytes that follow, and whether the counted
    /// (`1111nnnn`) form is in use.
    fn int_head(&mut self) -> Result<(u64, usize, bool)> {
        let head = self.get()?;
        Ok(if head & 0x80 == 0 {
            ((head & 0x7f) as u64, 0, false)
        } else if head & 0x40 == 0 {
            ((head & 0x3f) as u64, 1, false)
        } else if head & 0x20 == 0 {
            ((head & 0x1f) as u64, 2, false)
        } else if head & 0x10 == 0 {
            ((head & 0x0f) as u64, 3, false)
        } else {
            let n = (head & 0x0f) as usize;
            if n == 0x0f {
                return Err(CpError::MalformedInput("reserved integer length"));
            }
            (0, n + 4, true)
        })
    }

    /// Bare unsigned integer data. An envelope wider than 64 bits is
    /// consumed whole and decodes to `u64::MAX`; the tag is preserved by
    /// the caller.
    pub fn read_uint_data(&mut self) -> Result<u64> {
        let (mut acc, trailing, _) = self.int_head()?;
        if trailing > 8 {
            for _ in 0..trailing {
                self.get()?;
            }
            return Ok(u64::MAX);
        }
        for _ in 0..trailing {
            acc = (acc << 8) | self.get()? as u64;
        }
        Ok(acc)
    }

    /// Signed integer data; the sign bit sits at the top of the envelope.
    /// Over-wide envelopes decode to `i64::MAX`.
    fn read_int_data(&mut self) -> Result<i64> {
        let (mut acc, trailing, long) = self.int_head()?;
        if trailing > 8 {
            for _ in 0..trailing {
                self.get()?;
            }
            return Ok(i64::MAX);
        }
        for _ in 0..trailing {
            acc = (acc << 8) | self.get()? as u64;
        }
        let sign_pos = if long {
            trailing as u32 * 8 - 1
        } else {
            (trailing as u32 + 1) * 7 - 1
        };
        let neg = (acc >> sign_pos) & 1 == 1;
        let mag = (acc & !(1u64 << sign_pos)) as i64;
        Ok(if neg { -mag } else { mag })
    }

    /// Decode one item. For streamed strings and blobs, repeated calls
    /// yield successive chunks until one with `last` set.
    pub fn next(&mut self) -> Result<Item> {
        if self.chunk.is_some() {
            return self.next_chunk();
        }

        let b = self.get()?;
        if b < 0x80 {
            // Tiny integer: bit 6 selects the signed flavor.
            return Ok(if b & 0x40 != 0 {
                Item::Int((b & 0x3f) as i64)
            } else {
                Item::UInt((b & 0x3f) as u64)
            });
        }

        match b {
            schema::NULL => Ok(Item::Null),
            schema::TRUE => Ok(Item::Bool(true)),
            schema::FALSE => Ok(Item::Bool(false)),
            schema::UINT => Ok(Item::UInt(self.read_uint_data()?)),
            schema::INT => Ok(Item::Int(self.read_int_data()?)),
            schema::DOUBLE => {
                let mut raw = [0u8; 8];
                for slot in raw.iter_mut() {
                    *slot = self.get()?;
                }
                Ok(Item::Double(f64::from_le_bytes(raw)))
            }
            schema::DECIMAL => {
                let mantissa = self.read_int_data()?;
                let exponent = i32::try_from(self.read_int_data()?)
                    .map_err(|_| CpError::MalformedInput("decimal exponent out of range"))?;
                Ok(Item::Decimal(Decimal::new(mantissa, exponent)))
            }
            schema::DATETIME => self.read_datetime(),
            schema::DATETIME_EPOCH_DEPR => {
                let msec = self.read_int_data()?;
                Ok(Item::DateTime(DateTime::new(msec, 0)))
            }
            schema::STRING => self.start_chunked(ChunkKind::String),
            schema::BLOB => self.start_chunked(ChunkKind::Blob),
            schema::CSTRING => self.read_cstring(),
            schema::LIST => Ok(Item::ListBegin),
            schema::MAP => Ok(Item::MapBegin),
            schema::IMAP => Ok(Item::IMapBegin),
            schema::META_MAP => Ok(Item::MetaBegin),
            schema::TERM => Ok(Item::ContainerEnd),
            _ => Err(CpError::MalformedInput("unknown packing schema")),
        }
    }

    fn read_datetime(&mut self) -> Result<Item> {
        let d = self.read_int_data()?;
        let has_tz = d & 1 != 0;
        let no_msec = d & 2 != 0;
        let mut msecs = d >> 2;
        let mut offset_min = 0i32;
        if has_tz {
            let mut quarters = (msecs & 0x7f) as i32;
            if quarters & 0x40 != 0 {
                quarters -= 128;
            }
            offset_min = quarters * 15;
            msecs >>= 7;
        }
        if no_msec {
            msecs = msecs
                .checked_mul(1000)
                .ok_or(CpError::MalformedInput("date-time out of range"))?;
        }
        let epoch_msec = msecs
            .checked_add(SHV_EPOCH_MSEC)
            .ok_or(CpError::MalformedInput("date-time out of range"))?;
        Ok(Item::DateTime(DateTime::new(epoch_msec, offset_min)))
    }

    fn read_cstring(&mut self) -> Result<Item> {
        let mut out = Vec::new();
        loop {
            match self.get()? {
                0 => break,
                b'\\' => out.push(self.get()?),
                b => out.push(b),
            }
        }
        Ok(Item::CString(out))
    }

    fn start_chunked(&mut self, kind: ChunkKind) -> Result<Item> {
        let total = self.read_uint_data()?;
        self.chunk = Some(ChunkState {
            kind,
            remaining: total,
            offset: 0,
            total,
        });
        self.next_chunk()
    }

    fn next_chunk(&mut self) -> Result<Item> {
        let (mut remaining, offset) = {
            let st = self.chunk.as_ref().expect("chunk state");
            (st.remaining, st.offset)
        };

        let mut data = Vec::new();
        if remaining > 0 {
            let avail = self.fill()?;
            let take = remaining.min(avail as u64) as usize;
            data.extend_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
            remaining -= take as u64;
        }

        let last = remaining == 0;
        let st = self.chunk.as_mut().expect("chunk state");
        st.remaining = remaining;
        st.offset += data.len() as u64;
        let kind = st.kind;
        let total = st.total;
        if last {
            self.chunk = None;
        }

        let chunk = Chunk {
            data,
            offset,
            total,
            last,
        };
        Ok(match kind {
            ChunkKind::Blob => Item::Blob(chunk),
            ChunkKind::String => Item::String(chunk),
        })
    }

    /// Consume whatever remains of `item`: nested containers down to the
    /// matching terminator, or the remaining chunks of a streamed value.
    /// Scalars need no draining.
    pub fn discard_item(&mut self, item: &Item) -> Result<()> {
        if item.opens_container() {
            return self.discard_container(1);
        }
        match item {
            Item::Blob(c) | Item::String(c) if !c.last => loop {
                match self.next()? {
                    Item::Blob(c) | Item::String(c) if c.last => return Ok(()),
                    _ => {}
                }
            },
            _ => Ok(()),
        }
    }

    /// Consume items until `depth` open containers have been closed.
    pub fn discard_container(&mut self, mut depth: u32) -> Result<()> {
        while depth > 0 {
            let item = self.next()?;
            if item.opens_container() {
                depth += 1;
            } else if matches!(item, Item::ContainerEnd) {
                depth -= 1;
            } else {
                self.discard_item(&item)?;
            }
        }
        Ok(())
    }

    /// Skip exactly one complete value, containers and all.
    pub fn skip_item(&mut self) -> Result<()> {
        let item = self.next()?;
        self.discard_item(&item)
    }
}
