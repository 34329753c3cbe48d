//! Buffered byte streams with the primitive encodings.
//!
//! ## Wire primitives
//!
//! - Fixed integers: `u16`/`u32`/`u64` little-endian; signed variants are
//!   the same bits.
//! - Variable integers (VBR): 7 payload bits per byte, continuation bit
//!   `0x80` on every byte except the last; zero is the single byte `0x00`.
//! - Floats: IEEE-754 bit pattern as a fixed `u32`/`u64`.
//! - Strings: fixed `u32` length, then raw bytes; decoded copies live in
//!   the reader's arena.
//! - Bit-packed small integers: least-significant byte first, the bit
//!   count rounded up to a multiple of 8.
//!
//! Both directions keep a tail reserve of [`MAX_ATOM_SIZE`] bytes: the
//! writer flushes and the reader refills after each atom, so primitive
//! encoders can assume one whole atom always fits.

use std::io;

use bumpalo::Bump;

/// Upper bound on one atom's encoded size (tag plus fixed payload).
pub const MAX_ATOM_SIZE: usize = 512;

/// Stream buffer configuration.
#[derive(Debug, Clone)]
pub struct CodecOptions {
    /// In-memory buffer size for both directions.
    pub buffer_size: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        CodecOptions {
            buffer_size: 64 * 1024,
        }
    }
}

/// Destination for encoded bytes.
pub trait ByteSink {
    fn write_data(&mut self, data: &[u8]);
}

/// A string-backed sink: appends to an in-memory buffer.
impl ByteSink for Vec<u8> {
    fn write_data(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }
}

/// A sink wrapping an OS handle (or any `io::Write`). The first write
/// error is retained and later writes are dropped.
pub struct WriteSink<W: io::Write> {
    inner: W,
    error: Option<io::Error>,
}

impl<W: io::Write> WriteSink<W> {
    pub fn new(inner: W) -> Self {
        WriteSink { inner, error: None }
    }

    pub fn error(&self) -> Option<&io::Error> {
        self.error.as_ref()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: io::Write> ByteSink for WriteSink<W> {
    fn write_data(&mut self, data: &[u8]) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.inner.write_all(data) {
            self.error = Some(e);
        }
    }
}

/// Source of encoded bytes. A short read signals end of input.
pub trait ByteSource {
    fn read_data(&mut self, buf: &mut [u8]) -> usize;
}

impl ByteSource for &[u8] {
    fn read_data(&mut self, buf: &mut [u8]) -> usize {
        let n = self.len().min(buf.len());
        let (head, tail) = self.split_at(n);
        buf[..n].copy_from_slice(head);
        *self = tail;
        n
    }
}

/// A source wrapping an OS handle (or any `io::Read`). Errors read as end
/// of input.
pub struct ReadSource<R: io::Read> {
    inner: R,
}

impl<R: io::Read> ReadSource<R> {
    pub fn new(inner: R) -> Self {
        ReadSource { inner }
    }
}

impl<R: io::Read> ByteSource for ReadSource<R> {
    fn read_data(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) | Err(_) => break,
                Ok(n) => filled += n,
            }
        }
        filled
    }
}

/// Buffered, stateful writer over a [`ByteSink`].
pub struct StreamWriter<S: ByteSink> {
    sink: S,
    buf: Vec<u8>,
    pos: usize,
}

impl<S: ByteSink> StreamWriter<S> {
    pub fn new(sink: S) -> Self {
        Self::with_options(sink, &CodecOptions::default())
    }

    pub fn with_options(sink: S, options: &CodecOptions) -> Self {
        debug_assert!(options.buffer_size > 2 * MAX_ATOM_SIZE);
        StreamWriter {
            sink,
            buf: vec![0; options.buffer_size],
            pos: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn flush(&mut self) {
        if self.pos > 0 {
            self.sink.write_data(&self.buf[..self.pos]);
            self.pos = 0;
        }
    }

    /// Mark the end of one atom; flushes when the tail reserve is low.
    pub fn end_atom(&mut self) {
        if self.remaining() <= MAX_ATOM_SIZE {
            self.flush();
        }
    }

    /// Flush any buffered bytes and return the sink.
    pub fn finish(mut self) -> S {
        self.flush();
        self.sink
    }

    #[inline]
    fn put(&mut self, byte: u8) {
        debug_assert!(self.pos < self.buf.len(), "atom exceeded the tail reserve");
        self.buf[self.pos] = byte;
        self.pos += 1;
    }

    pub fn write_u8(&mut self, v: u8) {
        self.put(v);
    }

    /// Raw bytes of arbitrary length; large writes bypass the buffer.
    pub fn write_bytes(&mut self, data: &[u8]) {
        if data.len() >= self.buf.len() / 2 {
            self.flush();
            self.sink.write_data(data);
            return;
        }
        if self.remaining() < data.len() + MAX_ATOM_SIZE {
            self.flush();
        }
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
    }

    /// Least-significant byte first, `n_bits` rounded up to whole bytes.
    pub fn write_bits32(&mut self, mut v: u32, mut n_bits: i32) {
        while n_bits > 0 {
            self.put((v & 0xFF) as u8);
            v >>= 8;
            n_bits -= 8;
        }
    }

    pub fn write_bits64(&mut self, mut v: u64, mut n_bits: i32) {
        while n_bits > 0 {
            self.put((v & 0xFF) as u8);
            v >>= 8;
            n_bits -= 8;
        }
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bits32(v as u32, 16);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bits32(v, 32);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bits64(v, 64);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_u16(v as u16);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_u64(v as u64);
    }

    /// Variable-byte encoding: 7 bits per byte, high bit set on every
    /// byte except the last.
    pub fn write_u32_vbr(&mut self, mut v: u32) {
        if v == 0 {
            self.put(0);
            return;
        }
        while v > 0 {
            let rest = v >> 7;
            let hi = if rest == 0 { 0 } else { 0x80 };
            self.put(((v & 0x7F) as u8) | hi);
            v = rest;
        }
    }

    pub fn write_u64_vbr(&mut self, mut v: u64) {
        if v == 0 {
            self.put(0);
            return;
        }
        while v > 0 {
            let rest = v >> 7;
            let hi = if rest == 0 { 0 } else { 0x80 };
            self.put(((v & 0x7F) as u8) | hi);
            v = rest;
        }
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.write_bytes(s.as_bytes());
    }
}

/// Buffered, stateful reader over a [`ByteSource`] with a sticky error
/// flag. Reads past the end of input return zeros and set the flag.
pub struct StreamReader<R: ByteSource> {
    source: R,
    buf: Vec<u8>,
    pos: usize,
    len: usize,
    eof: bool,
    error: bool,
}

impl<R: ByteSource> StreamReader<R> {
    pub fn new(source: R) -> Self {
        Self::with_options(source, &CodecOptions::default())
    }

    pub fn with_options(source: R, options: &CodecOptions) -> Self {
        debug_assert!(options.buffer_size > 2 * MAX_ATOM_SIZE);
        StreamReader {
            source,
            buf: vec![0; options.buffer_size],
            pos: 0,
            len: 0,
            eof: false,
            error: false,
        }
    }

    pub fn error(&self) -> bool {
        self.error
    }

    pub fn set_error(&mut self) {
        self.error = true;
    }

    fn available(&self) -> usize {
        self.len - self.pos
    }

    /// All input consumed.
    pub fn empty(&mut self) -> bool {
        if self.available() > 0 {
            return false;
        }
        self.refill();
        self.eof && self.available() == 0
    }

    fn refill(&mut self) {
        if self.eof {
            return;
        }
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.len, 0);
            self.len -= self.pos;
            self.pos = 0;
        }
        let want = self.buf.len() - self.len;
        let got = self.source.read_data(&mut self.buf[self.len..]);
        self.len += got;
        if got < want {
            self.eof = true;
        }
    }

    /// Mark the end of one atom; refills when the tail reserve is low.
    pub fn end_atom(&mut self) {
        if self.available() <= MAX_ATOM_SIZE {
            self.refill();
        }
    }

    #[inline]
    fn get(&mut self) -> u8 {
        if self.pos >= self.len {
            self.refill();
            if self.pos >= self.len {
                self.error = true;
                return 0;
            }
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        b
    }

    pub fn read_u8(&mut self) -> u8 {
        self.get()
    }

    pub fn read_bytes(&mut self, out: &mut [u8]) {
        let mut filled = 0;
        while filled < out.len() {
            if self.available() == 0 {
                self.refill();
                if self.available() == 0 {
                    self.error = true;
                    return;
                }
            }
            let n = self.available().min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            filled += n;
        }
    }

    pub fn read_bits32(&mut self, n_bits: i32) -> u32 {
        debug_assert!(n_bits <= 32);
        let mut v = 0u32;
        let mut shift = 0;
        while shift < n_bits {
            v |= (self.get() as u32) << shift;
            shift += 8;
        }
        v
    }

    pub fn read_bits64(&mut self, n_bits: i32) -> u64 {
        debug_assert!(n_bits <= 64);
        let mut v = 0u64;
        let mut shift = 0;
        while shift < n_bits {
            v |= (self.get() as u64) << shift;
            shift += 8;
        }
        v
    }

    pub fn read_u16(&mut self) -> u16 {
        self.read_bits32(16) as u16
    }

    pub fn read_u32(&mut self) -> u32 {
        self.read_bits32(32)
    }

    pub fn read_u64(&mut self) -> u64 {
        self.read_bits64(64)
    }

    pub fn read_i16(&mut self) -> i16 {
        self.read_u16() as i16
    }

    pub fn read_i32(&mut self) -> i32 {
        self.read_u32() as i32
    }

    pub fn read_i64(&mut self) -> i64 {
        self.read_u64() as i64
    }

    pub fn read_u32_vbr(&mut self) -> u32 {
        let mut v = 0u32;
        let mut shift = 0;
        while shift < 32 {
            let byte = self.get();
            v |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        v
    }

    pub fn read_u64_vbr(&mut self) -> u64 {
        let mut v = 0u64;
        let mut shift = 0;
        while shift < 64 {
            let byte = self.get();
            v |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        v
    }

    pub fn read_f32(&mut self) -> f32 {
        f32::from_bits(self.read_u32())
    }

    pub fn read_f64(&mut self) -> f64 {
        f64::from_bits(self.read_u64())
    }

    /// Decode a string into the arena so it outlives the stream.
    pub fn read_str<'a>(&mut self, arena: &'a Bump) -> &'a str {
        let len = self.read_u32() as usize;
        // A corrupt length must not drive a huge allocation.
        if self.error || len > (1 << 30) {
            self.error = true;
            return "";
        }
        let dest = arena.alloc_slice_fill_copy(len, 0u8);
        self.read_bytes(dest);
        if self.error {
            return "";
        }
        match core::str::from_utf8(dest) {
            Ok(s) => s,
            Err(_) => {
                self.error = true;
                ""
            }
        }
    }
}

/// Render an encoded buffer as decimal byte values, one line, for
/// debugging streams by eye.
pub fn dump_bytes(data: &[u8]) -> String {
    let mut out = String::new();
    for b in data {
        out.push(' ');
        out.push_str(&b.to_string());
    }
    out
}
