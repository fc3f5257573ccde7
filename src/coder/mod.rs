//! Coder contract, capability hooks, frozen method identities, and the
//! registry that resolves a method id to a coder instance.
//!
//! # Identity rules
//! Every method is identified by a 16-byte UUID.  That UUID is what format
//! parsers put into a folder descriptor's `CoderInfo.method_id`, and it is
//! the authoritative registry key.  A UUID is never reused, even for a
//! deprecated method; an unknown UUID is an error value, never a panic.
//!
//! # Capabilities
//! Coders expose optional hooks (properties, password, thread count, memory
//! limit, finish mode, pull composition) as `Option<&mut dyn _>` accessors
//! resolved once per decode call, not re-queried per read.  Absence of a
//! hook is not an error by itself; the folder decoder decides what absence
//! means (for example, a non-empty properties blob on a coder without the
//! properties hook makes the folder undecodable).

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::crypto::{AesCoder, SecretBytes};
use crate::error::UnsupportedError;

// ── Frozen method UUIDs ──────────────────────────────────────────────────────
//
// These values are permanent.  Parsers that emit descriptors for this
// pipeline write exactly these bytes.

/// Identity transform, payload stored verbatim.
pub const UUID_COPY: [u8; 16] = [
    0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,
    0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,
];
/// Zstandard stream decoder.
/// UUID: 7d3f61c2-8a4e-4b90-9e17-5c2d8b4f0a63
pub const UUID_ZSTD: [u8; 16] = [
    0x7d,0x3f,0x61,0xc2, 0x8a,0x4e, 0x4b,0x90,
    0x9e,0x17, 0x5c,0x2d,0x8b,0x4f,0x0a,0x63,
];
/// LZ4 frame decoder.
/// UUID: 2b9c04e7-6d15-4f3a-8c42-a1f7e09d5b38
pub const UUID_LZ4: [u8; 16] = [
    0x2b,0x9c,0x04,0xe7, 0x6d,0x15, 0x4f,0x3a,
    0x8c,0x42, 0xa1,0xf7,0xe0,0x9d,0x5b,0x38,
];
/// Brotli decoder.
/// UUID: e54a8f10-3c7b-4d26-b9e5-0d68c2a19f74
pub const UUID_BROTLI: [u8; 16] = [
    0xe5,0x4a,0x8f,0x10, 0x3c,0x7b, 0x4d,0x26,
    0xb9,0xe5, 0x0d,0x68,0xc2,0xa1,0x9f,0x74,
];
/// LZMA decoder (props blob carries the 5-byte LZMA properties).
/// UUID: 91d0b3a6-f24e-48c1-a70b-6e5839c4d2ef
pub const UUID_LZMA: [u8; 16] = [
    0x91,0xd0,0xb3,0xa6, 0xf2,0x4e, 0x48,0xc1,
    0xa7,0x0b, 0x6e,0x58,0x39,0xc4,0xd2,0xef,
];
/// AES-256-GCM decryption coder (props blob carries the 16-byte KDF salt).
/// UUID: 48c2e9b5-017d-4a6f-bd93-f36a80e15c27
pub const UUID_AES: [u8; 16] = [
    0x48,0xc2,0xe9,0xb5, 0x01,0x7d, 0x4a,0x6f,
    0xbd,0x93, 0xf3,0x6a,0x80,0xe1,0x5c,0x27,
];

/// Opaque coder method identifier: the raw 16 UUID bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub [u8; 16]);

impl MethodId {
    pub const COPY: MethodId = MethodId(UUID_COPY);
    pub const ZSTD: MethodId = MethodId(UUID_ZSTD);
    pub const LZ4: MethodId = MethodId(UUID_LZ4);
    pub const BROTLI: MethodId = MethodId(UUID_BROTLI);
    pub const LZMA: MethodId = MethodId(UUID_LZMA);
    pub const AES: MethodId = MethodId(UUID_AES);

    fn as_uuid(self) -> uuid::Uuid {
        uuid::Uuid::from_bytes(self.0)
    }
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_uuid().hyphenated())
    }
}

impl std::fmt::Debug for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MethodId({})", self.as_uuid().hyphenated())
    }
}

impl Serialize for MethodId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.as_uuid().hyphenated())
    }
}

impl<'de> Deserialize<'de> for MethodId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let u: uuid::Uuid = s.parse().map_err(serde::de::Error::custom)?;
        Ok(MethodId(*u.as_bytes()))
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CoderError {
    #[error("invalid properties: {0}")]
    InvalidProperties(String),
    #[error("password required but not supplied")]
    PasswordRequired,
    #[error("password rejected: {0}")]
    PasswordRejected(String),
    #[error("corrupt input: {0}")]
    Corrupt(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Sizes & finish mode ──────────────────────────────────────────────────────

/// Whether a coder must stop exactly at its declared unpack size or may
/// stop early on a best-effort basis (partial/prefix decode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishMode {
    #[default]
    Exact,
    BestEffort,
}

/// Per-call byte budget for one coder, set up front by the mixer.  A coder
/// must never decode past these bounds.
#[derive(Debug, Clone, Default)]
pub struct CoderSizes {
    /// Expected decoded output size; `None` means unknown.
    pub unpack_size: Option<u64>,
    /// Expected input size per input slot, in slot order.
    pub pack_sizes: Vec<Option<u64>>,
}

// ── Capability traits ────────────────────────────────────────────────────────

pub trait SetProperties {
    fn set_properties(&mut self, props: &[u8]) -> Result<(), CoderError>;
}

pub trait SetPassword {
    fn set_password(&mut self, password: &SecretBytes) -> Result<(), CoderError>;
}

pub trait SetThreadCount {
    fn set_thread_count(&mut self, threads: u32);
}

pub trait SetMemoryLimit {
    fn set_memory_limit(&mut self, bytes: u64);
}

pub trait SetFinishMode {
    fn set_finish_mode(&mut self, mode: FinishMode);
}

/// Read-composition support for decode-on-demand mode: build a decoding
/// reader over `input` from the coder's current configuration.  Must not
/// mutate the coder, so composed chains stay independent of the mixer.
pub trait PullDecoder {
    fn pull_reader<'a>(
        &self,
        input: Box<dyn Read + Send + 'a>,
    ) -> io::Result<Box<dyn Read + Send + 'a>>;
}

// ── Coder trait ──────────────────────────────────────────────────────────────

/// An opaque, stateful transform with `N` input and `M` output streams
/// (`N = M = 1` in the overwhelming common case).
pub trait Coder: Send {
    fn num_in_streams(&self) -> usize {
        1
    }
    fn num_out_streams(&self) -> usize {
        1
    }

    /// Run the transform: consume `inputs`, write decoded bytes to `output`,
    /// honoring the byte budgets in `sizes`.  Returns bytes produced.
    fn code(
        &mut self,
        inputs: &mut [&mut (dyn Read + Send)],
        output: &mut (dyn Write + Send),
        sizes: &CoderSizes,
    ) -> Result<u64, CoderError>;

    /// Reset internal state before a new decode call.  Instances are reused
    /// across calls but must not retain state from a previous folder member.
    fn reinit(&mut self) {}

    /// Filters may legitimately consume fewer pack bytes than declared,
    /// which makes declared pack sizes unreliable for progress reporting.
    fn is_filter(&self) -> bool {
        false
    }

    fn properties(&mut self) -> Option<&mut dyn SetProperties> {
        None
    }
    fn password(&mut self) -> Option<&mut dyn SetPassword> {
        None
    }
    fn thread_count(&mut self) -> Option<&mut dyn SetThreadCount> {
        None
    }
    fn memory_limit(&mut self) -> Option<&mut dyn SetMemoryLimit> {
        None
    }
    fn finish_mode(&mut self) -> Option<&mut dyn SetFinishMode> {
        None
    }
    fn pull(&self) -> Option<&dyn PullDecoder> {
        None
    }
}

/// Copy up to `limit` bytes (all bytes when `None`) from `reader` to
/// `writer`.  Returns bytes copied.  The common tail of every built-in
/// single-stream coder.
pub(crate) fn copy_limited(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    limit: Option<u64>,
) -> io::Result<u64> {
    let mut buf = [0u8; 1 << 16];
    let mut copied = 0u64;
    loop {
        let want = match limit {
            Some(l) if l - copied < buf.len() as u64 => (l - copied) as usize,
            _ => buf.len(),
        };
        if want == 0 {
            return Ok(copied);
        }
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            return Ok(copied);
        }
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }
}

// ── Built-in coders ──────────────────────────────────────────────────────────

/// Identity transform.
#[derive(Default)]
pub struct CopyCoder {
    finish: FinishMode,
}

impl CopyCoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SetFinishMode for CopyCoder {
    fn set_finish_mode(&mut self, mode: FinishMode) {
        self.finish = mode;
    }
}

impl PullDecoder for CopyCoder {
    fn pull_reader<'a>(
        &self,
        input: Box<dyn Read + Send + 'a>,
    ) -> io::Result<Box<dyn Read + Send + 'a>> {
        Ok(input)
    }
}

impl Coder for CopyCoder {
    fn code(
        &mut self,
        inputs: &mut [&mut (dyn Read + Send)],
        output: &mut (dyn Write + Send),
        sizes: &CoderSizes,
    ) -> Result<u64, CoderError> {
        let produced = copy_limited(inputs[0], output, sizes.unpack_size)?;
        if self.finish == FinishMode::Exact {
            if let Some(expected) = sizes.unpack_size {
                if produced < expected {
                    return Err(CoderError::Corrupt(format!(
                        "input ended after {produced} of {expected} byte(s)"
                    )));
                }
            }
        }
        Ok(produced)
    }

    fn reinit(&mut self) {
        self.finish = FinishMode::Exact;
    }

    fn finish_mode(&mut self) -> Option<&mut dyn SetFinishMode> {
        Some(self)
    }

    fn pull(&self) -> Option<&dyn PullDecoder> {
        Some(self)
    }
}

/// Zstandard stream decoder.  Honors the memory-limit hint by clamping the
/// decoder's window size.
#[derive(Default)]
pub struct ZstdCoder {
    window_log_max: Option<u32>,
}

impl ZstdCoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_decoder<'a, R: Read + 'a>(
        &self,
        input: R,
    ) -> io::Result<zstd::stream::read::Decoder<'a, io::BufReader<R>>> {
        let mut dec = zstd::stream::read::Decoder::new(input)?;
        if let Some(log) = self.window_log_max {
            dec.window_log_max(log)?;
        }
        Ok(dec)
    }
}

impl SetMemoryLimit for ZstdCoder {
    fn set_memory_limit(&mut self, bytes: u64) {
        // Window must fit the budget: largest power of two <= bytes.
        let log = 63u32.saturating_sub(bytes.max(1024).leading_zeros());
        self.window_log_max = Some(log.min(31));
    }
}

impl PullDecoder for ZstdCoder {
    fn pull_reader<'a>(
        &self,
        input: Box<dyn Read + Send + 'a>,
    ) -> io::Result<Box<dyn Read + Send + 'a>> {
        Ok(Box::new(self.make_decoder(input)?))
    }
}

impl Coder for ZstdCoder {
    fn code(
        &mut self,
        inputs: &mut [&mut (dyn Read + Send)],
        output: &mut (dyn Write + Send),
        sizes: &CoderSizes,
    ) -> Result<u64, CoderError> {
        let mut dec = self
            .make_decoder(&mut *inputs[0])
            .map_err(|e| CoderError::Corrupt(e.to_string()))?;
        copy_limited(&mut dec, output, sizes.unpack_size)
            .map_err(|e| CoderError::Corrupt(e.to_string()))
    }

    fn memory_limit(&mut self) -> Option<&mut dyn SetMemoryLimit> {
        Some(self)
    }

    fn pull(&self) -> Option<&dyn PullDecoder> {
        Some(self)
    }
}

/// LZ4 frame decoder.
#[derive(Default)]
pub struct Lz4Coder;

impl Lz4Coder {
    pub fn new() -> Self {
        Self
    }
}

impl PullDecoder for Lz4Coder {
    fn pull_reader<'a>(
        &self,
        input: Box<dyn Read + Send + 'a>,
    ) -> io::Result<Box<dyn Read + Send + 'a>> {
        Ok(Box::new(lz4_flex::frame::FrameDecoder::new(input)))
    }
}

impl Coder for Lz4Coder {
    fn code(
        &mut self,
        inputs: &mut [&mut (dyn Read + Send)],
        output: &mut (dyn Write + Send),
        sizes: &CoderSizes,
    ) -> Result<u64, CoderError> {
        let mut dec = lz4_flex::frame::FrameDecoder::new(&mut *inputs[0]);
        copy_limited(&mut dec, output, sizes.unpack_size)
            .map_err(|e| CoderError::Corrupt(e.to_string()))
    }

    fn pull(&self) -> Option<&dyn PullDecoder> {
        Some(self)
    }
}

/// Brotli decoder.
pub struct BrotliCoder {
    buffer_size: usize,
}

impl Default for BrotliCoder {
    fn default() -> Self {
        Self { buffer_size: 4096 }
    }
}

impl BrotliCoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PullDecoder for BrotliCoder {
    fn pull_reader<'a>(
        &self,
        input: Box<dyn Read + Send + 'a>,
    ) -> io::Result<Box<dyn Read + Send + 'a>> {
        Ok(Box::new(brotli::Decompressor::new(input, self.buffer_size)))
    }
}

impl Coder for BrotliCoder {
    fn code(
        &mut self,
        inputs: &mut [&mut (dyn Read + Send)],
        output: &mut (dyn Write + Send),
        sizes: &CoderSizes,
    ) -> Result<u64, CoderError> {
        let mut dec = brotli::Decompressor::new(&mut *inputs[0], self.buffer_size);
        copy_limited(&mut dec, output, sizes.unpack_size)
            .map_err(|e| CoderError::Corrupt(e.to_string()))
    }

    fn pull(&self) -> Option<&dyn PullDecoder> {
        Some(self)
    }
}

/// Writer cap used by push-style decoders that cannot stop themselves at a
/// byte budget.  Once `remaining` hits zero, further writes fail with a
/// marker error the coder translates back into a clean early stop.
struct LimitWriter<'a> {
    inner: &'a mut (dyn Write + Send),
    remaining: Option<u64>,
    written: u64,
    hit_limit: bool,
}

const LIMIT_MARKER: &str = "unpack byte budget reached";

impl Write for LimitWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let take = match self.remaining {
            Some(0) => {
                self.hit_limit = true;
                return Err(io::Error::new(io::ErrorKind::WriteZero, LIMIT_MARKER));
            }
            Some(r) => buf.len().min(r as usize),
            None => buf.len(),
        };
        self.inner.write_all(&buf[..take])?;
        if let Some(r) = &mut self.remaining {
            *r -= take as u64;
        }
        self.written += take as u64;
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// LZMA decoder.
///
/// With a 5-byte properties blob the input carries a raw LZMA stream and the
/// properties are chained ahead of it; with empty properties the input must
/// carry a full LZMA-alone header.
#[derive(Default)]
pub struct LzmaCoder {
    props: Option<Vec<u8>>,
    finish: FinishMode,
}

impl LzmaCoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SetProperties for LzmaCoder {
    fn set_properties(&mut self, props: &[u8]) -> Result<(), CoderError> {
        match props.len() {
            0 => self.props = None,
            5 => self.props = Some(props.to_vec()),
            n => {
                return Err(CoderError::InvalidProperties(format!(
                    "LZMA properties must be 0 or 5 bytes, got {n}"
                )))
            }
        }
        Ok(())
    }
}

impl SetFinishMode for LzmaCoder {
    fn set_finish_mode(&mut self, mode: FinishMode) {
        self.finish = mode;
    }
}

impl Coder for LzmaCoder {
    fn code(
        &mut self,
        inputs: &mut [&mut (dyn Read + Send)],
        output: &mut (dyn Write + Send),
        sizes: &CoderSizes,
    ) -> Result<u64, CoderError> {
        let options = lzma_rs::decompress::Options {
            unpacked_size: match &self.props {
                Some(_) => lzma_rs::decompress::UnpackedSize::UseProvided(sizes.unpack_size),
                None => lzma_rs::decompress::UnpackedSize::ReadFromHeader,
            },
            memlimit: None,
            allow_incomplete: self.finish == FinishMode::BestEffort,
        };

        let mut limited = LimitWriter {
            inner: output,
            remaining: sizes.unpack_size,
            written: 0,
            hit_limit: false,
        };
        let res = match &self.props {
            Some(props) => {
                let mut chained =
                    io::BufReader::new(Cursor::new(props.clone()).chain(&mut *inputs[0]));
                lzma_rs::lzma_decompress_with_options(&mut chained, &mut limited, &options)
            }
            None => {
                let mut reader = io::BufReader::new(&mut *inputs[0]);
                lzma_rs::lzma_decompress_with_options(&mut reader, &mut limited, &options)
            }
        };

        match res {
            Ok(()) => {}
            // Hitting the byte budget is a clean stop in best-effort mode.
            Err(_) if limited.hit_limit && self.finish == FinishMode::BestEffort => {}
            Err(e) => return Err(CoderError::Corrupt(e.to_string())),
        }

        let produced = limited.written;
        if self.finish == FinishMode::Exact {
            if let Some(expected) = sizes.unpack_size {
                if produced < expected {
                    return Err(CoderError::Corrupt(format!(
                        "LZMA stream ended after {produced} of {expected} byte(s)"
                    )));
                }
            }
        }
        Ok(produced)
    }

    fn reinit(&mut self) {
        self.finish = FinishMode::Exact;
    }

    fn properties(&mut self) -> Option<&mut dyn SetProperties> {
        Some(self)
    }

    fn finish_mode(&mut self) -> Option<&mut dyn SetFinishMode> {
        Some(self)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

pub type CoderCtor = Arc<dyn Fn() -> Box<dyn Coder> + Send + Sync>;

/// Resolves method identifiers to coder instances.
///
/// Knows only about its own entries; it never consults another registry, so
/// a coder can never transitively instantiate coders behind the pipeline's
/// back.  Custom constructors registered with [`CoderRegistry::register`]
/// shadow the built-ins, which is also the instrumentation point used by
/// the reuse tests.
#[derive(Default, Clone)]
pub struct CoderRegistry {
    custom: HashMap<MethodId, CoderCtor>,
}

impl CoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: MethodId, ctor: CoderCtor) {
        self.custom.insert(id, ctor);
    }

    /// Resolve `id` to a fresh coder instance.
    pub fn create(&self, id: MethodId) -> Result<Box<dyn Coder>, UnsupportedError> {
        if let Some(ctor) = self.custom.get(&id) {
            return Ok(ctor());
        }
        match id {
            MethodId::COPY => Ok(Box::new(CopyCoder::new())),
            MethodId::ZSTD => Ok(Box::new(ZstdCoder::new())),
            MethodId::LZ4 => Ok(Box::new(Lz4Coder::new())),
            MethodId::BROTLI => Ok(Box::new(BrotliCoder::new())),
            MethodId::LZMA => Ok(Box::new(LzmaCoder::new())),
            MethodId::AES => Ok(Box::new(AesCoder::new())),
            _ => Err(UnsupportedError::UnknownMethod(id)),
        }
    }
}
