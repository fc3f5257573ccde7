//! Folder decoder: the entry point that turns a [`FolderDescriptor`] plus a
//! seekable container stream into decoded bytes.
//!
//! The decoder validates the descriptor, resolves coders through its
//! registry, wires capabilities (properties, password, thread count, memory
//! limit, finish mode) in a fixed order on every call, and executes the
//! graph through a [`Mixer`].  The mixer and its coder instances are kept
//! alive between calls and reused whenever the bound graph shape is
//! unchanged, so decoding the members of a solid folder pays for coder
//! construction once.
//!
//! Two consumption modes:
//! * [`FolderDecoder::decode_to`] pushes the main stream into a sink, with
//!   progress reporting, cancellation, CRC verification, and trailing-junk
//!   detection.
//! * [`FolderDecoder::decode_reader`] composes a lazy reader over the same
//!   graph for callers that want to pull.

use std::io::{self, Read, Seek, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::bind::{BindInfo, ValidationError};
use crate::coder::{CoderRegistry, CoderSizes, FinishMode};
use crate::crypto::{PasswordProvider, SecretBytes};
use crate::error::{DataError, Error, UnsupportedError};
use crate::folder::FolderDescriptor;
use crate::mixer::{ExecStrategy, Mixer};
use crate::progress::{ProgressAction, ProgressAggregator, ProgressObserver};
use crate::stream::{BoundedStream, BoundedTap, SharedPositionedStream};

/// One decode call against a folder.
#[derive(Debug, Clone, Copy)]
pub struct DecodeRequest<'a> {
    pub folder:       &'a FolderDescriptor,
    /// Absolute offset of the folder's packed data in the container stream.
    pub base_offset:  u64,
    /// Decode only the first `n` bytes of the main stream.  `None` decodes
    /// the full declared unpack size.
    pub unpack_limit: Option<u64>,
    /// CRC32 of the full main stream.  Verified only on full decodes.
    pub expected_crc: Option<u32>,
}

impl<'a> DecodeRequest<'a> {
    pub fn new(folder: &'a FolderDescriptor) -> Self {
        Self { folder, base_offset: 0, unpack_limit: None, expected_crc: None }
    }

    pub fn at_offset(mut self, base_offset: u64) -> Self {
        self.base_offset = base_offset;
        self
    }

    pub fn prefix(mut self, unpack_limit: u64) -> Self {
        self.unpack_limit = Some(unpack_limit);
        self
    }

    pub fn verify_crc(mut self, crc: u32) -> Self {
        self.expected_crc = Some(crc);
        self
    }
}

/// What a successful [`FolderDecoder::decode_to`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOutcome {
    pub produced:       u64,
    /// Set on full decodes when some pack stream held bytes no coder asked
    /// for.  The decode itself succeeded; callers decide how suspicious
    /// trailing junk is for their format.
    pub data_after_end: bool,
}

pub struct FolderDecoder {
    registry:          CoderRegistry,
    strategy:          ExecStrategy,
    password_provider: Option<Box<dyn PasswordProvider>>,
    memory_limit:      Option<u64>,
    thread_count:      u32,
    mixer:             Option<Mixer>,
    rebuilds:          u64,
}

impl FolderDecoder {
    pub fn new(registry: CoderRegistry, strategy: ExecStrategy) -> Self {
        Self {
            registry,
            strategy,
            password_provider: None,
            memory_limit: None,
            thread_count: 1,
            mixer: None,
            rebuilds: 0,
        }
    }

    pub fn set_password_provider(&mut self, provider: Box<dyn PasswordProvider>) {
        self.password_provider = provider.into();
    }

    pub fn set_memory_limit(&mut self, bytes: u64) {
        self.memory_limit = Some(bytes);
    }

    pub fn set_thread_count(&mut self, threads: u32) {
        self.thread_count = threads.max(1);
    }

    /// How many times a mixer was (re)built.  Stays flat while consecutive
    /// calls decode the same folder shape.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    // ── Graph preparation ────────────────────────────────────────────────────

    /// Validate, (re)build the mixer if the graph shape changed, and wire
    /// every coder capability for this call.  Returns the requested main
    /// output size.
    fn prepare(&mut self, folder: &FolderDescriptor, unpack_limit: Option<u64>) -> Result<u64, Error> {
        let folder_size = folder.main_unpack_size();
        let requested = unpack_limit.unwrap_or(folder_size);
        if requested > folder_size {
            return Err(ValidationError::PrefixTooLarge {
                requested,
                folder: folder_size,
            }
            .into());
        }

        let bind = BindInfo::build(folder)?;
        let reusable = self.mixer.as_ref().is_some_and(|m| *m.bind_info() == bind);
        if !reusable {
            let mut mixer = Mixer::new(self.strategy, bind.clone());
            for (i, info) in folder.coders.iter().enumerate() {
                let coder = self.registry.create(info.method_id)?;
                let (actual_in, actual_out) = (coder.num_in_streams(), coder.num_out_streams());
                if actual_in != info.num_in_streams || actual_out != info.num_out_streams {
                    return Err(UnsupportedError::ArityMismatch {
                        coder: i,
                        declared_in: info.num_in_streams,
                        declared_out: info.num_out_streams,
                        actual_in,
                        actual_out,
                    }
                    .into());
                }
                mixer.add_coder(coder);
            }
            self.mixer = Some(mixer);
            self.rebuilds += 1;
        }

        let mixer = self.mixer.as_mut().expect("mixer was just ensured");
        mixer.reinit();

        // Capability wiring happens on every call, not only on rebuild:
        // properties, password, and finish mode may all differ per member
        // even when the graph shape is identical.
        let full_unpack = requested == folder_size;
        let mut cached_password: Option<SecretBytes> = None;
        for i in 0..folder.coders.len() {
            let info = &folder.coders[i];

            if self.strategy == ExecStrategy::MultiThread {
                if let Some(hook) = mixer.coder_mut(i).thread_count() {
                    hook.set_thread_count(self.thread_count);
                }
            }
            if let Some(bytes) = self.memory_limit {
                if let Some(hook) = mixer.coder_mut(i).memory_limit() {
                    hook.set_memory_limit(bytes);
                }
            }

            match mixer.coder_mut(i).properties() {
                Some(hook) => hook.set_properties(&info.props).map_err(|e| {
                    UnsupportedError::PropertiesRejected { coder: i, reason: e.to_string() }
                })?,
                None if !info.props.is_empty() => {
                    return Err(UnsupportedError::PropertiesNotSupported {
                        coder: i,
                        len:   info.props.len(),
                        props: hex::encode(&info.props),
                    }
                    .into());
                }
                None => {}
            }

            if mixer.coder_mut(i).password().is_some() {
                if cached_password.is_none() {
                    let provider = self
                        .password_provider
                        .as_ref()
                        .ok_or(UnsupportedError::PasswordSourceMissing { coder: i })?;
                    cached_password = Some(provider.password()?);
                }
                let secret = cached_password.as_ref().expect("cached above");
                if let Some(hook) = mixer.coder_mut(i).password() {
                    hook.set_password(secret).map_err(|e| {
                        UnsupportedError::PasswordRejected { coder: i, reason: e.to_string() }
                    })?;
                }
            }

            // Prefix decodes run the whole graph best-effort: upstream
            // stages stop once the main coder has its bytes, and the packed
            // tail past the prefix is never verified.
            let mode = if full_unpack { FinishMode::Exact } else { FinishMode::BestEffort };
            if let Some(hook) = mixer.coder_mut(i).finish_mode() {
                hook.set_finish_mode(mode);
            }

            mixer.set_coder_sizes(i, coder_sizes(folder, &bind, i, requested));
        }

        Ok(requested)
    }

    // ── Push mode ────────────────────────────────────────────────────────────

    /// Decode the folder's main stream into `sink`.
    pub fn decode_to<R: Read + Seek + Send>(
        &mut self,
        input: &mut R,
        req: DecodeRequest<'_>,
        sink: &mut (dyn Write + Send),
        mut progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<DecodeOutcome, Error> {
        let folder = req.folder;
        let requested = self.prepare(folder, req.unpack_limit)?;
        let full_unpack = req.unpack_limit.is_none() || requested == folder.main_unpack_size();
        let mixer = self.mixer.as_mut().expect("prepare built the mixer");

        let consumed = Arc::new(AtomicU64::new(0));
        let cancel = Arc::new(AtomicBool::new(false));
        let shared = SharedPositionedStream::new(input);

        let mut taps: Vec<BoundedTap> = Vec::with_capacity(folder.pack_streams.len());
        let mut views: Vec<Box<dyn Read + Send + '_>> =
            Vec::with_capacity(folder.pack_streams.len());
        for j in 0..folder.pack_streams.len() {
            let start = req.base_offset + folder.pack_positions[j];
            let size = folder.pack_size(j);
            let view =
                BoundedStream::with_counter(shared.reader_at(start), size, Arc::clone(&consumed));
            taps.push(view.tap());
            views.push(Box::new(view));
        }

        let mut aggregator = progress
            .as_deref_mut()
            .map(|obs| ProgressAggregator::new(obs, mixer.is_pack_size_reliable()));

        let mut counting = CountingSink {
            inner:    sink,
            consumed: Arc::clone(&consumed),
            cancel:   Arc::clone(&cancel),
            produced: 0,
            crc:      req.expected_crc.map(|_| crc32fast::Hasher::new()),
            progress: aggregator.as_mut(),
        };

        let res = mixer.code(views, &mut counting);
        let produced = counting.produced;
        let crc_actual = counting.crc.take().map(|h| h.finalize());
        drop(counting);

        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        res?;

        if produced < requested {
            return Err(DataError::Truncated { produced, expected: requested }.into());
        }

        if full_unpack {
            if let (Some(expected), Some(actual)) = (req.expected_crc, crc_actual) {
                if expected != actual {
                    return Err(DataError::CrcMismatch { expected, actual }.into());
                }
            }
        }

        // Closing update with the counters now settled.  Only bytes the
        // container actually delivered count as consumed: declared totals
        // overstate on prefix decodes and when a packed tail went unread.
        if let Some(agg) = aggregator.as_mut() {
            let observed = consumed.load(Ordering::Relaxed);
            if agg.update(observed, observed, produced) == ProgressAction::Abort {
                return Err(Error::Cancelled);
            }
        }

        let data_after_end =
            full_unpack && taps.iter().any(|t| !t.short_read() && t.bytes_left() > 0);

        Ok(DecodeOutcome { produced, data_after_end })
    }

    // ── Pull mode ────────────────────────────────────────────────────────────

    /// Compose a reader that decodes the main stream on demand.
    ///
    /// No progress reporting, CRC verification, or trailing-junk detection
    /// happens in this mode; the caller observes bytes as it reads them.
    pub fn decode_reader<'a, R: Read + Seek + Send>(
        &mut self,
        input: &'a mut R,
        req: DecodeRequest<'_>,
    ) -> Result<Box<dyn Read + Send + 'a>, Error> {
        let folder = req.folder;
        self.prepare(folder, req.unpack_limit)?;
        let mixer = self.mixer.as_mut().expect("prepare built the mixer");

        let shared = SharedPositionedStream::new(input);
        let mut views: Vec<Box<dyn Read + Send + 'a>> =
            Vec::with_capacity(folder.pack_streams.len());
        for j in 0..folder.pack_streams.len() {
            let start = req.base_offset + folder.pack_positions[j];
            let view = BoundedStream::new(shared.reader_at(start), folder.pack_size(j));
            views.push(Box::new(view));
        }

        mixer.main_reader(views)
    }
}

/// Byte budgets for coder `i` of this call: declared sizes from the folder,
/// with the main coder's output clamped to the requested prefix.
fn coder_sizes(folder: &FolderDescriptor, bind: &BindInfo, i: usize, requested: u64) -> CoderSizes {
    let unpack_size = if i == folder.main_coder {
        Some(requested)
    } else {
        Some(folder.unpack_sizes[i])
    };
    let pack_sizes = bind
        .in_streams_of(i)
        .map(|g| {
            if let Some(bond) = bind.bond_for_in_stream(g) {
                let producer = bind.coder_for_out_stream(bond.out_index as usize);
                Some(folder.unpack_sizes[producer])
            } else {
                bind.pack_slot_for_in_stream(g).map(|j| folder.pack_size(j))
            }
        })
        .collect();
    CoderSizes { unpack_size, pack_sizes }
}

/// Sink wrapper on the main output path: counts, hashes, and reports
/// progress, turning an abort verdict into a write error that unwinds the
/// mixer.
struct CountingSink<'a, 'p> {
    inner:    &'a mut (dyn Write + Send),
    consumed: Arc<AtomicU64>,
    cancel:   Arc<AtomicBool>,
    produced: u64,
    crc:      Option<crc32fast::Hasher>,
    progress: Option<&'a mut ProgressAggregator<'p>>,
}

impl Write for CountingSink<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.produced += n as u64;
        if let Some(h) = &mut self.crc {
            h.update(&buf[..n]);
        }
        if let Some(agg) = &mut self.progress {
            let observed = self.consumed.load(Ordering::Relaxed);
            if agg.update(observed, observed, self.produced) == ProgressAction::Abort {
                self.cancel.store(true, Ordering::Relaxed);
                // Not `Interrupted`: write_all retries interrupted writes,
                // which would defeat the abort.
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "decode aborted by progress callback",
                ));
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
