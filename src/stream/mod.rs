//! Stream views used to wire container bytes into coder inputs.
//!
//! [`BoundedStream`] delimits one packed byte range so a coder can never
//! read into a neighboring logical stream.  [`SharedPositionedStream`] lets
//! several logical readers (possibly on different threads) share one
//! seekable container stream without corrupting each other's position.
//!
//! Both are created fresh per decode call and torn down at its end.

pub mod pipe;

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

// ── Bounded stream view ──────────────────────────────────────────────────────

#[derive(Debug)]
struct BoundedState {
    range_size: u64,
    delivered: AtomicU64,
    short_read: AtomicBool,
}

/// Shareable handle onto a [`BoundedStream`]'s consumption counters.
///
/// The mixer keeps taps while the views themselves move into coder threads,
/// then inspects them after execution to tell "coder legitimately needed
/// fewer bytes" apart from "container is truncated".
#[derive(Clone)]
pub struct BoundedTap {
    state: Arc<BoundedState>,
}

impl BoundedTap {
    pub fn range_size(&self) -> u64 {
        self.state.range_size
    }

    /// Cumulative bytes handed out so far.
    pub fn bytes_delivered(&self) -> u64 {
        self.state.delivered.load(Ordering::Relaxed)
    }

    /// True if the source hit EOF before `range_size` bytes were delivered.
    pub fn short_read(&self) -> bool {
        self.state.short_read.load(Ordering::Relaxed)
    }

    /// Declared bytes the consumer left unread (0 when fully drained).
    pub fn bytes_left(&self) -> u64 {
        self.state.range_size - self.bytes_delivered()
    }
}

/// Exposes only a fixed byte range of `source`, never delivering more than
/// `range_size` cumulative bytes across any sequence of reads.
pub struct BoundedStream<R> {
    source: R,
    state: Arc<BoundedState>,
    /// Optional shared consumed-bytes counter fed into progress reporting.
    counter: Option<Arc<AtomicU64>>,
}

impl<R: Read> BoundedStream<R> {
    pub fn new(source: R, range_size: u64) -> Self {
        Self {
            source,
            state: Arc::new(BoundedState {
                range_size,
                delivered: AtomicU64::new(0),
                short_read: AtomicBool::new(false),
            }),
            counter: None,
        }
    }

    pub fn with_counter(source: R, range_size: u64, counter: Arc<AtomicU64>) -> Self {
        Self { counter: Some(counter), ..Self::new(source, range_size) }
    }

    pub fn tap(&self) -> BoundedTap {
        BoundedTap { state: Arc::clone(&self.state) }
    }

    pub fn bytes_delivered(&self) -> u64 {
        self.state.delivered.load(Ordering::Relaxed)
    }

    pub fn short_read(&self) -> bool {
        self.state.short_read.load(Ordering::Relaxed)
    }
}

impl<R: Read> Read for BoundedStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let delivered = self.state.delivered.load(Ordering::Relaxed);
        let remaining = self.state.range_size - delivered;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
        let n = self.source.read(&mut buf[..want])?;
        if n == 0 {
            self.state.short_read.store(true, Ordering::Relaxed);
            return Ok(0);
        }
        self.state.delivered.fetch_add(n as u64, Ordering::Relaxed);
        if let Some(counter) = &self.counter {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
        Ok(n)
    }
}

// ── Shared positioned stream ─────────────────────────────────────────────────

struct Positioned<S> {
    stream: S,
    /// Last position the underlying stream is known to sit at; `None` until
    /// the first read settles it.  Lets back-to-back reads from the same
    /// view skip redundant seeks.
    pos: Option<u64>,
}

/// One seekable container stream shared by multiple logical readers.
///
/// Each [`SharedStreamReader`] carries its own logical offset; the
/// seek-if-needed / read / position-update sequence runs as one critical
/// section so interleaved readers on different threads cannot race the
/// underlying position.
pub struct SharedPositionedStream<S> {
    inner: Arc<Mutex<Positioned<S>>>,
}

impl<S> Clone for SharedPositionedStream<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: Read + Seek> SharedPositionedStream<S> {
    pub fn new(stream: S) -> Self {
        Self { inner: Arc::new(Mutex::new(Positioned { stream, pos: None })) }
    }

    /// A logical reader starting at absolute offset `pos`.
    pub fn reader_at(&self, pos: u64) -> SharedStreamReader<S> {
        SharedStreamReader { shared: self.clone(), pos }
    }
}

/// A logical sequential view over a [`SharedPositionedStream`].
pub struct SharedStreamReader<S> {
    shared: SharedPositionedStream<S>,
    pos: u64,
}

impl<S: Read + Seek> Read for SharedStreamReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self
            .shared
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "container stream lock poisoned"))?;
        if guard.pos != Some(self.pos) {
            guard.stream.seek(SeekFrom::Start(self.pos))?;
        }
        let n = guard.stream.read(buf)?;
        self.pos += n as u64;
        guard.pos = Some(self.pos);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn bounded_never_exceeds_range() {
        let src = Cursor::new(vec![0xAAu8; 100]);
        let mut b = BoundedStream::new(src, 10);
        let mut out = Vec::new();
        b.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(b.bytes_delivered(), 10);
        assert!(!b.short_read());
    }

    #[test]
    fn bounded_flags_short_source() {
        let src = Cursor::new(vec![1u8, 2, 3]);
        let mut b = BoundedStream::new(src, 10);
        let tap = b.tap();
        let mut out = Vec::new();
        b.read_to_end(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);
        assert!(tap.short_read());
        assert_eq!(tap.bytes_left(), 7);
    }

    #[test]
    fn concurrent_disjoint_ranges_read_clean() {
        // Range-tagged source: byte i holds i % 251, so any positional slip
        // by either reader is visible in the bytes it receives.
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let shared = SharedPositionedStream::new(Cursor::new(data.clone()));

        std::thread::scope(|s| {
            for (start, len) in [(0u64, 100usize), (500, 100)] {
                let mut reader = shared.reader_at(start);
                let expected = &data[start as usize..start as usize + len];
                s.spawn(move || {
                    let mut got = vec![0u8; len];
                    // Small reads force heavy interleaving with the peer.
                    for chunk in got.chunks_mut(7) {
                        reader.read_exact(chunk).unwrap();
                    }
                    assert_eq!(got, expected);
                });
            }
        });
    }

    #[test]
    fn shared_views_do_not_disturb_each_other() {
        let data: Vec<u8> = (0..=255).collect();
        let shared = SharedPositionedStream::new(Cursor::new(data));
        let mut a = shared.reader_at(0);
        let mut b = shared.reader_at(100);

        let mut buf = [0u8; 4];
        a.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3]);
        b.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [100, 101, 102, 103]);
        a.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [4, 5, 6, 7]);
    }
}
