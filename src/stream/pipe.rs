//! Bounded in-process byte pipe for handing one coder's output to another
//! coder running on a different thread.
//!
//! Backpressure is built in: a full pipe blocks the writer, an empty pipe
//! blocks the reader.  Teardown is drop driven.  Dropping the writer makes
//! the reader see EOF once the queue drains; dropping the reader makes
//! further writes fail with `BrokenPipe`, which unwinds the producing side
//! of a graph whose consumer already failed or was cancelled.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

struct State {
    queue:        VecDeque<u8>,
    write_closed: bool,
    read_closed:  bool,
}

struct Shared {
    state:    Mutex<State>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

impl Shared {
    // The state holds plain bytes and flags, so a poisoned lock (a peer
    // thread panicked mid-write) still leaves it usable for teardown.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Create a pipe holding at most `capacity` buffered bytes.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    assert!(capacity > 0, "pipe capacity must be non-zero");
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue:        VecDeque::with_capacity(capacity),
            write_closed: false,
            read_closed:  false,
        }),
        readable: Condvar::new(),
        writable: Condvar::new(),
        capacity,
    });
    (PipeWriter { shared: Arc::clone(&shared) }, PipeReader { shared })
}

pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        loop {
            if state.read_closed {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "pipe reader was dropped",
                ));
            }
            let room = self.shared.capacity - state.queue.len();
            if room > 0 {
                let n = buf.len().min(room);
                state.queue.extend(&buf[..n]);
                drop(state);
                self.shared.readable.notify_one();
                return Ok(n);
            }
            state = self
                .shared
                .writable
                .wait(state)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.shared.lock().write_closed = true;
        self.shared.readable.notify_all();
    }
}

pub struct PipeReader {
    shared: Arc<Shared>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        loop {
            if !state.queue.is_empty() {
                let n = buf.len().min(state.queue.len());
                for slot in buf[..n].iter_mut() {
                    *slot = state.queue.pop_front().unwrap();
                }
                drop(state);
                self.shared.writable.notify_one();
                return Ok(n);
            }
            if state.write_closed {
                return Ok(0); // clean EOF
            }
            state = self
                .shared
                .readable
                .wait(state)
                .unwrap_or_else(|p| p.into_inner());
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.lock().read_closed = true;
        self.shared.writable.notify_all();
    }
}
