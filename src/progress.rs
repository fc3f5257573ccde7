//! Decode progress reporting and cooperative cancellation.
//!
//! The observer is called from inside the write path of the folder's main
//! output, so `(consumed, produced)` pairs arrive while the decode is still
//! running.  Returning [`ProgressAction::Abort`] stops the decode at the
//! next write; the caller then sees [`crate::Error::Cancelled`].
//!
//! For coder graphs whose packed-input accounting is unreliable (a filter
//! stage such as AES sits on the packed path), the aggregator substitutes
//! the observed consumed-byte counter and clamps both figures so reported
//! values never move backwards.

/// Observer verdict for one progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    Continue,
    Abort,
}

/// Receives `(consumed, produced)` byte totals during a decode.
pub trait ProgressObserver: Send {
    fn update(&mut self, consumed: u64, produced: u64) -> ProgressAction;
}

impl<F> ProgressObserver for F
where
    F: FnMut(u64, u64) -> ProgressAction + Send,
{
    fn update(&mut self, consumed: u64, produced: u64) -> ProgressAction {
        self(consumed, produced)
    }
}

/// Wraps a caller observer with the corrections the pipeline applies before
/// reporting.
pub struct ProgressAggregator<'a> {
    inner:          &'a mut dyn ProgressObserver,
    /// False when a filter stage makes declared pack sizes untrustworthy;
    /// the observed counter is reported instead.
    trust_declared: bool,
    last_consumed:  u64,
    last_produced:  u64,
}

impl<'a> ProgressAggregator<'a> {
    pub fn new(inner: &'a mut dyn ProgressObserver, trust_declared: bool) -> Self {
        Self { inner, trust_declared, last_consumed: 0, last_produced: 0 }
    }

    /// `declared_consumed` comes from pack-size accounting,
    /// `observed_consumed` from the bounded-view counters.
    pub fn update(
        &mut self,
        declared_consumed: u64,
        observed_consumed: u64,
        produced: u64,
    ) -> ProgressAction {
        let consumed = if self.trust_declared { declared_consumed } else { observed_consumed };
        self.last_consumed = self.last_consumed.max(consumed);
        self.last_produced = self.last_produced.max(produced);
        self.inner.update(self.last_consumed, self.last_produced)
    }
}

/// Observer that records every update it receives.  Useful in tests and for
/// callers that want to poll instead of react.
#[derive(Default)]
pub struct ProgressRecord {
    pub updates:     Vec<(u64, u64)>,
    /// Abort once this many updates have been delivered.
    pub abort_after: Option<usize>,
}

impl ProgressObserver for ProgressRecord {
    fn update(&mut self, consumed: u64, produced: u64) -> ProgressAction {
        self.updates.push((consumed, produced));
        match self.abort_after {
            Some(n) if self.updates.len() >= n => ProgressAction::Abort,
            _ => ProgressAction::Continue,
        }
    }
}
