//! Coder-graph executor.
//!
//! A mixer owns the coder instances for one bound folder shape and runs
//! them either on the calling thread, with upstream stages composed into
//! the main coder's inputs so their bytes are decoded as the main coder
//! asks for them (single-thread), or as one worker thread per coder
//! connected by bounded pipes (multi-thread).  The mixer survives across decode calls so the
//! folder decoder can amortize coder construction over the members of a
//! solid folder; `reinit` rewinds every coder between calls.
//!
//! The mixer executes single-output coders.  Bind validation admits more
//! general shapes, but no supported method declares multiple outputs, so
//! encountering one here is reported as a resource-level failure rather
//! than silently misrouted.

use std::io::{self, Read, Write};
use std::thread;

use crate::bind::BindInfo;
use crate::coder::{Coder, CoderError, CoderSizes};
use crate::error::{DataError, Error, UnsupportedError};
use crate::stream::pipe::{pipe, PipeReader, PipeWriter};

/// Buffered bytes per inter-coder pipe in multi-thread mode.
pub const PIPE_CAPACITY: usize = 1 << 18;

/// How the mixer schedules the coder graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecStrategy {
    #[default]
    SingleThread,
    MultiThread,
}

/// One coder plus the byte budgets for the current decode call.
pub struct CoderSlot {
    pub coder: Box<dyn Coder>,
    pub sizes: CoderSizes,
}

pub struct Mixer {
    strategy: ExecStrategy,
    bind:     BindInfo,
    coders:   Vec<CoderSlot>,
}

impl Mixer {
    pub fn new(strategy: ExecStrategy, bind: BindInfo) -> Self {
        let capacity = bind.num_coders();
        Self { strategy, bind, coders: Vec::with_capacity(capacity) }
    }

    pub fn bind_info(&self) -> &BindInfo {
        &self.bind
    }

    pub fn strategy(&self) -> ExecStrategy {
        self.strategy
    }

    /// Install the next coder.  Must be called once per bound coder, in
    /// declaration order.
    pub fn add_coder(&mut self, coder: Box<dyn Coder>) {
        debug_assert!(self.coders.len() < self.bind.num_coders());
        self.coders.push(CoderSlot { coder, sizes: CoderSizes::default() });
    }

    pub fn num_coders(&self) -> usize {
        self.coders.len()
    }

    pub fn coder_mut(&mut self, index: usize) -> &mut dyn Coder {
        &mut *self.coders[index].coder
    }

    /// Rewind every coder for a fresh decode call.
    pub fn reinit(&mut self) {
        for slot in &mut self.coders {
            slot.coder.reinit();
            slot.sizes = CoderSizes::default();
        }
    }

    pub fn set_coder_sizes(&mut self, index: usize, sizes: CoderSizes) {
        self.coders[index].sizes = sizes;
    }

    /// False when some coder in the graph is a filter: filters may consume
    /// fewer packed bytes than declared, so pack-size accounting cannot be
    /// trusted for progress reporting.
    pub fn is_pack_size_reliable(&self) -> bool {
        !self.coders.iter().any(|slot| slot.coder.is_filter())
    }

    // ── Push execution ───────────────────────────────────────────────────────

    /// Run the full graph, feeding `pack_inputs` (one per pack-stream slot,
    /// in slot order) and writing the main coder's output to `output`.
    pub fn code<'a>(
        &mut self,
        pack_inputs: Vec<Box<dyn Read + Send + 'a>>,
        output: &mut (dyn Write + Send),
    ) -> Result<(), Error> {
        assert_eq!(pack_inputs.len(), self.bind.num_pack_streams());
        assert_eq!(self.coders.len(), self.bind.num_coders());
        let mut pack_inputs: Vec<Option<Box<dyn Read + Send + 'a>>> =
            pack_inputs.into_iter().map(Some).collect();
        match self.strategy {
            ExecStrategy::SingleThread => self.code_st(&mut pack_inputs, output),
            ExecStrategy::MultiThread => self.code_mt(&mut pack_inputs, output),
        }
    }

    fn code_st<'a>(
        &mut self,
        pack_inputs: &mut [Option<Box<dyn Read + Send + 'a>>],
        output: &mut (dyn Write + Send),
    ) -> Result<(), Error> {
        let mut inputs = self.compose_upstream(pack_inputs)?;
        let main = self.bind.main_coder();
        let mut refs: Vec<&mut (dyn Read + Send)> =
            inputs.iter_mut().map(|b| &mut **b as &mut (dyn Read + Send)).collect();
        let slot = &mut self.coders[main];
        slot.coder
            .code(&mut refs, output, &slot.sizes)
            .map_err(|e| map_coder_err(main, e))?;
        Ok(())
    }

    /// Resolve the main coder's inputs, composing every upstream stage.
    ///
    /// Pull-capable single-input stages are chained lazily, so their bytes
    /// are decoded only when the main coder asks for them; a prefix decode
    /// never touches upstream input past what the prefix needs.  Any other
    /// stage is run eagerly and its output served from a buffer.  The
    /// composed readers own all per-call plumbing, independent of the mixer
    /// borrow.
    fn compose_upstream<'a>(
        &mut self,
        pack_inputs: &mut [Option<Box<dyn Read + Send + 'a>>],
    ) -> Result<Vec<Box<dyn Read + Send + 'a>>, Error> {
        let bind = &self.bind;
        let main = bind.main_coder();
        let mut streams: Vec<Option<Box<dyn Read + Send + 'a>>> =
            (0..bind.total_out_streams()).map(|_| None).collect();

        for idx in bind.coding_order() {
            let mut inputs: Vec<Box<dyn Read + Send + 'a>> =
                Vec::with_capacity(bind.arity(idx).num_in);
            for g in bind.in_streams_of(idx) {
                inputs.push(gather_input(bind, g, pack_inputs, |out| {
                    streams[out].take().expect("producer already visited in coding order")
                })?);
            }
            if idx == main {
                return Ok(inputs);
            }
            let out_slot = single_out_stream(bind, idx)?;
            let slot = &mut self.coders[idx];

            let lazy = inputs.len() == 1 && slot.coder.pull().is_some();
            let composed: Box<dyn Read + Send + 'a> = if lazy {
                let pull = slot.coder.pull().expect("checked above");
                let reader = pull
                    .pull_reader(inputs.pop().expect("one input"))
                    .map_err(|e| map_coder_err(idx, CoderError::Io(e)))?;
                match slot.sizes.unpack_size {
                    Some(n) => Box::new(reader.take(n)),
                    None => reader,
                }
            } else {
                // No pull support: run the stage eagerly and serve its
                // output from memory.
                let mut refs: Vec<&mut (dyn Read + Send)> =
                    inputs.iter_mut().map(|b| &mut **b as &mut (dyn Read + Send)).collect();
                let mut buf = Vec::new();
                slot.coder
                    .code(&mut refs, &mut buf, &slot.sizes)
                    .map_err(|e| map_coder_err(idx, e))?;
                Box::new(io::Cursor::new(buf))
            };
            streams[out_slot] = Some(composed);
        }
        unreachable!("coding order always ends at the main coder")
    }

    fn code_mt<'a>(
        &mut self,
        pack_inputs: &mut [Option<Box<dyn Read + Send + 'a>>],
        output: &mut (dyn Write + Send),
    ) -> Result<(), Error> {
        let bind = &self.bind;
        let main = bind.main_coder();

        // One bounded pipe per bond; writer to the producer's output slot,
        // reader to the consumer's input slot.
        let mut rx_for_in: Vec<Option<PipeReader>> =
            (0..bind.total_in_streams()).map(|_| None).collect();
        let mut tx_for_out: Vec<Option<PipeWriter>> =
            (0..bind.total_out_streams()).map(|_| None).collect();
        for bond in bind.bonds() {
            let (tx, rx) = pipe(PIPE_CAPACITY);
            tx_for_out[bond.out_index as usize] = Some(tx);
            rx_for_in[bond.in_index as usize] = Some(rx);
        }

        // Plumb every coder up front, then hand the slots to their threads.
        struct Job<'s, 'a> {
            idx:    usize,
            slot:   &'s mut CoderSlot,
            inputs: Vec<Box<dyn Read + Send + 'a>>,
            out:    Option<PipeWriter>,
        }

        let mut slots: Vec<Option<&mut CoderSlot>> =
            self.coders.iter_mut().map(Some).collect();
        let mut main_job: Option<Job<'_, 'a>> = None;
        let mut worker_jobs: Vec<Job<'_, 'a>> = Vec::new();
        for idx in bind.coding_order() {
            let mut inputs: Vec<Box<dyn Read + Send + 'a>> =
                Vec::with_capacity(bind.arity(idx).num_in);
            for g in bind.in_streams_of(idx) {
                if bind.bond_for_in_stream(g).is_some() {
                    let rx = rx_for_in[g]
                        .take()
                        .ok_or_else(|| Error::Resource(format!("input stream {g} consumed twice")))?;
                    inputs.push(Box::new(rx));
                } else {
                    let slot = bind
                        .pack_slot_for_in_stream(g)
                        .ok_or_else(|| Error::Resource(format!("input stream {g} has no source")))?;
                    inputs.push(pack_inputs[slot].take().ok_or_else(|| {
                        Error::Resource(format!("pack stream {slot} consumed twice"))
                    })?);
                }
            }
            let out = if idx == main {
                None
            } else {
                Some(
                    tx_for_out[single_out_stream(bind, idx)?]
                        .take()
                        .ok_or_else(|| Error::Resource(format!("coder {idx} output has no bond pipe")))?,
                )
            };
            let job = Job { idx, slot: slots[idx].take().unwrap(), inputs, out };
            if idx == main {
                main_job = Some(job);
            } else {
                worker_jobs.push(job);
            }
        }
        // All remaining pipe ends belong to spawned jobs now; dropping these
        // tables must not close anything a live coder still holds.
        drop(rx_for_in);
        drop(tx_for_out);

        let mut main_job = main_job.expect("coding order always contains the main coder");

        let mut results: Vec<(usize, Result<u64, CoderError>)> = Vec::new();
        let mut panicked = false;

        thread::scope(|scope| -> Result<(), Error> {
            let mut handles = Vec::with_capacity(worker_jobs.len());
            for mut job in worker_jobs.drain(..) {
                let builder = thread::Builder::new().name(format!("coder-{}", job.idx));
                let spawned = builder.spawn_scoped(scope, move || {
                    let mut refs: Vec<&mut (dyn Read + Send)> = job
                        .inputs
                        .iter_mut()
                        .map(|b| &mut **b as &mut (dyn Read + Send))
                        .collect();
                    let mut out = job.out.expect("non-main coder always has an output pipe");
                    let res = job.slot.coder.code(&mut refs, &mut out, &job.slot.sizes);
                    // Dropping `out` here signals EOF downstream; dropping
                    // the inputs releases upstream writers on failure.
                    (job.idx, res)
                });
                let handle = match spawned {
                    Ok(handle) => handle,
                    Err(e) => {
                        // Exiting the scope joins the workers spawned so far;
                        // every pipe end still held on this thread must drop
                        // first so none of them stays blocked on backpressure.
                        // The undistributed jobs go down with the drain.
                        main_job.inputs.clear();
                        return Err(Error::Resource(format!("failed to spawn coder thread: {e}")));
                    }
                };
                handles.push(handle);
            }

            // The main coder runs on the calling thread and writes straight
            // into the caller's sink.
            let main_res = {
                let mut refs: Vec<&mut (dyn Read + Send)> = main_job
                    .inputs
                    .iter_mut()
                    .map(|b| &mut **b as &mut (dyn Read + Send))
                    .collect();
                main_job.slot.coder.code(&mut refs, output, &main_job.slot.sizes)
            };
            // Drop the main coder's input pipes so upstream writers unblock
            // even when the main coder bailed out early.
            main_job.inputs.clear();

            for handle in handles {
                match handle.join() {
                    Ok(entry) => results.push(entry),
                    Err(_) => panicked = true,
                }
            }
            results.push((main, main_res));
            Ok(())
        })?;

        if panicked {
            return Err(Error::Resource("coder thread panicked".into()));
        }

        // A failure on one side of a pipe surfaces on the other side as a
        // broken pipe.  Cascades carry no information of their own: either
        // some coder holds the root-cause error, or the main coder stopped
        // early on purpose (prefix decode) and upstream broken pipes are the
        // expected teardown.  Report the first non-cascade error in coding
        // order, if any.
        results.sort_by_key(|(idx, _)| *idx);
        for (idx, res) in results {
            if let Err(e) = res {
                if !is_pipe_cascade(&e) {
                    return Err(map_coder_err(idx, e));
                }
            }
        }
        Ok(())
    }

    // ── Pull composition ─────────────────────────────────────────────────────

    /// Compose a reader that decodes the folder's main stream on demand.
    ///
    /// Stages whose coder supports pull composition are chained lazily;
    /// any other stage is materialized eagerly into memory and its output
    /// served from a buffer.  The returned reader owns all per-call
    /// plumbing, so it outlives the mixer borrow.
    pub fn main_reader<'a>(
        &mut self,
        pack_inputs: Vec<Box<dyn Read + Send + 'a>>,
    ) -> Result<Box<dyn Read + Send + 'a>, Error> {
        assert_eq!(pack_inputs.len(), self.bind.num_pack_streams());
        let mut pack_inputs: Vec<Option<Box<dyn Read + Send + 'a>>> =
            pack_inputs.into_iter().map(Some).collect();
        let mut inputs = self.compose_upstream(&mut pack_inputs)?;
        let main = self.bind.main_coder();
        single_out_stream(&self.bind, main)?;
        let slot = &mut self.coders[main];

        let lazy = inputs.len() == 1 && slot.coder.pull().is_some();
        if lazy {
            let pull = slot.coder.pull().expect("checked above");
            let reader = pull
                .pull_reader(inputs.pop().expect("one input"))
                .map_err(|e| map_coder_err(main, CoderError::Io(e)))?;
            Ok(match slot.sizes.unpack_size {
                Some(n) => Box::new(reader.take(n)),
                None => reader,
            })
        } else {
            // No pull support: run the stage eagerly and serve its output
            // from memory.
            let mut refs: Vec<&mut (dyn Read + Send)> =
                inputs.iter_mut().map(|b| &mut **b as &mut (dyn Read + Send)).collect();
            let mut buf = Vec::new();
            slot.coder
                .code(&mut refs, &mut buf, &slot.sizes)
                .map_err(|e| map_coder_err(main, e))?;
            Ok(Box::new(io::Cursor::new(buf)))
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Resolve one global input slot to its byte source: either a pack-stream
/// reader or (via `from_bond`) the producing coder's output.
fn gather_input<'a>(
    bind: &BindInfo,
    in_stream: usize,
    pack_inputs: &mut [Option<Box<dyn Read + Send + 'a>>],
    from_bond: impl FnOnce(usize) -> Box<dyn Read + Send + 'a>,
) -> Result<Box<dyn Read + Send + 'a>, Error> {
    if let Some(bond) = bind.bond_for_in_stream(in_stream) {
        return Ok(from_bond(bond.out_index as usize));
    }
    let slot = bind
        .pack_slot_for_in_stream(in_stream)
        .ok_or_else(|| Error::Resource(format!("input stream {in_stream} has no source")))?;
    pack_inputs[slot]
        .take()
        .ok_or_else(|| Error::Resource(format!("pack stream {slot} consumed twice")))
}

fn single_out_stream(bind: &BindInfo, coder: usize) -> Result<usize, Error> {
    let range = bind.out_streams_of(coder);
    if range.len() != 1 {
        return Err(Error::Resource(format!(
            "coder {coder} declares {} output streams, the mixer executes exactly one",
            range.len()
        )));
    }
    Ok(range.start)
}

fn map_coder_err(coder: usize, err: CoderError) -> Error {
    match err {
        CoderError::InvalidProperties(reason) => {
            Error::Unsupported(UnsupportedError::PropertiesRejected { coder, reason })
        }
        CoderError::PasswordRequired => {
            Error::Unsupported(UnsupportedError::PasswordSourceMissing { coder })
        }
        CoderError::PasswordRejected(reason) => {
            Error::Unsupported(UnsupportedError::PasswordRejected { coder, reason })
        }
        CoderError::Corrupt(reason) => Error::Data(DataError::CoderFailed { coder, reason }),
        CoderError::Io(e) => Error::Io(e),
    }
}

/// True when the error is the downstream echo of a failure elsewhere in the
/// graph rather than a root cause of its own.
fn is_pipe_cascade(err: &CoderError) -> bool {
    match err {
        CoderError::Io(e) => e.kind() == io::ErrorKind::BrokenPipe,
        CoderError::Corrupt(reason) => reason.contains("pipe reader was dropped"),
        _ => false,
    }
}
