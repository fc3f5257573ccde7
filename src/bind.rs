//! Bind-info builder: validates a folder descriptor and normalizes it into
//! fast lookup tables for the mixer.
//!
//! Building is side-effect free.  Every check here is a hard error for the
//! folder: the mixer has no cycle-breaking or slot-repair logic, so a graph
//! that passes [`BindInfo::build`] must be directly executable.
//!
//! Equality between two `BindInfo` values intentionally covers only the
//! graph *shape* (coder arity sequence, bonds, method ids, pack-stream
//! list).  The folder decoder uses that equality to keep expensive coder
//! instances alive across repeated decodes of the same folder shape, which
//! is what makes solid containers affordable.

use thiserror::Error;

use crate::coder::MethodId;
use crate::folder::{Bond, FolderDescriptor};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("folder has no coders")]
    NoCoders,
    #[error("coder {coder} declares a zero stream arity")]
    ZeroArity { coder: usize },
    #[error("unpack size table has {got} entries for {expected} coder(s)")]
    UnpackSizeTableShape { got: usize, expected: usize },
    #[error("pack position table has {got} entries for {expected} pack stream(s)")]
    PackPositionTableShape { got: usize, expected: usize },
    #[error("pack positions decrease at entry {entry}")]
    PackPositionsOrder { entry: usize },
    #[error("bond {bond} references input stream {index} which does not exist")]
    BondInputOutOfRange { bond: usize, index: u32 },
    #[error("bond {bond} references output stream {index} which does not exist")]
    BondOutputOutOfRange { bond: usize, index: u32 },
    #[error("pack stream entry {entry} references input stream {index} which does not exist")]
    PackStreamOutOfRange { entry: usize, index: u32 },
    #[error("input stream {index} is fed by more than one source")]
    InputSlotConflict { index: u32 },
    #[error("output stream {index} feeds more than one bond")]
    OutputSlotConflict { index: u32 },
    #[error("input stream {index} has no source (neither bond nor pack stream)")]
    InputSlotUnbound { index: u32 },
    #[error("main coder index {index} is out of range")]
    MainCoderOutOfRange { index: usize },
    #[error("folder must leave exactly one output stream unbonded, found {count}")]
    MainOutputNotUnique { count: usize },
    #[error("declared main coder {declared} does not own the unbonded output (coder {actual} does)")]
    MainCoderMismatch { declared: usize, actual: usize },
    #[error("bond graph contains a cycle through coder {coder}")]
    Cycle { coder: usize },
    #[error("requested prefix of {requested} byte(s) exceeds the folder unpack size {folder}")]
    PrefixTooLarge { requested: u64, folder: u64 },
}

/// Stream arity of one coder, as bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamArity {
    pub num_in: usize,
    pub num_out: usize,
}

/// Normalized, indexed view of a folder descriptor.
#[derive(Debug, Clone)]
pub struct BindInfo {
    coders: Vec<StreamArity>,
    method_ids: Vec<MethodId>,
    bonds: Vec<Bond>,
    pack_streams: Vec<u32>,
    main_coder: usize,
    first_in_stream: Vec<usize>,
    first_out_stream: Vec<usize>,
    in_stream_to_coder: Vec<usize>,
    out_stream_to_coder: Vec<usize>,
    /// Global input slot -> index into `bonds`, if bonded.
    bond_for_in: Vec<Option<usize>>,
    /// Global input slot -> index into `pack_streams`, if raw.
    pack_slot_for_in: Vec<Option<usize>>,
}

impl PartialEq for BindInfo {
    /// Shape equality, mirroring what drives mixer reuse: same coder arity
    /// sequence, same bonds, same method ids, same pack-stream list.  The
    /// derived maps are functions of those and never compared.
    fn eq(&self, other: &Self) -> bool {
        self.coders == other.coders
            && self.bonds == other.bonds
            && self.method_ids == other.method_ids
            && self.pack_streams == other.pack_streams
    }
}

impl BindInfo {
    pub fn build(folder: &FolderDescriptor) -> Result<Self, ValidationError> {
        if folder.coders.is_empty() {
            return Err(ValidationError::NoCoders);
        }
        for (i, c) in folder.coders.iter().enumerate() {
            if c.num_in_streams == 0 || c.num_out_streams == 0 {
                return Err(ValidationError::ZeroArity { coder: i });
            }
        }
        if folder.unpack_sizes.len() != folder.coders.len() {
            return Err(ValidationError::UnpackSizeTableShape {
                got: folder.unpack_sizes.len(),
                expected: folder.coders.len(),
            });
        }
        if folder.pack_positions.len() != folder.pack_streams.len() + 1 {
            return Err(ValidationError::PackPositionTableShape {
                got: folder.pack_positions.len(),
                expected: folder.pack_streams.len(),
            });
        }
        for w in 1..folder.pack_positions.len() {
            if folder.pack_positions[w] < folder.pack_positions[w - 1] {
                return Err(ValidationError::PackPositionsOrder { entry: w });
            }
        }
        if folder.main_coder >= folder.coders.len() {
            return Err(ValidationError::MainCoderOutOfRange { index: folder.main_coder });
        }

        // Global stream numbering in coder declaration order.
        let mut first_in_stream = Vec::with_capacity(folder.coders.len());
        let mut first_out_stream = Vec::with_capacity(folder.coders.len());
        let mut in_stream_to_coder = Vec::new();
        let mut out_stream_to_coder = Vec::new();
        for (i, c) in folder.coders.iter().enumerate() {
            first_in_stream.push(in_stream_to_coder.len());
            first_out_stream.push(out_stream_to_coder.len());
            in_stream_to_coder.extend(std::iter::repeat(i).take(c.num_in_streams));
            out_stream_to_coder.extend(std::iter::repeat(i).take(c.num_out_streams));
        }
        let total_in = in_stream_to_coder.len();
        let total_out = out_stream_to_coder.len();

        // Each input slot must end up with exactly one source, each output
        // slot may feed at most one bond.
        let mut bond_for_in: Vec<Option<usize>> = vec![None; total_in];
        let mut bond_for_out: Vec<Option<usize>> = vec![None; total_out];
        for (b, bond) in folder.bonds.iter().enumerate() {
            if bond.in_index as usize >= total_in {
                return Err(ValidationError::BondInputOutOfRange { bond: b, index: bond.in_index });
            }
            if bond.out_index as usize >= total_out {
                return Err(ValidationError::BondOutputOutOfRange { bond: b, index: bond.out_index });
            }
            if bond_for_in[bond.in_index as usize].replace(b).is_some() {
                return Err(ValidationError::InputSlotConflict { index: bond.in_index });
            }
            if bond_for_out[bond.out_index as usize].replace(b).is_some() {
                return Err(ValidationError::OutputSlotConflict { index: bond.out_index });
            }
        }

        let mut pack_slot_for_in: Vec<Option<usize>> = vec![None; total_in];
        for (j, &index) in folder.pack_streams.iter().enumerate() {
            if index as usize >= total_in {
                return Err(ValidationError::PackStreamOutOfRange { entry: j, index });
            }
            if bond_for_in[index as usize].is_some()
                || pack_slot_for_in[index as usize].replace(j).is_some()
            {
                return Err(ValidationError::InputSlotConflict { index });
            }
        }

        for g in 0..total_in {
            if bond_for_in[g].is_none() && pack_slot_for_in[g].is_none() {
                return Err(ValidationError::InputSlotUnbound { index: g as u32 });
            }
        }

        // Exactly one unbonded output, owned by the declared main coder.
        let unbonded: Vec<usize> = (0..total_out).filter(|&g| bond_for_out[g].is_none()).collect();
        if unbonded.len() != 1 {
            return Err(ValidationError::MainOutputNotUnique { count: unbonded.len() });
        }
        let actual_main = out_stream_to_coder[unbonded[0]];
        if actual_main != folder.main_coder {
            return Err(ValidationError::MainCoderMismatch {
                declared: folder.main_coder,
                actual: actual_main,
            });
        }

        let info = Self {
            coders: folder
                .coders
                .iter()
                .map(|c| StreamArity { num_in: c.num_in_streams, num_out: c.num_out_streams })
                .collect(),
            method_ids: folder.coders.iter().map(|c| c.method_id).collect(),
            bonds: folder.bonds.clone(),
            pack_streams: folder.pack_streams.clone(),
            main_coder: folder.main_coder,
            first_in_stream,
            first_out_stream,
            in_stream_to_coder,
            out_stream_to_coder,
            bond_for_in,
            pack_slot_for_in,
        };
        info.check_acyclic()?;
        Ok(info)
    }

    /// No coder may depend, directly or transitively, on its own output.
    fn check_acyclic(&self) -> Result<(), ValidationError> {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;
        let mut color = vec![WHITE; self.coders.len()];

        fn visit(bi: &BindInfo, c: usize, color: &mut [u8]) -> Result<(), ValidationError> {
            color[c] = GRAY;
            for g in bi.in_streams_of(c) {
                if let Some(bond) = bi.bond_for_in_stream(g) {
                    let producer = bi.coder_for_out_stream(bond.out_index as usize);
                    match color[producer] {
                        GRAY => return Err(ValidationError::Cycle { coder: producer }),
                        WHITE => visit(bi, producer, color)?,
                        _ => {}
                    }
                }
            }
            color[c] = BLACK;
            Ok(())
        }

        for c in 0..self.coders.len() {
            if color[c] == WHITE {
                visit(self, c, &mut color)?;
            }
        }
        Ok(())
    }

    pub fn num_coders(&self) -> usize {
        self.coders.len()
    }

    pub fn arity(&self, coder: usize) -> StreamArity {
        self.coders[coder]
    }

    pub fn method_id(&self, coder: usize) -> MethodId {
        self.method_ids[coder]
    }

    pub fn main_coder(&self) -> usize {
        self.main_coder
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn num_pack_streams(&self) -> usize {
        self.pack_streams.len()
    }

    pub fn total_in_streams(&self) -> usize {
        self.in_stream_to_coder.len()
    }

    pub fn total_out_streams(&self) -> usize {
        self.out_stream_to_coder.len()
    }

    /// Global input-slot range owned by `coder`.
    pub fn in_streams_of(&self, coder: usize) -> std::ops::Range<usize> {
        let first = self.first_in_stream[coder];
        first..first + self.coders[coder].num_in
    }

    /// Global output-slot range owned by `coder`.
    pub fn out_streams_of(&self, coder: usize) -> std::ops::Range<usize> {
        let first = self.first_out_stream[coder];
        first..first + self.coders[coder].num_out
    }

    pub fn coder_for_out_stream(&self, out_stream: usize) -> usize {
        self.out_stream_to_coder[out_stream]
    }

    pub fn coder_for_in_stream(&self, in_stream: usize) -> usize {
        self.in_stream_to_coder[in_stream]
    }

    /// The bond feeding a global input slot, if any.
    pub fn bond_for_in_stream(&self, in_stream: usize) -> Option<&Bond> {
        self.bond_for_in[in_stream].map(|b| &self.bonds[b])
    }

    /// The pack-stream slot a global input slot reads from, if raw.
    pub fn pack_slot_for_in_stream(&self, in_stream: usize) -> Option<usize> {
        self.pack_slot_for_in[in_stream]
    }

    /// Coder evaluation order with producers ahead of their consumers,
    /// ending at the main coder.  Validation guarantees every coder is in
    /// the main coder's dependency closure.
    pub fn coding_order(&self) -> Vec<usize> {
        fn visit(bi: &BindInfo, c: usize, visited: &mut [bool], order: &mut Vec<usize>) {
            if visited[c] {
                return;
            }
            visited[c] = true;
            for g in bi.in_streams_of(c) {
                if let Some(bond) = bi.bond_for_in_stream(g) {
                    visit(bi, bi.coder_for_out_stream(bond.out_index as usize), visited, order);
                }
            }
            order.push(c);
        }

        let mut order = Vec::with_capacity(self.coders.len());
        let mut visited = vec![false; self.coders.len()];
        visit(self, self.main_coder, &mut visited, &mut order);
        order
    }
}
