//! Folder descriptor: the declarative coder graph submitted by a format
//! parser.
//!
//! A folder names its coders (method id, stream arity, opaque properties
//! blob), the bonds that wire one coder's output into another coder's input,
//! and which remaining input slots read raw container bytes (pack streams),
//! located through a parallel offset table relative to the folder's base
//! offset.
//!
//! Input and output slots are numbered globally in coder declaration order:
//! coder 0 owns inputs `0..n0`, coder 1 owns `n0..n0+n1`, and so on; outputs
//! are numbered the same way in their own index space.
//!
//! Descriptors are immutable once handed to the bind builder.  The JSON
//! round-trip exists for diagnostics and test fixtures only; it is not a
//! container wire format.

use serde::{Deserialize, Serialize};

use crate::coder::MethodId;

/// One coder declaration inside a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoderInfo {
    pub method_id: MethodId,
    pub num_in_streams: usize,
    pub num_out_streams: usize,
    /// Opaque decoder configuration.  Interpreted only by the coder itself.
    #[serde(default)]
    pub props: Vec<u8>,
}

impl CoderInfo {
    /// A plain one-in/one-out coder with no properties.
    pub fn simple(method_id: MethodId) -> Self {
        Self { method_id, num_in_streams: 1, num_out_streams: 1, props: Vec::new() }
    }

    pub fn with_props(method_id: MethodId, props: Vec<u8>) -> Self {
        Self { props, ..Self::simple(method_id) }
    }
}

/// An edge of the coder DAG: global input slot `in_index` is fed by global
/// output slot `out_index` instead of raw container bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub in_index: u32,
    pub out_index: u32,
}

/// One decode unit of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderDescriptor {
    pub coders: Vec<CoderInfo>,
    pub bonds: Vec<Bond>,
    /// Global input-slot indices fed directly from the container.
    pub pack_streams: Vec<u32>,
    /// Offsets of the packed byte ranges relative to the folder base offset.
    /// Always `pack_streams.len() + 1` entries; entry `j` and `j + 1` delimit
    /// pack stream `j`.
    pub pack_positions: Vec<u64>,
    /// Declared decoded size per coder (single-output coders).
    pub unpack_sizes: Vec<u64>,
    /// The coder whose output is the folder's externally visible stream.
    pub main_coder: usize,
}

impl FolderDescriptor {
    /// Folder with one coder reading one pack stream of `pack_size` bytes.
    pub fn single(coder: CoderInfo, pack_size: u64, unpack_size: u64) -> Self {
        Self {
            coders: vec![coder],
            bonds: Vec::new(),
            pack_streams: vec![0],
            pack_positions: vec![0, pack_size],
            unpack_sizes: vec![unpack_size],
            main_coder: 0,
        }
    }

    /// Linear chain: stage 0 reads the single pack stream, each later stage
    /// is bonded to the previous stage's output, the last stage is main.
    ///
    /// `unpack_sizes[i]` is the declared output size of stage `i`.
    pub fn chain(stages: Vec<CoderInfo>, pack_size: u64, unpack_sizes: Vec<u64>) -> Self {
        let n = stages.len();
        let bonds = (1..n)
            .map(|i| Bond { in_index: i as u32, out_index: i as u32 - 1 })
            .collect();
        Self {
            coders: stages,
            bonds,
            pack_streams: vec![0],
            pack_positions: vec![0, pack_size],
            unpack_sizes,
            main_coder: n.saturating_sub(1),
        }
    }

    pub fn num_in_streams_total(&self) -> usize {
        self.coders.iter().map(|c| c.num_in_streams).sum()
    }

    pub fn num_out_streams_total(&self) -> usize {
        self.coders.iter().map(|c| c.num_out_streams).sum()
    }

    /// Declared size of the folder's externally visible stream.
    pub fn main_unpack_size(&self) -> u64 {
        self.unpack_sizes.get(self.main_coder).copied().unwrap_or(0)
    }

    /// Size of pack stream `j` from the position table.
    pub fn pack_size(&self, j: usize) -> u64 {
        self.pack_positions[j + 1] - self.pack_positions[j]
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
