//! packmix: a compressed-container decode pipeline.
//!
//! A container format parser hands this crate a [`FolderDescriptor`]: a
//! small DAG of coders (decompressors, decryption filters, pass-throughs)
//! wired together by bonds, with the remaining inputs fed from packed byte
//! ranges of the container stream.  The pipeline validates the graph, binds
//! it into an executable plan, resolves coder implementations through a
//! [`CoderRegistry`], and runs it either single-threaded or with one worker
//! thread per coder.
//!
//! ```no_run
//! use std::io::Cursor;
//! use packmix::{
//!     CoderInfo, CoderRegistry, DecodeRequest, ExecStrategy, FolderDecoder,
//!     FolderDescriptor, MethodId,
//! };
//!
//! # fn main() -> packmix::Result<()> {
//! let packed: Vec<u8> = std::fs::read("folder.bin")?;
//! let folder = FolderDescriptor::single(
//!     CoderInfo::simple(MethodId::ZSTD),
//!     packed.len() as u64,
//!     1 << 20,
//! );
//!
//! let mut decoder = FolderDecoder::new(CoderRegistry::new(), ExecStrategy::SingleThread);
//! let mut input = Cursor::new(packed);
//! let mut out = Vec::new();
//! decoder.decode_to(&mut input, DecodeRequest::new(&folder), &mut out, None)?;
//! # Ok(())
//! # }
//! ```

pub mod bind;
pub mod coder;
pub mod crypto;
pub mod decoder;
pub mod error;
pub mod folder;
pub mod mixer;
pub mod progress;
pub mod stream;

pub use bind::{BindInfo, StreamArity, ValidationError};
pub use coder::{
    Coder, CoderCtor, CoderError, CoderRegistry, CoderSizes, FinishMode, MethodId,
};
pub use crypto::{PasswordProvider, SecretBytes};
pub use decoder::{DecodeOutcome, DecodeRequest, FolderDecoder};
pub use error::{DataError, Error, Result, UnsupportedError};
pub use folder::{Bond, CoderInfo, FolderDescriptor};
pub use mixer::{ExecStrategy, Mixer};
pub use progress::{ProgressAction, ProgressObserver, ProgressRecord};
