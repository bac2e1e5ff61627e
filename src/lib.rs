//! `detourpatch` statically rewrites a CGC-style 32-bit little-endian
//! ELF executable: it lays out added data and code, reassembles single
//! instructions in place, and redirects basic blocks through detour
//! trampolines, all without touching the binary's original semantics
//! outside the bytes a patch explicitly targets.
//!
//! The engine never disassembles, assembles, computes a CFG, or maps a
//! virtual address on its own — those are supplied by the
//! [`Disassembler`], [`Assembler`], [`Cfg`], and [`Loader`] traits, kept
//! deliberately out of scope.
//!
//! Logging goes through the `log` facade; this crate never installs a
//! logger. Callers wire up `env_logger`, `fern`, or whatever else their
//! binary uses.

#[macro_use]
extern crate quick_error;

mod asm;
mod cfg;
mod compile;
mod config;
mod detour;
pub mod elf;
mod error;
mod header_rewriter;
mod image;
mod loader;
mod patch;
mod patcher;

pub use asm::{is_movable, Assembler, Disassembler, Instruction, Overwritten};
pub use cfg::{Block, BlockLocator, Cfg};
pub use config::{PatcherConfig, DEFAULT_ADDED_CODE_VA, DEFAULT_ADDED_DATA_VA, DEFAULT_PAGE_SIZE, DEFAULT_PATCHED_MARKER};
pub use error::{Error, Result};
pub use loader::{Loader, SegmentLoader};
pub use patch::{Patch, PatchRegistry, SymbolMap};
pub use patcher::Patcher;
