//! The patch registry and the symbol map it and the compile pipeline
//! share.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Mapping from a unique patch-bound name to the virtual address it was
/// laid out at. Populated during layout, consumed by the assembler.
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    names: HashMap<String, u32>,
}

impl SymbolMap {
    pub fn new() -> SymbolMap {
        SymbolMap { names: HashMap::new() }
    }

    /// Binds `name` to `va`. Fails with `DuplicateSymbol` if the name is
    /// already bound — collisions are rejected rather than silently
    /// overwritten.
    pub fn bind(&mut self, name: String, va: u32) -> Result<()> {
        if self.names.contains_key(&name) {
            return Err(Error::DuplicateSymbol(name));
        }
        self.names.insert(name, va);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.names.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A single requested modification. The four variants dispatch in the
/// compile pipeline rather than through an inheritance hierarchy.
#[derive(Debug, Clone)]
pub enum Patch {
    /// Append raw bytes to the data region; binds `name` to the
    /// allocated VA if present.
    AddData { bytes: Vec<u8>, name: Option<String> },
    /// Append assembled code; binds `name` to the allocated VA if present.
    AddCode { asm_text: String, name: Option<String> },
    /// Reassemble a single instruction in place. The assembled length
    /// must equal the original instruction's length.
    InlineReplace { instr_vaddr: u32, asm_text: String },
    /// Redirect the block containing `instr_vaddr` through a trampoline
    /// and inline `asm_text` around the culprit instruction.
    InsertDetour { instr_vaddr: u32, asm_text: String },
}

/// Accumulates patches in registration order and the symbol map they
/// bind into.
#[derive(Debug, Clone, Default)]
pub struct PatchRegistry {
    patches: Vec<Patch>,
}

impl PatchRegistry {
    pub fn new() -> PatchRegistry {
        PatchRegistry { patches: Vec::new() }
    }

    pub fn add_data(&mut self, bytes: Vec<u8>, name: Option<String>) {
        self.patches.push(Patch::AddData { bytes, name });
    }

    pub fn add_code(&mut self, asm_text: String, name: Option<String>) {
        self.patches.push(Patch::AddCode { asm_text, name });
    }

    pub fn inline_replace(&mut self, instr_vaddr: u32, asm_text: String) {
        self.patches.push(Patch::InlineReplace { instr_vaddr, asm_text });
    }

    pub fn insert_detour(&mut self, instr_vaddr: u32, asm_text: String) {
        self.patches.push(Patch::InsertDetour { instr_vaddr, asm_text });
    }

    /// Every patch, in registration order, regardless of kind.
    pub fn iter(&self) -> impl Iterator<Item = &Patch> {
        self.patches.iter()
    }

    pub fn add_data_patches(&self) -> impl Iterator<Item = (&[u8], Option<&str>)> {
        self.patches.iter().filter_map(|p| match p {
            Patch::AddData { bytes, name } => Some((bytes.as_slice(), name.as_deref())),
            _ => None,
        })
    }

    pub fn add_code_patches(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.patches.iter().filter_map(|p| match p {
            Patch::AddCode { asm_text, name } => Some((asm_text.as_str(), name.as_deref())),
            _ => None,
        })
    }

    pub fn inline_replace_patches(&self) -> impl Iterator<Item = (u32, &str)> {
        self.patches.iter().filter_map(|p| match p {
            Patch::InlineReplace { instr_vaddr, asm_text } => Some((*instr_vaddr, asm_text.as_str())),
            _ => None,
        })
    }

    pub fn insert_detour_patches(&self) -> impl Iterator<Item = (u32, &str)> {
        self.patches.iter().filter_map(|p| match p {
            Patch::InsertDetour { instr_vaddr, asm_text } => Some((*instr_vaddr, asm_text.as_str())),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}
