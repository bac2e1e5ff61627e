//! Compile pipeline: two-pass layout of added data and code, inline
//! replacements, and the cursors they share. Detours (phase 4) are
//! driven from here but implemented in [`crate::detour`].

use crate::asm::{Assembler, Disassembler};
use crate::error::{Error, Result};
use crate::image::ImageBuffer;
use crate::patch::{PatchRegistry, SymbolMap};

/// The longest possible x86-32 instruction encoding, used to bound how
/// many bytes we probe when we only know an instruction's start address
/// (inline replacements don't have a CFG-reported size to work from).
const MAX_X86_INSTR_LEN: u32 = 15;

/// The three process-local cursors, plus the regions they advance
/// through and the symbol map they populate.
pub struct Compiler {
    pub curr_data_va: u32,
    pub curr_code_va: u32,
    pub added_data: Vec<u8>,
    pub added_code: Vec<u8>,
    pub symbols: SymbolMap,
}

impl Compiler {
    pub fn new(data_va: u32, code_va: u32) -> Compiler {
        Compiler {
            curr_data_va: data_va,
            curr_code_va: code_va,
            added_data: Vec::new(),
            added_code: Vec::new(),
            symbols: SymbolMap::new(),
        }
    }

    /// Phase 1: concatenate every `AddData` patch's bytes in
    /// registration order, advancing `curr_data_va` and binding names.
    pub fn layout_data(&mut self, registry: &PatchRegistry) -> Result<()> {
        for (bytes, name) in registry.add_data_patches() {
            if let Some(name) = name {
                self.symbols.bind(name.to_string(), self.curr_data_va)?;
            }
            self.added_data.extend_from_slice(bytes);
            self.curr_data_va += bytes.len() as u32;
        }
        log::debug!("data layout: {} bytes, {} symbols bound", self.added_data.len(), self.symbols.len());
        Ok(())
    }

    /// Phase 2: assemble every `AddCode` patch twice. Pass 1 measures
    /// each patch's length against a placeholder symbol map so forward
    /// names resolve to their final VA; pass 2 assembles for real
    /// against the now-complete map.
    pub fn layout_code(&mut self, registry: &PatchRegistry, asm: &dyn Assembler) -> Result<()> {
        let mut cursor = self.curr_code_va;
        let mut bindings = Vec::new();
        for (text, name) in registry.add_code_patches() {
            let bytes = asm.assemble_with_placeholder_symbols(text, cursor)?;
            if let Some(name) = name {
                bindings.push((name.to_string(), cursor));
            }
            cursor += bytes.len() as u32;
        }
        for (name, va) in bindings {
            self.symbols.bind(name, va)?;
        }

        for (text, _name) in registry.add_code_patches() {
            let bytes = asm.assemble(text, self.curr_code_va, &self.symbols)?;
            self.curr_code_va += bytes.len() as u32;
            self.added_code.extend_from_slice(&bytes);
        }
        log::debug!("code layout: {} bytes emitted, cursor now {:#x}", self.added_code.len(), self.curr_code_va);
        Ok(())
    }

    /// Phase 3: reassemble each `InlineReplace` target in place. The
    /// assembled length must equal the original instruction's length.
    pub fn apply_inline_replacements(
        &self,
        image: &mut ImageBuffer,
        registry: &PatchRegistry,
        asm: &dyn Assembler,
        disasm: &dyn Disassembler,
    ) -> Result<()> {
        for (va, text) in registry.inline_replace_patches() {
            let probe = read_instruction_probe(image, va)?;
            let decoded = disasm.decode(&probe, va)?;
            let original = decoded
                .first()
                .ok_or_else(|| Error::AssemblerError(format!("no instruction decoded at {:#x}", va)))?;
            let original_len = original.bytes.len();

            let assembled = asm.assemble(text, va, &self.symbols)?;
            if assembled.len() != original_len {
                return Err(Error::LengthMismatch(va, original_len, assembled.len()));
            }
            image.patch(va, &assembled)?;
        }
        Ok(())
    }
}

/// Reads the largest window up to [`MAX_X86_INSTR_LEN`] bytes that the
/// loader can still resolve starting at `va`, shrinking until one
/// succeeds. There is no CFG-reported size for a lone `InlineReplace`
/// target, only the instruction's start address.
pub(crate) fn read_instruction_probe(image: &ImageBuffer, va: u32) -> Result<Vec<u8>> {
    for len in (1..=MAX_X86_INSTR_LEN).rev() {
        if let Ok(bytes) = image.read(va, len) {
            return Ok(bytes);
        }
    }
    Err(Error::InvalidVAddr(va))
}
