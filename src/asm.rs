//! The assembler/disassembler collaborators and the movability oracle
//! built on top of disassembly.

use crate::error::Result;
use crate::patch::SymbolMap;

/// A decoded instruction: address, raw bytes, and its textual
/// mnemonic+operands form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u32,
    pub bytes: Vec<u8>,
    pub text: String,
}

impl Instruction {
    pub fn end(&self) -> u32 {
        self.address + self.bytes.len() as u32
    }
}

/// How a displaced instruction relates to the overwritten trampoline
/// range `Ω` during a detour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwritten {
    /// Byte range disjoint from `Ω`.
    Out,
    /// Intersects `Ω`, address strictly before the culprit.
    Pre,
    /// Intersects `Ω`, address equal to the culprit's.
    Culprit,
    /// Intersects `Ω`, address strictly after the culprit.
    Post,
}

/// An x86 assembler: compiles source text to bytes given a base address
/// and a symbol map. Out of scope beyond this interface.
pub trait Assembler {
    /// Assembles `text` at `base_va` against the final symbol map.
    fn assemble(&self, text: &str, base_va: u32, symbols: &SymbolMap) -> Result<Vec<u8>>;

    /// Assembles `text` at `base_va` against a placeholder symbol map:
    /// unresolved names encode to a length-stable stand-in. Used only
    /// to measure length during compile pass 1.
    fn assemble_with_placeholder_symbols(&self, text: &str, base_va: u32) -> Result<Vec<u8>>;

    /// Encodes a 5-byte relative jump from `from_va` to `to_va`.
    fn emit_jmp(&self, from_va: u32, to_va: u32) -> Result<[u8; 5]>;
}

/// An x86 disassembler: decodes a byte buffer loaded at `base_va` into
/// an ordered instruction list. Out of scope beyond this interface.
pub trait Disassembler {
    fn decode(&self, bytes: &[u8], base_va: u32) -> Result<Vec<Instruction>>;
}

/// Three bases chosen to exercise low, mid, and high 32-bit address
/// spaces.
const MOVABILITY_PROBE_BASES: [u32; 3] = [0x0000_0000, 0x07F0_0000, 0xFE00_0000];

/// Decides whether a single decoded instruction's bytes are
/// position-independent: movable iff the textual representation is
/// byte-identical when decoded as if loaded at each of three distinct
/// bases. Conservative: false negatives are acceptable, false
/// positives are not.
pub fn is_movable(instr_bytes: &[u8], disasm: &dyn Disassembler) -> Result<bool> {
    let mut texts = MOVABILITY_PROBE_BASES.iter().map(|&base| {
        let decoded = disasm.decode(instr_bytes, base)?;
        Ok(decoded
            .first()
            .map(|i| i.text.clone())
            .unwrap_or_default())
    });
    let first: Result<String> = texts.next().unwrap();
    let first = first?;
    for other in texts {
        if other? != first {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Disassembler stub: `mov`/`ret`-style instructions that don't
    /// embed an address are base-invariant; a stand-in for an absolute
    /// `jmp`/`call` that embeds its operand is base-dependent.
    struct FakeDisasm;
    impl Disassembler for FakeDisasm {
        fn decode(&self, bytes: &[u8], base_va: u32) -> Result<Vec<Instruction>> {
            let text = match bytes.first() {
                Some(0xC3) => "ret".to_string(),
                Some(0xB8) => "mov eax, 1".to_string(),
                // absolute call: encodes the load address into its text,
                // so it differs across probe bases.
                Some(0xE8) => format!("call {:#x}", base_va + 0x1000),
                _ => "db".to_string(),
            };
            Ok(vec![Instruction { address: base_va, bytes: bytes.to_vec(), text }])
        }
    }

    #[test]
    fn position_independent_instruction_is_movable() {
        assert!(is_movable(&[0xC3], &FakeDisasm).unwrap());
        assert!(is_movable(&[0xB8, 1, 0, 0, 0], &FakeDisasm).unwrap());
    }

    #[test]
    fn address_dependent_instruction_is_not_movable() {
        assert!(!is_movable(&[0xE8, 0, 0, 0, 0], &FakeDisasm).unwrap());
    }
}
