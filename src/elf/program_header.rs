//! Program-header table entries, 32-bit only.

use scroll::{Pread, Pwrite};

use crate::error::{Error, Result};

/// Size in bytes of one program-header record.
pub const SIZEOF_PHDR: usize = 32;

pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_PHDR: u32 = 6;
pub const PT_GNU_STACK: u32 = 0x6474_E551;
pub const PT_CGCPOV2: u32 = 0x6CCC_CCCC;

/// Segment is executable.
pub const PF_X: u32 = 1 << 0;
/// Segment is writable.
pub const PF_W: u32 = 1 << 1;
/// Segment is readable.
pub const PF_R: u32 = 1 << 2;

/// Flags for the appended RX code segment.
pub const ADDED_CODE_FLAGS: u32 = PF_R | PF_X;
/// Flags for the appended RW data segment.
pub const ADDED_DATA_FLAGS: u32 = PF_R | PF_W;

/// One segment descriptor: eight 32-bit little-endian words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pread, Pwrite)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

impl ProgramHeader {
    pub fn new(p_type: u32, p_offset: u32, p_vaddr: u32, size: u32, flags: u32) -> ProgramHeader {
        ProgramHeader {
            p_type,
            p_offset,
            p_vaddr,
            p_paddr: 0,
            p_filesz: size,
            p_memsz: size,
            p_flags: flags,
            p_align: 0,
        }
    }

    /// `"RWX"`-style rendering of `p_flags`, used only for diagnostics.
    pub fn perms(&self) -> String {
        let mut s = String::new();
        if self.p_flags & PF_R != 0 {
            s.push('R');
        }
        if self.p_flags & PF_W != 0 {
            s.push('W');
        }
        if self.p_flags & PF_X != 0 {
            s.push('X');
        }
        s
    }

    /// Validates `p_type` against the closed set this format allows.
    pub fn validate_type(&self) -> Result<()> {
        match self.p_type {
            PT_NULL | PT_LOAD | PT_PHDR | PT_GNU_STACK | PT_CGCPOV2 => Ok(()),
            other => Err(Error::HeaderCorrupt(format!("unexpected p_type {:#x}", other))),
        }
    }

    /// Reads `count` consecutive program headers starting at `offset`.
    pub fn parse_table(bytes: &[u8], offset: usize, count: usize) -> Result<Vec<ProgramHeader>> {
        let mut phdrs = Vec::with_capacity(count);
        let mut off = offset;
        for _ in 0..count {
            let phdr: ProgramHeader = bytes.pread_with(off, scroll::LE)?;
            phdr.validate_type()?;
            off += SIZEOF_PHDR;
            phdrs.push(phdr);
        }
        Ok(phdrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perms_render_in_rwx_order() {
        let ph = ProgramHeader::new(PT_LOAD, 0, 0, 0, PF_R | PF_W | PF_X);
        assert_eq!(ph.perms(), "RWX");
        let ph = ProgramHeader::new(PT_LOAD, 0, 0, 0, PF_R);
        assert_eq!(ph.perms(), "R");
    }

    #[test]
    fn validate_type_rejects_unknown() {
        let ph = ProgramHeader::new(0x1234, 0, 0, 0, 0);
        assert!(ph.validate_type().is_err());
    }

    #[test]
    fn validate_type_accepts_closed_set() {
        for t in [PT_NULL, PT_LOAD, PT_PHDR, PT_GNU_STACK, PT_CGCPOV2] {
            let ph = ProgramHeader::new(t, 0, 0, 0, 0);
            assert!(ph.validate_type().is_ok());
        }
    }

    #[test]
    fn parse_table_round_trips() {
        let original = vec![
            ProgramHeader::new(PT_LOAD, 0x1000, 0x8048000, 0x500, PF_R | PF_X),
            ProgramHeader::new(PT_LOAD, 0x2000, 0x8049000, 0x200, PF_R | PF_W),
        ];
        let mut buf = vec![0u8; SIZEOF_PHDR * original.len()];
        for (i, ph) in original.iter().enumerate() {
            buf.pwrite_with(*ph, i * SIZEOF_PHDR, scroll::LE).unwrap();
        }
        let parsed = ProgramHeader::parse_table(&buf, 0, original.len()).unwrap();
        assert_eq!(parsed, original);
    }
}
