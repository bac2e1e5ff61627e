//! Fixed-layout 32-bit ELF header, as read by `Patcher::setup_headers`.
//!
//! This is intentionally narrower than a general-purpose ELF header: the
//! target format is the CGC-style 32-bit little-endian executable, so
//! there is exactly one shape to decode, not a 32/64-bit union.

use scroll::{Pread, Pwrite};

use crate::error::{Error, Result};

/// Size in bytes of `e_ident`.
pub const SIZEOF_IDENT: usize = 16;
/// Size in bytes of the full header.
pub const SIZEOF_EHDR: usize = 52;

/// The ELF magic number.
pub const ELFMAG: &[u8; 4] = b"\x7FELF";

/// File offset of `e_phoff` within the header.
pub const E_PHOFF_OFFSET: usize = 0x1C;
/// File offset of `e_phnum` within the header.
pub const E_PHNUM_OFFSET: usize = 0x2C;
/// File offset of the patched-marker tag.
pub const PATCHED_MARKER_OFFSET: usize = 0x34;

/// Required `e_phentsize` for this format.
pub const PHENTSIZE: u16 = 32;

/// A 32-bit little-endian ELF header, decoded field-by-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite)]
pub struct Header {
    pub e_ident: [u8; SIZEOF_IDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl Header {
    /// Parses the header from the start of `bytes` and validates the
    /// invariants `setup_headers` depends on: `phentsize` must be 32.
    pub fn parse(bytes: &[u8]) -> Result<Header> {
        let header: Header = bytes.pread_with(0, scroll::LE)?;
        if &header.e_ident[0..4] != ELFMAG {
            return Err(Error::HeaderCorrupt("bad ELF magic".into()));
        }
        if header.e_phentsize != PHENTSIZE {
            return Err(Error::HeaderCorrupt(format!(
                "phentsize {} != {}",
                header.e_phentsize, PHENTSIZE
            )));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(phnum: u16) -> Vec<u8> {
        let h = Header {
            e_ident: [0x7f, b'E', b'L', b'F', 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            e_type: 2,
            e_machine: 3,
            e_version: 1,
            e_entry: 0x8048000,
            e_phoff: SIZEOF_EHDR as u32,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: SIZEOF_EHDR as u16,
            e_phentsize: PHENTSIZE,
            e_phnum: phnum,
            e_shentsize: 0,
            e_shnum: 0,
            e_shstrndx: 0,
        };
        let mut buf = vec![0u8; SIZEOF_EHDR];
        buf.pwrite_with(h, 0, scroll::LE).unwrap();
        buf
    }

    #[test]
    fn parses_valid_header() {
        let buf = sample_header(2);
        let header = Header::parse(&buf).unwrap();
        assert_eq!(header.e_phnum, 2);
        assert_eq!(header.e_phentsize, PHENTSIZE);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = sample_header(2);
        buf[0] = 0;
        assert!(Header::parse(&buf).is_err());
    }

    #[test]
    fn rejects_bad_phentsize() {
        let mut buf = sample_header(2);
        buf.pwrite_with(16u16, E_PHNUM_OFFSET - 2, scroll::LE).unwrap();
        assert!(Header::parse(&buf).is_err());
    }
}
