//! Header rewriter: relocates the program-header table to end-of-file,
//! stamps the patched-marker tag, and later appends the two new
//! program headers for the injected segments.

use scroll::Pwrite;

use crate::elf::header::{Header, E_PHNUM_OFFSET, E_PHOFF_OFFSET, PATCHED_MARKER_OFFSET};
use crate::elf::program_header::{ProgramHeader, ADDED_CODE_FLAGS, ADDED_DATA_FLAGS, PT_LOAD, SIZEOF_PHDR};
use crate::error::Result;
use crate::image::ImageBuffer;

/// Result of one-time header setup: where the relocated original
/// program-header table now ends, which is where the two appended
/// segment headers will later be written.
#[derive(Debug, Clone, Copy)]
pub struct HeaderLayout {
    pub original_header_end: usize,
}

/// Returns `true` if `image` already carries the patched marker at
/// `0x34` — re-opening an already-patched image is a no-op.
pub fn is_patched(image: &ImageBuffer, marker: &str) -> bool {
    let tag = marker.as_bytes();
    if image.len() < PATCHED_MARKER_OFFSET + tag.len() {
        return false;
    }
    image.read_at(PATCHED_MARKER_OFFSET, tag.len()) == tag
}

/// Runs header setup if not already patched; a no-op (returning the
/// previously-recorded layout would require persisting it in the
/// marker, which the format doesn't do, so callers must re-derive
/// `original_header_end` themselves when re-opening — see `Patcher::new`).
pub fn setup_headers(
    image: &mut ImageBuffer,
    header: &Header,
    original_phdrs: &[ProgramHeader],
    marker: &str,
) -> Result<HeaderLayout> {
    if is_patched(image, marker) {
        log::debug!("image already carries the patched marker; header setup is a no-op");
        // The relocated table lives wherever `e_phoff` now points.
        return Ok(HeaderLayout { original_header_end: header.e_phoff as usize + original_phdrs.len() * SIZEOF_PHDR });
    }

    // Step 1: pad to 16-byte alignment.
    image.pad_to(0x10);

    // Step 2: point e_phoff at the current end-of-file.
    let new_phoff = image.len() as u32;
    image.write_u32_at(E_PHOFF_OFFSET, new_phoff)?;

    // Step 3: append a verbatim copy of every original program header.
    for phdr in original_phdrs {
        let mut buf = [0u8; SIZEOF_PHDR];
        buf.pwrite_with(*phdr, 0, scroll::LE)?;
        image.append(&buf);
    }
    let original_header_end = image.len();
    log::debug!("relocated {} program headers to end-of-file; original_header_end = {:#x}",
        original_phdrs.len(), original_header_end);

    // Step 4: stamp the patched marker, deliberately overwriting the
    // first original program header's old location.
    image.overwrite_at(PATCHED_MARKER_OFFSET, marker.as_bytes());

    Ok(HeaderLayout { original_header_end })
}

/// Writes the two added-segment program headers at `layout`'s position
/// and increments `e_phnum` by 2. Run after the data and code layout
/// phases, once their final lengths are known.
pub fn set_added_segment_headers(
    image: &mut ImageBuffer,
    layout: HeaderLayout,
    code_file_off: u32,
    code_va: u32,
    code_len: u32,
    data_file_off: u32,
    data_va: u32,
    data_len: u32,
) -> Result<()> {
    let code_hdr = ProgramHeader::new(PT_LOAD, code_file_off, code_va, code_len, ADDED_CODE_FLAGS);
    let data_hdr = ProgramHeader::new(PT_LOAD, data_file_off, data_va, data_len, ADDED_DATA_FLAGS);

    let mut buf = [0u8; SIZEOF_PHDR];
    buf.pwrite_with(code_hdr, 0, scroll::LE)?;
    image.overwrite_at(layout.original_header_end, &buf);

    let mut buf = [0u8; SIZEOF_PHDR];
    buf.pwrite_with(data_hdr, 0, scroll::LE)?;
    image.overwrite_at(layout.original_header_end + SIZEOF_PHDR, &buf);

    let phnum = image.read_u16_at(E_PHNUM_OFFSET)?;
    image.write_u16_at(E_PHNUM_OFFSET, phnum + 2)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::header::{Header, SIZEOF_EHDR};
    use crate::elf::program_header::{PF_R, PF_W, PF_X};
    use crate::loader::SegmentLoader;

    fn sample_header(phoff: u32, phnum: u16) -> Header {
        Header {
            e_ident: [0x7f, b'E', b'L', b'F', 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            e_type: 2,
            e_machine: 3,
            e_version: 1,
            e_entry: 0x8048000,
            e_phoff: phoff,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: SIZEOF_EHDR as u16,
            e_phentsize: 32,
            e_phnum: phnum,
            e_shentsize: 0,
            e_shnum: 0,
            e_shstrndx: 0,
        }
    }

    fn fresh_image() -> ImageBuffer {
        let loader = SegmentLoader::new(vec![ProgramHeader::new(
            PT_LOAD, 0, 0x8048000, 0x200, PF_R | PF_X,
        )]);
        let mut bytes = vec![0u8; 0x200];
        bytes[0..4].copy_from_slice(b"\x7fELF");
        ImageBuffer::new(bytes, Box::new(loader), 0x1000)
    }

    #[test]
    fn setup_is_idempotent() {
        let header = sample_header(SIZEOF_EHDR as u32, 1);
        let phdrs = vec![ProgramHeader::new(PT_LOAD, 0, 0x8048000, 0x200, PF_R | PF_X)];

        let mut img = fresh_image();
        let layout1 = setup_headers(&mut img, &header, &phdrs, "SHELLPHISH\0").unwrap();
        let snapshot = img.as_slice().to_vec();

        // Re-running setup on the now-marked image must be a no-op.
        let layout2 = setup_headers(&mut img, &header, &phdrs, "SHELLPHISH\0").unwrap();
        assert_eq!(img.as_slice(), snapshot.as_slice());
        assert_eq!(layout1.original_header_end, layout2.original_header_end);
    }

    #[test]
    fn setup_relocates_table_and_stamps_marker() {
        let header = sample_header(SIZEOF_EHDR as u32, 1);
        let phdrs = vec![ProgramHeader::new(PT_LOAD, 0, 0x8048000, 0x200, PF_R | PF_X)];
        let mut img = fresh_image();
        let before_len = img.len();
        let layout = setup_headers(&mut img, &header, &phdrs, "SHELLPHISH\0").unwrap();

        assert!(layout.original_header_end > before_len);
        assert!(is_patched(&img, "SHELLPHISH\0"));
        let phoff = img.read_at(E_PHOFF_OFFSET, 4);
        assert_ne!(phoff, [0, 0, 0, 0]);
    }

    #[test]
    fn added_segment_headers_are_appended_and_phnum_bumped() {
        let header = sample_header(SIZEOF_EHDR as u32, 1);
        let phdrs = vec![ProgramHeader::new(PT_LOAD, 0, 0x8048000, 0x200, PF_R | PF_X)];
        let mut img = fresh_image();
        let layout = setup_headers(&mut img, &header, &phdrs, "SHELLPHISH\0").unwrap();

        set_added_segment_headers(&mut img, layout, 0x2000, 0x0900_0000, 0x10, 0x3000, 0x0910_0000, 0x20).unwrap();

        let phnum = img.read_u16_at(E_PHNUM_OFFSET).unwrap();
        assert_eq!(phnum, 3);

        let code: ProgramHeader = {
            use scroll::Pread;
            img.read_at(layout.original_header_end, SIZEOF_PHDR).pread_with(0, scroll::LE).unwrap()
        };
        assert_eq!(code.p_vaddr, 0x0900_0000);
        assert_eq!(code.p_flags, PF_R | PF_X);

        let data: ProgramHeader = {
            use scroll::Pread;
            img.read_at(layout.original_header_end + SIZEOF_PHDR, SIZEOF_PHDR)
                .pread_with(0, scroll::LE)
                .unwrap()
        };
        assert_eq!(data.p_vaddr, 0x0910_0000);
        assert_eq!(data.p_flags, PF_R | PF_W);
    }
}
