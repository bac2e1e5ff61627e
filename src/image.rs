//! Image buffer & VA↔offset map.
//!
//! Owns the mutable bytes of the output image and translates virtual
//! address ranges into (possibly multi-segment) file-offset ranges,
//! splitting at page boundaries when a range crosses one inside the
//! original image.

use scroll::{Pread, Pwrite};

use crate::error::{Error, Result};
use crate::loader::Loader;

/// The mutable byte sequence backing the patched image, plus the
/// loader used to resolve VAs that still live in the original image
/// (added regions are addressed by file offset directly, since their
/// VA↔offset relationship is affine and tracked by the caller).
pub struct ImageBuffer {
    bytes: Vec<u8>,
    loader: Box<dyn Loader>,
    page_size: u32,
}

impl ImageBuffer {
    pub fn new(bytes: Vec<u8>, loader: Box<dyn Loader>, page_size: u32) -> ImageBuffer {
        ImageBuffer { bytes, loader, page_size }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// `va_to_off(va)`: delegates to the loader, failing with
    /// `InvalidVAddr` when unmapped.
    pub fn va_to_off(&self, va: u32) -> Result<u32> {
        self.loader.va_to_file_off(va).ok_or(Error::InvalidVAddr(va))
    }

    /// Splits `[va, va+size)` into file-offset ranges at page
    /// boundaries. The union of returned ranges covers exactly `size`
    /// bytes, in order.
    fn offset_ranges(&self, va: u32, size: u32) -> Result<Vec<(u32, u32)>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let mask = !(self.page_size - 1);
        let end = va + size - 1; // address of the last byte, inclusive
        let start_page = va & mask;
        let end_page = end & mask;

        if start_page == end_page {
            let off = self.va_to_off(va)?;
            return Ok(vec![(off, off + size)]);
        }

        let mut ranges = Vec::new();
        let first_off = self.va_to_off(va)?;
        let first_page_remaining = self.page_size - (va - start_page);
        ranges.push((first_off, first_off + first_page_remaining));

        let mut cursor = start_page + self.page_size;
        while cursor != end_page {
            let off = self.va_to_off(cursor)?;
            ranges.push((off, off + self.page_size));
            cursor += self.page_size;
        }

        let last_off = self.va_to_off(cursor)?;
        let last_len = end - end_page + 1;
        ranges.push((last_off, last_off + last_len));
        Ok(ranges)
    }

    /// `patch(va, bytes)`: writes `bytes` at virtual address `va`,
    /// transparently splitting across file-offset ranges when the VA
    /// range crosses a page boundary.
    pub fn patch(&mut self, va: u32, bytes: &[u8]) -> Result<()> {
        let ranges = self.offset_ranges(va, bytes.len() as u32)?;
        let mut cursor = 0usize;
        for (start, end) in ranges {
            let len = (end - start) as usize;
            let start = start as usize;
            self.bytes[start..start + len].copy_from_slice(&bytes[cursor..cursor + len]);
            cursor += len;
        }
        Ok(())
    }

    /// `read(va, size)`: the inverse of `patch`.
    pub fn read(&self, va: u32, size: u32) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(size as usize);
        for (start, end) in self.offset_ranges(va, size)? {
            out.extend_from_slice(&self.bytes[start as usize..end as usize]);
        }
        Ok(out)
    }

    /// Raw, offset-addressed access for header surgery that has no VA
    /// of its own (the appended program-header table, the patched
    /// marker) — these never go through `va_to_off`.
    pub fn overwrite_at(&mut self, offset: usize, data: &[u8]) {
        if offset + data.len() > self.bytes.len() {
            self.bytes.resize(offset + data.len(), 0);
        }
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn read_at(&self, offset: usize, size: usize) -> &[u8] {
        &self.bytes[offset..offset + size]
    }

    pub fn append(&mut self, data: &[u8]) -> usize {
        let start = self.bytes.len();
        self.bytes.extend_from_slice(data);
        start
    }

    pub fn pad_to(&mut self, align: usize) {
        let rem = self.bytes.len() % align;
        if rem != 0 {
            self.bytes.resize(self.bytes.len() + (align - rem), 0);
        }
    }

    pub fn extend_to(&mut self, new_len: usize) {
        if new_len > self.bytes.len() {
            self.bytes.resize(new_len, 0);
        }
    }

    pub fn read_u16_at(&self, offset: usize) -> Result<u16> {
        Ok(self.bytes.pread_with(offset, scroll::LE)?)
    }

    pub fn write_u16_at(&mut self, offset: usize, value: u16) -> Result<()> {
        self.bytes.pwrite_with(value, offset, scroll::LE)?;
        Ok(())
    }

    pub fn write_u32_at(&mut self, offset: usize, value: u32) -> Result<()> {
        self.bytes.pwrite_with(value, offset, scroll::LE)?;
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::program_header::{ProgramHeader, PF_R, PF_X, PT_LOAD};
    use crate::loader::SegmentLoader;

    fn buffer(size: usize) -> ImageBuffer {
        let loader = SegmentLoader::new(vec![ProgramHeader::new(
            PT_LOAD, 0, 0x8048000, size as u32, PF_R | PF_X,
        )]);
        ImageBuffer::new(vec![0u8; size], Box::new(loader), 0x1000)
    }

    #[test]
    fn patch_and_read_round_trip_within_one_page() {
        let mut img = buffer(0x2000);
        img.patch(0x8048100, &[1, 2, 3, 4]).unwrap();
        assert_eq!(img.read(0x8048100, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn patch_splits_across_a_page_boundary() {
        let mut img = buffer(0x3000);
        // VA 0x8048FFE, size 4: spans two pages (ends at 0x8049001).
        let data = vec![0xAA, 0xBB, 0xCC, 0xDD];
        img.patch(0x8048FFE, &data).unwrap();
        assert_eq!(img.read(0x8048FFE, 4).unwrap(), data);
        // Spot-check the underlying bytes landed at the matching offsets.
        assert_eq!(img.read_at(0xFFE, 2), &[0xAA, 0xBB]);
        assert_eq!(img.read_at(0x1000, 2), &[0xCC, 0xDD]);
    }

    #[test]
    fn va_to_off_fails_outside_mapped_segments() {
        let img = buffer(0x1000);
        assert!(img.va_to_off(0xDEADBEEF).is_err());
    }
}
