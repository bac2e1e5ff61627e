//! Tunables for where added segments and the patched-marker tag live.
//!
//! Not a front-end configuration file format — just the handful of
//! constants the reference toolchain hard-codes, exposed so callers
//! can override them while keeping the defaults bit-compatible with
//! already-patched images.

/// Default base VA for the appended RX code segment.
pub const DEFAULT_ADDED_CODE_VA: u32 = 0x0900_0000;
/// Default base VA for the appended RW data segment.
pub const DEFAULT_ADDED_DATA_VA: u32 = 0x0910_0000;
/// Default idempotency tag stamped at file offset `0x34`.
pub const DEFAULT_PATCHED_MARKER: &str = "SHELLPHISH\0";
/// Page granularity used when splitting a VA range across file-offset ranges.
pub const DEFAULT_PAGE_SIZE: u32 = 0x1000;

/// Configuration consumed by [`crate::Patcher::new`].
#[derive(Debug, Clone)]
pub struct PatcherConfig {
    /// Base VA of the appended RX code segment.
    pub added_code_va: u32,
    /// Base VA of the appended RW data segment.
    pub added_data_va: u32,
    /// Idempotency tag stamped at file offset `0x34`. Must be no more
    /// than 0x20 bytes including its terminating NUL.
    pub patched_marker: &'static str,
    /// Page size used for VA-range splitting in the image buffer.
    pub page_size: u32,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        PatcherConfig {
            added_code_va: DEFAULT_ADDED_CODE_VA,
            added_data_va: DEFAULT_ADDED_DATA_VA,
            patched_marker: DEFAULT_PATCHED_MARKER,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PatcherConfig {
    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        if self.patched_marker.len() > 0x20 {
            return Err(crate::error::Error::HeaderCorrupt(format!(
                "patched marker {:?} exceeds 0x20 bytes",
                self.patched_marker
            )));
        }
        if !self.patched_marker.ends_with('\0') {
            return Err(crate::error::Error::HeaderCorrupt(
                "patched marker must be NUL-terminated".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bases_are_bit_compatible() {
        let cfg = PatcherConfig::default();
        assert_eq!(cfg.added_code_va, 0x0900_0000);
        assert_eq!(cfg.added_data_va, 0x0910_0000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn overlong_marker_is_rejected() {
        let cfg = PatcherConfig {
            patched_marker: "THIS_TAG_IS_DEFINITELY_TOO_LONG_FOR_0X20_BYTES\0",
            ..PatcherConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
