//! The top-level entry point: owns the image, the patch registry, and
//! the layout state a `compile()` call consumes.

use std::collections::HashSet;
use std::path::Path;

use crate::asm::{Assembler, Disassembler};
use crate::cfg::{BlockLocator, Cfg};
use crate::compile::Compiler;
use crate::config::PatcherConfig;
use crate::detour;
use crate::elf::header::Header;
use crate::elf::program_header::{ProgramHeader, SIZEOF_PHDR};
use crate::error::{Error, Result};
use crate::header_rewriter::{self, HeaderLayout};
use crate::image::ImageBuffer;
use crate::loader::SegmentLoader;
use crate::patch::PatchRegistry;

/// Owns one image's worth of patching state across repeated `compile()`
/// calls. Single-threaded, non-suspending: one `Patcher` mutates one
/// image buffer it exclusively owns.
pub struct Patcher {
    image: ImageBuffer,
    config: PatcherConfig,
    header_layout: HeaderLayout,
    original_phdrs: Vec<ProgramHeader>,
    registry: PatchRegistry,
    /// Bytes right after header setup, before any `compile()` — the
    /// state re-entering `compile()` resets back to.
    post_header_snapshot: Vec<u8>,
}

impl Patcher {
    /// Reads `path` and runs header setup, or detects it has already
    /// run and is a no-op.
    pub fn open<P: AsRef<Path>>(path: P, config: PatcherConfig) -> Result<Patcher> {
        let bytes = std::fs::read(path)?;
        Patcher::from_bytes(bytes, config)
    }

    pub fn from_bytes(bytes: Vec<u8>, config: PatcherConfig) -> Result<Patcher> {
        config.validate()?;
        let header = Header::parse(&bytes)?;
        let original_phdrs =
            ProgramHeader::parse_table(&bytes, header.e_phoff as usize, header.e_phnum as usize)?;

        let loader = SegmentLoader::new(original_phdrs.clone());
        let mut image = ImageBuffer::new(bytes, Box::new(loader), config.page_size);
        let header_layout =
            header_rewriter::setup_headers(&mut image, &header, &original_phdrs, config.patched_marker)?;
        let post_header_snapshot = image.as_slice().to_vec();

        Ok(Patcher {
            image,
            config,
            header_layout,
            original_phdrs,
            registry: PatchRegistry::new(),
            post_header_snapshot,
        })
    }

    pub fn add_data(&mut self, data: Vec<u8>, name: Option<String>) {
        self.registry.add_data(data, name);
    }

    pub fn add_code(&mut self, asm_text: impl Into<String>, name: Option<String>) {
        self.registry.add_code(asm_text.into(), name);
    }

    pub fn inline_replace(&mut self, instr_vaddr: u32, asm_text: impl Into<String>) {
        self.registry.inline_replace(instr_vaddr, asm_text.into());
    }

    pub fn insert_detour(&mut self, instr_vaddr: u32, asm_text: impl Into<String>) {
        self.registry.insert_detour(instr_vaddr, asm_text.into());
    }

    /// Resets the image to its post-header-setup state and runs all
    /// five compile phases in their fixed, insertion-ordered sequence:
    /// data → code → inline → detours → headers, never reordered.
    pub fn compile(&mut self, cfg: &dyn Cfg, asm: &dyn Assembler, disasm: &dyn Disassembler) -> Result<()> {
        self.reset_image();

        let reserved_end = self.header_layout.original_header_end as u32 + 2 * SIZEOF_PHDR as u32;
        self.image.extend_to(round_up(reserved_end, self.config.page_size) as usize);

        let mut compiler = Compiler::new(self.config.added_data_va, self.config.added_code_va);

        // Phase 1: data layout.
        compiler.layout_data(&self.registry)?;
        let data_file_start = self.image.len() as u32;
        self.image.append(&compiler.added_data);
        log::debug!("phase 1 done: data region at file offset {:#x}", data_file_start);

        // Phase 2: two-pass code symbol resolution.
        self.image.pad_to(self.config.page_size as usize);
        let code_file_start = self.image.len() as u32;
        compiler.layout_code(&self.registry, asm)?;
        self.image.append(&compiler.added_code);
        log::debug!("phase 2 done: code region at file offset {:#x}", code_file_start);

        // Phase 3: inline replacements.
        compiler.apply_inline_replacements(&mut self.image, &self.registry, asm, disasm)?;
        log::debug!("phase 3 done: inline replacements applied");

        // Phase 4: detours, with same-block conflict detection — two
        // detours targeting the same block are an enforced error.
        let locator = BlockLocator::new(cfg);
        let mut seen_blocks = HashSet::new();
        let mut targets = Vec::new();
        for (va, text) in self.registry.insert_detour_patches() {
            let block = locator.block_containing(va)?;
            if !seen_blocks.insert(block.start_va) {
                return Err(Error::DetourConflict(va));
            }
            targets.push((va, text));
        }
        for (va, text) in targets {
            let stub = detour::insert_detour(
                &mut self.image,
                &locator,
                disasm,
                asm,
                &compiler.symbols,
                va,
                text,
                compiler.curr_code_va,
            )?;
            compiler.curr_code_va += stub.len() as u32;
        }
        log::debug!("phase 4 done: {} detours applied", seen_blocks.len());

        // Phase 5: write the two added-segment program headers, now
        // that all added code (phase 2 + phase 4) is finalized.
        let data_len = compiler.added_data.len() as u32;
        let code_len = self.image.len() as u32 - code_file_start;
        header_rewriter::set_added_segment_headers(
            &mut self.image,
            self.header_layout,
            code_file_start,
            self.config.added_code_va,
            code_len,
            data_file_start,
            self.config.added_data_va,
            data_len,
        )?;
        log::debug!("phase 5 done: code_len={:#x} data_len={:#x}", code_len, data_len);

        Ok(())
    }

    fn reset_image(&mut self) {
        let loader = SegmentLoader::new(self.original_phdrs.clone());
        self.image = ImageBuffer::new(self.post_header_snapshot.clone(), Box::new(loader), self.config.page_size);
    }

    /// Writes the patched image to `path` with mode `0o755`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.image.as_slice())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path.as_ref(), std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }

    /// Exposes the in-memory patched image without touching disk,
    /// primarily for tests.
    pub fn image_bytes(&self) -> &[u8] {
        self.image.as_slice()
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}
