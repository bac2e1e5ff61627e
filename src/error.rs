use core::result;

quick_error! {
    /// Everything that can go wrong while laying out, detouring, or
    /// writing back a patched image. All variants are fatal to the
    /// `compile` call in progress; none are retried internally.
    #[derive(Debug)]
    pub enum Error {
        Io(err: ::std::io::Error) {
            from()
            display("I/O error: {}", err)
        }
        Scroll(err: scroll::Error) {
            from()
            display("decode error: {}", err)
        }
        /// A virtual address has no file-offset mapping in the loader.
        InvalidVAddr(va: u32) {
            display("invalid virtual address: {:#x}", va)
        }
        /// No basic block contains the given instruction address.
        MissingBlock(va: u32) {
            display("no block contains address {:#x}", va)
        }
        /// The detour engine could not place a trampoline for this patch.
        Detour(va: u32, cause: String) {
            display("detour at {:#x} failed: {}", va, cause)
        }
        /// An `InlineReplace` patch did not preserve instruction length.
        LengthMismatch(va: u32, expected: usize, actual: usize) {
            display("inline replace at {:#x}: expected {} bytes, got {}", va, expected, actual)
        }
        /// The program header table failed validation (bad `p_type` or `phentsize`).
        HeaderCorrupt(reason: String) {
            display("corrupt program header table: {}", reason)
        }
        /// The assembler rejected or failed to encode some source text.
        AssemblerError(reason: String) {
            display("assembler error: {}", reason)
        }
        /// The same symbol name was bound by more than one patch.
        DuplicateSymbol(name: String) {
            display("duplicate symbol name: {}", name)
        }
        /// Two `InsertDetour` patches target the same basic block.
        DetourConflict(va: u32) {
            display("multiple detours target the block containing {:#x}", va)
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
