//! Detour engine: the core algorithm. Picks the 5-byte trampoline slot
//! inside a block, classifies displaced instructions, emits the
//! trampoline stub, and writes back NOPs + jump.

use crate::asm::{is_movable, Assembler, Disassembler, Instruction, Overwritten};
use crate::cfg::BlockLocator;
use crate::error::{Error, Result};
use crate::image::ImageBuffer;
use crate::patch::SymbolMap;

/// Width of the trampoline jump.
const TRAMPOLINE_LEN: u32 = 5;
/// Offsets tried for the trampoline start, relative to the culprit
/// address, tried closest-preceding-byte first.
const TRAMPOLINE_OFFSETS: [i32; 6] = [-5, -4, -3, -2, -1, 0];

/// Inserts a detour at `target_va`. Appends the assembled stub bytes to
/// `image` at `code_cursor` and returns the stub's encoded length, so
/// the caller can advance its code cursor.
#[allow(clippy::too_many_arguments)]
pub fn insert_detour(
    image: &mut ImageBuffer,
    locator: &BlockLocator,
    disasm: &dyn Disassembler,
    asm: &dyn Assembler,
    symbols: &SymbolMap,
    target_va: u32,
    user_asm: &str,
    code_cursor: u32,
) -> Result<Vec<u8>> {
    // Step 1: locate the block and decode its instructions.
    let block = locator.block_containing(target_va)?;
    let block_bytes = image.read(block.start_va, block.size)?;
    let instructions = disasm.decode(&block_bytes, block.start_va)?;
    log::debug!(
        "inserting detour for target {:#x} in block {:#x} (size {})",
        target_va, block.start_va, block.size
    );

    // Step 2: the movable window.
    let window = movable_window(&instructions, disasm)?;
    if window.is_empty() {
        return Err(Error::Detour(target_va, "no movable instructions".into()));
    }
    let window_start = window[0].address;
    let window_end = window.last().unwrap().end();
    log::debug!("movable window [{:#x}, {:#x})", window_start, window_end);

    // Step 3: choose the trampoline slot.
    let trampoline_start = TRAMPOLINE_OFFSETS
        .iter()
        .map(|&p| target_va as i64 + p as i64)
        .find(|&start| {
            start >= window_start as i64
                && start + TRAMPOLINE_LEN as i64 <= window_end as i64
        })
        .ok_or_else(|| Error::Detour(target_va, "no space in bb".into()))? as u32;
    log::debug!("trampoline slot at {:#x}", trampoline_start);
    let overwritten_range = (trampoline_start, trampoline_start + TRAMPOLINE_LEN);

    // Step 4: classify displaced instructions.
    let mut pre = Vec::new();
    let mut culprit = Vec::new();
    let mut post = Vec::new();
    let mut any_overwritten = false;
    for instr in &window {
        let tag = classify(instr, overwritten_range, target_va);
        log::trace!("{:#x}: {:?}", instr.address, tag);
        match tag {
            Overwritten::Out => {}
            Overwritten::Pre => {
                any_overwritten = true;
                pre.push(instr);
            }
            Overwritten::Culprit => {
                any_overwritten = true;
                culprit.push(instr);
            }
            Overwritten::Post => {
                any_overwritten = true;
                post.push(instr);
            }
        }
    }
    if !any_overwritten {
        return Err(Error::Detour(target_va, "trampoline overlapped no instruction".into()));
    }

    // Step 5: NOP out every overlapped instruction.
    for instr in pre.iter().chain(culprit.iter()).chain(post.iter()) {
        image.patch(instr.address, &vec![0x90u8; instr.bytes.len()])?;
    }

    // Step 6: emit the trampoline jump.
    let jmp = asm.emit_jmp(trampoline_start, code_cursor)?;
    image.patch(trampoline_start, &jmp)?;

    // Step 7: build the relocation stub text.
    let jmp_back_target = pre
        .iter()
        .chain(culprit.iter())
        .chain(post.iter())
        .map(|i| i.end())
        .max()
        .expect("any_overwritten guarantees at least one instruction");

    let mut stub = String::new();
    for _ in 0..5 {
        stub.push_str("nop\n");
    }
    for instr in &pre {
        stub.push_str(&instr.text);
        stub.push('\n');
    }
    stub.push_str("; --- custom code start\n");
    stub.push_str(user_asm);
    stub.push_str("\n; --- custom code end\n");
    for instr in &culprit {
        stub.push_str(&instr.text);
        stub.push('\n');
    }
    for instr in &post {
        stub.push_str(&instr.text);
        stub.push('\n');
    }
    stub.push_str(&format!("jmp {:#x}\n", jmp_back_target));

    // Step 8: assemble and append.
    let stub_bytes = asm.assemble(&stub, code_cursor, symbols)?;
    log::debug!("detour stub at {:#x}: {} bytes, returns to {:#x}", code_cursor, stub_bytes.len(), jmp_back_target);
    image.append(&stub_bytes);
    Ok(stub_bytes)
}

/// If the block's terminating instruction is movable, the whole block
/// is the window; otherwise the terminator (typically a branch) stays
/// in place. Every instruction that ends up in the window is checked
/// for movability explicitly rather than assumed of the block body.
fn movable_window(instructions: &[Instruction], disasm: &dyn Disassembler) -> Result<Vec<Instruction>> {
    if instructions.is_empty() {
        return Ok(Vec::new());
    }
    let last = instructions.last().unwrap();
    let window: &[Instruction] = if is_movable(&last.bytes, disasm)? {
        instructions
    } else {
        &instructions[..instructions.len() - 1]
    };
    for instr in window {
        if !is_movable(&instr.bytes, disasm)? {
            return Err(Error::Detour(
                instr.address,
                "movable window contains a non-movable instruction".into(),
            ));
        }
    }
    Ok(window.to_vec())
}

/// Classifies a displaced instruction relative to the overwritten range.
fn classify(instr: &Instruction, overwritten: (u32, u32), culprit_va: u32) -> Overwritten {
    let instr_range = (instr.address, instr.end());
    let disjoint = instr_range.1 <= overwritten.0 || instr_range.0 >= overwritten.1;
    if disjoint {
        return Overwritten::Out;
    }
    if instr.address < culprit_va {
        Overwritten::Pre
    } else if instr.address == culprit_va {
        Overwritten::Culprit
    } else {
        Overwritten::Post
    }
}
