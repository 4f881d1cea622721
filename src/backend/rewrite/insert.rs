//! Single-byte instruction insertion with jump fix-up.
//!
//! Works like dead code elimination in reverse: build an old → new offset
//! map, copy instructions with the inserted bytes interleaved, then rewrite
//! every jump offset through the map.

use std::collections::{BTreeSet, HashMap};

use crate::backend::bytecode::{Instruction, Opcode, Operand};

/// Insert `opcode` immediately before each instruction whose offset is in
/// `at`; an offset equal to the code length appends at the end.
///
/// A jump that targets an instruction with an insertion in front of it lands
/// on the inserted byte. Returns the offset of the first jump whose new
/// displacement no longer fits in an `i16`.
pub(super) fn insert_before(
    instructions: &[Instruction],
    code_len: usize,
    at: &BTreeSet<usize>,
    opcode: Opcode,
) -> Result<Vec<u8>, usize> {
    debug_assert_eq!(opcode.immediate_size(), 0);

    // Build offset map: old instruction start -> new start of its inserted prefix
    let mut offset_map: HashMap<usize, usize> = HashMap::with_capacity(instructions.len() + 1);
    let mut new_offset = 0usize;
    for instr in instructions {
        offset_map.insert(instr.offset, new_offset);
        if at.contains(&instr.offset) {
            new_offset += 1;
        }
        new_offset += instr.size();
    }
    offset_map.insert(code_len, new_offset);

    let mut result = Vec::with_capacity(code_len + at.len());
    for instr in instructions {
        if at.contains(&instr.offset) {
            result.push(opcode.to_byte());
        }

        match (instr.operand, instr.jump_target()) {
            (Operand::Offset(_), Some(old_target)) => {
                let new_end = result.len() + instr.size();
                let new_target = offset_map.get(&old_target).copied().ok_or(instr.offset)?;
                let rel = i16::try_from(new_target as isize - new_end as isize).map_err(|_| instr.offset)?;
                Instruction {
                    offset: result.len(),
                    opcode: instr.opcode,
                    operand: Operand::Offset(rel),
                }
                .encode_into(&mut result);
            }
            _ => instr.encode_into(&mut result),
        }
    }
    if at.contains(&code_len) {
        result.push(opcode.to_byte());
    }

    Ok(result)
}
