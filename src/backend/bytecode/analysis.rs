//! Control-flow aware stack depth analysis
//!
//! Walks every path through a body from offset 0, tracking the operand
//! stack depth at each instruction. Paths that meet at a join point must
//! agree on the depth.

use std::collections::{HashMap, VecDeque};

use super::body::{decode_all, BodyError, Instruction};

/// Compute the maximum operand stack depth of `code`
///
/// Fails on undecodable code, stack underflow, jumps into the middle of an
/// instruction, inconsistent depths at join points and paths that run past
/// the last instruction.
pub fn max_stack_depth(code: &[u8]) -> Result<u16, BodyError> {
    if code.is_empty() {
        return Ok(0);
    }

    let instructions = decode_all(code)?;
    let index_of: HashMap<usize, usize> = instructions
        .iter()
        .enumerate()
        .map(|(i, instr)| (instr.offset, i))
        .collect();

    let mut depth_at: Vec<Option<u16>> = vec![None; instructions.len()];
    let mut worklist = VecDeque::new();
    worklist.push_back((0usize, 0u16));
    let mut max_depth = 0u16;

    while let Some((index, depth)) = worklist.pop_front() {
        match depth_at[index] {
            Some(seen) if seen == depth => continue,
            Some(seen) => {
                return Err(BodyError::InconsistentStack {
                    offset: instructions[index].offset,
                    expected: seen,
                    found: depth,
                })
            }
            None => depth_at[index] = Some(depth),
        }

        let instr = &instructions[index];
        let effect = instr.stack_effect();
        let after = depth
            .checked_sub(effect.pops)
            .ok_or(BodyError::StackUnderflow { offset: instr.offset })?
            .checked_add(effect.pushes)
            .ok_or(BodyError::StackTooDeep)?;
        max_depth = max_depth.max(after);

        for succ in successors(instr, &index_of, instructions.len())? {
            worklist.push_back((succ, after));
        }
    }

    Ok(max_depth)
}

/// Indices of the instructions that may execute after `instr`
fn successors(
    instr: &Instruction,
    index_of: &HashMap<usize, usize>,
    count: usize,
) -> Result<Vec<usize>, BodyError> {
    let mut succ = Vec::with_capacity(2);

    if instr.opcode.is_jump() {
        let target = instr
            .jump_target()
            .and_then(|t| index_of.get(&t).copied())
            .ok_or_else(|| BodyError::InvalidJumpTarget {
                offset: instr.offset,
                target: target_of(instr),
            })?;
        succ.push(target);
    }

    if !instr.opcode.is_terminator() {
        let next = index_of
            .get(&instr.next_offset())
            .copied()
            .filter(|&i| i < count)
            .ok_or(BodyError::FallsOffEnd { offset: instr.offset })?;
        succ.push(next);
    }

    Ok(succ)
}

fn target_of(instr: &Instruction) -> isize {
    match instr.operand {
        super::body::Operand::Offset(rel) => instr.next_offset() as isize + rel as isize,
        _ => instr.offset as isize,
    }
}
