//! Dataflow Patch Pass
//!
//! Callers of a rewritten function now receive a deferred value where they
//! used to receive a plain one. This pass replays each body left to right
//! over an abstract stack of {deferred, plain} tags and inserts `Unwrap`
//! right after the instruction that produced a deferred operand of an
//! arithmetic, comparison or unary instruction, a conditional jump, or a
//! call to a function that was not rewritten.
//!
//! Deferred arguments to a watched call are left alone: the stub forwards
//! them and the runtime resolves them before the hidden implementation
//! runs.
//!
//! # Soundness
//!
//! This is a best-effort heuristic, not a sound analysis:
//!
//! - Branches are not modelled. Jumps are replayed as fall-through and join
//!   points are never merged, so tags after control flow can be wrong.
//! - Only calls to watched functions produce `Deferred`. Every other call,
//!   array element and stack shuffle (`Dup`, `Swap`) yields `Plain`.
//! - Consumption is only recognised at operators, conditional jumps, calls
//!   (and, with `PatchStrategy::AtStore`, at local stores). Values flowing
//!   into arrays or returned from the function are not unwrapped.
//!
//! A missed consumption shows up at run time as
//! `VmError::UnresolvedDeferred`. Deferred tags still live when a branch is
//! reached are reported with `warn!`, or fail the rewrite in strict mode.

use std::collections::{BTreeSet, HashSet};

use serde::Deserialize;
use tracing::{trace, warn};

use super::error::{RewriteError, RewriteResult};
use super::insert::insert_before;
use crate::backend::bytecode::{FunctionBody, Instruction, Opcode, Operand, SymbolRef};

/// Where resolution of a watched call's result is forced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStrategy {
    /// Unwrap right before an operator consumes the value; locals holding a
    /// deferred value are retyped to `Deferred(T)`
    #[default]
    AtConsumption,
    /// Unwrap a deferred value as it is stored into a local, keeping the
    /// local's declared type
    AtStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Deferred,
    Plain,
}

/// Transient simulation value
#[derive(Debug, Clone, Copy)]
struct AbstractSlot {
    tag: Tag,
    /// Offset just past the instruction that produced this value
    after_origin: usize,
}

impl AbstractSlot {
    fn plain(after_origin: usize) -> Self {
        Self { tag: Tag::Plain, after_origin }
    }

    fn deferred(after_origin: usize) -> Self {
        Self { tag: Tag::Deferred, after_origin }
    }
}

/// Which locals hold a deferred value
#[derive(Debug, Default)]
struct LocalTags {
    /// At the instruction being replayed
    current: HashSet<u8>,
    /// At any point in the body; these get retyped
    ever_deferred: HashSet<u8>,
}

/// What the pass did to one body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchOutcome {
    pub unwraps_inserted: usize,
    pub locals_retyped: usize,
    pub branch_warnings: usize,
}

impl PatchOutcome {
    pub fn changed(&self) -> bool {
        self.unwraps_inserted > 0 || self.locals_retyped > 0
    }
}

/// Totals over a whole module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchStats {
    pub functions_scanned: usize,
    pub unwraps_inserted: usize,
    pub locals_retyped: usize,
    pub branch_warnings: usize,
}

impl PatchStats {
    pub fn record(&mut self, outcome: &PatchOutcome) {
        self.functions_scanned += 1;
        self.unwraps_inserted += outcome.unwraps_inserted;
        self.locals_retyped += outcome.locals_retyped;
        self.branch_warnings += outcome.branch_warnings;
    }
}

pub struct DataflowPass {
    /// Symbol table indices of rewritten functions
    watched: HashSet<u16>,
    strategy: PatchStrategy,
    strict_branches: bool,
}

impl DataflowPass {
    pub fn new(watched: HashSet<u16>, strategy: PatchStrategy, strict_branches: bool) -> Self {
        Self {
            watched,
            strategy,
            strict_branches,
        }
    }

    pub fn is_watched(&self, symbol: u16) -> bool {
        self.watched.contains(&symbol)
    }

    /// Patch `body` in place. `function` is only used for diagnostics.
    pub fn run(&self, function: &SymbolRef, body: &mut FunctionBody) -> RewriteResult<PatchOutcome> {
        let instructions = body.instructions().map_err(|source| RewriteError::MalformedBody {
            function: function.clone(),
            source,
        })?;

        let mut outcome = PatchOutcome::default();
        let mut stack: Vec<AbstractSlot> = Vec::new();
        let mut locals = LocalTags::default();
        let mut unwrap_at: BTreeSet<usize> = BTreeSet::new();

        for instr in &instructions {
            if instr.opcode.is_conditional_jump() {
                if let Some(condition) = stack.last_mut() {
                    if condition.tag == Tag::Deferred {
                        unwrap_at.insert(condition.after_origin);
                        condition.tag = Tag::Plain;
                    }
                }
            }
            if instr.opcode.is_jump() {
                self.check_branch(function, instr, &stack, &mut outcome)?;
            }
            self.step(instr, &mut stack, &mut locals, &mut unwrap_at);
        }

        if self.strategy == PatchStrategy::AtConsumption {
            for &index in &locals.ever_deferred {
                if let Some(slot) = body.locals().get(index as usize) {
                    if !slot.ty.is_deferred() {
                        let ty = slot.ty.clone().deferred();
                        body.retype_local(index, ty);
                        outcome.locals_retyped += 1;
                    }
                }
            }
        }

        if !unwrap_at.is_empty() {
            let code = insert_before(&instructions, body.len(), &unwrap_at, Opcode::Unwrap).map_err(
                |offset| RewriteError::JumpOutOfRange {
                    function: function.clone(),
                    offset,
                },
            )?;
            body.replace_code(code);
            outcome.unwraps_inserted = unwrap_at.len();
        }

        if outcome.changed() {
            trace!(
                target: "shadowcall::dataflow",
                function = %function,
                unwraps = outcome.unwraps_inserted,
                locals = outcome.locals_retyped,
                "patched"
            );
        }
        Ok(outcome)
    }

    /// Replay one instruction on the abstract stack
    fn step(
        &self,
        instr: &Instruction,
        stack: &mut Vec<AbstractSlot>,
        locals: &mut LocalTags,
        unwrap_at: &mut BTreeSet<usize>,
    ) {
        let after = instr.next_offset();
        let pop = |stack: &mut Vec<AbstractSlot>| stack.pop().unwrap_or(AbstractSlot::plain(instr.offset));

        match (instr.opcode, instr.operand) {
            (Opcode::Call, Operand::Call { symbol, arity }) => {
                let watched = self.is_watched(symbol);
                for _ in 0..arity {
                    let arg = pop(stack);
                    if !watched && arg.tag == Tag::Deferred {
                        unwrap_at.insert(arg.after_origin);
                    }
                }
                if watched {
                    stack.push(AbstractSlot::deferred(after));
                } else {
                    stack.push(AbstractSlot::plain(after));
                }
            }

            (Opcode::StoreLocal, Operand::Byte(index)) => {
                let slot = pop(stack);
                match (slot.tag, self.strategy) {
                    (Tag::Deferred, PatchStrategy::AtConsumption) => {
                        locals.current.insert(index);
                        locals.ever_deferred.insert(index);
                    }
                    (Tag::Deferred, PatchStrategy::AtStore) => {
                        unwrap_at.insert(slot.after_origin);
                        locals.current.remove(&index);
                    }
                    (Tag::Plain, _) => {
                        locals.current.remove(&index);
                    }
                }
            }

            (Opcode::LoadLocal, Operand::Byte(index)) => {
                if locals.current.contains(&index) {
                    stack.push(AbstractSlot::deferred(after));
                } else {
                    stack.push(AbstractSlot::plain(after));
                }
            }

            (op, _) if op.is_binary_op() => {
                let b = pop(stack);
                let a = pop(stack);
                for operand in [a, b] {
                    if operand.tag == Tag::Deferred {
                        unwrap_at.insert(operand.after_origin);
                    }
                }
                stack.push(AbstractSlot::plain(after));
            }

            (Opcode::Neg | Opcode::Not, _) => {
                let operand = pop(stack);
                if operand.tag == Tag::Deferred {
                    unwrap_at.insert(operand.after_origin);
                }
                stack.push(AbstractSlot::plain(after));
            }

            (Opcode::PushString, _) => stack.push(AbstractSlot::plain(after)),

            (Opcode::Pop, _) => {
                pop(stack);
            }

            _ => {
                let effect = instr.stack_effect();
                for _ in 0..effect.pops {
                    pop(stack);
                }
                for _ in 0..effect.pushes {
                    stack.push(AbstractSlot::plain(after));
                }
            }
        }
    }

    fn check_branch(
        &self,
        function: &SymbolRef,
        instr: &Instruction,
        stack: &[AbstractSlot],
        outcome: &mut PatchOutcome,
    ) -> RewriteResult<()> {
        if stack.iter().all(|slot| slot.tag == Tag::Plain) {
            return Ok(());
        }
        if self.strict_branches {
            return Err(RewriteError::DeferredAcrossBranch {
                function: function.clone(),
                offset: instr.offset,
            });
        }
        warn!(
            target: "shadowcall::dataflow",
            function = %function,
            offset = instr.offset,
            op = %instr.opcode,
            "deferred value live across branch; tags after this point may be wrong"
        );
        outcome.branch_warnings += 1;
        Ok(())
    }
}
