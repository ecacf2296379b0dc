use std::collections::HashMap;
use std::fmt;

use crate::vm::Inst;

/// A maximal straight-line run of instructions: start offset, length, and a
/// sequential number. A block ends at a control transfer (absolute jump,
/// conditional jump, return) or at end of program; the halt instruction
/// belongs to no block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BasicBlock {
    pub number: usize,
    pub start: u64,
    pub len: u64,
}

fn ends_block(inst: &Inst<'_>) -> bool {
    matches!(
        inst,
        Inst::Jump(_) | Inst::JumpIf(_) | Inst::JumpIfNot(_) | Inst::Ret
    )
}

/// Partition a program into basic blocks in one scan.
pub fn partition_into_blocks(insts: &[Inst<'_>]) -> Vec<BasicBlock> {
    let mut blocks = Vec::new();
    let mut start = 0usize;

    for (pos, inst) in insts.iter().enumerate() {
        if matches!(inst, Inst::Halt) {
            break;
        }
        if ends_block(inst) {
            blocks.push(BasicBlock {
                number: blocks.len(),
                start: start as u64,
                len: (pos + 1 - start) as u64,
            });
            start = pos + 1;
        }
    }

    // Straight-line tail before the halt (or the slice end).
    let tail_end = insts
        .iter()
        .position(|inst| matches!(inst, Inst::Halt))
        .unwrap_or(insts.len());
    if tail_end > start {
        blocks.push(BasicBlock {
            number: blocks.len(),
            start: start as u64,
            len: (tail_end - start) as u64,
        });
    }

    blocks
}

/// Identity of a stored-to variable: globals by name, locals by the stack
/// offset their definition instruction carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Variable<'src> {
    Global(&'src str),
    Local(u64),
}

impl fmt::Display for Variable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Global(name) => write!(f, "global {}", name),
            Variable::Local(offset) => write!(f, "local #{}", offset),
        }
    }
}

/// A definition overwritten before it was ever read. Report-only: the
/// program is not rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DeadStore<'src> {
    pub var: Variable<'src>,
    /// Offset of the dead definition.
    pub store_at: u64,
    /// Offset of the definition that killed it.
    pub overwritten_at: u64,
}

impl fmt::Display for DeadStore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dead store to {} at {} (overwritten at {})",
            self.var, self.store_at, self.overwritten_at
        )
    }
}

/// Intra-block dead-store detection: within each block, a definition still
/// unread when the same variable is defined again is dead. Liveness is not
/// tracked across block boundaries, so a store dead only across blocks is
/// not reported.
pub fn detect_dead_stores<'src>(
    insts: &[Inst<'src>],
    blocks: &[BasicBlock],
) -> Vec<DeadStore<'src>> {
    let mut report = Vec::new();

    for block in blocks {
        let mut pending: HashMap<Variable<'src>, u64> = HashMap::new();

        for offset in block.start..block.start + block.len {
            match insts[offset as usize] {
                Inst::DefGlobal(name) => {
                    if let Some(prev) = pending.insert(Variable::Global(name), offset) {
                        report.push(DeadStore {
                            var: Variable::Global(name),
                            store_at: prev,
                            overwritten_at: offset,
                        });
                    }
                }
                Inst::DefLocal(slot) => {
                    if let Some(prev) = pending.insert(Variable::Local(slot), offset) {
                        report.push(DeadStore {
                            var: Variable::Local(slot),
                            store_at: prev,
                            overwritten_at: offset,
                        });
                    }
                }
                Inst::LoadGlobal(name) => {
                    pending.remove(&Variable::Global(name));
                }
                Inst::LoadLocal(slot) => {
                    pending.remove(&Variable::Local(slot));
                }
                _ => {}
            }
        }
    }

    report
}
