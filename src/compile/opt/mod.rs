//! IR simplification.
//!
//! Currently a single pass: dead code elimination. Instruction indices are
//! load-bearing (operands, traces and storage bindings all hold them), so
//! dead instructions are replaced with [Inst::Tombstone] rather than
//! removed.

use crate::compile::jit_ir::{Inst, Module, Operand};
use vob::Vob;

/// Tombstone every instruction whose value is unused, walking backwards so
/// that a dead instruction's operands can die with it.
pub fn dead_code_elimination(m: &mut Module) {
    let mut used = Vob::from_elem(false, m.len());
    for iidx in m.iter_inst_idxs().rev() {
        let inst = *m.inst(iidx);
        if !inst.may_simplify() || used[usize::from(iidx)] {
            for op in inst.operands() {
                if let Operand::Local(op_iidx) = op {
                    used.set(usize::from(op_iidx), true);
                }
            }
        } else {
            m.replace(iidx, Inst::Tombstone);
        }
    }
}
