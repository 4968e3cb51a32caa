//! Trace compilation: from IR module to lowered target instructions.

use crate::log::{self, IRPhase};
use std::sync::Arc;
use thiserror::Error;

pub mod codegen;
pub mod jit_ir;
pub mod opt;
pub mod trace;

use codegen::{
    a64::{Assemble, LoweredTrace},
    reg_alloc::{
        policy::{default_policy, AllocConfig, AllocContext, TargetDesc},
        CollectedSpillMoves, SpillMoveEmitter, VarLocations,
    },
    CodeGenOutput,
};
use jit_ir::Module;
use trace::TracePartition;

/// Errors that can occur during compilation.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// Compilation failed for reasons that might not occur if we retried.
    #[error("General error: {0}")]
    General(String),
    /// An error occurred that can only be a bug in the compiler itself.
    #[error("Internal error: {0}")]
    InternalError(String),
    /// A limit was exceeded (e.g. a table grew past what an index type can
    /// address). Retrying will not help.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
}

/// A fully compiled unit: one lowered instruction sequence per trace, and
/// the size of the frame they share.
#[derive(Debug)]
pub struct CompiledUnit {
    pub traces: Vec<LoweredTrace>,
    pub frame_size: usize,
}

/// Compile `m`: simplify, assign storage to every trace of `partition`,
/// then lower each trace.
///
/// Storage assignment and lowering of one trace never overlap: all
/// allocation completes before any lowering begins.
pub fn compile_unit(
    m: &mut Module,
    partition: Arc<TracePartition>,
    config: AllocConfig,
) -> Result<CompiledUnit, CompilationError> {
    if log::should_log_ir(IRPhase::PreOpt) {
        log::log_ir(&format!(
            "--- Begin jit-pre-opt ---\n{m}\n--- End jit-pre-opt ---\n"
        ));
    }
    opt::dead_code_elimination(m);
    if log::should_log_ir(IRPhase::PostOpt) {
        log::log_ir(&format!(
            "--- Begin jit-post-opt ---\n{m}\n--- End jit-post-opt ---\n"
        ));
    }

    let spill_moves = Arc::new(CollectedSpillMoves::new());
    let ctx = AllocContext::new(
        TargetDesc::default(),
        config,
        Arc::clone(&spill_moves) as Arc<dyn SpillMoveEmitter>,
        Arc::clone(&partition),
    );
    let policy = default_policy(ctx);
    let mut vlocs = VarLocations::new(m);
    for trace in partition.iter() {
        let alloc = policy.select(m, trace)?;
        alloc.allocate(policy.ctx(), m, trace, &mut vlocs)?;
    }
    // Parameters arrive once, so the requested moves belong to the entry
    // trace.
    let mut entry_moves = spill_moves.drain();

    let mut traces = Vec::with_capacity(partition.len());
    for (i, trace) in partition.iter().enumerate() {
        let mut asm = Assemble::new(m, trace, &vlocs, policy.ctx().target);
        if i == 0 {
            asm = asm.with_entry_moves(std::mem::take(&mut entry_moves));
        }
        traces.push(asm.codegen()?);
    }
    if log::should_log_ir(IRPhase::Asm) {
        for (i, t) in traces.iter().enumerate() {
            log::log_ir(&format!(
                "--- Begin jit-asm trace {i} ---\n{}\n--- End jit-asm ---\n",
                t.disassemble()
            ));
        }
    }
    let frame_size = policy.ctx().frame.lock().size();
    Ok(CompiledUnit { traces, frame_size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{
        codegen::tests::match_asm,
        jit_ir::{
            Const, FCmpInst, FloatConvertInst, FloatConvertKind, FloatTy, ICmpInst,
            IndexedAddrInst, Inst, Operand, ParamInst, Predicate, Ty,
        },
    };

    #[test]
    fn compile_a_whole_unit() {
        let mut m = Module::new();
        let base = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.ptr_tyidx(), true)))
            .unwrap();
        let index = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        let dbl = m.insert_ty(Ty::Float(FloatTy::Double)).unwrap();
        let f = m
            .push_and_make_operand(Inst::Param(ParamInst::new(dbl, false)))
            .unwrap();
        let c = m
            .insert_const(Const::Int {
                tyidx: m.int64_tyidx(),
                v: 100,
            })
            .unwrap();
        m.push(Inst::ICmp(ICmpInst::new(
            &m,
            index.clone(),
            Predicate::SignedLess,
            Operand::Const(c),
        )))
        .unwrap();
        m.push(Inst::FCmp(FCmpInst::new(
            &m,
            f.clone(),
            Predicate::Equal,
            true,
            f.clone(),
        )))
        .unwrap();
        m.push(Inst::FloatConvert(FloatConvertInst::new(
            &m,
            f,
            FloatConvertKind::DoubleToI64,
        )))
        .unwrap();
        m.push(Inst::IndexedAddr(IndexedAddrInst::new(base, index)))
            .unwrap();
        m.push(Inst::TraceEnd).unwrap();

        let partition = Arc::new(TracePartition::whole_module(&m).unwrap());
        let cu = compile_unit(&mut m, partition, AllocConfig::default()).unwrap();
        assert_eq!(cu.traces.len(), 1);
        assert!(cu.frame_size > 0);
        // The comparisons and the address have no users, so simplification
        // prunes them before allocation; the conversion may not be elided
        // and survives. Entry spills for the three parameters, then the
        // lowered conversion.
        match_asm(
            &cu.traces[0],
            "
            ; entry spills
            str x0, ...
            str x1, ...
            str d0, ...
            ...
            fcmp d30, d30
            fcvtzs x16, d30
            csel x16, xzr, x16, vs
            ...
            ret
            ",
        );
        let dis = cu.traces[0].disassemble();
        assert!(!dis
            .lines()
            .any(|l| l.starts_with("cmp") || l.starts_with("cset") || l.starts_with("add")));
    }

    #[test]
    fn dead_code_dropped_before_allocation() {
        let mut m = Module::new();
        let lhs = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        let rhs = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        m.push(Inst::ICmp(ICmpInst::new(&m, lhs, Predicate::Equal, rhs)))
            .unwrap();
        m.push(Inst::TraceEnd).unwrap();
        let partition = Arc::new(TracePartition::whole_module(&m).unwrap());
        let cu = compile_unit(&mut m, partition, AllocConfig::default()).unwrap();
        // The unused comparison lowers to nothing: entry spills and the
        // return only.
        assert!(!cu.traces[0]
            .disassemble()
            .lines()
            .any(|l| l.starts_with("cmp") || l.starts_with("cset")));
    }
}
