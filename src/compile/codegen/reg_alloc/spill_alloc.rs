//! The spill allocator.
//!
//! This is a register allocator that always allocates to the stack, so in
//! fact it's not much of a register allocator at all. It is the policy's
//! catch-all: correct for any trace shape, never fast.

use super::{
    policy::{AllocContext, AllocationStrategy},
    Register, StackDirection, TraceAllocator, VarLocation, VarLocations, PARAM_FP_REGS,
    PARAM_GP_REGS,
};
use crate::compile::{
    jit_ir::{Const, Inst, Module, Operand},
    trace::Trace,
    CompilationError,
};
use std::sync::Arc;

pub struct SpillAllocator;

impl SpillAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Hand out a stack slot of `size` bytes, preferring the shared slot
    /// cache over growing the frame.
    fn stack_slot(&self, ctx: &AllocContext, size: usize) -> VarLocation {
        if let Some(slot) = ctx.slot_cache.take(size) {
            return slot;
        }
        let mut frame = ctx.frame.lock();
        // If the stack grows up, the allocation's offset is the stack
        // height *before* we've made space, otherwise it's the height
        // *after*.
        let post_align = frame.align(size);
        let post_grow = frame.grow(size);
        let frame_off = u32::try_from(match ctx.config.stack_dir {
            StackDirection::GrowsUp => post_align,
            StackDirection::GrowsDown => post_grow,
        })
        .unwrap();
        VarLocation::Stack { frame_off, size }
    }
}

impl Default for SpillAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceAllocator for SpillAllocator {
    fn allocate(
        &self,
        ctx: &AllocContext,
        m: &Module,
        trace: &Trace,
        vlocs: &mut VarLocations,
    ) -> Result<(), CompilationError> {
        debug_assert!(usize::from(trace.idx()) < ctx.partition.len());

        let mut gp_params = 0;
        let mut fp_params = 0;
        for &iidx in trace.insts() {
            let inst = m.inst(iidx);
            match inst {
                Inst::Param(x) => {
                    // Parameters arrive in argument registers but live on
                    // the stack for the rest of the trace: bind the slot
                    // and ask for the entry move.
                    let ty = m.type_(x.tyidx());
                    let slot = self.stack_slot(ctx, ty.byte_size().unwrap());
                    let incoming = if ty.is_float() {
                        if fp_params == PARAM_FP_REGS.len() {
                            todo!("stack-passed parameters");
                        }
                        fp_params += 1;
                        VarLocation::Register(Register::FP(PARAM_FP_REGS[fp_params - 1]))
                    } else {
                        if gp_params == PARAM_GP_REGS.len() {
                            todo!("stack-passed parameters");
                        }
                        gp_params += 1;
                        VarLocation::Register(Register::GP(PARAM_GP_REGS[gp_params - 1]))
                    };
                    vlocs.bind(iidx, slot);
                    ctx.spill_moves.emit(slot, incoming);
                }
                _ => {
                    if let Some(ty) = inst.def_type(m) {
                        let slot = self.stack_slot(ctx, ty.byte_size().unwrap());
                        vlocs.bind(iidx, slot);
                    }
                }
            }
        }

        // Float constants have no immediate encoding, so unless the
        // configuration forbids spilling constants, store them to slots up
        // front and let the lowering layer load them.
        if !ctx.config.never_spill_consts {
            for &iidx in trace.insts() {
                for op in m.inst(iidx).operands() {
                    let Operand::Const(cidx) = op else { continue };
                    let Const::Float { tyidx, v } = m.const_(cidx) else {
                        continue;
                    };
                    if vlocs.const_loc(cidx).is_none() {
                        let slot = self.stack_slot(ctx, m.type_(*tyidx).byte_size().unwrap());
                        vlocs.bind_const(cidx, slot);
                        ctx.spill_moves.emit(slot, VarLocation::ConstFloat(*v));
                    }
                }
            }
        }

        Ok(())
    }
}

/// The catch-all strategy: applies to every trace.
pub struct SpillStrategy;

impl SpillStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SpillStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationStrategy for SpillStrategy {
    fn name(&self) -> &'static str {
        "spill"
    }

    fn applies_to(&self, _m: &Module, _trace: &Trace) -> bool {
        true
    }

    fn init_allocator(&self, _ctx: &AllocContext) -> Arc<dyn TraceAllocator> {
        Arc::new(SpillAllocator::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{
        codegen::reg_alloc::{CollectedSpillMoves, GpReg, SpillMove},
        codegen::reg_alloc::policy::{AllocConfig, TargetDesc},
        jit_ir::{FCmpInst, FloatTy, ParamInst, Predicate, Ty},
        trace::{TraceIdx, TracePartition},
    };

    fn ctx_for(m: &Module, config: AllocConfig) -> (AllocContext, Arc<CollectedSpillMoves>) {
        let moves = Arc::new(CollectedSpillMoves::new());
        let partition = Arc::new(TracePartition::whole_module(m).unwrap());
        let ctx = AllocContext::new(TargetDesc::default(), config, Arc::clone(&moves) as _, partition);
        (ctx, moves)
    }

    #[test]
    fn params_spilled_with_entry_moves() {
        let mut m = Module::new();
        let p0 = m
            .push(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        let p1 = m
            .push(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        m.push(Inst::TraceEnd).unwrap();

        let (ctx, moves) = ctx_for(
            &m,
            AllocConfig {
                never_spill_consts: true,
                stack_dir: StackDirection::GrowsDown,
            },
        );
        let mut vlocs = VarLocations::new(&m);
        let trace = Trace::new(TraceIdx::new(0).unwrap(), m.iter_inst_idxs().collect());
        SpillAllocator::new()
            .allocate(&ctx, &m, &trace, &mut vlocs)
            .unwrap();

        let s0 = vlocs.get(p0);
        let s1 = vlocs.get(p1);
        assert!(matches!(s0, VarLocation::Stack { size: 8, .. }));
        assert_ne!(s0, s1);
        assert_eq!(
            moves.drain(),
            vec![
                SpillMove {
                    dst: s0,
                    src: VarLocation::Register(Register::GP(GpReg::X0))
                },
                SpillMove {
                    dst: s1,
                    src: VarLocation::Register(Register::GP(GpReg::X1))
                },
            ]
        );
    }

    #[test]
    fn cached_slots_used_before_growing_the_frame() {
        let mut m = Module::new();
        m.push(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        let (ctx, _moves) = ctx_for(&m, AllocConfig::default());
        // One trace, so the cache was pre-sized with one slot.
        let frame_before = ctx.frame.lock().size();
        assert_eq!(ctx.slot_cache.len(), 1);

        let mut vlocs = VarLocations::new(&m);
        let trace = Trace::new(TraceIdx::new(0).unwrap(), m.iter_inst_idxs().collect());
        SpillAllocator::new()
            .allocate(&ctx, &m, &trace, &mut vlocs)
            .unwrap();
        assert!(ctx.slot_cache.is_empty());
        assert_eq!(ctx.frame.lock().size(), frame_before);
    }

    #[test]
    fn float_consts_spilled_unless_forbidden() {
        let mut m = Module::new();
        let fty = m.insert_ty(Ty::Float(FloatTy::Double)).unwrap();
        let lhs = m
            .push_and_make_operand(Inst::Param(ParamInst::new(fty, false)))
            .unwrap();
        let zero = m
            .insert_const(Const::Float { tyidx: fty, v: 0.0 })
            .unwrap();
        m.push(Inst::FCmp(FCmpInst::new(
            &m,
            lhs,
            Predicate::NotEqual,
            false,
            Operand::Const(zero),
        )))
        .unwrap();

        let trace = Trace::new(TraceIdx::new(0).unwrap(), m.iter_inst_idxs().collect());

        let (ctx, moves) = ctx_for(&m, AllocConfig::default());
        let mut vlocs = VarLocations::new(&m);
        SpillAllocator::new()
            .allocate(&ctx, &m, &trace, &mut vlocs)
            .unwrap();
        let cloc = vlocs.const_loc(zero).unwrap();
        assert!(matches!(cloc, VarLocation::Stack { .. }));
        assert!(moves
            .drain()
            .iter()
            .any(|mv| mv.dst == cloc && mv.src == VarLocation::ConstFloat(0.0)));

        let (ctx, _moves) = ctx_for(
            &m,
            AllocConfig {
                never_spill_consts: true,
                stack_dir: StackDirection::GrowsDown,
            },
        );
        let mut vlocs = VarLocations::new(&m);
        SpillAllocator::new()
            .allocate(&ctx, &m, &trace, &mut vlocs)
            .unwrap();
        assert!(vlocs.const_loc(zero).is_none());
    }
}
