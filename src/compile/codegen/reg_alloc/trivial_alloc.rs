//! The trivial allocator.
//!
//! Traces that define no values have nothing to allocate. Recognising them
//! up front lets the policy skip the spill allocator's per-instruction
//! walk entirely.

use super::{
    policy::{AllocContext, AllocationStrategy},
    TraceAllocator, VarLocations,
};
use crate::compile::{jit_ir::Module, trace::Trace, CompilationError};
use std::sync::Arc;

pub struct TrivialTraceAllocator;

impl TraceAllocator for TrivialTraceAllocator {
    fn allocate(
        &self,
        _ctx: &AllocContext,
        m: &Module,
        trace: &Trace,
        _vlocs: &mut VarLocations,
    ) -> Result<(), CompilationError> {
        // The strategy's predicate is the only route here.
        debug_assert!(trace.is_trivial(m));
        Ok(())
    }
}

pub struct TrivialTraceStrategy;

impl TrivialTraceStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TrivialTraceStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationStrategy for TrivialTraceStrategy {
    fn name(&self) -> &'static str {
        "trivial"
    }

    fn applies_to(&self, m: &Module, trace: &Trace) -> bool {
        trace.is_trivial(m)
    }

    fn init_allocator(&self, _ctx: &AllocContext) -> Arc<dyn TraceAllocator> {
        Arc::new(TrivialTraceAllocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{
        codegen::reg_alloc::{
            policy::{default_policy, AllocConfig, TargetDesc},
            CollectedSpillMoves,
        },
        jit_ir::{Inst, ParamInst},
        trace::{TraceIdx, TracePartition},
    };

    #[test]
    fn trivial_traces_take_the_trivial_allocator() {
        let mut m = Module::new();
        let p = m
            .push(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        let end = m.push(Inst::TraceEnd).unwrap();
        let partition = Arc::new(
            TracePartition::new(vec![
                Trace::new(TraceIdx::new(0).unwrap(), vec![p]),
                Trace::new(TraceIdx::new(1).unwrap(), vec![end]),
            ])
            .unwrap(),
        );
        let policy = default_policy(AllocContext::new(
            TargetDesc::default(),
            AllocConfig::default(),
            Arc::new(CollectedSpillMoves::new()),
            Arc::clone(&partition),
        ));

        let t0 = partition.trace(TraceIdx::new(0).unwrap());
        let t1 = partition.trace(TraceIdx::new(1).unwrap());
        // The value-defining trace must not share the trivial trace's
        // allocator.
        let a0 = policy.select(&m, t0).unwrap();
        let a1 = policy.select(&m, t1).unwrap();
        assert!(!Arc::ptr_eq(&a0, &a1));

        let mut vlocs = VarLocations::new(&m);
        a1.allocate(policy.ctx(), &m, t1, &mut vlocs).unwrap();
        assert_eq!(vlocs.try_get(end), None);
    }
}
