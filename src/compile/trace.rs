//! The trace partitioning result.
//!
//! Partitioning a compilation unit into traces happens upstream: this
//! module only defines the read-only view the back end consumes. Every
//! instruction of a module belongs to exactly one trace, and each trace is
//! ordered and acyclic within itself.

use crate::compile::{
    jit_ir::{index_16bit, index_overflow, InstIdx, Module},
    CompilationError,
};
use typed_index_collections::TiVec;

/// A trace index.
///
/// One of these is an index into [TracePartition::traces].
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct TraceIdx(u16);
index_16bit!(TraceIdx);

/// An independently allocatable region of the compiled program.
#[derive(Debug)]
pub struct Trace {
    idx: TraceIdx,
    /// The instructions of this trace, in program order.
    insts: Vec<InstIdx>,
}

impl Trace {
    pub fn new(idx: TraceIdx, insts: Vec<InstIdx>) -> Self {
        Self { idx, insts }
    }

    pub fn idx(&self) -> TraceIdx {
        self.idx
    }

    pub fn insts(&self) -> &[InstIdx] {
        &self.insts
    }

    /// A trace is trivial if it defines no values, and thus needs no
    /// storage assigned at all.
    pub fn is_trivial(&self, m: &Module) -> bool {
        self.insts
            .iter()
            .all(|iidx| m.inst(*iidx).def_tyidx(m).is_none())
    }
}

/// The (externally produced) mapping from a compilation unit to its traces.
#[derive(Debug)]
pub struct TracePartition {
    traces: TiVec<TraceIdx, Trace>,
}

impl TracePartition {
    pub fn new(traces: Vec<Trace>) -> Result<Self, CompilationError> {
        // Re-check the indices so that later lookups can't silently hand
        // back the wrong trace.
        for (i, trace) in traces.iter().enumerate() {
            if usize::from(trace.idx()) != i {
                return Err(CompilationError::InternalError(format!(
                    "trace {} registered at position {i}",
                    usize::from(trace.idx())
                )));
            }
        }
        Ok(Self {
            traces: TiVec::from(traces),
        })
    }

    /// Build the degenerate partition placing every instruction of `m` in
    /// one trace.
    pub fn whole_module(m: &Module) -> Result<Self, CompilationError> {
        let tidx = TraceIdx::new(0)?;
        Self::new(vec![Trace::new(tidx, m.iter_inst_idxs().collect())])
    }

    pub fn trace(&self, tidx: TraceIdx) -> &Trace {
        &self.traces[tidx]
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trace> {
        self.traces.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::jit_ir::{Inst, ParamInst};

    #[test]
    fn trivial_traces() {
        let mut m = Module::new();
        let p = m.push(Inst::Param(ParamInst::new(m.int64_tyidx(), false))).unwrap();
        let end = m.push(Inst::TraceEnd).unwrap();

        let t0 = Trace::new(TraceIdx::new(0).unwrap(), vec![p]);
        let t1 = Trace::new(TraceIdx::new(1).unwrap(), vec![end]);
        assert!(!t0.is_trivial(&m));
        assert!(t1.is_trivial(&m));

        let part = TracePartition::new(vec![t0, t1]).unwrap();
        assert_eq!(part.len(), 2);
        assert_eq!(part.trace(TraceIdx::new(1).unwrap()).insts(), &[end]);
    }

    #[test]
    fn misnumbered_partition_rejected() {
        let t = Trace::new(TraceIdx::new(3).unwrap(), vec![]);
        assert!(TracePartition::new(vec![t]).is_err());
    }

    #[test]
    fn whole_module_partition() {
        let mut m = Module::new();
        m.push(Inst::Param(ParamInst::new(m.int64_tyidx(), false))).unwrap();
        m.push(Inst::TraceEnd).unwrap();
        let part = TracePartition::whole_module(&m).unwrap();
        assert_eq!(part.len(), 1);
        assert_eq!(part.iter().next().unwrap().insts().len(), 2);
    }
}
