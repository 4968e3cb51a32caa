//! Allocation strategy dispatch.
//!
//! A compilation unit's traces are not all best served by one register
//! allocator: an [AllocationPolicy] holds an ordered list of strategies,
//! each pairing an applicability predicate with an allocator factory, and
//! hands out the allocator of the first strategy matching a trace. A
//! strategy's allocator is constructed lazily on first selection and the
//! same instance is then reused for every trace that strategy matches,
//! from whichever thread asks.

use super::{
    spill_alloc::SpillStrategy, trivial_alloc::TrivialTraceStrategy, SpillMoveEmitter,
    StackDirection, TraceAllocator, VarLocation,
};
use crate::compile::{
    codegen::abs_stack::AbstractStack,
    jit_ir::Module,
    trace::{Trace, TracePartition},
    CompilationError,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// The read-only description of the target, fixed per compilation.
#[derive(Clone, Copy, Debug)]
pub struct TargetDesc {
    /// The width of a pointer, in bits.
    pub ptr_bitw: u32,
    /// The width of the signed immediate field of a compare instruction,
    /// in bits.
    pub cmp_imm_bitw: u32,
}

impl Default for TargetDesc {
    fn default() -> Self {
        Self {
            ptr_bitw: 64,
            cmp_imm_bitw: 32,
        }
    }
}

/// Allocation configuration, fixed per compilation.
#[derive(Clone, Copy, Debug)]
pub struct AllocConfig {
    /// If set, constants are never assigned stack slots: they stay
    /// immediate and the lowering layer materialises them at each use.
    pub never_spill_consts: bool,
    pub stack_dir: StackDirection,
}

impl Default for AllocConfig {
    fn default() -> Self {
        Self {
            never_spill_consts: false,
            stack_dir: StackDirection::GrowsDown,
        }
    }
}

/// A pre-sized cache of scratch stack slots, shared by all allocators of a
/// compilation unit so that spill slots are reused across traces rather
/// than grown per trace.
#[derive(Debug, Default)]
pub struct SlotCache {
    slots: Mutex<Vec<VarLocation>>,
}

impl SlotCache {
    /// Carve `n` slots of `slot_size` bytes out of `frame`.
    pub fn presized(frame: &mut AbstractStack, n: usize, slot_size: usize) -> Self {
        let mut slots = Vec::with_capacity(n);
        for _ in 0..n {
            frame.align(slot_size);
            let frame_off = u32::try_from(frame.grow(slot_size)).unwrap();
            slots.push(VarLocation::Stack {
                frame_off,
                size: slot_size,
            });
        }
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Take a cached slot of at least `size` bytes, if one is available.
    pub fn take(&self, size: usize) -> Option<VarLocation> {
        let mut slots = self.slots.lock();
        let pos = slots
            .iter()
            .position(|s| matches!(s, VarLocation::Stack { size: ssize, .. } if *ssize >= size))?;
        Some(slots.swap_remove(pos))
    }

    /// Return a slot to the cache.
    pub fn put(&self, slot: VarLocation) {
        debug_assert!(matches!(slot, VarLocation::Stack { .. }));
        self.slots.lock().push(slot);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

/// The shared compilation context a policy passes, uniformly, to every
/// strategy's allocator factory and to each allocation run. Fixed for the
/// lifetime of the policy.
pub struct AllocContext {
    pub target: TargetDesc,
    pub config: AllocConfig,
    /// Where allocators request spill moves.
    pub spill_moves: Arc<dyn SpillMoveEmitter>,
    /// The compilation unit's abstract frame.
    pub frame: Mutex<AbstractStack>,
    /// Reusable scratch stack slots.
    pub slot_cache: SlotCache,
    /// The unit's trace partitioning, computed upstream.
    pub partition: Arc<TracePartition>,
}

impl AllocContext {
    pub fn new(
        target: TargetDesc,
        config: AllocConfig,
        spill_moves: Arc<dyn SpillMoveEmitter>,
        partition: Arc<TracePartition>,
    ) -> Self {
        let mut frame = AbstractStack::default();
        // Pre-size the scratch slot cache: one word-sized slot per trace
        // is enough to cover the common spill patterns without growing the
        // frame mid-allocation.
        let slot_cache = SlotCache::presized(&mut frame, partition.len(), 8);
        Self {
            target,
            config,
            spill_moves,
            frame: Mutex::new(frame),
            slot_cache,
            partition,
        }
    }
}

/// A named applicability predicate over traces, paired with an allocator
/// factory.
pub trait AllocationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `true` if this strategy's allocator should be used for
    /// `trace`.
    fn applies_to(&self, m: &Module, trace: &Trace) -> bool;

    /// Construct this strategy's allocator. Called at most once per
    /// policy; the policy serialises the call and memoises the result.
    fn init_allocator(&self, ctx: &AllocContext) -> Arc<dyn TraceAllocator>;
}

struct StrategyEntry {
    strategy: Box<dyn AllocationStrategy>,
    /// The lazily constructed allocator. The mutex serialises the first
    /// construction; thereafter lock-holders only clone the `Arc`.
    allocator: Mutex<Option<Arc<dyn TraceAllocator>>>,
}

/// Manages the selection of allocation strategies.
pub struct AllocationPolicy {
    ctx: AllocContext,
    strategies: Vec<StrategyEntry>,
}

impl AllocationPolicy {
    pub fn new(ctx: AllocContext) -> Self {
        Self {
            ctx,
            strategies: Vec::with_capacity(3),
        }
    }

    pub fn ctx(&self) -> &AllocContext {
        &self.ctx
    }

    /// Add a strategy to the end of the evaluation order. Strategies are
    /// not deduplicated: a later entry shadowed by an earlier identical
    /// predicate is simply unreachable.
    pub fn append(&mut self, strategy: Box<dyn AllocationStrategy>) {
        self.strategies.push(StrategyEntry {
            strategy,
            allocator: Mutex::new(None),
        });
    }

    /// Return the allocator of the first registered strategy that applies
    /// to `trace`.
    ///
    /// No strategy matching is a configuration bug, not bad input: a
    /// policy must end in a catch-all strategy. It is reported as an
    /// internal error and aborts compilation of the unit.
    pub fn select(
        &self,
        m: &Module,
        trace: &Trace,
    ) -> Result<Arc<dyn TraceAllocator>, CompilationError> {
        for entry in &self.strategies {
            if entry.strategy.applies_to(m, trace) {
                let mut guard = entry.allocator.lock();
                let alloc = guard
                    .get_or_insert_with(|| entry.strategy.init_allocator(&self.ctx))
                    .clone();
                return Ok(alloc);
            }
        }
        Err(CompilationError::InternalError(format!(
            "no allocation strategy found for trace {}",
            usize::from(trace.idx())
        )))
    }
}

/// The production policy: trivial traces are recognised first, everything
/// else falls through to the spill allocator.
pub fn default_policy(ctx: AllocContext) -> AllocationPolicy {
    let mut policy = AllocationPolicy::new(ctx);
    policy.append(Box::new(TrivialTraceStrategy::new()));
    policy.append(Box::new(SpillStrategy::new()));
    policy
}
