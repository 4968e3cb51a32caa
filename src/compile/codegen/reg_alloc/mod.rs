//! Storage assignment.
//!
//! This module:
//!  - describes where values live once storage is assigned ([VarLocation]).
//!  - describes the generic interface to register allocators
//!    ([TraceAllocator]).
//!  - contains concrete implementations of register allocators.
//!
//! Allocator *dispatch* (which allocator runs for which trace) lives in
//! [policy].

use crate::compile::{
    jit_ir::{ConstIdx, InstIdx, Module},
    trace::Trace,
    CompilationError,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use strum::EnumCount;
use typed_index_collections::TiVec;

pub mod policy;
pub mod spill_alloc;
pub mod trivial_alloc;

use policy::AllocContext;

/// The general purpose registers of the target.
///
/// `code()` is the architectural register number. x31 is the zero
/// register.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::EnumCount)]
#[repr(u8)]
#[rustfmt::skip]
pub enum GpReg {
    X0, X1, X2, X3, X4, X5, X6, X7,
    X8, X9, X10, X11, X12, X13, X14, X15,
    X16, X17, X18, X19, X20, X21, X22, X23,
    X24, X25, X26, X27, X28, X29, X30,
    Xzr,
}

impl GpReg {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// The floating point registers of the target.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::EnumCount)]
#[repr(u8)]
#[rustfmt::skip]
pub enum FpReg {
    D0, D1, D2, D3, D4, D5, D6, D7,
    D8, D9, D10, D11, D12, D13, D14, D15,
    D16, D17, D18, D19, D20, D21, D22, D23,
    D24, D25, D26, D27, D28, D29, D30, D31,
}

impl FpReg {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

static_assertions::const_assert_eq!(GpReg::COUNT, 32);
static_assertions::const_assert_eq!(FpReg::COUNT, 32);

/// General purpose argument registers of the target's calling convention:
/// the locations trace parameters arrive in.
pub static PARAM_GP_REGS: [GpReg; 8] = [
    GpReg::X0,
    GpReg::X1,
    GpReg::X2,
    GpReg::X3,
    GpReg::X4,
    GpReg::X5,
    GpReg::X6,
    GpReg::X7,
];

/// Floating point argument registers of the target's calling convention.
pub static PARAM_FP_REGS: [FpReg; 8] = [
    FpReg::D0,
    FpReg::D1,
    FpReg::D2,
    FpReg::D3,
    FpReg::D4,
    FpReg::D5,
    FpReg::D6,
    FpReg::D7,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Register {
    GP(GpReg), // general purpose
    FP(FpReg), // floating point
}

/// Indicates the direction of stack growth.
#[derive(Clone, Copy, Debug)]
pub enum StackDirection {
    GrowsUp,
    GrowsDown,
}

/// Where is a value stored?
///
/// The unassigned state is represented by the *absence* of a
/// `VarLocation` in a [VarLocations] table, not by a variant: lowering
/// code can therefore never observe a half-bound operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarLocation {
    /// The value is on the stack.
    Stack {
        /// The offset from the base of the compilation unit's frame.
        frame_off: u32,
        /// Size in bytes of the allocation.
        size: usize,
    },
    /// The value is in a register.
    Register(Register),
    /// A constant integer `bits` wide with value `v`.
    ConstInt { bits: u32, v: u64 },
    /// A constant float.
    ConstFloat(f64),
    /// A constant pointer.
    ConstPtr(usize),
}

/// The storage bindings of a compilation unit's values.
///
/// A binding, once made, is immutable: rebinding is a bug in the
/// allocator that attempted it. Only the allocator thread owning a trace
/// may bind that trace's values, and lowering never runs concurrently
/// with allocation of the same trace.
#[derive(Debug)]
pub struct VarLocations {
    locs: TiVec<InstIdx, Option<VarLocation>>,
    /// Storage assigned to constants an allocator decided to spill (see
    /// `AllocConfig::never_spill_consts`).
    const_locs: IndexMap<ConstIdx, VarLocation>,
}

impl VarLocations {
    pub fn new(m: &Module) -> Self {
        Self {
            locs: TiVec::from(vec![None; m.len()]),
            const_locs: IndexMap::new(),
        }
    }

    /// Bind the value defined at `iidx` to `loc`.
    ///
    /// # Panics
    ///
    /// Panics if the value is already bound.
    pub fn bind(&mut self, iidx: InstIdx, loc: VarLocation) {
        assert!(
            self.locs[iidx].is_none(),
            "%{} already bound to {:?}",
            usize::from(iidx),
            self.locs[iidx].unwrap()
        );
        self.locs[iidx] = Some(loc);
    }

    /// The location of the value defined at `iidx`.
    ///
    /// # Panics
    ///
    /// Panics if the value is unbound: every value must be bound before
    /// it reaches a lowering step.
    pub fn get(&self, iidx: InstIdx) -> VarLocation {
        self.locs[iidx]
            .unwrap_or_else(|| panic!("%{} reached lowering unbound", usize::from(iidx)))
    }

    pub fn try_get(&self, iidx: InstIdx) -> Option<VarLocation> {
        self.locs[iidx]
    }

    pub fn bind_const(&mut self, cidx: ConstIdx, loc: VarLocation) {
        let old = self.const_locs.insert(cidx, loc);
        assert!(old.is_none(), "constant {} already bound", usize::from(cidx));
    }

    pub fn const_loc(&self, cidx: ConstIdx) -> Option<VarLocation> {
        self.const_locs.get(&cidx).copied()
    }
}

/// A storage-to-storage move requested by an allocator (e.g. spilling an
/// incoming parameter register to its stack slot).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpillMove {
    pub dst: VarLocation,
    pub src: VarLocation,
}

/// The spill-move emission capability handed to allocators.
///
/// The moves themselves are materialised by the emission layer; this core
/// only records what an allocator asked for.
pub trait SpillMoveEmitter: Send + Sync {
    fn emit(&self, dst: VarLocation, src: VarLocation);
}

/// A [SpillMoveEmitter] that collects the requested moves in order.
#[derive(Default)]
pub struct CollectedSpillMoves {
    moves: Mutex<Vec<SpillMove>>,
}

impl CollectedSpillMoves {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<SpillMove> {
        std::mem::take(&mut *self.moves.lock())
    }
}

impl SpillMoveEmitter for CollectedSpillMoves {
    fn emit(&self, dst: VarLocation, src: VarLocation) {
        self.moves.lock().push(SpillMove { dst, src });
    }
}

/// The API to register allocators.
///
/// An allocator instance is constructed once per strategy and then shared
/// across every trace that strategy is selected for, possibly from
/// several threads at once: implementations keep all per-trace state
/// local to [Self::allocate].
pub trait TraceAllocator: Send + Sync {
    /// Assign storage to every value defined in `trace`, recording the
    /// bindings in `vlocs`.
    fn allocate(
        &self,
        ctx: &AllocContext,
        m: &Module,
        trace: &Trace,
        vlocs: &mut VarLocations,
    ) -> Result<(), CompilationError>;
}
