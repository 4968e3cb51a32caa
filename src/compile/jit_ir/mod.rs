//! The trace compiler's Intermediate Representation (IR).
//!
//! The IR is the input to the back end proper: a linear, within-itself
//! acyclic instruction stream stored in a [Module], with indices into
//! auxiliary vectors instead of references. Conventions (in alphabetical
//! order):
//!
//!  * `const_`: a "constant"
//!  * `iidx`: an "instruction index"
//!  * `m`: the name conventionally given to the shared [Module] instance
//!  * `Idx`: "index"
//!  * `Inst`: "instruction"
//!  * `Ty`: "type"
//!
//! Every value-defining instruction also carries a [RefOrigin] in the
//! module, recording whether the value is (or derives from) a managed
//! object reference. The garbage collector relies on this surviving
//! address arithmetic, so [RefOrigin::combine] never drops a base.

use crate::compile::CompilationError;
use indexmap::IndexSet;
use smallvec::{smallvec, SmallVec};
use std::{fmt, mem};
use typed_index_collections::TiVec;

/// Helper function to create a printable error for index overflows.
pub(crate) fn index_overflow(typ: &str) -> CompilationError {
    CompilationError::LimitExceeded(format!("Index type {typ} overflowed"))
}

// Generate common methods for 16-bit index types.
macro_rules! index_16bit {
    ($struct:ident) => {
        impl $struct {
            pub fn new(v: usize) -> Result<Self, CompilationError> {
                u16::try_from(v)
                    .map_err(|_| index_overflow(stringify!($struct)))
                    .map(|u| Self(u))
            }

            pub fn to_u16(self) -> u16 {
                self.0
            }
        }

        impl From<usize> for $struct {
            /// Required for `TiVec`. Only use on indices known to be in
            /// bounds: this `panic`s on overflow. Otherwise use [Self::new].
            fn from(v: usize) -> Self {
                Self::new(v).unwrap()
            }
        }

        impl From<$struct> for usize {
            fn from(s: $struct) -> usize {
                s.0.into()
            }
        }
    };
}
pub(crate) use index_16bit;

/// An instruction index.
///
/// One of these is an index into [Module::insts].
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct InstIdx(u16);
index_16bit!(InstIdx);

/// A constant index.
///
/// One of these is an index into [Module::consts].
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct ConstIdx(u16);
index_16bit!(ConstIdx);

/// A type index.
///
/// One of these is an index into [Module::types]. The module deduplicates
/// types on insertion, so two equal type indices denote the same type and
/// comparing indices is a valid type check.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TyIdx(u16);
index_16bit!(TyIdx);

/// A float's precision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FloatTy {
    Float,
    Double,
}

impl FloatTy {
    pub fn bitw(&self) -> u32 {
        match self {
            Self::Float => 32,
            Self::Double => 64,
        }
    }
}

/// A type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Ty {
    Void,
    /// An integer of the given bit width. The width is the *logical* width
    /// of the type (e.g. 1 for a boolean): it need not be a width the
    /// target can operate on directly.
    Integer(u32),
    Ptr,
    Float(FloatTy),
}

impl Ty {
    /// Returns the size of the type in bits, or `None` if asking the size
    /// makes no sense (e.g. for [Ty::Void]).
    pub fn bitw(&self) -> Option<u32> {
        match self {
            Self::Void => None,
            Self::Integer(bitw) => Some(*bitw),
            Self::Ptr => Some(64),
            Self::Float(fty) => Some(fty.bitw()),
        }
    }

    /// Returns the size of the type in bytes, rounded up to the nearest
    /// byte, or `None` if the type is unsized.
    pub fn byte_size(&self) -> Option<usize> {
        self.bitw().map(|x| usize::try_from(x.div_ceil(8)).unwrap())
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Integer(bitw) => write!(f, "i{bitw}"),
            Self::Ptr => write!(f, "ptr"),
            Self::Float(FloatTy::Float) => write!(f, "float"),
            Self::Float(FloatTy::Double) => write!(f, "double"),
        }
    }
}

/// A constant.
#[derive(Clone, Debug, PartialEq)]
pub enum Const {
    /// An integer constant. `v` holds the (zero extended) bit pattern; the
    /// type records the logical width.
    Int { tyidx: TyIdx, v: u64 },
    Float { tyidx: TyIdx, v: f64 },
    Ptr(usize),
}

impl Const {
    pub fn tyidx(&self, m: &Module) -> TyIdx {
        match self {
            Self::Int { tyidx, .. } | Self::Float { tyidx, .. } => *tyidx,
            Self::Ptr(_) => m.ptr_tyidx(),
        }
    }

    /// Is this constant the default (zero) value of its type?
    pub fn is_default(&self) -> bool {
        match self {
            Self::Int { v, .. } => *v == 0,
            Self::Float { v, .. } => *v == 0.0,
            Self::Ptr(v) => *v == 0,
        }
    }
}

/// An integer comparison predicate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Predicate {
    Equal,
    NotEqual,
    UnsignedGreater,
    UnsignedGreaterEqual,
    UnsignedLess,
    UnsignedLessEqual,
    SignedGreater,
    SignedGreaterEqual,
    SignedLess,
    SignedLessEqual,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equal => "eq",
            Self::NotEqual => "ne",
            Self::UnsignedGreater => "ugt",
            Self::UnsignedGreaterEqual => "uge",
            Self::UnsignedLess => "ult",
            Self::UnsignedLessEqual => "ule",
            Self::SignedGreater => "sgt",
            Self::SignedGreaterEqual => "sge",
            Self::SignedLess => "slt",
            Self::SignedLessEqual => "sle",
        };
        write!(f, "{s}")
    }
}

/// The packed representation of an instruction operand.
///
/// # Encoding
///
/// ```ignore
///  1             15
/// +---+--------------------------+
/// | k |         index            |
/// +---+--------------------------+
/// ```
///
///  - `k=0`: `index` is a local variable index
///  - `k=1`: `index` is a constant index
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PackedOperand(u16);

const OPERAND_IDX_MASK: u16 = 0x7FFF;

impl PackedOperand {
    pub fn new(op: &Operand) -> Self {
        match op {
            Operand::Local(iidx) => {
                debug_assert!(iidx.to_u16() <= OPERAND_IDX_MASK);
                PackedOperand(iidx.to_u16())
            }
            Operand::Const(cidx) => {
                debug_assert!(cidx.to_u16() <= OPERAND_IDX_MASK);
                PackedOperand(cidx.to_u16() | !OPERAND_IDX_MASK)
            }
        }
    }

    /// Unpacks a [PackedOperand] into an [Operand].
    pub fn unpack(&self) -> Operand {
        if (self.0 & !OPERAND_IDX_MASK) == 0 {
            Operand::Local(InstIdx(self.0))
        } else {
            Operand::Const(ConstIdx(self.0 & OPERAND_IDX_MASK))
        }
    }
}

/// An unpacked representation of an operand.
///
/// This exists both as a convenience (working with packed operands is
/// laborious) and as a means to add type safety.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Local(InstIdx),
    Const(ConstIdx),
}

impl Operand {
    /// Returns the type index of the operand.
    pub fn tyidx(&self, m: &Module) -> TyIdx {
        match self {
            Self::Local(iidx) => m
                .inst(*iidx)
                .def_tyidx(m)
                .expect("operand from a non-value-defining instruction"),
            Self::Const(cidx) => m.const_(*cidx).tyidx(m),
        }
    }

    /// Returns the type of the operand.
    pub fn type_<'a>(&self, m: &'a Module) -> &'a Ty {
        m.type_(self.tyidx(m))
    }

    /// Returns the bit width of the operand.
    pub fn bitw(&self, m: &Module) -> u32 {
        self.type_(m).bitw().unwrap()
    }

    pub fn display<'a>(&self, m: &'a Module) -> DisplayableOperand<'a> {
        DisplayableOperand {
            op: self.clone(),
            m,
        }
    }
}

pub struct DisplayableOperand<'a> {
    op: Operand,
    m: &'a Module,
}

impl fmt::Display for DisplayableOperand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operand::Local(iidx) => write!(f, "%{}", iidx.to_u16()),
            Operand::Const(cidx) => match self.m.const_(cidx) {
                Const::Int { tyidx, v } => {
                    write!(f, "{}{}", v, self.m.type_(*tyidx))
                }
                Const::Float { tyidx, v } => write!(f, "{}{}", v, self.m.type_(*tyidx)),
                Const::Ptr(v) => write!(f, "{v:#x}"),
            },
        }
    }
}

/// Reference-tracking metadata for a value.
///
/// After register allocation the garbage collector must still be able to
/// find every live managed reference, including values that are merely
/// *derived* from one (e.g. an interior address computed by address
/// arithmetic). Combining two values therefore merges their base sets.
#[derive(Clone, Debug, PartialEq)]
pub enum RefOrigin {
    /// The value is not, and does not derive from, a managed reference.
    None,
    /// The value is itself a managed reference.
    Managed,
    /// The value derives from the managed references defined by the listed
    /// instructions.
    Derived(SmallVec<[InstIdx; 2]>),
}

impl RefOrigin {
    /// Merge the derived origins of two values into the origin of a value
    /// computed from both. Inputs must already be in derived form (i.e.
    /// the output of [Module::derived_ref]).
    pub fn combine(lhs: RefOrigin, rhs: RefOrigin) -> RefOrigin {
        debug_assert!(!matches!(lhs, RefOrigin::Managed));
        debug_assert!(!matches!(rhs, RefOrigin::Managed));
        match (lhs, rhs) {
            (RefOrigin::None, RefOrigin::None) => RefOrigin::None,
            (x, RefOrigin::None) | (RefOrigin::None, x) => x,
            (RefOrigin::Derived(mut a), RefOrigin::Derived(b)) => {
                for iidx in b {
                    if !a.contains(&iidx) {
                        a.push(iidx);
                    }
                }
                RefOrigin::Derived(a)
            }
            _ => unreachable!(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, RefOrigin::None)
    }
}

/// A trace parameter: a value that is live on entry to the trace.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParamInst {
    tyidx: TyIdx,
    /// Is the parameter a managed object reference?
    managed_ref: bool,
}

impl ParamInst {
    pub fn new(tyidx: TyIdx, managed_ref: bool) -> Self {
        Self {
            tyidx,
            managed_ref,
        }
    }

    pub fn tyidx(&self) -> TyIdx {
        self.tyidx
    }

    pub fn managed_ref(&self) -> bool {
        self.managed_ref
    }
}

/// An integer comparison.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ICmpInst {
    lhs: PackedOperand,
    pred: Predicate,
    rhs: PackedOperand,
}

impl ICmpInst {
    /// Create an integer comparison. Both operands must be integer typed
    /// and of the same type: anything else is a bug in whatever built the
    /// IR, not in this crate.
    pub fn new(m: &Module, lhs: Operand, pred: Predicate, rhs: Operand) -> Self {
        debug_assert!(lhs.type_(m).is_integer());
        debug_assert_eq!(lhs.tyidx(m), rhs.tyidx(m));
        Self {
            lhs: PackedOperand::new(&lhs),
            pred,
            rhs: PackedOperand::new(&rhs),
        }
    }

    pub fn lhs(&self) -> Operand {
        self.lhs.unpack()
    }

    pub fn predicate(&self) -> Predicate {
        self.pred
    }

    pub fn rhs(&self) -> Operand {
        self.rhs.unpack()
    }
}

/// A float comparison.
///
/// The logical condition is the pair `(pred, unordered_is_true)`: the
/// comparison's result when at least one operand is NaN is
/// `unordered_is_true`, independently of `pred`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FCmpInst {
    lhs: PackedOperand,
    pred: Predicate,
    rhs: PackedOperand,
    unordered_is_true: bool,
}

impl FCmpInst {
    /// Create a float comparison.
    ///
    /// # Panics
    ///
    /// Panics if `rhs` is a constant that [Self::is_float_cmp_constant]
    /// rejects. This is checked here, at construction, so that malformed
    /// comparisons are diagnosed close to their cause rather than at
    /// emission.
    pub fn new(
        m: &Module,
        lhs: Operand,
        pred: Predicate,
        unordered_is_true: bool,
        rhs: Operand,
    ) -> Self {
        if let Operand::Const(cidx) = rhs {
            assert!(
                Self::is_float_cmp_constant(m, cidx, pred, unordered_is_true),
                "illegal constant operand in float comparison: {:?} {pred}",
                m.const_(cidx)
            );
        }
        debug_assert!(lhs.type_(m).is_float());
        debug_assert_eq!(lhs.tyidx(m), rhs.tyidx(m));
        Self {
            lhs: PackedOperand::new(&lhs),
            pred,
            rhs: PackedOperand::new(&rhs),
            unordered_is_true,
        }
    }

    /// Can `cidx` be used as the constant operand of a float comparison
    /// with the given condition?
    ///
    /// The conditions "equal or unordered" and "not-equal and ordered"
    /// would need the two-register conditional flag fixup for any other
    /// operand, but against the default (zero) value the plain
    /// compare-against-zero form is correct, so only that combination may
    /// use a constant.
    pub fn is_float_cmp_constant(
        m: &Module,
        cidx: ConstIdx,
        pred: Predicate,
        unordered_is_true: bool,
    ) -> bool {
        if !(pred == Predicate::Equal && unordered_is_true
            || pred == Predicate::NotEqual && !unordered_is_true)
        {
            return false;
        }
        m.const_(cidx).is_default()
    }

    pub fn lhs(&self) -> Operand {
        self.lhs.unpack()
    }

    pub fn predicate(&self) -> Predicate {
        self.pred
    }

    pub fn unordered_is_true(&self) -> bool {
        self.unordered_is_true
    }

    pub fn rhs(&self) -> Operand {
        self.rhs.unpack()
    }
}

/// The float-to-integer conversions the target diverges from the source
/// language on (NaN, overflow and infinity inputs), and which therefore
/// always lower to the hardware conversion *plus* a fixup sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FloatConvertKind {
    FloatToI32,
    FloatToI64,
    DoubleToI32,
    DoubleToI64,
}

impl FloatConvertKind {
    pub fn src_float_ty(&self) -> FloatTy {
        match self {
            Self::FloatToI32 | Self::FloatToI64 => FloatTy::Float,
            Self::DoubleToI32 | Self::DoubleToI64 => FloatTy::Double,
        }
    }

    pub fn dest_bitw(&self) -> u32 {
        match self {
            Self::FloatToI32 | Self::DoubleToI32 => 32,
            Self::FloatToI64 | Self::DoubleToI64 => 64,
        }
    }
}

/// A float-to-integer conversion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FloatConvertInst {
    val: PackedOperand,
    kind: FloatConvertKind,
}

impl FloatConvertInst {
    pub fn new(m: &Module, val: Operand, kind: FloatConvertKind) -> Self {
        debug_assert_eq!(
            val.type_(m),
            &Ty::Float(kind.src_float_ty()),
            "conversion source type mismatch"
        );
        Self {
            val: PackedOperand::new(&val),
            kind,
        }
    }

    pub fn val(&self) -> Operand {
        self.val.unpack()
    }

    pub fn kind(&self) -> FloatConvertKind {
        self.kind
    }
}

/// An address of the form `[base + index]`.
///
/// The instruction's reference metadata is derived from `base` and `index`
/// at creation time and re-derived on operand replacement: see
/// [Module::set_addr_base] and [Module::set_addr_index].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexedAddrInst {
    base: PackedOperand,
    index: PackedOperand,
}

impl IndexedAddrInst {
    pub fn new(base: Operand, index: Operand) -> Self {
        Self {
            base: PackedOperand::new(&base),
            index: PackedOperand::new(&index),
        }
    }

    pub fn base(&self) -> Operand {
        self.base.unpack()
    }

    pub fn index(&self) -> Operand {
        self.index.unpack()
    }
}

/// An IR instruction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Inst {
    Param(ParamInst),
    ICmp(ICmpInst),
    FCmp(FCmpInst),
    FloatConvert(FloatConvertInst),
    IndexedAddr(IndexedAddrInst),
    /// Marks the end of the trace.
    TraceEnd,
    /// A no-op that a dead instruction is replaced with (the stream never
    /// shrinks, as that would invalidate indices).
    Tombstone,
}

// The instruction stream can get long, so make sure instructions stay small.
static_assertions::const_assert!(mem::size_of::<Inst>() <= 16);

impl Inst {
    /// Returns the type index of the local variable that the instruction
    /// defines, or `None` if it defines no value.
    pub fn def_tyidx(&self, m: &Module) -> Option<TyIdx> {
        match self {
            Self::Param(x) => Some(x.tyidx()),
            Self::ICmp(_) | Self::FCmp(_) => Some(m.int1_tyidx()),
            Self::FloatConvert(x) => Some(match x.kind().dest_bitw() {
                32 => m.int32_tyidx(),
                64 => m.int64_tyidx(),
                _ => unreachable!(),
            }),
            Self::IndexedAddr(_) => Some(m.ptr_tyidx()),
            Self::TraceEnd | Self::Tombstone => None,
        }
    }

    /// Returns the type of the local variable defined by this instruction,
    /// or `None` if it defines no value.
    pub fn def_type<'a>(&self, m: &'a Module) -> Option<&'a Ty> {
        self.def_tyidx(m).map(|tyidx| m.type_(tyidx))
    }

    /// The operands this instruction uses.
    pub fn operands(&self) -> SmallVec<[Operand; 2]> {
        match self {
            Self::Param(_) | Self::TraceEnd | Self::Tombstone => smallvec![],
            Self::ICmp(x) => smallvec![x.lhs(), x.rhs()],
            Self::FCmp(x) => smallvec![x.lhs(), x.rhs()],
            Self::FloatConvert(x) => smallvec![x.val()],
            Self::IndexedAddr(x) => smallvec![x.base(), x.index()],
        }
    }

    /// May this instruction be removed or rewritten by simplification
    /// passes?
    ///
    /// Float conversions always answer `false`: their source-language
    /// semantics and the hardware instruction diverge only in encoding, so
    /// no compile-time shortcut is sound and the lowering must always see
    /// them. Parameters answer `false` too: they are positional ABI state,
    /// not computation.
    pub fn may_simplify(&self) -> bool {
        !matches!(
            self,
            Self::Param(_) | Self::FloatConvert(_) | Self::TraceEnd
        )
    }

    pub fn display<'a>(&'a self, iidx: InstIdx, m: &'a Module) -> DisplayableInst<'a> {
        DisplayableInst {
            inst: self,
            iidx,
            m,
        }
    }
}

pub struct DisplayableInst<'a> {
    inst: &'a Inst,
    iidx: InstIdx,
    m: &'a Module,
}

impl fmt::Display for DisplayableInst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dt) = self.inst.def_type(self.m) {
            write!(f, "%{}: {dt} = ", self.iidx.to_u16())?;
        }
        match self.inst {
            Inst::Param(x) => {
                if x.managed_ref() {
                    write!(f, "param ref {}", self.m.type_(x.tyidx()))
                } else {
                    write!(f, "param {}", self.m.type_(x.tyidx()))
                }
            }
            Inst::ICmp(x) => write!(
                f,
                "{} {}, {}",
                x.predicate(),
                x.lhs().display(self.m),
                x.rhs().display(self.m)
            ),
            Inst::FCmp(x) => write!(
                f,
                "f_{}{} {}, {}",
                if x.unordered_is_true() { "u" } else { "o" },
                x.predicate(),
                x.lhs().display(self.m),
                x.rhs().display(self.m)
            ),
            Inst::FloatConvert(x) => write!(
                f,
                "fptosi i{} {}",
                x.kind().dest_bitw(),
                x.val().display(self.m)
            ),
            Inst::IndexedAddr(x) => write!(
                f,
                "idx_addr {}, {}",
                x.base().display(self.m),
                x.index().display(self.m)
            ),
            Inst::TraceEnd => write!(f, "trace_end"),
            Inst::Tombstone => write!(f, "tombstone"),
        }
    }
}

/// The `Module` is the top-level container for the IR.
///
/// The instruction stream of a [Module] is partially mutable:
/// - you may append new instructions to the end.
/// - you may replace an instruction with another.
/// - you may NOT remove an instruction.
#[derive(Debug)]
pub struct Module {
    /// The IR trace as a linear sequence of instructions.
    insts: TiVec<InstIdx, Inst>,
    /// The constant table. A [ConstIdx] describes an index into this.
    consts: TiVec<ConstIdx, Const>,
    /// The type table. A [TyIdx] describes an index into this.
    types: TiVec<TyIdx, Ty>,
    /// The reverse-usage index: for each instruction, the set of
    /// instructions using the value it defines. Maintained by [Self::push]
    /// and the operand-replacement methods.
    uses: TiVec<InstIdx, IndexSet<InstIdx>>,
    /// Per-instruction reference-tracking metadata.
    ref_origins: TiVec<InstIdx, RefOrigin>,
    /// Cached indices of commonly used types.
    void_tyidx: TyIdx,
    ptr_tyidx: TyIdx,
    int1_tyidx: TyIdx,
    int8_tyidx: TyIdx,
    int32_tyidx: TyIdx,
    int64_tyidx: TyIdx,
}

impl Module {
    pub fn new() -> Self {
        // Create some commonly used types ahead of time. Aside from being
        // convenient, this allows their indices to be known in contexts
        // where a mutable module reference is unavailable.
        let mut types = TiVec::new();
        let void_tyidx = TyIdx::new(types.len()).unwrap();
        types.push(Ty::Void);
        let ptr_tyidx = TyIdx::new(types.len()).unwrap();
        types.push(Ty::Ptr);
        let int1_tyidx = TyIdx::new(types.len()).unwrap();
        types.push(Ty::Integer(1));
        let int8_tyidx = TyIdx::new(types.len()).unwrap();
        types.push(Ty::Integer(8));
        let int32_tyidx = TyIdx::new(types.len()).unwrap();
        types.push(Ty::Integer(32));
        let int64_tyidx = TyIdx::new(types.len()).unwrap();
        types.push(Ty::Integer(64));

        Self {
            insts: TiVec::new(),
            consts: TiVec::new(),
            types,
            uses: TiVec::new(),
            ref_origins: TiVec::new(),
            void_tyidx,
            ptr_tyidx,
            int1_tyidx,
            int8_tyidx,
            int32_tyidx,
            int64_tyidx,
        }
    }

    pub fn void_tyidx(&self) -> TyIdx {
        self.void_tyidx
    }

    pub fn ptr_tyidx(&self) -> TyIdx {
        self.ptr_tyidx
    }

    pub fn int1_tyidx(&self) -> TyIdx {
        self.int1_tyidx
    }

    pub fn int8_tyidx(&self) -> TyIdx {
        self.int8_tyidx
    }

    pub fn int32_tyidx(&self) -> TyIdx {
        self.int32_tyidx
    }

    pub fn int64_tyidx(&self) -> TyIdx {
        self.int64_tyidx
    }

    /// Return the instruction at the specified index.
    pub fn inst(&self, iidx: InstIdx) -> &Inst {
        &self.insts[iidx]
    }

    /// Return the [Ty] for the specified index.
    pub fn type_(&self, tyidx: TyIdx) -> &Ty {
        &self.types[tyidx]
    }

    /// Return the [Const] for the specified index.
    pub fn const_(&self, cidx: ConstIdx) -> &Const {
        &self.consts[cidx]
    }

    /// Returns the number of instructions in the module.
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// An iterator over all instruction indices, in program order.
    pub fn iter_inst_idxs(&self) -> impl DoubleEndedIterator<Item = InstIdx> {
        (0..self.insts.len()).map(|x| InstIdx::new(x).unwrap())
    }

    /// Find or insert a type, returning its index. Insertion deduplicates,
    /// so equal types always map to equal indices.
    pub fn insert_ty(&mut self, ty: Ty) -> Result<TyIdx, CompilationError> {
        if let Some(tyidx) = self
            .types
            .iter_enumerated()
            .find(|(_, t)| *t == &ty)
            .map(|(tyidx, _)| tyidx)
        {
            return Ok(tyidx);
        }
        let tyidx = TyIdx::new(self.types.len())?;
        self.types.push(ty);
        Ok(tyidx)
    }

    /// Insert a constant, returning its index.
    pub fn insert_const(&mut self, const_: Const) -> Result<ConstIdx, CompilationError> {
        let cidx = ConstIdx::new(self.consts.len())?;
        self.consts.push(const_);
        Ok(cidx)
    }

    /// Push an instruction to the end of the [Module], updating the
    /// reverse-usage index and the new value's reference metadata.
    pub fn push(&mut self, inst: Inst) -> Result<InstIdx, CompilationError> {
        let iidx = InstIdx::new(self.insts.len())?;
        for op in inst.operands() {
            if let Operand::Local(op_iidx) = op {
                self.uses[op_iidx].insert(iidx);
            }
        }
        let refs = self.ref_origin_of(&inst);
        self.insts.push(inst);
        self.uses.push(IndexSet::new());
        self.ref_origins.push(refs);
        Ok(iidx)
    }

    /// Push an instruction and return an [Operand] for the value it
    /// defines. An idiom used a lot (but not exclusively) in testing.
    ///
    /// # Panics
    ///
    /// Panics if the instruction doesn't define a value.
    pub fn push_and_make_operand(&mut self, inst: Inst) -> Result<Operand, CompilationError> {
        if inst.def_tyidx(self).is_none() {
            panic!("instruction defines no local variable");
        }
        let iidx = self.push(inst)?;
        Ok(Operand::Local(iidx))
    }

    /// Replace the instruction at `iidx` with `inst`, dropping the old
    /// instruction's entries from the reverse-usage index. The new value's
    /// reference metadata is recomputed.
    pub fn replace(&mut self, iidx: InstIdx, inst: Inst) {
        for op in self.insts[iidx].operands() {
            if let Operand::Local(op_iidx) = op {
                self.uses[op_iidx].shift_remove(&iidx);
            }
        }
        for op in inst.operands() {
            if let Operand::Local(op_iidx) = op {
                self.uses[op_iidx].insert(iidx);
            }
        }
        self.ref_origins[iidx] = self.ref_origin_of(&inst);
        self.insts[iidx] = inst;
    }

    /// The instructions using the value defined at `iidx`.
    pub fn uses_of(&self, iidx: InstIdx) -> &IndexSet<InstIdx> {
        &self.uses[iidx]
    }

    /// The reference metadata of the value defined at `iidx`.
    pub fn ref_origin(&self, iidx: InstIdx) -> &RefOrigin {
        &self.ref_origins[iidx]
    }

    /// Returns the reference base(s) a value derives from, in derived form:
    /// a managed reference derives from itself. Constants never carry
    /// reference metadata.
    pub fn derived_ref(&self, op: &Operand) -> RefOrigin {
        match op {
            Operand::Const(_) => RefOrigin::None,
            Operand::Local(iidx) => match &self.ref_origins[*iidx] {
                RefOrigin::None => RefOrigin::None,
                RefOrigin::Managed => RefOrigin::Derived(smallvec![*iidx]),
                RefOrigin::Derived(bases) => RefOrigin::Derived(bases.clone()),
            },
        }
    }

    /// Compute the reference metadata of the value `inst` defines.
    fn ref_origin_of(&self, inst: &Inst) -> RefOrigin {
        match inst {
            Inst::Param(x) => {
                if x.managed_ref() {
                    RefOrigin::Managed
                } else {
                    RefOrigin::None
                }
            }
            // An address computed from base + index must never lose the
            // reference metadata of either input.
            Inst::IndexedAddr(x) => RefOrigin::combine(
                self.derived_ref(&x.base()),
                self.derived_ref(&x.index()),
            ),
            _ => RefOrigin::None,
        }
    }

    /// Replace the base operand of the [IndexedAddrInst] at `iidx`. The
    /// instruction keeps its identity (its index); the reverse-usage index
    /// and the value's reference metadata are updated.
    ///
    /// # Panics
    ///
    /// Panics if `iidx` is not an [IndexedAddrInst].
    pub fn set_addr_base(&mut self, iidx: InstIdx, new_base: Operand) {
        let Inst::IndexedAddr(x) = self.insts[iidx] else {
            panic!("not an indexed address instruction");
        };
        self.replace(iidx, Inst::IndexedAddr(IndexedAddrInst::new(new_base, x.index())));
    }

    /// Replace the index operand of the [IndexedAddrInst] at `iidx`. See
    /// [Self::set_addr_base].
    pub fn set_addr_index(&mut self, iidx: InstIdx, new_index: Operand) {
        let Inst::IndexedAddr(x) = self.insts[iidx] else {
            panic!("not an indexed address instruction");
        };
        self.replace(iidx, Inst::IndexedAddr(IndexedAddrInst::new(x.base(), new_index)));
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry:")?;
        for iidx in self.iter_inst_idxs() {
            write!(f, "\n  {}", self.inst(iidx).display(iidx, self))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_operand_roundtrip() {
        let op = PackedOperand::new(&Operand::Local(InstIdx(192)));
        assert_eq!(op.unpack(), Operand::Local(InstIdx(192)));
        let op = PackedOperand::new(&Operand::Const(ConstIdx(192)));
        assert_eq!(op.unpack(), Operand::Const(ConstIdx(192)));
    }

    #[test]
    fn use_lists_track_pushes() {
        let mut m = Module::new();
        let p0 = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        let p1 = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        let cmp = m
            .push(Inst::ICmp(ICmpInst::new(
                &m,
                p0.clone(),
                Predicate::Equal,
                p1.clone(),
            )))
            .unwrap();
        let Operand::Local(p0_iidx) = p0 else { panic!() };
        let Operand::Local(p1_iidx) = p1 else { panic!() };
        assert!(m.uses_of(p0_iidx).contains(&cmp));
        assert!(m.uses_of(p1_iidx).contains(&cmp));
        assert!(m.uses_of(cmp).is_empty());
    }

    #[test]
    fn addr_operand_replacement_updates_uses() {
        let mut m = Module::new();
        let old_base = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.ptr_tyidx(), true)))
            .unwrap();
        let new_base = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.ptr_tyidx(), true)))
            .unwrap();
        let index = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        let addr = m
            .push(Inst::IndexedAddr(IndexedAddrInst::new(
                old_base.clone(),
                index.clone(),
            )))
            .unwrap();

        let Operand::Local(old_iidx) = old_base else { panic!() };
        let Operand::Local(new_iidx) = new_base.clone() else { panic!() };
        assert!(m.uses_of(old_iidx).contains(&addr));
        assert!(!m.uses_of(new_iidx).contains(&addr));

        m.set_addr_base(addr, new_base);

        // Same instruction, new operand: the index is unchanged, the
        // reverse-usage records have moved from the old base to the new.
        let Inst::IndexedAddr(x) = m.inst(addr) else { panic!() };
        assert_eq!(x.base(), Operand::Local(new_iidx));
        assert_eq!(x.index(), index);
        assert!(!m.uses_of(old_iidx).contains(&addr));
        assert!(m.uses_of(new_iidx).contains(&addr));
        assert_eq!(m.ref_origin(addr), &RefOrigin::Derived(smallvec![new_iidx]));
    }

    #[test]
    fn ref_origin_combining() {
        let mut m = Module::new();
        let base = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.ptr_tyidx(), true)))
            .unwrap();
        let index = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        let addr = m
            .push(Inst::IndexedAddr(IndexedAddrInst::new(base.clone(), index)))
            .unwrap();
        let Operand::Local(base_iidx) = base else { panic!() };
        assert_eq!(
            m.ref_origin(addr),
            &RefOrigin::Derived(smallvec![base_iidx])
        );

        // Neither input carries metadata: neither does the result.
        let p2 = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.ptr_tyidx(), false)))
            .unwrap();
        let p3 = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        let addr2 = m
            .push(Inst::IndexedAddr(IndexedAddrInst::new(p2, p3)))
            .unwrap();
        assert!(m.ref_origin(addr2).is_none());

        // Two derived inputs merge both base sets.
        let combined = RefOrigin::combine(
            RefOrigin::Derived(smallvec![InstIdx(0)]),
            RefOrigin::Derived(smallvec![InstIdx(1), InstIdx(0)]),
        );
        assert_eq!(
            combined,
            RefOrigin::Derived(smallvec![InstIdx(0), InstIdx(1)])
        );
    }

    #[test]
    fn float_convert_never_simplifies() {
        let mut m = Module::new();
        let fty = m.insert_ty(Ty::Float(FloatTy::Double)).unwrap();
        let val = m
            .push_and_make_operand(Inst::Param(ParamInst::new(fty, false)))
            .unwrap();
        let fc = Inst::FloatConvert(FloatConvertInst::new(
            &m,
            val,
            FloatConvertKind::DoubleToI64,
        ));
        assert!(!fc.may_simplify());
        assert!(Inst::Tombstone.may_simplify());
    }

    #[test]
    fn float_cmp_constant_legality() {
        let mut m = Module::new();
        let fty = m.insert_ty(Ty::Float(FloatTy::Float)).unwrap();
        let zero = m
            .insert_const(Const::Float { tyidx: fty, v: 0.0 })
            .unwrap();
        let nonzero = m
            .insert_const(Const::Float { tyidx: fty, v: 1.5 })
            .unwrap();

        // The two conditions that would otherwise need the flag fixup may
        // compare against the zero default...
        assert!(FCmpInst::is_float_cmp_constant(&m, zero, Predicate::Equal, true));
        assert!(FCmpInst::is_float_cmp_constant(&m, zero, Predicate::NotEqual, false));
        // ...but not against any other constant...
        assert!(!FCmpInst::is_float_cmp_constant(&m, nonzero, Predicate::Equal, true));
        // ...and no other condition may use a constant at all.
        assert!(!FCmpInst::is_float_cmp_constant(&m, zero, Predicate::Equal, false));
        assert!(!FCmpInst::is_float_cmp_constant(&m, zero, Predicate::NotEqual, true));
        assert!(!FCmpInst::is_float_cmp_constant(&m, zero, Predicate::SignedLess, false));
    }

    #[test]
    #[should_panic]
    fn int_cmp_operand_width_mismatch_rejected() {
        let mut m = Module::new();
        let lhs = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.int8_tyidx(), false)))
            .unwrap();
        let rhs = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.int64_tyidx(), false)))
            .unwrap();
        ICmpInst::new(&m, lhs, Predicate::Equal, rhs);
    }

    #[test]
    #[should_panic]
    fn float_cmp_nonzero_constant_rejected_at_construction() {
        let mut m = Module::new();
        let fty = m.insert_ty(Ty::Float(FloatTy::Float)).unwrap();
        let lhs = m
            .push_and_make_operand(Inst::Param(ParamInst::new(fty, false)))
            .unwrap();
        let nonzero = m
            .insert_const(Const::Float { tyidx: fty, v: 1.5 })
            .unwrap();
        FCmpInst::new(&m, lhs, Predicate::NotEqual, false, Operand::Const(nonzero));
    }

    #[test]
    fn display_ir() {
        let mut m = Module::new();
        let p0 = m
            .push_and_make_operand(Inst::Param(ParamInst::new(m.int8_tyidx(), false)))
            .unwrap();
        let c = m
            .insert_const(Const::Int {
                tyidx: m.int8_tyidx(),
                v: 3,
            })
            .unwrap();
        m.push(Inst::ICmp(ICmpInst::new(
            &m,
            p0,
            Predicate::UnsignedLess,
            Operand::Const(c),
        )))
        .unwrap();
        m.push(Inst::TraceEnd).unwrap();
        assert_eq!(
            m.to_string(),
            "entry:\n  %0: i8 = param i8\n  %1: i1 = ult %0, 3i8\n  trace_end"
        );
    }
}
