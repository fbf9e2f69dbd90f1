//! SSA-form optimizer IR.
//!
//! The code container holds numbered basic blocks of SSA-valued
//! instructions; every instruction is identified by a per-function dense
//! [`InstrRef`] that stays valid for the function's lifetime. Phi nodes
//! carry one incoming value per predecessor block, call nodes keep their
//! argument lists out of line, and terminators make the control-flow graph
//! explicit. [`analysis`] computes linear indices and a block schedule for
//! codegen.

pub mod analysis;
pub mod build;

pub use self::analysis::CodeAnalysis;

use crate::entity::PrimaryMap;
use crate::entity_ref;
use crate::ir::{
    AsmTemplateId, BigIntId, BitintOpKind, CmpOp, FloatWidth, LocalDecl, LocalId, MemoryOrder,
    OpWidth, OverflowOp,
};
use crate::strings::StringId;
use crate::types::TypeId;

entity_ref! {
    /// Reference to a basic block.
    pub struct BlockId("bb")
}

entity_ref! {
    /// Reference to an instruction; dense within one function.
    pub struct InstrRef("i")
}

entity_ref! {
    /// Reference to a phi node.
    pub struct PhiRef("phi")
}

entity_ref! {
    /// Reference to a call node.
    pub struct CallRef("call")
}

entity_ref! {
    /// Reference to an optimizer function.
    pub struct OptFunctionId("fn")
}

/// Integer binary operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntBinaryOp {
    /// Wrapping add.
    Add,
    /// Wrapping subtract.
    Sub,
    /// Multiply (signedness only affects flags/overflow semantics).
    Mul {
        /// Signed multiply.
        signed: bool,
    },
    /// Divide.
    Div {
        /// Signed divide.
        signed: bool,
    },
    /// Remainder.
    Mod {
        /// Signed remainder.
        signed: bool,
    },
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Shift left.
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Sar,
}

/// Integer unary operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntUnaryOp {
    /// Two's-complement negate.
    Neg,
    /// Bitwise complement.
    Not,
}

/// Floating binary operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatBinaryOp {
    /// Add.
    Add,
    /// Subtract.
    Sub,
    /// Multiply.
    Mul,
    /// Divide.
    Div,
}

/// Who is being called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    /// Direct call to a symbol.
    Direct(String),
    /// Call through a function pointer value.
    Indirect(InstrRef),
}

/// Out-of-line payload of a call instruction.
#[derive(Debug, Clone)]
pub struct CallNode {
    /// Callee.
    pub callee: Callee,
    /// C function type of the callee, when known.
    pub signature: Option<TypeId>,
    /// Arguments in order.
    pub args: Vec<InstrRef>,
    /// Destination address for a memory-returned result.
    pub return_space: Option<InstrRef>,
}

/// Phi node payload: one incoming value per predecessor.
#[derive(Debug, Clone, Default)]
pub struct PhiNode {
    /// `(predecessor block, incoming value)` pairs.
    pub links: Vec<(BlockId, InstrRef)>,
}

impl PhiNode {
    /// The incoming value from `block`, if linked.
    pub fn incoming(&self, block: BlockId) -> Option<InstrRef> {
        self.links
            .iter()
            .find(|(pred, _)| *pred == block)
            .map(|(_, value)| *value)
    }
}

/// SSA instruction payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    /// Signed integer constant.
    IntConst(i64),
    /// Unsigned integer constant.
    UIntConst(u64),
    /// `float` constant.
    F32Const(f32),
    /// `double` constant.
    F64Const(f64),
    /// `long double` constant.
    LongDoubleConst(f64),
    /// Address of an interned bit-precise constant.
    BigIntConst(BigIntId),
    /// Address of a string literal.
    StringAddr(StringId),
    /// Address of a named symbol plus offset.
    GlobalAddr {
        /// Symbol name.
        name: String,
        /// Byte offset.
        offset: i64,
    },
    /// Address of a local slot.
    LocalAddr(LocalId),
    /// Integer load.
    Load {
        /// Address operand.
        addr: InstrRef,
        /// Access width.
        width: OpWidth,
        /// Sign-extend to 64 bits.
        signed: bool,
        /// Volatile access.
        volatile: bool,
    },
    /// Integer store.
    Store {
        /// Address operand.
        addr: InstrRef,
        /// Stored value.
        value: InstrRef,
        /// Access width.
        width: OpWidth,
        /// Volatile access.
        volatile: bool,
    },
    /// Floating load.
    LoadFloat {
        /// Address operand.
        addr: InstrRef,
        /// Access width.
        width: FloatWidth,
        /// Volatile access.
        volatile: bool,
    },
    /// Floating store.
    StoreFloat {
        /// Address operand.
        addr: InstrRef,
        /// Stored value.
        value: InstrRef,
        /// Access width.
        width: FloatWidth,
        /// Volatile access.
        volatile: bool,
    },
    /// Byte copy between two addresses.
    CopyMemory {
        /// Destination address.
        dst: InstrRef,
        /// Source address.
        src: InstrRef,
        /// Byte count.
        size: u64,
    },
    /// Zero fill.
    ZeroMemory {
        /// Destination address.
        addr: InstrRef,
        /// Byte count.
        size: u64,
    },
    /// Bitfield extract.
    BitExtract {
        /// Storage-unit value.
        value: InstrRef,
        /// Bit offset.
        offset: u64,
        /// Field width.
        width: u64,
        /// Sign-extend the field.
        signed: bool,
    },
    /// Bitfield insert.
    BitInsert {
        /// Original storage-unit value.
        base: InstrRef,
        /// Field value.
        value: InstrRef,
        /// Bit offset.
        offset: u64,
        /// Field width.
        width: u64,
    },
    /// Integer binary operation.
    IntBinary {
        /// Selector.
        op: IntBinaryOp,
        /// Operation width.
        width: OpWidth,
        /// Left operand.
        lhs: InstrRef,
        /// Right operand.
        rhs: InstrRef,
    },
    /// Integer unary operation.
    IntUnary {
        /// Selector.
        op: IntUnaryOp,
        /// Operation width.
        width: OpWidth,
        /// Operand.
        value: InstrRef,
    },
    /// Integer comparison producing 0/1.
    IntCmp {
        /// Comparison kind.
        op: CmpOp,
        /// Operation width.
        width: OpWidth,
        /// Left operand.
        lhs: InstrRef,
        /// Right operand.
        rhs: InstrRef,
    },
    /// Logical negation of a 0/1 value.
    BoolNot {
        /// Operand.
        value: InstrRef,
    },
    /// Sign-extension of the low `width` bits to 64 bits.
    SignExtend {
        /// Source width.
        width: OpWidth,
        /// Operand.
        value: InstrRef,
    },
    /// Zero-extension of the low `width` bits to 64 bits.
    ZeroExtend {
        /// Source width.
        width: OpWidth,
        /// Operand.
        value: InstrRef,
    },
    /// Floating binary operation.
    FloatBinary {
        /// Selector.
        op: FloatBinaryOp,
        /// Operation width.
        width: FloatWidth,
        /// Left operand.
        lhs: InstrRef,
        /// Right operand.
        rhs: InstrRef,
    },
    /// Floating negation.
    FloatNeg {
        /// Operation width.
        width: FloatWidth,
        /// Operand.
        value: InstrRef,
    },
    /// Floating comparison producing 0/1.
    FloatCmp {
        /// Comparison kind (unsigned family encodes ordered comparisons).
        op: CmpOp,
        /// Operation width.
        width: FloatWidth,
        /// Left operand.
        lhs: InstrRef,
        /// Right operand.
        rhs: InstrRef,
    },
    /// Integer to floating conversion.
    IntToFloat {
        /// Destination width.
        to: FloatWidth,
        /// Signed source.
        signed: bool,
        /// Operand.
        value: InstrRef,
    },
    /// Floating to integer conversion.
    FloatToInt {
        /// Source width.
        from: FloatWidth,
        /// Signed destination.
        signed: bool,
        /// Operand.
        value: InstrRef,
    },
    /// Floating width conversion.
    FloatConvert {
        /// Source width.
        from: FloatWidth,
        /// Destination width.
        to: FloatWidth,
        /// Operand.
        value: InstrRef,
    },
    /// Bit-precise binary runtime operation, in place at `lhs`.
    BitintOp {
        /// Runtime selector.
        op: BitintOpKind,
        /// Width in bits.
        width: u64,
        /// Writable left operand address (also the result).
        lhs: InstrRef,
        /// Right operand address.
        rhs: InstrRef,
    },
    /// Bit-precise unary runtime operation, in place.
    BitintUnary {
        /// Runtime selector.
        op: BitintOpKind,
        /// Width in bits.
        width: u64,
        /// Writable operand address (also the result).
        value: InstrRef,
    },
    /// Bit-precise shift, in place.
    BitintShift {
        /// Runtime selector.
        op: BitintOpKind,
        /// Width in bits.
        width: u64,
        /// Writable operand address.
        value: InstrRef,
        /// Shift count value.
        count: InstrRef,
    },
    /// Bit-precise zero test.
    BitintIsZero {
        /// Width in bits.
        width: u64,
        /// Operand address.
        value: InstrRef,
    },
    /// Bit-precise width cast in place.
    BitintCast {
        /// Sign-extending cast.
        signed: bool,
        /// Source width.
        from: u64,
        /// Destination width.
        to: u64,
        /// Writable operand address.
        value: InstrRef,
    },
    /// Store a native value into a bit-precise buffer.
    BitintFromInt {
        /// Sign-extend the native value.
        signed: bool,
        /// Destination width.
        width: u64,
        /// Native value.
        value: InstrRef,
        /// Destination address.
        addr: InstrRef,
    },
    /// Atomic integer load.
    AtomicLoad {
        /// Address operand.
        addr: InstrRef,
        /// Access width.
        width: OpWidth,
        /// Ordering.
        order: MemoryOrder,
    },
    /// Atomic integer store.
    AtomicStore {
        /// Address operand.
        addr: InstrRef,
        /// Stored value.
        value: InstrRef,
        /// Access width.
        width: OpWidth,
        /// Ordering.
        order: MemoryOrder,
    },
    /// Atomic compare-exchange; yields the success flag.
    AtomicCompareExchange {
        /// Object address.
        addr: InstrRef,
        /// Expected-value address.
        expected: InstrRef,
        /// Desired value.
        desired: InstrRef,
        /// Access width.
        width: OpWidth,
        /// Ordering.
        order: MemoryOrder,
    },
    /// Atomic copy of a non-register-sized object.
    AtomicCopyMemory {
        /// Destination address.
        dst: InstrRef,
        /// Source address.
        src: InstrRef,
        /// Byte count.
        size: u64,
        /// Ordering.
        order: MemoryOrder,
    },
    /// Overflow-checked arithmetic; yields the overflow flag and stores the
    /// wrapped result through `result_addr`.
    OverflowArith {
        /// Selector.
        op: OverflowOp,
        /// Operation width.
        width: OpWidth,
        /// Signed variant.
        signed: bool,
        /// Left operand.
        lhs: InstrRef,
        /// Right operand.
        rhs: InstrRef,
        /// Result destination address.
        result_addr: InstrRef,
    },
    /// Call; payload lives in the function's call table.
    Call(CallRef),
    /// Select between two values by a scalar condition.
    Select {
        /// Condition value.
        condition: InstrRef,
        /// Value when non-zero.
        on_true: InstrRef,
        /// Value when zero.
        on_false: InstrRef,
    },
    /// Fused compare-and-select.
    SelectCompare {
        /// Comparison kind.
        op: CmpOp,
        /// Comparison width.
        width: OpWidth,
        /// Compare left operand.
        lhs: InstrRef,
        /// Compare right operand.
        rhs: InstrRef,
        /// Value when the comparison holds.
        on_true: InstrRef,
        /// Value otherwise.
        on_false: InstrRef,
    },
    /// `va_start`.
    VaStart {
        /// `va_list` address.
        ap: InstrRef,
    },
    /// `va_end`.
    VaEnd {
        /// `va_list` address.
        ap: InstrRef,
    },
    /// `va_copy`.
    VaCopy {
        /// Destination `va_list` address.
        dst: InstrRef,
        /// Source `va_list` address.
        src: InstrRef,
    },
    /// `va_arg`.
    VaArg {
        /// `va_list` address.
        ap: InstrRef,
        /// Requested type.
        ty: TypeId,
    },
    /// Save the floating-point environment; yields a state token.
    FenvSave,
    /// Restore a saved floating-point environment.
    FenvRestore {
        /// Token from [`InstrKind::FenvSave`].
        state: InstrRef,
    },
    /// Inline-assembly fragment.
    InlineAsm {
        /// Template reference.
        template: AsmTemplateId,
        /// Input values followed by output addresses.
        operands: Vec<InstrRef>,
    },
    /// Phi; payload lives in the function's phi table.
    Phi(PhiRef),
    /// Unconditional jump terminator.
    Jump {
        /// Target block.
        target: BlockId,
    },
    /// Conditional branch terminator.
    Branch {
        /// Condition value.
        condition: InstrRef,
        /// Target when non-zero.
        on_true: BlockId,
        /// Target when zero.
        on_false: BlockId,
    },
    /// Return terminator.
    Return {
        /// Returned value, if any.
        value: Option<InstrRef>,
    },
}

impl InstrKind {
    /// Is this a block terminator?
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstrKind::Jump { .. } | InstrKind::Branch { .. } | InstrKind::Return { .. }
        )
    }
}

/// One instruction: payload plus owning block.
#[derive(Debug, Clone)]
pub struct Instr {
    /// Payload.
    pub kind: InstrKind,
    /// Owning block.
    pub block: BlockId,
    /// Source location carried from the translated statement.
    pub location: crate::source::SourceLocation,
}

/// One basic block: ordered instruction list ending in a terminator; phi
/// instructions come first.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Instructions in order.
    pub instrs: Vec<InstrRef>,
}

/// An optimizer-IR function.
#[derive(Debug)]
pub struct OptFunction {
    /// Symbol name.
    pub name: String,
    /// C function type.
    pub ty: TypeId,
    /// Local slots (parameters included).
    pub locals: PrimaryMap<LocalId, LocalDecl>,
    /// Parameter slots in order.
    pub parameters: Vec<LocalId>,
    /// Basic blocks.
    pub blocks: PrimaryMap<BlockId, Block>,
    /// Instruction arena.
    pub instrs: PrimaryMap<InstrRef, Instr>,
    /// Phi payloads.
    pub phis: PrimaryMap<PhiRef, PhiNode>,
    /// Call payloads.
    pub calls: PrimaryMap<CallRef, CallNode>,
    /// Entry block.
    pub entry: BlockId,
    /// Internal linkage?
    pub internal: bool,
    /// Variadic?
    pub variadic: bool,
}

impl OptFunction {
    /// Append an instruction to a block, returning its reference.
    pub fn append(&mut self, block: BlockId, kind: InstrKind) -> InstrRef {
        self.append_at(block, kind, crate::source::SourceLocation::default())
    }

    /// Append an instruction carrying a source location.
    pub fn append_at(
        &mut self,
        block: BlockId,
        kind: InstrKind,
        location: crate::source::SourceLocation,
    ) -> InstrRef {
        let instr = self.instrs.push(Instr {
            kind,
            block,
            location,
        });
        self.blocks[block].instrs.push(instr);
        instr
    }

    /// The terminator of a block, if it has one.
    pub fn terminator(&self, block: BlockId) -> Option<InstrRef> {
        self.blocks[block]
            .instrs
            .last()
            .copied()
            .filter(|&instr| self.instrs[instr].kind.is_terminator())
    }

    /// Successor blocks of `block` per its terminator.
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        match self.terminator(block).map(|t| &self.instrs[t].kind) {
            Some(InstrKind::Jump { target }) => vec![*target],
            Some(InstrKind::Branch {
                on_true, on_false, ..
            }) => vec![*on_true, *on_false],
            _ => Vec::new(),
        }
    }
}

/// An optimizer-IR module.
#[derive(Debug, Default)]
pub struct OptModule {
    /// Functions in definition order.
    pub functions: PrimaryMap<OptFunctionId, OptFunction>,
}
