//! Mid-level intermediate representation.
//!
//! A stack-based, typed-opcode IR sitting between the analyzed AST and the
//! SSA optimizer IR. Each function is a flat instruction vector; branch
//! operands are instruction indices patched in by the translator. A module
//! also carries global data declarations, the string-literal table, interned
//! bit-precise constants and inline-assembly templates.

pub mod translate;

use crate::bigint::BigInt;
use crate::entity::PrimaryMap;
use crate::entity_ref;
use crate::strings::{StringId, StringPool};
use crate::types::TypeId;

entity_ref! {
    /// Reference to an IR function.
    pub struct FunctionId("irfn")
}

entity_ref! {
    /// Reference to a local variable slot within a function.
    pub struct LocalId("local")
}

entity_ref! {
    /// Reference to an interned bit-precise constant.
    pub struct BigIntId("bi")
}

entity_ref! {
    /// Reference to an inline-assembly template.
    pub struct AsmTemplateId("asm")
}

/// Integer operation width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpWidth {
    /// 8-bit.
    W8,
    /// 16-bit.
    W16,
    /// 32-bit.
    W32,
    /// 64-bit.
    W64,
}

impl OpWidth {
    /// Width for an integral size in bytes.
    pub fn from_size(size: u64) -> Self {
        match size {
            1 => OpWidth::W8,
            2 => OpWidth::W16,
            4 => OpWidth::W32,
            _ => OpWidth::W64,
        }
    }

    /// Size in bytes.
    pub fn size(self) -> u64 {
        match self {
            OpWidth::W8 => 1,
            OpWidth::W16 => 2,
            OpWidth::W32 => 4,
            OpWidth::W64 => 8,
        }
    }
}

/// Comparison kinds carried by compare opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// `==`.
    Equal,
    /// `!=`.
    NotEqual,
    /// Signed `<`.
    SignedLess,
    /// Signed `<=`.
    SignedLessOrEqual,
    /// Signed `>`.
    SignedGreater,
    /// Signed `>=`.
    SignedGreaterOrEqual,
    /// Unsigned `<`.
    Below,
    /// Unsigned `<=`.
    BelowOrEqual,
    /// Unsigned `>`.
    Above,
    /// Unsigned `>=`.
    AboveOrEqual,
}

impl CmpOp {
    /// The comparison with operands swapped.
    pub fn swapped(self) -> Self {
        match self {
            CmpOp::Equal => CmpOp::Equal,
            CmpOp::NotEqual => CmpOp::NotEqual,
            CmpOp::SignedLess => CmpOp::SignedGreater,
            CmpOp::SignedLessOrEqual => CmpOp::SignedGreaterOrEqual,
            CmpOp::SignedGreater => CmpOp::SignedLess,
            CmpOp::SignedGreaterOrEqual => CmpOp::SignedLessOrEqual,
            CmpOp::Below => CmpOp::Above,
            CmpOp::BelowOrEqual => CmpOp::AboveOrEqual,
            CmpOp::Above => CmpOp::Below,
            CmpOp::AboveOrEqual => CmpOp::BelowOrEqual,
        }
    }
}

/// Floating-point operation width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    /// `float`.
    F32,
    /// `double`.
    F64,
    /// 80-bit `long double`.
    F80,
}

/// Memory ordering for atomic opcodes; `SeqCst` is encoded as 5 in the
/// libatomic call ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOrder {
    /// Sequentially consistent.
    SeqCst,
}

impl MemoryOrder {
    /// The libatomic encoding of this ordering.
    pub fn encoding(self) -> i64 {
        match self {
            MemoryOrder::SeqCst => 5,
        }
    }
}

/// One stack-IR instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum IrOp {
    /// Does nothing.
    Nop,
    /// Push a signed integer constant.
    IntConst(i64),
    /// Push an unsigned integer constant.
    UIntConst(u64),
    /// Push a `float` constant.
    F32Const(f32),
    /// Push a `double` constant.
    F64Const(f64),
    /// Push a `long double` constant (host double precision).
    LongDoubleConst(f64),
    /// Push a pointer to an interned bit-precise constant.
    BigIntConst(BigIntId),
    /// Push the address of an interned string literal.
    StringAddr(StringId),
    /// Push the address of a named global object or function.
    GlobalAddr {
        /// Symbol name.
        name: String,
        /// Constant byte offset.
        offset: i64,
    },
    /// Push the address of a local variable slot.
    LocalAddr(LocalId),
    /// Duplicate the `n`-th stack entry from the top onto the top.
    Pick(u32),
    /// Exchange the top entry with the `n`-th from the top.
    Xchg(u32),
    /// Discard the top entry.
    Pop,
    /// Load a sign/zero-extended integer through the address on top.
    Load {
        /// Access width.
        width: OpWidth,
        /// Sign-extend on load.
        signed: bool,
        /// Volatile access (never elided or reordered).
        volatile: bool,
    },
    /// Store the value below the address on top (`[value, addr] -> []`).
    Store {
        /// Access width.
        width: OpWidth,
        /// Volatile access.
        volatile: bool,
    },
    /// Load a `float`/`double`/`long double` value.
    LoadFloat {
        /// Access width.
        width: FloatWidth,
        /// Volatile access.
        volatile: bool,
    },
    /// Store a `float`/`double`/`long double` value.
    StoreFloat {
        /// Access width.
        width: FloatWidth,
        /// Volatile access.
        volatile: bool,
    },
    /// Copy `size` bytes from the source address on top to the destination
    /// address below it.
    CopyMemory {
        /// Bytes to copy.
        size: u64,
    },
    /// Zero `size` bytes at the address on top.
    ZeroMemory {
        /// Bytes to clear.
        size: u64,
    },
    /// Extract a bitfield from the integer on top.
    BitExtract {
        /// Bit offset within the loaded storage unit.
        offset: u64,
        /// Field width in bits.
        width: u64,
        /// Sign-extend the extracted field.
        signed: bool,
    },
    /// Insert the value on top into the bitfield of the integer below it.
    BitInsert {
        /// Bit offset within the storage unit.
        offset: u64,
        /// Field width in bits.
        width: u64,
    },
    /// Integer add of the two top entries.
    IntAdd(OpWidth),
    /// Integer subtract.
    IntSub(OpWidth),
    /// Integer multiply.
    IntMul {
        /// Operation width.
        width: OpWidth,
        /// Signed multiply.
        signed: bool,
    },
    /// Integer divide.
    IntDiv {
        /// Operation width.
        width: OpWidth,
        /// Signed divide.
        signed: bool,
    },
    /// Integer remainder.
    IntMod {
        /// Operation width.
        width: OpWidth,
        /// Signed remainder.
        signed: bool,
    },
    /// Bitwise and.
    IntAnd(OpWidth),
    /// Bitwise or.
    IntOr(OpWidth),
    /// Bitwise xor.
    IntXor(OpWidth),
    /// Shift left.
    IntShl(OpWidth),
    /// Logical shift right.
    IntShr(OpWidth),
    /// Arithmetic shift right.
    IntSar(OpWidth),
    /// Two's-complement negation.
    IntNeg(OpWidth),
    /// Bitwise complement.
    IntNot(OpWidth),
    /// Integer comparison producing 0/1.
    IntCmp {
        /// Operation width.
        width: OpWidth,
        /// Comparison kind.
        op: CmpOp,
    },
    /// Logical negation of a 0/1 value.
    BoolNot,
    /// Sign-extend a narrower value in a 64-bit slot.
    SignExtend(OpWidth),
    /// Zero-extend a narrower value in a 64-bit slot.
    ZeroExtend(OpWidth),
    /// Floating add.
    FloatAdd(FloatWidth),
    /// Floating subtract.
    FloatSub(FloatWidth),
    /// Floating multiply.
    FloatMul(FloatWidth),
    /// Floating divide.
    FloatDiv(FloatWidth),
    /// Floating negate.
    FloatNeg(FloatWidth),
    /// Floating comparison producing 0/1.
    FloatCmp {
        /// Operation width.
        width: FloatWidth,
        /// Comparison kind (`SignedLess` family reads as ordered below).
        op: CmpOp,
    },
    /// Integer to floating conversion.
    IntToFloat {
        /// Destination width.
        to: FloatWidth,
        /// Source is signed.
        signed: bool,
    },
    /// Floating to integer conversion (truncation).
    FloatToInt {
        /// Source width.
        from: FloatWidth,
        /// Destination is signed.
        signed: bool,
    },
    /// Floating to floating conversion.
    FloatConvert {
        /// Source width.
        from: FloatWidth,
        /// Destination width.
        to: FloatWidth,
    },
    /// Bit-precise integer binary operation through the runtime
    /// (`[writable_lhs_addr, rhs_addr] -> [lhs_addr]`, in place).
    BitintOp {
        /// Which runtime routine.
        op: BitintOpKind,
        /// Operand width in bits.
        width: u64,
    },
    /// Bit-precise unary operation in place (`[writable_addr] -> [addr]`).
    BitintUnary {
        /// Which runtime routine.
        op: BitintOpKind,
        /// Operand width in bits.
        width: u64,
    },
    /// Bit-precise shift (`[writable_addr, count] -> [addr]`).
    BitintShift {
        /// Which runtime routine.
        op: BitintOpKind,
        /// Operand width in bits.
        width: u64,
    },
    /// Bit-precise zero test (`[addr] -> [0/1]`).
    BitintIsZero {
        /// Operand width in bits.
        width: u64,
    },
    /// Complex multiply/divide through compiler-rt
    /// (`[result_addr, a_re, a_im, b_re, b_im] -> [result_addr]`).
    ComplexLibcall {
        /// Runtime symbol, e.g. `__muldc3`.
        name: String,
        /// Component width.
        width: FloatWidth,
    },
    /// Bit-precise width cast through the runtime, in place at the address
    /// on top of the stack.
    BitintCast {
        /// Sign-extending cast.
        signed: bool,
        /// Source width in bits.
        from: u64,
        /// Destination width in bits.
        to: u64,
    },
    /// Store a native integer into a bit-precise buffer
    /// (`[value, dst_addr] -> [dst_addr]`).
    BitintFromInt {
        /// Sign-extend the native value.
        signed: bool,
        /// Destination width in bits.
        width: u64,
    },
    /// Atomic integer load through the address on top.
    AtomicLoad {
        /// Access width.
        width: OpWidth,
        /// Memory ordering.
        order: MemoryOrder,
    },
    /// Atomic integer store.
    AtomicStore {
        /// Access width.
        width: OpWidth,
        /// Memory ordering.
        order: MemoryOrder,
    },
    /// Atomic compare-exchange (`[expected_addr, desired, obj_addr]`).
    AtomicCompareExchange {
        /// Access width.
        width: OpWidth,
        /// Memory ordering.
        order: MemoryOrder,
    },
    /// Atomic copy of a larger-than-register object.
    AtomicCopyMemory {
        /// Bytes to copy.
        size: u64,
        /// Memory ordering.
        order: MemoryOrder,
    },
    /// Overflow-checked integer arithmetic; pushes the wrapped result and
    /// stores the overflow flag through the address on top of the operands.
    OverflowArith {
        /// `+`, `-` or `*`.
        op: OverflowOp,
        /// Operation width.
        width: OpWidth,
        /// Signed variant.
        signed: bool,
    },
    /// Call a named function with `argc` stack arguments.
    Invoke {
        /// Callee symbol.
        name: String,
        /// Callee function type.
        signature: TypeId,
        /// Number of arguments popped.
        argc: u32,
        /// A memory-returned result's destination address sits below the
        /// arguments and is pushed back as the call's value.
        return_space: bool,
    },
    /// Call through the function pointer on top of the arguments.
    InvokeVirtual {
        /// Callee function type.
        signature: TypeId,
        /// Number of arguments popped (pointer excluded).
        argc: u32,
        /// See [`IrOp::Invoke::return_space`].
        return_space: bool,
    },
    /// `va_start` on the `va_list` address on top.
    VaStart,
    /// `va_end`.
    VaEnd,
    /// `va_copy` (`[src_addr, dst_addr]`).
    VaCopy,
    /// `va_arg` of the given type; pops the list address, pushes the value
    /// or its address for aggregates.
    VaArg {
        /// Requested argument type.
        ty: TypeId,
    },
    /// Unconditional jump to an instruction index.
    Jump(usize),
    /// Pop a value, jump when it is zero.
    BranchZero(usize),
    /// Pop a value, jump when it is non-zero.
    BranchNonZero(usize),
    /// Return the value on top of the stack.
    Return,
    /// Return without a value.
    ReturnVoid,
    /// Embedded inline-assembly fragment.
    InlineAsm(AsmTemplateId),
    /// Save the x87/SSE floating-point environment state.
    FenvSave,
    /// Restore the saved floating-point environment.
    FenvRestore,
}

/// Bit-precise runtime operation selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitintOpKind {
    /// `__kefir_bigint_add`.
    Add,
    /// `__kefir_bigint_subtract`.
    Subtract,
    /// `__kefir_bigint_signed_multiply` / unsigned variant.
    Multiply {
        /// Signed multiply.
        signed: bool,
    },
    /// `__kefir_bigint_signed_divide` / unsigned variant.
    Divide {
        /// Signed divide.
        signed: bool,
    },
    /// `__kefir_bigint_and`.
    And,
    /// `__kefir_bigint_or`.
    Or,
    /// `__kefir_bigint_xor`.
    Xor,
    /// `__kefir_bigint_left_shift`.
    ShiftLeft,
    /// `__kefir_bigint_right_shift`.
    ShiftRight,
    /// `__kefir_bigint_arithmetic_right_shift`.
    ArithmeticShiftRight,
    /// `__kefir_bigint_negate`.
    Negate,
    /// `__kefir_bigint_invert`.
    Invert,
    /// `__kefir_bigint_signed_compare` / unsigned variant; the runtime
    /// returns -1/0/1.
    Compare {
        /// Signed comparison.
        signed: bool,
    },
    /// Remainder of `__kefir_bigint_signed_divide` / unsigned variant.
    Remainder {
        /// Signed remainder.
        signed: bool,
    },
}

/// Overflow-checked arithmetic selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverflowOp {
    /// Checked add.
    Add,
    /// Checked subtract.
    Subtract,
    /// Checked multiply.
    Multiply,
}

/// Declared local variable slot.
#[derive(Debug, Clone)]
pub struct LocalDecl {
    /// Slot size in bytes.
    pub size: u64,
    /// Slot alignment in bytes.
    pub alignment: u64,
    /// Declared C type, when the slot backs a named object.
    pub ty: Option<TypeId>,
}

/// One translated function.
#[derive(Debug, Clone)]
pub struct IrFunction {
    /// Function symbol name.
    pub name: String,
    /// C function type.
    pub ty: TypeId,
    /// Local slots holding each parameter, in declaration order.
    pub parameters: Vec<LocalId>,
    /// All local slots (parameters included).
    pub locals: PrimaryMap<LocalId, LocalDecl>,
    /// Flat instruction vector.
    pub code: Vec<IrOp>,
    /// `(code index, source location)` markers, ascending by index; each
    /// marker covers the instructions up to the next one.
    pub source_map: Vec<(usize, crate::source::SourceLocation)>,
    /// Whether the function has internal linkage.
    pub internal: bool,
    /// Whether the function is variadic.
    pub variadic: bool,
}

impl IrFunction {
    /// Source location covering the instruction at `index`.
    pub fn location_at(&self, index: usize) -> crate::source::SourceLocation {
        match self
            .source_map
            .partition_point(|&(start, _)| start <= index)
            .checked_sub(1)
        {
            Some(marker) => self.source_map[marker].1,
            None => crate::source::SourceLocation::default(),
        }
    }
}

/// One item of a global-data initializer image.
#[derive(Debug, Clone, PartialEq)]
pub enum DataItem {
    /// Literal bytes.
    Bytes(Vec<u8>),
    /// Zero fill.
    Zero(u64),
    /// Pointer-sized relocation to a symbol plus offset.
    Address {
        /// Referenced symbol.
        symbol: String,
        /// Byte offset added to the symbol address.
        offset: i64,
    },
}

/// A global object declaration.
#[derive(Debug, Clone)]
pub struct GlobalData {
    /// Symbol name.
    pub name: String,
    /// Object type.
    pub ty: TypeId,
    /// Object size in bytes.
    pub size: u64,
    /// Object alignment in bytes.
    pub alignment: u64,
    /// Internal linkage (`static`)?
    pub internal: bool,
    /// Initializer image; `None` places the object in `.bss`.
    pub image: Option<Vec<DataItem>>,
}

/// An inline-assembly template registered with the module.
#[derive(Debug, Clone)]
pub struct AsmTemplate {
    /// Template text.
    pub template: String,
    /// Number of output operands.
    pub outputs: usize,
    /// Number of input operands.
    pub inputs: usize,
    /// Clobbered registers.
    pub clobbers: Vec<String>,
}

/// A translated translation unit.
#[derive(Debug, Default)]
pub struct IrModule {
    /// Functions in definition order.
    pub functions: PrimaryMap<FunctionId, IrFunction>,
    /// Global data declarations in definition order.
    pub globals: Vec<GlobalData>,
    /// Symbols referenced but not defined here.
    pub externals: Vec<String>,
    /// String-literal table.
    pub strings: StringPool,
    /// Interned bit-precise constants.
    pub bigints: PrimaryMap<BigIntId, BigInt>,
    /// Inline-assembly templates.
    pub asm_templates: PrimaryMap<AsmTemplateId, AsmTemplate>,
}

impl IrModule {
    /// Create an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an external symbol dependency once.
    pub fn declare_external(&mut self, name: &str) {
        if !self.externals.iter().any(|n| n == name) {
            self.externals.push(name.to_string());
        }
    }
}
