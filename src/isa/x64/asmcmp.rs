//! Virtual-register assembly IR ("asmcmp").
//!
//! The last IR before text: an ordered instruction stream whose operands
//! may still name virtual registers, local variables, spill slots and
//! labels. Instruction selection builds it, the register allocator and the
//! devirtualizer rewrite it in place, the pipeline passes peephole it, and
//! the emitter serializes it. Removal during rewriting replaces an
//! instruction with `Noop`; [`AsmcmpContext::compact`] drops the noops and
//! rebinds label positions.

use super::regs::PhysReg;
use crate::entity::PrimaryMap;
use crate::entity_ref;
use crate::ir::LocalId;
use std::collections::BTreeSet;
use rustc_hash::FxHashMap;

entity_ref! {
    /// Reference to a virtual register.
    pub struct VregId("v")
}

entity_ref! {
    /// Reference to a label.
    pub struct LabelId("l")
}

entity_ref! {
    /// Reference to a caller-saved-register stash.
    pub struct StashId("stash")
}

entity_ref! {
    /// Reference to an inline-assembly fragment.
    pub struct FragmentId("frag")
}

/// Virtual register kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VregKind {
    /// Allocates from the general-purpose bank.
    GeneralPurpose,
    /// Allocates from the SSE bank.
    FloatingPoint,
    /// Lives in two consecutive spill slots (80-bit x87 value).
    LongDouble,
    /// A pair of child virtual registers allocated independently.
    Pair(VregId, VregId),
    /// Pinned to one physical register.
    FixedRegister(PhysReg),
    /// Names a memory location directly; never takes a register.
    MemoryPointer {
        /// Base physical register of the location.
        base: PhysReg,
        /// Displacement.
        offset: i64,
    },
    /// Indirection through a spill slot that holds a pointer.
    SpillAreaIndirect,
    /// Backed by memory outside the frame (e.g. thread-locals).
    ExternalMemory,
    /// A known integer; materialized on use.
    ImmediateInteger(i64),
}

/// One virtual register.
#[derive(Debug, Clone)]
pub struct VregData {
    /// Kind.
    pub kind: VregKind,
}

/// Operand size/interpretation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandVariant {
    /// Natural width of the instruction.
    Default,
    /// 8-bit.
    B8,
    /// 16-bit.
    B16,
    /// 32-bit.
    B32,
    /// 64-bit.
    B64,
    /// 80-bit x87 extended.
    B80,
    /// Scalar single.
    FpSingle,
    /// Scalar double.
    FpDouble,
}

impl OperandVariant {
    /// AT&T/Intel pointer-size keyword, when one applies.
    pub fn pointer_keyword(self) -> Option<&'static str> {
        match self {
            OperandVariant::B8 => Some("byte"),
            OperandVariant::B16 => Some("word"),
            OperandVariant::B32 | OperandVariant::FpSingle => Some("dword"),
            OperandVariant::B64 | OperandVariant::FpDouble => Some("qword"),
            OperandVariant::B80 => Some("tbyte"),
            OperandVariant::Default => None,
        }
    }
}

/// Base of an indirect operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndirectBase {
    /// Physical register.
    PhysReg(PhysReg),
    /// Virtual register (resolved by devirtualization).
    Vreg(VregId),
    /// Internal label.
    InternalLabel(LabelId),
    /// External symbol.
    ExternalLabel(String),
    /// A local variable slot (resolved through the stack frame).
    LocalVar(LocalId),
    /// A spill-area slot index.
    SpillArea(usize),
    /// The saved hidden memory-return pointer slot.
    ImplicitParameter,
    /// A slot in the temporary area.
    TemporaryArea(usize),
    /// The variadic register save area.
    VarargSave,
}

/// Relocation flavor of a symbol reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolPosition {
    /// Plain absolute reference.
    Absolute,
    /// `@PLT`.
    Plt,
    /// `@GOTPCREL`.
    GotPcRel,
    /// `@TPOFF`.
    TpOff,
    /// `@GOTTPOFF`.
    GotTpOff,
    /// `@TLSGD`.
    TlsGd,
}

impl SymbolPosition {
    /// Assembler suffix, if any.
    pub fn suffix(self) -> &'static str {
        match self {
            SymbolPosition::Absolute => "",
            SymbolPosition::Plt => "@PLT",
            SymbolPosition::GotPcRel => "@GOTPCREL",
            SymbolPosition::TpOff => "@TPOFF",
            SymbolPosition::GotTpOff => "@GOTTPOFF",
            SymbolPosition::TlsGd => "@TLSGD",
        }
    }
}

/// Target of a RIP-relative operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RipTarget {
    /// Internal label.
    Internal(LabelId),
    /// External symbol.
    External(String),
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No operand.
    None,
    /// Signed immediate.
    SignedImm(i64),
    /// Unsigned immediate.
    UnsignedImm(u64),
    /// Physical register.
    PhysReg(PhysReg),
    /// Virtual register with a size variant.
    Vreg {
        /// Which virtual register.
        vreg: VregId,
        /// Operand width.
        variant: OperandVariant,
    },
    /// Memory operand.
    Indirect {
        /// Addressing base.
        base: IndirectBase,
        /// Displacement.
        offset: i64,
        /// Access width.
        variant: OperandVariant,
    },
    /// RIP-relative memory operand.
    RipIndirect {
        /// Referenced label or symbol.
        target: RipTarget,
        /// Access width.
        variant: OperandVariant,
        /// Relocation flavor.
        position: SymbolPosition,
    },
    /// Internal label (jump target).
    InternalLabel(LabelId),
    /// External symbol with relocation flavor and offset.
    ExternalLabel {
        /// Symbol name.
        name: String,
        /// Relocation flavor.
        position: SymbolPosition,
        /// Byte offset.
        offset: i64,
    },
    /// x87 stack slot `st(n)`.
    X87(usize),
    /// Stash table entry.
    Stash(StashId),
}

impl Value {
    /// Virtual register operand with the default variant.
    pub fn vreg(vreg: VregId) -> Self {
        Value::Vreg {
            vreg,
            variant: OperandVariant::Default,
        }
    }

    /// Virtual register operand with an explicit variant.
    pub fn vreg_sized(vreg: VregId, variant: OperandVariant) -> Self {
        Value::Vreg { vreg, variant }
    }

    /// The virtual register this operand reads/writes directly, if any.
    pub fn as_vreg(&self) -> Option<VregId> {
        match self {
            Value::Vreg { vreg, .. } => Some(*vreg),
            _ => None,
        }
    }

    /// Every virtual register this operand mentions.
    pub fn vregs(&self) -> impl Iterator<Item = VregId> {
        let direct = self.as_vreg();
        let indirect = match self {
            Value::Indirect {
                base: IndirectBase::Vreg(vreg),
                ..
            } => Some(*vreg),
            _ => None,
        };
        direct.into_iter().chain(indirect)
    }
}

/// Condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    /// Equal / zero.
    E,
    /// Not equal / not zero.
    Ne,
    /// Signed less.
    L,
    /// Signed less or equal.
    Le,
    /// Signed greater.
    G,
    /// Signed greater or equal.
    Ge,
    /// Unsigned below.
    B,
    /// Unsigned below or equal.
    Be,
    /// Unsigned above.
    A,
    /// Unsigned above or equal.
    Ae,
    /// Overflow.
    O,
    /// No overflow.
    No,
    /// Parity.
    P,
    /// No parity.
    Np,
    /// Sign.
    S,
    /// No sign.
    Ns,
}

impl Cond {
    /// Mnemonic suffix (`e`, `ne`, ...).
    pub fn suffix(self) -> &'static str {
        match self {
            Cond::E => "e",
            Cond::Ne => "ne",
            Cond::L => "l",
            Cond::Le => "le",
            Cond::G => "g",
            Cond::Ge => "ge",
            Cond::B => "b",
            Cond::Be => "be",
            Cond::A => "a",
            Cond::Ae => "ae",
            Cond::O => "o",
            Cond::No => "no",
            Cond::P => "p",
            Cond::Np => "np",
            Cond::S => "s",
            Cond::Ns => "ns",
        }
    }

    /// The negated condition.
    pub fn invert(self) -> Self {
        match self {
            Cond::E => Cond::Ne,
            Cond::Ne => Cond::E,
            Cond::L => Cond::Ge,
            Cond::Le => Cond::G,
            Cond::G => Cond::Le,
            Cond::Ge => Cond::L,
            Cond::B => Cond::Ae,
            Cond::Be => Cond::A,
            Cond::A => Cond::Be,
            Cond::Ae => Cond::B,
            Cond::O => Cond::No,
            Cond::No => Cond::O,
            Cond::P => Cond::Np,
            Cond::Np => Cond::P,
            Cond::S => Cond::Ns,
            Cond::Ns => Cond::S,
        }
    }
}

/// Asmcmp opcodes: a handful of virtual opcodes consumed before emission,
/// and the machine instructions the emitter prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Opcode {
    // Virtual opcodes.
    VirtualRegisterLink,
    TouchVirtualRegister,
    FunctionPrologue,
    FunctionEpilogue,
    Noop,
    StashActivate,
    StashDeactivate,
    VirtualBlockBegin,
    VirtualBlockEnd,
    VregLifetimeRangeBegin,
    VregLifetimeRangeEnd,
    InlineAssembly,
    DataWord,
    // Data movement.
    Mov,
    Movabs,
    Movsx,
    Movzx,
    Lea,
    Push,
    Pop,
    // Integer ALU.
    Add,
    Sub,
    Imul,
    Imul3,
    Mul,
    Div,
    Idiv,
    Cdq,
    Cqo,
    Neg,
    Not,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Cmp,
    Test,
    SetCc(Cond),
    Cmov(Cond),
    // Control flow.
    Jmp,
    Jcc(Cond),
    Call,
    Ret,
    // String operations.
    Cld,
    RepMovsb,
    RepStosb,
    // SSE.
    Movd,
    Movq,
    Movss,
    Movsd,
    Addss,
    Addsd,
    Subss,
    Subsd,
    Mulss,
    Mulsd,
    Divss,
    Divsd,
    Pxor,
    Xorps,
    Xorpd,
    Ucomiss,
    Ucomisd,
    Cvtsi2ss,
    Cvtsi2sd,
    Cvttss2si,
    Cvttsd2si,
    Cvtss2sd,
    Cvtsd2ss,
    // x87.
    Fld,
    Fild,
    Fldz,
    Fld1,
    Fstp,
    Fadd,
    Faddp,
    Fsubp,
    Fsubrp,
    Fmul,
    Fmulp,
    Fdivp,
    Fdivrp,
    Fchs,
    Fxch,
    Fucomip,
    Fisttp,
    Fstcw,
    Fldcw,
    Fnstenv,
    Fldenv,
    Fninit,
    Stmxcsr,
    Ldmxcsr,
}

/// Static description of an opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    /// Assembler mnemonic (without condition suffixes).
    pub mnemonic: &'static str,
    /// Maximum operand count.
    pub arity: u8,
    /// True for the virtual opcodes removed before emission.
    pub virtual_op: bool,
}

impl Opcode {
    /// Describe this opcode.
    pub fn info(self) -> OpcodeInfo {
        macro_rules! info {
            ($mnemonic:expr, $arity:expr, $virtual_op:expr) => {
                OpcodeInfo {
                    mnemonic: $mnemonic,
                    arity: $arity,
                    virtual_op: $virtual_op,
                }
            };
        }
        use Opcode::*;
        match self {
            VirtualRegisterLink => info!("<link>", 2, true),
            TouchVirtualRegister => info!("<touch>", 1, true),
            FunctionPrologue => info!("<prologue>", 0, true),
            FunctionEpilogue => info!("<epilogue>", 0, true),
            Noop => info!("<noop>", 0, true),
            StashActivate => info!("<stash+>", 1, true),
            StashDeactivate => info!("<stash->", 1, true),
            VirtualBlockBegin => info!("<vblock+>", 1, true),
            VirtualBlockEnd => info!("<vblock->", 1, true),
            VregLifetimeRangeBegin => info!("<life+>", 1, true),
            VregLifetimeRangeEnd => info!("<life->", 1, true),
            InlineAssembly => info!("<asm>", 1, true),
            DataWord => info!(".word", 1, false),
            Mov => info!("mov", 2, false),
            Movabs => info!("movabs", 2, false),
            Movsx => info!("movsx", 2, false),
            Movzx => info!("movzx", 2, false),
            Lea => info!("lea", 2, false),
            Push => info!("push", 1, false),
            Pop => info!("pop", 1, false),
            Add => info!("add", 2, false),
            Sub => info!("sub", 2, false),
            Imul => info!("imul", 2, false),
            Imul3 => info!("imul", 3, false),
            Mul => info!("mul", 1, false),
            Div => info!("div", 1, false),
            Idiv => info!("idiv", 1, false),
            Cdq => info!("cdq", 0, false),
            Cqo => info!("cqo", 0, false),
            Neg => info!("neg", 1, false),
            Not => info!("not", 1, false),
            And => info!("and", 2, false),
            Or => info!("or", 2, false),
            Xor => info!("xor", 2, false),
            Shl => info!("shl", 2, false),
            Shr => info!("shr", 2, false),
            Sar => info!("sar", 2, false),
            Cmp => info!("cmp", 2, false),
            Test => info!("test", 2, false),
            SetCc(_) => info!("set", 1, false),
            Cmov(_) => info!("cmov", 2, false),
            Jmp => info!("jmp", 1, false),
            Jcc(_) => info!("j", 1, false),
            Call => info!("call", 1, false),
            Ret => info!("ret", 0, false),
            Cld => info!("cld", 0, false),
            RepMovsb => info!("rep movsb", 0, false),
            RepStosb => info!("rep stosb", 0, false),
            Movd => info!("movd", 2, false),
            Movq => info!("movq", 2, false),
            Movss => info!("movss", 2, false),
            Movsd => info!("movsd", 2, false),
            Addss => info!("addss", 2, false),
            Addsd => info!("addsd", 2, false),
            Subss => info!("subss", 2, false),
            Subsd => info!("subsd", 2, false),
            Mulss => info!("mulss", 2, false),
            Mulsd => info!("mulsd", 2, false),
            Divss => info!("divss", 2, false),
            Divsd => info!("divsd", 2, false),
            Pxor => info!("pxor", 2, false),
            Xorps => info!("xorps", 2, false),
            Xorpd => info!("xorpd", 2, false),
            Ucomiss => info!("ucomiss", 2, false),
            Ucomisd => info!("ucomisd", 2, false),
            Cvtsi2ss => info!("cvtsi2ss", 2, false),
            Cvtsi2sd => info!("cvtsi2sd", 2, false),
            Cvttss2si => info!("cvttss2si", 2, false),
            Cvttsd2si => info!("cvttsd2si", 2, false),
            Cvtss2sd => info!("cvtss2sd", 2, false),
            Cvtsd2ss => info!("cvtsd2ss", 2, false),
            Fld => info!("fld", 1, false),
            Fild => info!("fild", 1, false),
            Fldz => info!("fldz", 0, false),
            Fld1 => info!("fld1", 0, false),
            Fstp => info!("fstp", 1, false),
            Fadd => info!("fadd", 2, false),
            Faddp => info!("faddp", 0, false),
            Fsubp => info!("fsubp", 0, false),
            Fsubrp => info!("fsubrp", 0, false),
            Fmul => info!("fmul", 2, false),
            Fmulp => info!("fmulp", 0, false),
            Fdivp => info!("fdivp", 0, false),
            Fdivrp => info!("fdivrp", 0, false),
            Fchs => info!("fchs", 0, false),
            Fxch => info!("fxch", 1, false),
            Fucomip => info!("fucomip", 1, false),
            Fisttp => info!("fisttp", 1, false),
            Fstcw => info!("fstcw", 1, false),
            Fldcw => info!("fldcw", 1, false),
            Fnstenv => info!("fnstenv", 1, false),
            Fldenv => info!("fldenv", 1, false),
            Fninit => info!("fninit", 0, false),
            Stmxcsr => info!("stmxcsr", 1, false),
            Ldmxcsr => info!("ldmxcsr", 1, false),
        }
    }
}

/// One asmcmp instruction.
#[derive(Debug, Clone)]
pub struct Inst {
    /// Opcode.
    pub opcode: Opcode,
    /// Up to three operands.
    pub args: [Value; 3],
    /// Labels attached in front of this instruction.
    pub labels: Vec<LabelId>,
    /// Source location for the emitter's line-mapping directives.
    pub location: crate::source::SourceLocation,
}

impl Inst {
    /// Operands that are actually present.
    pub fn present_args(&self) -> impl Iterator<Item = &Value> {
        self.args.iter().filter(|value| !matches!(value, Value::None))
    }
}

/// A label.
#[derive(Debug, Clone, Default)]
pub struct LabelData {
    /// Index of the instruction the label precedes; `None` while detached.
    pub position: Option<usize>,
    /// The label must survive even when unreferenced (e.g. it anchors
    /// data or is the target of an external relocation).
    pub external_dependencies: bool,
    /// Public aliases emitted for this position.
    pub public: Vec<String>,
}

/// Caller-saved-register stash descriptor; the devirtualizer fills in the
/// register/slot pairs once allocations are known.
#[derive(Debug, Clone, Default)]
pub struct StashData {
    /// `(register, spill slot)` pairs saved around the call.
    pub saved: Vec<(PhysReg, usize)>,
}

/// Register preallocation attached to a virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preallocation {
    /// Prefer sharing an allocation with another vreg.
    SameAs(VregId),
    /// Prefer one physical register.
    Hint(PhysReg),
    /// Mandate one physical register.
    Requirement(PhysReg),
}

impl Preallocation {
    fn strength(self) -> u8 {
        match self {
            Preallocation::SameAs(_) => 0,
            Preallocation::Hint(_) => 1,
            Preallocation::Requirement(_) => 2,
        }
    }
}

/// The asmcmp container for one function.
#[derive(Debug)]
pub struct AsmcmpContext {
    /// Function symbol.
    pub function_name: String,
    /// Instruction stream.
    pub instrs: Vec<Inst>,
    /// Label table.
    pub labels: PrimaryMap<LabelId, LabelData>,
    /// Virtual register table.
    pub vregs: PrimaryMap<VregId, VregData>,
    /// Stash table.
    pub stashes: PrimaryMap<StashId, StashData>,
    /// Inline-assembly fragments.
    pub fragments: PrimaryMap<FragmentId, String>,
    /// Register preallocations.
    pub preallocation: FxHashMap<VregId, Preallocation>,
    /// Referenced external symbols.
    pub externals: BTreeSet<String>,
    /// Labels waiting to be attached to the next pushed instruction.
    pending_labels: Vec<LabelId>,
    /// Location stamped onto pushed instructions.
    current_location: crate::source::SourceLocation,
}

impl AsmcmpContext {
    /// Create an empty context for `function_name`.
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            instrs: Vec::new(),
            labels: PrimaryMap::new(),
            vregs: PrimaryMap::new(),
            stashes: PrimaryMap::new(),
            fragments: PrimaryMap::new(),
            preallocation: FxHashMap::default(),
            externals: BTreeSet::new(),
            pending_labels: Vec::new(),
            current_location: crate::source::SourceLocation::default(),
        }
    }

    /// Allocate a virtual register.
    pub fn new_vreg(&mut self, kind: VregKind) -> VregId {
        self.vregs.push(VregData { kind })
    }

    /// Allocate a detached label.
    pub fn new_label(&mut self) -> LabelId {
        self.labels.push(LabelData::default())
    }

    /// Attach `label` in front of the next pushed instruction.
    pub fn bind_label(&mut self, label: LabelId) {
        self.pending_labels.push(label);
    }

    /// Set the source location stamped onto subsequently pushed
    /// instructions.
    pub fn set_location(&mut self, location: crate::source::SourceLocation) {
        self.current_location = location;
    }

    /// Append an instruction, attaching any pending labels.
    pub fn push(&mut self, opcode: Opcode, args: [Value; 3]) -> usize {
        let index = self.instrs.len();
        let labels = std::mem::take(&mut self.pending_labels);
        for &label in &labels {
            self.labels[label].position = Some(index);
        }
        self.instrs.push(Inst {
            opcode,
            args,
            labels,
            location: self.current_location,
        });
        index
    }

    /// Append a no-operand instruction.
    pub fn push0(&mut self, opcode: Opcode) -> usize {
        self.push(opcode, [Value::None, Value::None, Value::None])
    }

    /// Append a one-operand instruction.
    pub fn push1(&mut self, opcode: Opcode, a: Value) -> usize {
        self.push(opcode, [a, Value::None, Value::None])
    }

    /// Append a two-operand instruction.
    pub fn push2(&mut self, opcode: Opcode, a: Value, b: Value) -> usize {
        self.push(opcode, [a, b, Value::None])
    }

    /// Record an external symbol dependency.
    pub fn declare_external(&mut self, name: &str) {
        self.externals.insert(name.to_string());
    }

    /// Attach a preallocation, keeping the strongest one per vreg.
    pub fn preallocate(&mut self, vreg: VregId, preallocation: Preallocation) {
        match self.preallocation.get(&vreg) {
            Some(existing) if existing.strength() >= preallocation.strength() => {}
            _ => {
                self.preallocation.insert(vreg, preallocation);
            }
        }
    }

    /// Next real (non-noop) instruction index strictly after `index`.
    pub fn next_real(&self, index: usize) -> Option<usize> {
        (index + 1..self.instrs.len()).find(|&i| self.instrs[i].opcode != Opcode::Noop)
    }

    /// Replace an instruction with `Noop`, keeping its labels in place.
    pub fn remove(&mut self, index: usize) {
        self.instrs[index].opcode = Opcode::Noop;
        self.instrs[index].args = [Value::None, Value::None, Value::None];
    }

    /// Drop `Noop` instructions, migrating attached labels to the next
    /// surviving instruction and rebinding label positions.
    pub fn compact(&mut self) {
        let mut surviving: Vec<Inst> = Vec::with_capacity(self.instrs.len());
        let mut carried: Vec<LabelId> = Vec::new();
        for inst in self.instrs.drain(..) {
            if inst.opcode == Opcode::Noop {
                carried.extend(inst.labels);
                continue;
            }
            let mut inst = inst;
            if !carried.is_empty() {
                let mut labels = std::mem::take(&mut carried);
                labels.extend(std::mem::take(&mut inst.labels));
                inst.labels = labels;
            }
            surviving.push(inst);
        }
        // A trailing noop run leaves labels dangling past the stream end;
        // keep the final instruction alive instead (the passes guarantee it
        // by rewriting a to-be-dropped final instruction to a noop only
        // when nothing is attached).
        if !carried.is_empty() {
            surviving.push(Inst {
                opcode: Opcode::Noop,
                args: [Value::None, Value::None, Value::None],
                labels: carried,
                location: crate::source::SourceLocation::default(),
            });
        }
        for (index, inst) in surviving.iter().enumerate() {
            for &label in &inst.labels {
                self.labels[label].position = Some(index);
            }
        }
        self.instrs = surviving;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_attach_to_next_instruction() {
        let mut ctx = AsmcmpContext::new("f");
        ctx.push0(Opcode::FunctionPrologue);
        let label = ctx.new_label();
        ctx.bind_label(label);
        let target = ctx.push2(Opcode::Mov, Value::PhysReg(PhysReg::Rax), Value::SignedImm(1));
        assert_eq!(ctx.labels[label].position, Some(target));
        assert_eq!(ctx.instrs[target].labels, vec![label]);
    }

    #[test]
    fn compact_migrates_labels() {
        let mut ctx = AsmcmpContext::new("f");
        ctx.push0(Opcode::FunctionPrologue);
        let label = ctx.new_label();
        ctx.bind_label(label);
        ctx.push0(Opcode::Noop);
        ctx.push0(Opcode::Ret);
        ctx.instrs[1].opcode = Opcode::Noop;
        ctx.compact();
        assert_eq!(ctx.instrs.len(), 2);
        assert_eq!(ctx.labels[label].position, Some(1));
        assert_eq!(ctx.instrs[1].opcode, Opcode::Ret);
    }

    #[test]
    fn strongest_preallocation_wins() {
        let mut ctx = AsmcmpContext::new("f");
        let v = ctx.new_vreg(VregKind::GeneralPurpose);
        ctx.preallocate(v, Preallocation::Hint(PhysReg::Rcx));
        ctx.preallocate(v, Preallocation::Requirement(PhysReg::Rax));
        ctx.preallocate(v, Preallocation::Hint(PhysReg::Rdx));
        assert_eq!(
            ctx.preallocation.get(&v),
            Some(&Preallocation::Requirement(PhysReg::Rax))
        );
    }
}
